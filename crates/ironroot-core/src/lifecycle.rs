use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Orchestrator phases. `Cleanup` is reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Init,
    Configure,
    ValidateOnly,
    PivotCheck,
    Pivot,
    Stage,
    FinalHealthCheck,
    Finalize,
    Cleanup,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Configure => "configure",
            Phase::ValidateOnly => "validate-only",
            Phase::PivotCheck => "pivot-check",
            Phase::Pivot => "pivot",
            Phase::Stage => "stage",
            Phase::FinalHealthCheck => "final-health-check",
            Phase::Finalize => "finalize",
            Phase::Cleanup => "cleanup",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub fn validate_transition(from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = match to {
        Phase::Cleanup => !matches!(
            from,
            Phase::ValidateOnly | Phase::Cleanup | Phase::Done | Phase::Failed
        ),
        _ => matches!(
            (from, to),
            (Phase::Init, Phase::Configure)
                | (Phase::Configure, Phase::ValidateOnly | Phase::PivotCheck)
                | (Phase::ValidateOnly, Phase::Done | Phase::Failed)
                | (
                    Phase::PivotCheck,
                    Phase::Pivot | Phase::Stage | Phase::FinalHealthCheck
                )
                | (Phase::Stage, Phase::Stage | Phase::FinalHealthCheck)
                | (Phase::FinalHealthCheck, Phase::Finalize)
                | (Phase::Cleanup, Phase::Done | Phase::Failed)
        ),
    };

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_path_is_valid() {
        let path = [
            Phase::Init,
            Phase::Configure,
            Phase::PivotCheck,
            Phase::Stage,
            Phase::Stage,
            Phase::FinalHealthCheck,
            Phase::Finalize,
            Phase::Cleanup,
            Phase::Done,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn validation_path_never_reaches_stages() {
        assert!(validate_transition(Phase::Configure, Phase::ValidateOnly).is_ok());
        assert!(validate_transition(Phase::ValidateOnly, Phase::Done).is_ok());
        assert!(validate_transition(Phase::ValidateOnly, Phase::Stage).is_err());
        assert!(validate_transition(Phase::ValidateOnly, Phase::Cleanup).is_err());
    }

    #[test]
    fn cleanup_reachable_from_every_working_phase() {
        for from in [
            Phase::Init,
            Phase::Configure,
            Phase::PivotCheck,
            Phase::Pivot,
            Phase::Stage,
            Phase::FinalHealthCheck,
            Phase::Finalize,
        ] {
            assert!(validate_transition(from, Phase::Cleanup).is_ok(), "{from}");
        }
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Phase::Init, Phase::Stage).is_err());
        assert!(validate_transition(Phase::Pivot, Phase::Stage).is_err());
        assert!(validate_transition(Phase::Stage, Phase::Finalize).is_err());
        assert!(validate_transition(Phase::Done, Phase::Cleanup).is_err());
        assert!(validate_transition(Phase::Cleanup, Phase::Cleanup).is_err());
        assert!(validate_transition(Phase::Finalize, Phase::Done).is_err());
    }

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(Phase::FinalHealthCheck.to_string(), "final-health-check");
        assert_eq!(
            serde_json::to_string(&Phase::PivotCheck).unwrap(),
            "\"pivot-check\""
        );
    }
}

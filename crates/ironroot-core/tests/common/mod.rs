#![allow(dead_code)]

use ironroot_config::InstallContext;
use ironroot_core::{HealthGate, HealthResult, Operator, Orchestrator};
use ironroot_stages::{RecordingRunner, SharedRunner, Stage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Answers named checks from a table; anything unlisted passes.
#[derive(Default)]
pub struct ScriptedGate {
    results: HashMap<String, HealthResult>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGate {
    pub fn with(mut self, name: &str, result: HealthResult) -> Self {
        self.results.insert(name.to_owned(), result);
        self
    }
}

impl HealthGate for ScriptedGate {
    fn check(&self, name: &str, _ctx: &InstallContext) -> HealthResult {
        self.calls.lock().unwrap().push(name.to_owned());
        self.results.get(name).cloned().unwrap_or(HealthResult::Pass)
    }
}

/// Records every question and gives a fixed answer.
pub struct ScriptedOperator {
    pub answer: bool,
    pub asked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOperator {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Arc::default(),
        }
    }
}

impl Operator for ScriptedOperator {
    fn confirm_continue(&self, stage: &str, _problem: &str) -> bool {
        self.asked.lock().unwrap().push(stage.to_owned());
        self.answer
    }
}

pub fn state_context(state_dir: &std::path::Path) -> InstallContext {
    let mut ctx = InstallContext::new();
    ctx.set("installer.state_dir", state_dir.display().to_string());
    ctx
}

pub fn orchestrator(stages: Vec<Box<dyn Stage>>, gate: ScriptedGate) -> Orchestrator {
    let runner: SharedRunner = Arc::new(RecordingRunner::new());
    Orchestrator::new(stages, Box::new(gate), runner)
}

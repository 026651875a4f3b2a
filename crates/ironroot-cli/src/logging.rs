use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

fn terminal_level(verbose: bool, trace: bool) -> &'static str {
    if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Terminal output filtered by `IRONROOT_LOG` (or the verbosity flags), plus
/// an append-only debug log at `log_path` when one is given.
///
/// Returns an error message if the log file cannot be opened; terminal
/// logging is still installed in that case.
pub fn init(verbose: bool, trace: bool, log_path: Option<&Path>) -> Result<(), String> {
    let filter = EnvFilter::try_from_env("IRONROOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(terminal_level(verbose, trace)));
    let terminal = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(filter);

    let mut file_error = None;
    let file = log_path.and_then(|path| {
        let opened = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path));
        match opened {
            Ok(f) => Some(
                fmt::layer()
                    .with_writer(Mutex::new(f))
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(LevelFilter::DEBUG),
            ),
            Err(e) => {
                file_error = Some(format!("cannot open log {}: {e}", path.display()));
                None
            }
        }
    });

    let _ = tracing_subscriber::registry()
        .with(terminal)
        .with(file)
        .try_init();

    file_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_flags_pick_level() {
        assert_eq!(terminal_level(false, false), "warn");
        assert_eq!(terminal_level(true, false), "debug");
        assert_eq!(terminal_level(true, true), "trace");
    }
}

mod commands;
mod logging;

use clap::Parser;
use commands::install::InstallArgs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ironroot",
    version,
    about = "Install a Debian system onto an encrypted ZFS root pool"
)]
struct Cli {
    /// Path to the install configuration (TOML). Prompted for when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit without touching any disk.
    #[arg(long, default_value_t = false)]
    validate: bool,

    /// Run in place instead of relocating into a tmpfs first.
    #[arg(long, default_value_t = false)]
    no_pivot: bool,

    /// Log every command instead of running it.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Never prompt; recoverable failures are accepted with a warning.
    #[arg(long, default_value_t = false)]
    unattended: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Context snapshot handed over by the installer that relocated us.
    #[arg(long, hide = true)]
    resume_context: Option<PathBuf>,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let result = if cli.validate {
        if let Err(e) = logging::init(cli.verbose, cli.trace, None) {
            eprintln!("warning: {e}");
        }
        commands::validate::run(cli.config.as_deref(), cli.unattended, cli.json)
    } else {
        commands::install::run(&InstallArgs {
            config: cli.config.as_deref(),
            resume_context: cli.resume_context.as_deref(),
            no_pivot: cli.no_pivot,
            dry_run: cli.dry_run,
            unattended: cli.unattended,
            json: cli.json,
            verbose: cli.verbose,
            trace: cli.trace,
        })
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

use crate::concurrency::shutdown_flag;
use crate::PivotError;
use ironroot_config::{keys, parse_size, ContextSnapshot, InstallContext};
use ironroot_stages::{ensure_reachable, run_checked, SharedRunner};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Set in the environment of the relocated installer to the pivot root.
pub const PIVOT_MARKER_ENV: &str = "IRONROOT_PIVOT_ROOT";

const DEFAULT_PIVOT_DIR: &str = "/run/ironroot/pivot";
const SNAPSHOT_FILE: &str = "context.json";
const STAGED_EXE: &str = "bin/ironroot";
const CHILD_LOG: &str = "work/install.log";
/// Name of the relocated installer's log once copied back out of the tmpfs.
pub const RELOCATED_LOG: &str = "relocated-install.log";

/// True when this process is the relocated installer: the marker is set and
/// the running executable lives below it.
pub fn is_relocated() -> bool {
    marker_matches(
        std::env::var_os(PIVOT_MARKER_ENV),
        std::env::current_exe().ok(),
    )
}

fn marker_matches(root: Option<OsString>, exe: Option<PathBuf>) -> bool {
    let (Some(root), Some(exe)) = (root, exe) else {
        return false;
    };
    if root.is_empty() {
        return false;
    }
    let root = PathBuf::from(root);
    let root = root.canonicalize().unwrap_or(root);
    exe.starts_with(&root)
}

fn ack_path(snapshot: &Path) -> PathBuf {
    snapshot.with_extension("ack")
}

/// Load the context handed over by the parent installer and acknowledge it.
///
/// The acknowledgement is written only after the snapshot checksum verifies,
/// so the parent never lets go of an install the child could not read.
pub fn resume_from(snapshot: &Path) -> Result<InstallContext, PivotError> {
    let ctx = ContextSnapshot::read_from_file(snapshot)?.verify()?;
    std::fs::write(ack_path(snapshot), format!("{}\n", std::process::id()))?;
    info!("resumed install context from {}", snapshot.display());
    Ok(ctx)
}

/// A running relocated installer.
pub trait PivotChild {
    /// Exit code if the child has finished.
    fn try_wait(&mut self) -> Result<Option<i32>, PivotError>;
    fn wait(&mut self) -> Result<i32, PivotError>;
    fn kill(&mut self) -> Result<(), PivotError>;
}

/// Side effects of relocating, separated so the protocol can be tested.
pub trait PivotEnvironment {
    fn is_relocated(&self) -> bool;
    /// Bytes of memory available for the tmpfs, if known.
    fn available_memory(&self) -> Option<u64>;
    fn ensure_network(&self, ctx: &InstallContext) -> Result<(), PivotError>;
    fn mount_tmpfs(&self, dir: &Path, size: u64) -> Result<(), PivotError>;
    fn unmount(&self, dir: &Path) -> Result<(), PivotError>;
    /// Copy the running installer below `dir`, returning the new path.
    fn stage_executable(&self, dir: &Path) -> Result<PathBuf, PivotError>;
    fn spawn(
        &self,
        exe: &Path,
        args: &[String],
        root: &Path,
    ) -> Result<Box<dyn PivotChild>, PivotError>;
}

/// Relocates the installer into a memory-backed root and hands the run over.
pub struct Pivot {
    env: Box<dyn PivotEnvironment>,
    child_args: Vec<String>,
    ack_timeout: Duration,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Pivot {
    pub fn new(env: Box<dyn PivotEnvironment>) -> Self {
        Self {
            env,
            child_args: Vec::new(),
            ack_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            shutdown: shutdown_flag(),
        }
    }

    /// Extra arguments passed through to the relocated installer.
    #[must_use]
    pub fn with_child_args(mut self, args: Vec<String>) -> Self {
        self.child_args = args;
        self
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Watch `flag` instead of the process-wide signal flag while waiting
    /// for the acknowledgement.
    #[must_use]
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn is_relocated(&self) -> bool {
        self.env.is_relocated()
    }

    /// Relocate and wait for the relocated installer to finish. Returns its
    /// exit code.
    ///
    /// Either the new root holds the executable and the verified context
    /// before the child starts, or the tmpfs is unmounted again and the
    /// error is returned.
    pub fn relocate(&self, ctx: &InstallContext) -> Result<i32, PivotError> {
        let dir = PathBuf::from(ctx.get(keys::PIVOT_DIR).unwrap_or(DEFAULT_PIVOT_DIR));
        let size_raw = ctx.require(keys::PIVOT_SIZE)?;
        let size = parse_size(size_raw).map_err(|_| PivotError::InvalidSize(size_raw.to_owned()))?;
        if let Some(available) = self.env.available_memory() {
            if available < size {
                return Err(PivotError::InsufficientMemory {
                    needed: size,
                    available,
                });
            }
        }

        self.env.ensure_network(ctx)?;
        self.env.mount_tmpfs(&dir, size)?;
        info!("pivot root mounted at {} ({size} bytes)", dir.display());

        let mut child = match self.stage_and_spawn(ctx, &dir) {
            Ok(child) => child,
            Err(e) => {
                self.abandon(&dir);
                return Err(e);
            }
        };

        if let Err(e) = self.await_ack(child.as_mut(), &dir.join(SNAPSHOT_FILE)) {
            if !matches!(e, PivotError::ChildExited(_)) {
                let _ = child.kill();
                let _ = child.wait();
            }
            self.abandon(&dir);
            return Err(e);
        }

        info!("relocated installer took over, waiting for it to finish");
        let code = child.wait();
        Self::keep_child_log(ctx, &dir);
        self.abandon(&dir);
        let code = code?;
        info!("relocated installer exited with {code}");
        Ok(code)
    }

    /// Copy the relocated installer's log next to ours before the tmpfs
    /// holding it goes away.
    fn keep_child_log(ctx: &InstallContext, dir: &Path) {
        let Some(work_dir) = ctx.get(keys::WORK_DIR) else {
            return;
        };
        let source = dir.join(CHILD_LOG);
        if !source.exists() {
            return;
        }
        let dest = Path::new(work_dir).join(RELOCATED_LOG);
        match std::fs::copy(&source, &dest) {
            Ok(_) => info!("relocated installer log kept at {}", dest.display()),
            Err(e) => warn!("failed to keep relocated installer log: {e}"),
        }
    }

    fn stage_and_spawn(
        &self,
        ctx: &InstallContext,
        dir: &Path,
    ) -> Result<Box<dyn PivotChild>, PivotError> {
        let exe = self.env.stage_executable(dir)?;

        let work_dir = dir.join("work");
        std::fs::create_dir_all(&work_dir)?;
        let mut handoff = ctx.clone();
        handoff.set(keys::WORK_DIR, work_dir.display().to_string());
        handoff.set(
            keys::LOG_PATH,
            dir.join(CHILD_LOG).display().to_string(),
        );

        let snapshot = dir.join(SNAPSHOT_FILE);
        let _ = std::fs::remove_file(ack_path(&snapshot));
        ContextSnapshot::capture(&handoff)?.write_to_file(&snapshot)?;
        // Read back so a truncated write fails here rather than in the child.
        ContextSnapshot::read_from_file(&snapshot)?.verify()?;
        debug!("context staged at {}", snapshot.display());

        let mut args = vec![
            "--resume-context".to_owned(),
            snapshot.display().to_string(),
        ];
        args.extend(self.child_args.iter().cloned());
        self.env.spawn(&exe, &args, dir)
    }

    fn await_ack(&self, child: &mut dyn PivotChild, snapshot: &Path) -> Result<(), PivotError> {
        let ack = ack_path(snapshot);
        let started = Instant::now();
        loop {
            if ack.exists() {
                return Ok(());
            }
            if let Some(code) = child.try_wait()? {
                return Err(PivotError::ChildExited(code));
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(PivotError::Cancelled);
            }
            if started.elapsed() >= self.ack_timeout {
                return Err(PivotError::AckTimeout(self.ack_timeout.as_secs()));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn abandon(&self, dir: &Path) {
        if let Err(e) = self.env.unmount(dir) {
            warn!("failed to unmount pivot root {}: {e}", dir.display());
        }
    }
}

/// Relocates for real: tmpfs via `mount`, the running executable copied in,
/// and a child process carrying the pivot marker.
pub struct SystemPivotEnvironment {
    runner: SharedRunner,
}

impl SystemPivotEnvironment {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

fn mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map(|kib| kib * 1024)
}

impl PivotEnvironment for SystemPivotEnvironment {
    fn is_relocated(&self) -> bool {
        is_relocated()
    }

    fn available_memory(&self) -> Option<u64> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| mem_available(&s))
    }

    fn ensure_network(&self, ctx: &InstallContext) -> Result<(), PivotError> {
        ensure_reachable(self.runner.as_ref(), ctx).map_err(|e| PivotError::Network(e.to_string()))
    }

    fn mount_tmpfs(&self, dir: &Path, size: u64) -> Result<(), PivotError> {
        std::fs::create_dir_all(dir)?;
        let target = dir.display().to_string();
        let options = format!("size={size},mode=0700");
        run_checked(
            self.runner.as_ref(),
            "mount",
            &["-t", "tmpfs", "-o", &options, "tmpfs", &target],
        )
        .map_err(|e| PivotError::Mount {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn unmount(&self, dir: &Path) -> Result<(), PivotError> {
        let target = dir.display().to_string();
        run_checked(self.runner.as_ref(), "umount", &[&target]).map_err(|e| PivotError::Mount {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn stage_executable(&self, dir: &Path) -> Result<PathBuf, PivotError> {
        use std::os::unix::fs::PermissionsExt;
        let current = std::env::current_exe()?;
        let dest = dir.join(STAGED_EXE);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&current, &dest).map_err(|e| {
            PivotError::Staging(format!("copy {} -> {}: {e}", current.display(), dest.display()))
        })?;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        Ok(dest)
    }

    fn spawn(
        &self,
        exe: &Path,
        args: &[String],
        root: &Path,
    ) -> Result<Box<dyn PivotChild>, PivotError> {
        let child = Command::new(exe)
            .args(args)
            .env(PIVOT_MARKER_ENV, root)
            .current_dir(root)
            .spawn()
            .map_err(PivotError::Spawn)?;
        info!("started relocated installer (pid {})", child.id());
        Ok(Box::new(SystemChild(child)))
    }
}

struct SystemChild(Child);

fn exit_code(status: std::process::ExitStatus) -> i32 {
    // Killed by a signal: report a generic failure.
    status.code().unwrap_or(1)
}

impl PivotChild for SystemChild {
    fn try_wait(&mut self) -> Result<Option<i32>, PivotError> {
        Ok(self.0.try_wait()?.map(exit_code))
    }

    fn wait(&mut self) -> Result<i32, PivotError> {
        Ok(exit_code(self.0.wait()?))
    }

    fn kill(&mut self) -> Result<(), PivotError> {
        self.0.kill()?;
        Ok(())
    }
}

use crate::runner::{run_checked, CommandRunner, SharedRunner};
use crate::stage::{Criticality, Stage};
use crate::StageError;
use ironroot_config::{keys, InstallContext, NetworkMode};
use ironroot_ledger::ResourceLedger;
use std::path::Path;
use tracing::{info, warn};

pub const NETWORK_UNIT_PATH: &str = "etc/systemd/network/20-ironroot.network";

/// Writes the installed system's network configuration. A failure here
/// leaves a bootable system that needs console access, so it is
/// recoverable rather than fatal.
pub struct NetworkStage {
    runner: SharedRunner,
}

impl NetworkStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

/// systemd-networkd unit for `mode`, or `None` when networking is left
/// unconfigured.
pub fn render_network_unit(
    mode: NetworkMode,
    interface: Option<&str>,
    address: Option<&str>,
    gateway: Option<&str>,
) -> Option<String> {
    let name = interface.unwrap_or("en*");
    match mode {
        NetworkMode::None => None,
        NetworkMode::Dhcp => Some(format!("[Match]\nName={name}\n\n[Network]\nDHCP=yes\n")),
        NetworkMode::Static => {
            let mut unit = format!("[Match]\nName={name}\n\n[Network]\n");
            if let Some(address) = address {
                unit.push_str(&format!("Address={address}\n"));
            }
            if let Some(gateway) = gateway {
                unit.push_str(&format!("Gateway={gateway}\n"));
            }
            Some(unit)
        }
    }
}

impl Stage for NetworkStage {
    fn name(&self) -> &'static str {
        "network"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Recoverable
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[keys::NETWORK_MODE, keys::POOL_ALTROOT]
    }

    fn health_check(&self) -> Option<&str> {
        Some("network")
    }

    fn run(&self, ctx: &mut InstallContext, _ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let mode: NetworkMode = ctx.parse(keys::NETWORK_MODE)?;
        let altroot = ctx.require(keys::POOL_ALTROOT)?;
        let Some(unit) = render_network_unit(
            mode,
            ctx.get(keys::NETWORK_INTERFACE),
            ctx.get(keys::NETWORK_ADDRESS),
            ctx.get(keys::NETWORK_GATEWAY),
        ) else {
            info!("network mode none, leaving target unconfigured");
            return Ok(());
        };
        let runner = self.runner.as_ref();
        runner.write_file(&Path::new(altroot).join(NETWORK_UNIT_PATH), &unit)?;
        run_checked(
            runner,
            "chroot",
            &[altroot, "systemctl", "enable", "systemd-networkd"],
        )?;
        Ok(())
    }
}

/// Make sure `ctx`'s probe host answers, bringing up DHCP on the live
/// system once if it does not.
pub fn ensure_reachable(runner: &dyn CommandRunner, ctx: &InstallContext) -> Result<(), StageError> {
    let host = ctx.get(keys::NETWORK_PROBE_HOST).unwrap_or("deb.debian.org");
    if probe(runner, host) {
        return Ok(());
    }
    warn!("{host} unreachable, requesting a DHCP lease");
    let mut args = vec!["-1", "-w"];
    if let Some(interface) = ctx.get(keys::NETWORK_INTERFACE) {
        args.push(interface);
    }
    run_checked(runner, "dhcpcd", &args)?;
    if probe(runner, host) {
        Ok(())
    } else {
        Err(StageError::Unreachable(host.to_owned()))
    }
}

fn probe(runner: &dyn CommandRunner, host: &str) -> bool {
    runner
        .run("ping", &["-c", "1", "-W", "3", host])
        .is_ok_and(|out| out.success)
}

use std::path::Path;

use anyhow::{anyhow, bail, Context as _};
use aya::{include_bytes_aligned, Ebpf, EbpfLoader};
use kac_net_common::{BlockFlag, HookPoint, FLAG_MAP, TRACE_GLOBAL};
use log::{debug, info, warn};
use tokio::signal::{
    self,
    unix::{signal as unix_signal, SignalKind},
};

use crate::{
    config::DaemonConfig,
    hooks::{HookSet, TcHost},
    state::{FlagCell, MapCell},
    surface::{self, ControlNode, InstanceLock, BPFFS_ROOT, LOCK_PATH},
};

/// Owns the kill switch for as long as the process runs.
///
/// Start-up order is instance lock, flag, control node, hooks; nothing can
/// reach the flag before it holds `Allow`. Teardown runs in reverse.
pub struct Daemon {
    config: DaemonConfig,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let lock = InstanceLock::acquire(Path::new(LOCK_PATH))?;
        bump_memlock_rlimit();

        let mut ebpf = self.load()?;
        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            // This can happen if you remove all log statements from your eBPF program.
            warn!("failed to initialize eBPF logger: {}", e);
        }

        let map = ebpf
            .take_map(FLAG_MAP)
            .ok_or_else(|| anyhow!("map {FLAG_MAP} not found in eBPF object"))?;
        let mut cell = MapCell::new(map)?;
        cell.store(BlockFlag::Allow)
            .context("failed to initialise the block flag")?;

        // Nobody else holds the lock, so a node left in place is an orphan.
        surface::reclaim_stale(Path::new(BPFFS_ROOT))?;
        let node = ControlNode::create(self.config.surface, &cell)?;

        let mut host = match TcHost::new(ebpf, self.config.interfaces.clone()) {
            Ok(host) => host,
            Err(e) => {
                node.remove();
                return Err(e.into());
            }
        };
        let hooks = match HookSet::install(&mut host, &HookPoint::ALL) {
            Ok(hooks) => hooks,
            Err(e) => {
                node.remove();
                return Err(anyhow::Error::new(e).context("hook registration failed"));
            }
        };

        info!(
            "{} hooks on [{}], drop tracing {}",
            hooks.len(),
            host.interfaces().join(", "),
            if self.config.trace_drops { "on" } else { "off" }
        );
        println!("kac-net loaded. Control: {}", node.path().display());
        println!("Waiting for Ctrl-C...");

        let waited = shutdown_signal().await;

        println!("Exiting...");
        hooks.uninstall(&mut host);
        node.remove();
        drop(host);
        drop(cell);
        drop(lock);
        info!("kac-net unloaded");

        waited
    }

    fn load(&self) -> anyhow::Result<Ebpf> {
        let object = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/kac-net"));
        if object.is_empty() {
            bail!("kac-net was built without its eBPF object; rebuild with a nightly toolchain and bpf-linker installed");
        }

        let trace_drops = u8::from(self.config.trace_drops);
        EbpfLoader::new()
            .set_global(TRACE_GLOBAL, &trace_drops, true)
            .load(object)
            .context("failed to load eBPF object")
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res?,
        _ = terminate.recv() => debug!("SIGTERM received"),
    }
    Ok(())
}

// Bump the memlock rlimit. This is needed for older kernels that don't use the
// new memcg based accounting, see https://lwn.net/Articles/837122/
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}

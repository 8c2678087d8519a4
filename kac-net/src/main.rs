use std::{path::Path, process::ExitCode};

use clap::{Parser, Subcommand};
use kac_net::{
    client::{self, PinnedOpener},
    config::DaemonConfig,
    error::ClientError,
    runner::Daemon,
    surface::{SurfaceKind, BPFFS_ROOT},
};
use kac_net_common::BlockFlag;

#[derive(Debug, Parser)]
#[clap(name = "kac-net", about = "Host-wide network kill switch")]
struct Opt {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the hooks and serve the control node until interrupted.
    Run {
        /// Which control node layout to serve. Clients detect it on their own.
        #[clap(long, value_enum, default_value_t = SurfaceKind::Attribute)]
        surface: SurfaceKind,

        /// Interface to hook; repeat for more. Defaults to every interface, up or down.
        #[clap(short, long = "iface")]
        iface: Vec<String>,

        /// Log a rate-limited line for dropped packets.
        #[clap(long)]
        trace_drops: bool,
    },
    /// Check whether blocking is on.
    Status,
    /// Block all network traffic.
    On,
    /// Allow network traffic again.
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            let failed = e.use_stderr();
            let _ = e.print();
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match dispatch(opt).await {
        Ok(()) => ExitCode::SUCCESS,
        // Client messages already carry their cause.
        Err(e) if e.is::<ClientError>() => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(opt: Opt) -> anyhow::Result<()> {
    let root = Path::new(BPFFS_ROOT);
    match opt.command {
        Command::Run {
            surface,
            iface,
            trace_drops,
        } => {
            let config = DaemonConfig::resolve(surface, &iface, trace_drops)?;
            Daemon::new(config).run().await
        }
        Command::Status => {
            let status = client::status(&PinnedOpener, root)?;
            println!("{}", status.message());
            Ok(())
        }
        Command::On => switch(root, BlockFlag::Block),
        Command::Off => switch(root, BlockFlag::Allow),
    }
}

fn switch(root: &Path, flag: BlockFlag) -> anyhow::Result<()> {
    client::set(&PinnedOpener, root, flag)?;
    println!("{}", client::set_message(flag));
    Ok(())
}

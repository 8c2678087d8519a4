use std::{io, path::PathBuf};

use aya::{maps::MapError, pin::PinError, programs::ProgramError};
use kac_net_common::HookPoint;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("block flag map access failed: {0}")]
    Map(#[from] MapError),

    #[error("map `{0}` is not a u32 array")]
    NotAnArray(&'static str),

    #[error(transparent)]
    Pin(#[from] PinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("empty write")]
    Empty,

    #[error("write of {len} bytes exceeds the {limit}-byte limit")]
    TooLong { len: usize, limit: usize },

    #[error("invalid integer")]
    Invalid,

    #[error("integer out of range")]
    OutOfRange,

    #[error(transparent)]
    State(#[from] StateError),

    #[error("control node {} already exists; if no kac-net daemon is running, remove it by hand", .0.display())]
    NodeExists(PathBuf),

    #[error("another kac-net daemon is running (it holds {})", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to pin control node at {}: {source}", path.display())]
    Pin {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    #[error("failed to prepare control node {}: {source}", path.display())]
    Node {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("eBPF program `{0}` not found in object")]
    ProgramNotFound(&'static str),

    #[error("failed to load `{name}`: {source}")]
    Load {
        name: &'static str,
        #[source]
        source: ProgramError,
    },

    #[error("failed to attach {point} hook on {iface}: {source}")]
    Attach {
        point: HookPoint,
        iface: String,
        #[source]
        source: ProgramError,
    },

    #[error("{0} hook is already registered")]
    Duplicate(HookPoint),

    #[error("no interface to attach hooks to")]
    NoInterfaces,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("interface `{0}` does not exist or is down")]
    UnknownInterface(String),

    #[error("the host has no network interface")]
    NoInterfaces,
}

/// Failures of `kac-net status|on|off`. The messages are what the user sees.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Error: Control node {} not found.\nIs the kac-net daemon running (`kac-net run`)?", .0.display())]
    NotLoaded(PathBuf),

    #[error("Error: Permission denied.\nYou probably need to run this command with sudo.")]
    PermissionDenied,

    #[error("Error opening control node for {access}: {source}")]
    Open {
        access: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Error: Could not read from control node.")]
    EmptyRead,

    #[error("Error: Could not read from control node: {0}")]
    Read(#[source] ControlError),

    #[error("Error: Failed to write to control node: {0}")]
    Write(#[source] ControlError),

    #[error("Error: Failed to write to control node ({written} of {expected} bytes accepted).")]
    ShortWrite { written: usize, expected: usize },
}

//! Control surface: the byte-level read/write contract over the flag cell,
//! and the bpffs node that exposes it.
//!
//! Two interchangeable front ends exist. Both claim the name
//! [`NODE_NAME`] under bpffs, so only one can be live at a time:
//!
//! * [`SurfaceKind::Attribute`]: `kac_net/block_all`, strict integer writes.
//! * [`SurfaceKind::Proc`]: a single `kac_net` node, first-byte writes.

use std::{
    fs::{self, File, OpenOptions, Permissions},
    io,
    os::{fd::AsRawFd, unix::fs::PermissionsExt},
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use kac_net_common::BlockFlag;
use log::{info, warn};

use crate::{
    error::ControlError,
    state::{FlagCell, MapCell},
};

pub const BPFFS_ROOT: &str = "/sys/fs/bpf";
pub const NODE_NAME: &str = "kac_net";
pub const ATTRIBUTE_NAME: &str = "block_all";
/// Held by the live daemon. bpffs only stores pins, so this lives in /run.
pub const LOCK_PATH: &str = "/run/kac-net.lock";

/// Longest write accepted by either front end.
pub const MAX_WRITE_LEN: usize = 16;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SurfaceKind {
    /// `kac_net/block_all`, written as an integer (0 = off, other = on).
    #[default]
    Attribute,
    /// `kac_net`, anything not starting with '0' turns blocking on.
    Proc,
}

impl SurfaceKind {
    pub fn node_path_in(&self, root: &Path) -> PathBuf {
        match self {
            SurfaceKind::Attribute => root.join(NODE_NAME).join(ATTRIBUTE_NAME),
            SurfaceKind::Proc => root.join(NODE_NAME),
        }
    }

    /// Works out which front end owns the node under `root`: the attribute
    /// variant claims the name with a directory, the proc variant with the
    /// pin itself.
    pub fn detect_in(root: &Path) -> io::Result<SurfaceKind> {
        let claimed = fs::symlink_metadata(root.join(NODE_NAME))?;
        Ok(if claimed.is_dir() {
            SurfaceKind::Attribute
        } else {
            SurfaceKind::Proc
        })
    }

    /// Write access is root (and, for the attribute, group) only.
    pub fn mode(&self) -> u32 {
        match self {
            SurfaceKind::Attribute => 0o660,
            SurfaceKind::Proc => 0o644,
        }
    }

    /// Maps a write buffer to a flag without touching any state.
    pub fn classify(&self, buf: &[u8]) -> Result<BlockFlag, ControlError> {
        if buf.is_empty() {
            return Err(ControlError::Empty);
        }
        if buf.len() > MAX_WRITE_LEN {
            return Err(ControlError::TooLong {
                len: buf.len(),
                limit: MAX_WRITE_LEN,
            });
        }

        match self {
            SurfaceKind::Attribute => Ok(match parse_int(buf)? {
                0 => BlockFlag::Allow,
                _ => BlockFlag::Block,
            }),
            // Numeric or not, only the leading byte matters here.
            SurfaceKind::Proc => Ok(match buf.first() {
                Some(b'0') => BlockFlag::Allow,
                _ => BlockFlag::Block,
            }),
        }
    }
}

/// Integer parsing with the kernel's `kstrtoint(buf, 0, ..)` rules: optional
/// sign, `0x` for hex, a leading `0` for octal, one trailing newline.
fn parse_int(buf: &[u8]) -> Result<i32, ControlError> {
    let body = buf.strip_suffix(b"\n").unwrap_or(buf);
    let (negative, unsigned) = match body {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        _ => (false, body),
    };
    let (radix, digits) = match unsigned {
        [b'0', x, d, ..] if x.to_ascii_lowercase() == b'x' && d.is_ascii_hexdigit() => {
            (16, &unsigned[2..])
        }
        [b'0', ..] => (8, unsigned),
        _ => (10, unsigned),
    };
    if digits.is_empty() {
        return Err(ControlError::Invalid);
    }

    let mut value: i64 = 0;
    for &byte in digits {
        let digit = char::from(byte)
            .to_digit(radix)
            .ok_or(ControlError::Invalid)?;
        value = value
            .checked_mul(i64::from(radix))
            .and_then(|v| v.checked_add(i64::from(digit)))
            .ok_or(ControlError::OutOfRange)?;
    }
    if negative {
        value = -value;
    }
    i32::try_from(value).map_err(|_| ControlError::OutOfRange)
}

/// Read/write front end over a flag cell.
pub struct ControlSurface<C> {
    kind: SurfaceKind,
    cell: C,
}

impl<C: FlagCell> ControlSurface<C> {
    pub fn new(kind: SurfaceKind, cell: C) -> Self {
        Self { kind, cell }
    }

    /// `"1\n"` while blocking, `"0\n"` otherwise.
    pub fn show(&self) -> Result<String, ControlError> {
        Ok(format!("{}\n", self.cell.load()?))
    }

    /// Applies a write and returns the number of bytes consumed. Rejected
    /// input leaves the flag as it was.
    pub fn store(&mut self, buf: &[u8]) -> Result<usize, ControlError> {
        let flag = self.kind.classify(buf)?;
        self.cell.store(flag)?;

        match flag {
            BlockFlag::Block => info!("kac_net: network blocking enabled"),
            BlockFlag::Allow => info!("kac_net: network blocking disabled"),
        }
        Ok(buf.len())
    }

    pub fn into_inner(self) -> C {
        self.cell
    }
}

/// Fails if either front end already owns the name under `root`.
pub fn ensure_vacant(root: &Path) -> Result<(), ControlError> {
    let claimed = root.join(NODE_NAME);
    match fs::symlink_metadata(&claimed) {
        Ok(_) => Err(ControlError::NodeExists(claimed)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ControlError::Node {
            path: claimed,
            source,
        }),
    }
}

/// Exclusive `flock` on [`LOCK_PATH`] for as long as a daemon runs. The
/// kernel drops it when the process dies, however it dies.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, ControlError> {
        let node_error = |source| ControlError::Node {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(node_error)?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::WouldBlock => ControlError::AlreadyRunning(path.to_path_buf()),
                _ => node_error(err),
            });
        }
        Ok(Self { _file: file })
    }
}

/// Removes a node left behind by a daemon that died before tearing down.
/// Call only while holding the [`InstanceLock`]; returns whether anything
/// was removed.
pub fn reclaim_stale(root: &Path) -> Result<bool, ControlError> {
    let claimed = root.join(NODE_NAME);
    let removed = match fs::symlink_metadata(&claimed) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&claimed),
        Ok(_) => fs::remove_file(&claimed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => Err(e),
    };
    removed.map_err(|source| ControlError::Node {
        path: claimed.clone(),
        source,
    })?;

    warn!("removed stale control node {}", claimed.display());
    Ok(true)
}

/// The pinned flag map. Lives from daemon start until [`ControlNode::remove`].
#[derive(Debug)]
pub struct ControlNode {
    kind: SurfaceKind,
    claimed: PathBuf,
    path: PathBuf,
}

impl ControlNode {
    pub fn create(kind: SurfaceKind, cell: &MapCell) -> Result<Self, ControlError> {
        Self::create_in(kind, Path::new(BPFFS_ROOT), cell)
    }

    pub fn create_in(kind: SurfaceKind, root: &Path, cell: &MapCell) -> Result<Self, ControlError> {
        ensure_vacant(root)?;

        let claimed = root.join(NODE_NAME);
        let path = kind.node_path_in(root);
        if kind == SurfaceKind::Attribute {
            fs::create_dir(&claimed).map_err(|source| ControlError::Node {
                path: claimed.clone(),
                source,
            })?;
        }
        let node = Self {
            kind,
            claimed,
            path: path.clone(),
        };

        if let Err(source) = cell.pin(&path) {
            node.remove();
            return Err(ControlError::Pin { path, source });
        }
        if let Err(source) = fs::set_permissions(&path, Permissions::from_mode(kind.mode())) {
            node.remove();
            return Err(ControlError::Node { path, source });
        }

        info!("control node {} created (mode {:o})", path.display(), kind.mode());
        Ok(node)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unpins the map and drops the directory of the attribute variant.
    pub fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove {}: {}", self.path.display(), e);
            }
        }
        if self.kind == SurfaceKind::Attribute {
            if let Err(e) = fs::remove_dir(&self.claimed) {
                warn!("failed to remove {}: {}", self.claimed.display(), e);
            }
        }
    }
}

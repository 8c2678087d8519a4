//! `kac-net status|on|off`: one read or one write against the control node.

use std::{io, path::Path};

use kac_net_common::BlockFlag;

use crate::{
    error::ClientError,
    state::{FlagCell, MapCell},
    surface::{ControlSurface, SurfaceKind, NODE_NAME},
};

/// Opens the control node of a running daemon.
pub trait NodeOpener {
    type Cell: FlagCell;

    fn open(&self, path: &Path) -> io::Result<Self::Cell>;
}

/// Opens the map pinned in bpffs.
pub struct PinnedOpener;

impl NodeOpener for PinnedOpener {
    type Cell = MapCell;

    fn open(&self, path: &Path) -> io::Result<MapCell> {
        MapCell::from_pin(path).map_err(os_error)
    }
}

/// Digs the OS error out of an aya error so callers can tell "missing"
/// from "not allowed".
fn os_error<E: std::error::Error + 'static>(err: E) -> io::Error {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return match io_error.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(io_error.kind(), io_error.to_string()),
            };
        }
        source = cause.source();
    }
    io::Error::other(err.to_string())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn format(&self) -> &'static str {
        match self {
            Access::Read => "reading",
            Access::Write => "writing",
        }
    }
}

fn open_error(err: io::Error, path: &Path, access: Access) -> ClientError {
    match err.kind() {
        io::ErrorKind::NotFound => ClientError::NotLoaded(path.to_path_buf()),
        io::ErrorKind::PermissionDenied if access == Access::Write => ClientError::PermissionDenied,
        _ => ClientError::Open {
            access: access.format(),
            source: err,
        },
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    On,
    Off,
    Unknown(char),
}

impl Status {
    /// Classifies a status line by its first character.
    pub fn classify(line: &str) -> Option<Status> {
        line.chars().next().map(|c| match c {
            '1' => Status::On,
            '0' => Status::Off,
            other => Status::Unknown(other),
        })
    }

    pub fn message(&self) -> String {
        match self {
            Status::On => "Network blocking is ON".to_string(),
            Status::Off => "Network blocking is OFF".to_string(),
            Status::Unknown(c) => format!("Module state is unknown (read: '{c}')"),
        }
    }
}

/// Finds the live front end under `root` and opens its node.
fn open<O: NodeOpener>(
    opener: &O,
    root: &Path,
    access: Access,
) -> Result<(SurfaceKind, O::Cell), ClientError> {
    let kind = SurfaceKind::detect_in(root)
        .map_err(|e| open_error(e, &root.join(NODE_NAME), access))?;
    let path = kind.node_path_in(root);
    let cell = opener
        .open(&path)
        .map_err(|e| open_error(e, &path, access))?;
    Ok((kind, cell))
}

pub fn status<O: NodeOpener>(opener: &O, root: &Path) -> Result<Status, ClientError> {
    let (kind, cell) = open(opener, root, Access::Read)?;
    let line = ControlSurface::new(kind, cell)
        .show()
        .map_err(ClientError::Read)?;

    Status::classify(&line).ok_or(ClientError::EmptyRead)
}

/// Writes `"1"` or `"0"` to the node.
pub fn set<O: NodeOpener>(opener: &O, root: &Path, flag: BlockFlag) -> Result<(), ClientError> {
    let token: &[u8] = match flag {
        BlockFlag::Block => b"1",
        BlockFlag::Allow => b"0",
    };

    let (kind, cell) = open(opener, root, Access::Write)?;
    let written = ControlSurface::new(kind, cell)
        .store(token)
        .map_err(ClientError::Write)?;

    if written < token.len() {
        return Err(ClientError::ShortWrite {
            written,
            expected: token.len(),
        });
    }
    Ok(())
}

pub fn set_message(flag: BlockFlag) -> String {
    format!("Network blocking has been turned {}.", flag.format())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AtomicFlag;
    use std::{cell::RefCell, fs, path::PathBuf, sync::Arc};
    use tempfile::TempDir;

    /// A bpffs root holding the node layout of `kind`.
    fn served_by(kind: SurfaceKind) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        if kind == SurfaceKind::Attribute {
            fs::create_dir(root.path().join(NODE_NAME)).unwrap();
        }
        fs::write(kind.node_path_in(root.path()), b"").unwrap();
        root
    }

    struct FakeOpener {
        cell: Arc<AtomicFlag>,
        fail: Option<io::ErrorKind>,
        opened: RefCell<Vec<PathBuf>>,
    }

    impl FakeOpener {
        fn up() -> Self {
            Self {
                cell: Arc::new(AtomicFlag::default()),
                fail: None,
                opened: RefCell::new(Vec::new()),
            }
        }

        fn failing(kind: io::ErrorKind) -> Self {
            Self {
                fail: Some(kind),
                ..Self::up()
            }
        }
    }

    impl NodeOpener for FakeOpener {
        type Cell = Arc<AtomicFlag>;

        fn open(&self, path: &Path) -> io::Result<Arc<AtomicFlag>> {
            self.opened.borrow_mut().push(path.to_path_buf());
            match self.fail {
                Some(kind) => Err(io::Error::from(kind)),
                None => Ok(self.cell.clone()),
            }
        }
    }

    #[test]
    fn on_off_status() {
        for kind in [SurfaceKind::Attribute, SurfaceKind::Proc] {
            let root = served_by(kind);
            let opener = FakeOpener::up();

            assert_eq!(status(&opener, root.path()).unwrap(), Status::Off);
            set(&opener, root.path(), BlockFlag::Block).unwrap();
            assert_eq!(status(&opener, root.path()).unwrap(), Status::On);
            assert_eq!(opener.cell.read(), BlockFlag::Block);
            set(&opener, root.path(), BlockFlag::Allow).unwrap();
            assert_eq!(status(&opener, root.path()).unwrap(), Status::Off);
        }
    }

    #[test]
    fn opens_the_node_of_whichever_front_end_is_live() {
        for kind in [SurfaceKind::Attribute, SurfaceKind::Proc] {
            let root = served_by(kind);
            let opener = FakeOpener::up();

            set(&opener, root.path(), BlockFlag::Block).unwrap();
            status(&opener, root.path()).unwrap();
            assert_eq!(
                *opener.opened.borrow(),
                vec![kind.node_path_in(root.path()); 2]
            );
        }
    }

    #[test]
    fn missing_node_means_not_loaded() {
        let root = tempfile::tempdir().unwrap();
        let opener = FakeOpener::up();
        let claimed = root.path().join(NODE_NAME);

        assert!(matches!(
            status(&opener, root.path()),
            Err(ClientError::NotLoaded(path)) if path == claimed
        ));
        assert!(matches!(
            set(&opener, root.path(), BlockFlag::Block),
            Err(ClientError::NotLoaded(_))
        ));
        assert!(opener.opened.borrow().is_empty());

        let root = served_by(SurfaceKind::Proc);
        let opener = FakeOpener::failing(io::ErrorKind::NotFound);
        assert!(matches!(
            status(&opener, root.path()),
            Err(ClientError::NotLoaded(_))
        ));
    }

    #[test]
    fn permission_denied_is_called_out_on_writes() {
        let root = served_by(SurfaceKind::Proc);
        let opener = FakeOpener::failing(io::ErrorKind::PermissionDenied);

        let err = set(&opener, root.path(), BlockFlag::Block).unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied));
        assert!(err.to_string().contains("sudo"));

        assert!(matches!(
            status(&opener, root.path()),
            Err(ClientError::Open { access: "reading", .. })
        ));
        assert_eq!(opener.cell.read(), BlockFlag::Allow);
    }

    #[test]
    fn other_os_errors_are_reported_raw() {
        let root = served_by(SurfaceKind::Attribute);
        let opener = FakeOpener::failing(io::ErrorKind::InvalidInput);
        let err = set(&opener, root.path(), BlockFlag::Allow).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Open { access: "writing", ref source } if source.kind() == io::ErrorKind::InvalidInput
        ));
    }

    #[test]
    fn status_lines() {
        assert_eq!(Status::classify("1\n"), Some(Status::On));
        assert_eq!(Status::classify("0\n"), Some(Status::Off));
        assert_eq!(Status::classify("7\n"), Some(Status::Unknown('7')));
        assert_eq!(Status::classify(""), None);

        assert_eq!(Status::On.message(), "Network blocking is ON");
        assert_eq!(Status::Off.message(), "Network blocking is OFF");
        assert_eq!(
            Status::Unknown('x').message(),
            "Module state is unknown (read: 'x')"
        );
        assert_eq!(set_message(BlockFlag::Block), "Network blocking has been turned ON.");
        assert_eq!(set_message(BlockFlag::Allow), "Network blocking has been turned OFF.");
    }

    #[test]
    fn os_error_is_found_under_wrappers() {
        use crate::error::{ControlError, StateError};

        let err = ControlError::Node {
            path: "/sys/fs/bpf/kac_net".into(),
            source: io::Error::from_raw_os_error(libc::EACCES),
        };
        assert_eq!(os_error(err).kind(), io::ErrorKind::PermissionDenied);

        let err = ControlError::Pin {
            path: "/sys/fs/bpf/kac_net".into(),
            source: StateError::NotAnArray("BLOCK_ALL"),
        };
        assert_eq!(os_error(err).kind(), io::ErrorKind::Other);
    }
}

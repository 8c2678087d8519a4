use std::{fs, io, path::Path, sync::Arc};

use kac_net::{
    client::{self, NodeOpener, Status},
    error::HookError,
    hooks::{HookHost, HookSet},
    state::AtomicFlag,
    surface::{ControlSurface, SurfaceKind, NODE_NAME},
};
use kac_net_common::{verdict, BlockFlag, HookPoint, Verdict};
use network_types::eth::EtherType;

/// The daemon side of one process: the flag the classifiers read and the
/// node the client opens.
struct Node(Arc<AtomicFlag>);

impl NodeOpener for Node {
    type Cell = Arc<AtomicFlag>;

    fn open(&self, _path: &Path) -> io::Result<Arc<AtomicFlag>> {
        Ok(self.0.clone())
    }
}

/// Classifiers that consult the shared flag on every packet.
struct Classifiers {
    flag: Arc<AtomicFlag>,
    live: Vec<HookPoint>,
}

impl Classifiers {
    fn send(&self, protocol: u16) -> Vec<Verdict> {
        self.live
            .iter()
            .map(|point| verdict(*point, protocol, self.flag.read()))
            .collect()
    }
}

impl HookHost for Classifiers {
    type Handle = HookPoint;

    fn register(&mut self, point: HookPoint) -> Result<HookPoint, HookError> {
        self.live.push(point);
        Ok(point)
    }

    fn unregister(&mut self, handle: HookPoint) {
        self.live.retain(|p| *p != handle);
    }
}

#[test]
fn cli_toggles_what_the_hooks_see() {
    let flag = Arc::new(AtomicFlag::default());
    let node = Node(flag.clone());
    let mut classifiers = Classifiers {
        flag,
        live: Vec::new(),
    };
    let hooks = HookSet::install(&mut classifiers, &HookPoint::ALL).unwrap();
    let ipv4 = EtherType::Ipv4 as u16;
    let ipv6 = EtherType::Ipv6 as u16;

    // The attribute layout, as `kac-net run` leaves it under bpffs.
    let bpffs = tempfile::tempdir().unwrap();
    fs::create_dir(bpffs.path().join(NODE_NAME)).unwrap();
    fs::write(SurfaceKind::Attribute.node_path_in(bpffs.path()), b"").unwrap();
    let root = bpffs.path();

    assert_eq!(client::status(&node, root).unwrap(), Status::Off);
    assert!(classifiers.send(ipv4).iter().all(|v| *v == Verdict::Accept));

    client::set(&node, root, BlockFlag::Block).unwrap();
    assert_eq!(
        client::status(&node, root).unwrap().message(),
        "Network blocking is ON"
    );
    // Each packet is claimed by the hooks of its own family only.
    assert_eq!(
        classifiers.send(ipv4),
        vec![Verdict::Drop, Verdict::Drop, Verdict::Accept, Verdict::Accept]
    );
    assert_eq!(
        classifiers.send(ipv6),
        vec![Verdict::Accept, Verdict::Accept, Verdict::Drop, Verdict::Drop]
    );

    client::set(&node, root, BlockFlag::Allow).unwrap();
    assert_eq!(client::status(&node, root).unwrap(), Status::Off);
    assert!(classifiers.send(ipv6).iter().all(|v| *v == Verdict::Accept));

    hooks.uninstall(&mut classifiers);
    assert!(classifiers.live.is_empty());
}

#[test]
fn raw_writes_through_both_front_ends() {
    let flag = Arc::new(AtomicFlag::default());

    let mut attribute = ControlSurface::new(SurfaceKind::Attribute, flag.clone());
    assert_eq!(attribute.store(b"0x1\n").unwrap(), 4);
    assert_eq!(flag.read(), BlockFlag::Block);
    assert!(attribute.store(b"on").is_err());
    assert_eq!(flag.read(), BlockFlag::Block);
    assert_eq!(attribute.show().unwrap(), "1\n");

    let mut proc = ControlSurface::new(SurfaceKind::Proc, flag.clone());
    assert_eq!(proc.store(b"0 please").unwrap(), 8);
    assert_eq!(flag.read(), BlockFlag::Allow);
    assert!(proc.store(b"").is_err());
    assert!(proc.store(&[b'1'; 17]).is_err());
    assert_eq!(proc.show().unwrap(), "0\n");
}

//! Hook registration.
//!
//! The four hook points go in as a set: either every point is registered
//! or none is. A partially installed set would silently under-block.

use aya::{
    programs::{
        tc::{self, SchedClassifierLinkId},
        SchedClassifier, TcAttachType,
    },
    Ebpf,
};
use kac_net_common::{HookPoint, Stage};
use log::{debug, info, warn};

use crate::error::HookError;

pub trait HookHost {
    type Handle;

    fn register(&mut self, point: HookPoint) -> Result<Self::Handle, HookError>;
    fn unregister(&mut self, handle: Self::Handle);
}

/// Handles of a fully registered set, in registration order.
pub struct HookSet<H: HookHost> {
    installed: Vec<H::Handle>,
}

impl<H: HookHost> HookSet<H> {
    /// Registers `points` in order. On the first failure everything
    /// registered by this call is unregistered again, newest first, and
    /// that failure is returned.
    pub fn install(host: &mut H, points: &[HookPoint]) -> Result<Self, HookError> {
        let mut installed = Vec::with_capacity(points.len());

        for &point in points {
            match host.register(point) {
                Ok(handle) => installed.push(handle),
                Err(e) => {
                    warn!("registering {} hook failed, rolling back: {}", point, e);
                    while let Some(handle) = installed.pop() {
                        host.unregister(handle);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { installed })
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    pub fn uninstall(mut self, host: &mut H) {
        while let Some(handle) = self.installed.pop() {
            host.unregister(handle);
        }
    }
}

pub fn attach_type(stage: Stage) -> TcAttachType {
    match stage {
        Stage::PreRouting => TcAttachType::Ingress,
        Stage::LocalOut => TcAttachType::Egress,
    }
}

/// One hook point attached to every selected interface.
pub struct TcLinks {
    point: HookPoint,
    links: Vec<(String, SchedClassifierLinkId)>,
}

/// Registers hook points as TC classifiers of the loaded object.
pub struct TcHost {
    ebpf: Ebpf,
    interfaces: Vec<String>,
}

impl TcHost {
    /// Loads the classifier of every hook point into the kernel.
    pub fn new(mut ebpf: Ebpf, interfaces: Vec<String>) -> Result<Self, HookError> {
        if interfaces.is_empty() {
            return Err(HookError::NoInterfaces);
        }

        for point in HookPoint::ALL {
            let name = point.program_name();
            let program: &mut SchedClassifier = ebpf
                .program_mut(name)
                .ok_or(HookError::ProgramNotFound(name))?
                .try_into()
                .map_err(|source| HookError::Load { name, source })?;
            program
                .load()
                .map_err(|source| HookError::Load { name, source })?;
        }

        for iface in &interfaces {
            // Fails harmlessly when the qdisc is already there.
            if let Err(e) = tc::qdisc_add_clsact(iface) {
                debug!("clsact qdisc on {}: {}", iface, e);
            }
        }

        Ok(Self { ebpf, interfaces })
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    fn program(&mut self, point: HookPoint) -> Result<&mut SchedClassifier, HookError> {
        let name = point.program_name();
        self.ebpf
            .program_mut(name)
            .ok_or(HookError::ProgramNotFound(name))?
            .try_into()
            .map_err(|source| HookError::Load { name, source })
    }
}

impl HookHost for TcHost {
    type Handle = TcLinks;

    fn register(&mut self, point: HookPoint) -> Result<TcLinks, HookError> {
        let interfaces = self.interfaces.clone();
        let program = self.program(point)?;
        let mut links = Vec::with_capacity(interfaces.len());

        for iface in interfaces {
            match program.attach(&iface, attach_type(point.stage)) {
                Ok(link_id) => {
                    debug!("{} hook attached on {}", point, iface);
                    links.push((iface, link_id));
                }
                Err(source) => {
                    while let Some((attached, link_id)) = links.pop() {
                        if let Err(e) = program.detach(link_id) {
                            warn!("failed to detach {} hook from {}: {}", point, attached, e);
                        }
                    }
                    return Err(HookError::Attach {
                        point,
                        iface,
                        source,
                    });
                }
            }
        }

        info!("{} hook registered on {} interface(s)", point, links.len());
        Ok(TcLinks { point, links })
    }

    fn unregister(&mut self, handle: TcLinks) {
        let TcLinks { point, mut links } = handle;
        let program = match self.program(point) {
            Ok(program) => program,
            Err(e) => {
                warn!("cannot unregister {} hook: {}", point, e);
                return;
            }
        };

        while let Some((iface, link_id)) = links.pop() {
            if let Err(e) = program.detach(link_id) {
                warn!("failed to detach {} hook from {}: {}", point, iface, e);
            }
        }
        debug!("{} hook unregistered", point);
    }
}

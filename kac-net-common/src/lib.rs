#![cfg_attr(not(any(feature = "user", test)), no_std)]

use network_types::eth::EtherType;

/// Name of the one-entry `Array<u32>` map holding the block flag.
pub const FLAG_MAP: &str = "BLOCK_ALL";

/// Name of the `u8` global that turns the per-drop trace on at load time.
pub const TRACE_GLOBAL: &str = "TRACE_DROPS";

/// Slot of the block flag inside [`FLAG_MAP`].
pub const FLAG_INDEX: u32 = 0;

/// Minimum spacing between two drop traces on the same CPU.
pub const TRACE_INTERVAL_NS: u64 = 1_000_000_000;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockFlag {
    #[default]
    Allow = 0,
    Block = 1,
}

impl BlockFlag {
    /// Any non-zero cell value means block.
    #[inline(always)]
    pub const fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            BlockFlag::Allow
        } else {
            BlockFlag::Block
        }
    }

    #[inline(always)]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn format(&self) -> &'static str {
        match self {
            BlockFlag::Allow => "OFF",
            BlockFlag::Block => "ON",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub enum Verdict {
    Accept,
    Drop,
}

/// The whole policy: drop iff the flag says block.
#[inline(always)]
pub fn decide(flag: BlockFlag) -> Verdict {
    match flag {
        BlockFlag::Allow => Verdict::Accept,
        BlockFlag::Block => Verdict::Drop,
    }
}

/// Verdict of `point` for a packet whose `skb->protocol` is `protocol`
/// (network byte order). Packets outside the point's family pass through.
#[inline(always)]
pub fn verdict(point: HookPoint, protocol: u16, flag: BlockFlag) -> Verdict {
    if point.claims(protocol) {
        decide(flag)
    } else {
        Verdict::Accept
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    #[inline(always)]
    pub fn ether_type(&self) -> EtherType {
        match self {
            Family::Ipv4 => EtherType::Ipv4,
            Family::Ipv6 => EtherType::Ipv6,
        }
    }

    pub fn format(&self) -> &'static str {
        match self {
            Family::Ipv4 => "IPv4",
            Family::Ipv6 => "IPv6",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub enum Stage {
    /// Earliest inbound point, before routing.
    PreRouting,
    /// Locally originated packets on their way out.
    LocalOut,
}

impl Stage {
    pub fn format(&self) -> &'static str {
        match self {
            Stage::PreRouting => "pre-routing",
            Stage::LocalOut => "local-out",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct HookPoint {
    pub family: Family,
    pub stage: Stage,
}

impl HookPoint {
    pub const IPV4_PRE_ROUTING: HookPoint = HookPoint::new(Family::Ipv4, Stage::PreRouting);
    pub const IPV4_LOCAL_OUT: HookPoint = HookPoint::new(Family::Ipv4, Stage::LocalOut);
    pub const IPV6_PRE_ROUTING: HookPoint = HookPoint::new(Family::Ipv6, Stage::PreRouting);
    pub const IPV6_LOCAL_OUT: HookPoint = HookPoint::new(Family::Ipv6, Stage::LocalOut);

    /// Registration order. Leaving any of these out is a bypass.
    pub const ALL: [HookPoint; 4] = [
        HookPoint::IPV4_PRE_ROUTING,
        HookPoint::IPV4_LOCAL_OUT,
        HookPoint::IPV6_PRE_ROUTING,
        HookPoint::IPV6_LOCAL_OUT,
    ];

    pub const fn new(family: Family, stage: Stage) -> Self {
        Self { family, stage }
    }

    #[inline(always)]
    pub fn claims(&self, protocol: u16) -> bool {
        protocol == self.family.ether_type() as u16
    }

    /// Name of the classifier serving this point in the eBPF object.
    pub fn program_name(&self) -> &'static str {
        match (self.family, self.stage) {
            (Family::Ipv4, Stage::PreRouting) => "kac_pre_routing_v4",
            (Family::Ipv4, Stage::LocalOut) => "kac_local_out_v4",
            (Family::Ipv6, Stage::PreRouting) => "kac_pre_routing_v6",
            (Family::Ipv6, Stage::LocalOut) => "kac_local_out_v6",
        }
    }

    /// Compact id carried by the drop trace.
    pub fn id(&self) -> u8 {
        match (self.family, self.stage) {
            (Family::Ipv4, Stage::PreRouting) => 0,
            (Family::Ipv4, Stage::LocalOut) => 1,
            (Family::Ipv6, Stage::PreRouting) => 2,
            (Family::Ipv6, Stage::LocalOut) => 3,
        }
    }
}

#[cfg(feature = "user")]
impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.family.format(), self.stage.format())
    }
}

#[cfg(feature = "user")]
impl std::fmt::Display for BlockFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPV4: u16 = EtherType::Ipv4 as u16;
    const IPV6: u16 = EtherType::Ipv6 as u16;
    const ARP: u16 = EtherType::Arp as u16;

    #[test]
    fn raw_values_collapse_to_two_states() {
        assert_eq!(BlockFlag::from_raw(0), BlockFlag::Allow);
        assert_eq!(BlockFlag::from_raw(1), BlockFlag::Block);
        assert_eq!(BlockFlag::from_raw(2), BlockFlag::Block);
        assert_eq!(BlockFlag::from_raw(u32::MAX), BlockFlag::Block);
        assert_eq!(BlockFlag::Allow.as_raw(), 0);
        assert_eq!(BlockFlag::Block.as_raw(), 1);
        assert_eq!(BlockFlag::default(), BlockFlag::Allow);
    }

    #[test]
    fn decide_drops_only_when_blocking() {
        assert_eq!(decide(BlockFlag::Allow), Verdict::Accept);
        assert_eq!(decide(BlockFlag::Block), Verdict::Drop);
    }

    #[test]
    fn every_point_follows_the_flag_for_its_family() {
        for point in HookPoint::ALL {
            let own = match point.family {
                Family::Ipv4 => IPV4,
                Family::Ipv6 => IPV6,
            };
            assert_eq!(verdict(point, own, BlockFlag::Allow), Verdict::Accept);
            assert_eq!(verdict(point, own, BlockFlag::Block), Verdict::Drop);
        }
    }

    #[test]
    fn foreign_and_non_ip_traffic_passes_through() {
        assert_eq!(
            verdict(HookPoint::IPV4_PRE_ROUTING, IPV6, BlockFlag::Block),
            Verdict::Accept
        );
        assert_eq!(
            verdict(HookPoint::IPV6_LOCAL_OUT, IPV4, BlockFlag::Block),
            Verdict::Accept
        );
        for point in HookPoint::ALL {
            assert_eq!(verdict(point, ARP, BlockFlag::Block), Verdict::Accept);
        }
    }

    #[test]
    fn all_points_cover_both_families_and_directions() {
        let ids: Vec<u8> = HookPoint::ALL.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let mut names: Vec<&str> = HookPoint::ALL.iter().map(|p| p.program_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}

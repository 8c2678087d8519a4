#![no_std]

use aya_ebpf::{
    bindings::{TC_ACT_PIPE, TC_ACT_SHOT},
    helpers::bpf_ktime_get_ns,
    macros::map,
    maps::{Array, PerCpuArray},
    programs::TcContext,
};
use aya_log_ebpf::info;

use kac_net_common::{verdict, BlockFlag, HookPoint, Verdict, FLAG_INDEX, TRACE_INTERVAL_NS};

/// Slot 0 holds the kill switch: 0 = allow, anything else = block.
/// Written only from userspace.
#[map]
static BLOCK_ALL: Array<u32> = Array::with_max_entries(1, 0);

/// Per-CPU timestamp of the last drop trace.
#[map]
static TRACE_CLOCK: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Patched by the loader; traces stay off unless userspace asks for them.
#[no_mangle]
static TRACE_DROPS: u8 = 0;

#[inline(always)]
fn block_flag() -> BlockFlag {
    match BLOCK_ALL.get(FLAG_INDEX) {
        // Single aligned 32-bit load: readers see the old or the new value.
        Some(raw) => BlockFlag::from_raw(unsafe { core::ptr::read_volatile(raw) }),
        None => BlockFlag::Allow,
    }
}

#[inline(always)]
pub fn run_hook(ctx: &TcContext, point: HookPoint) -> i32 {
    let protocol = ctx.skb.protocol() as u16;

    match verdict(point, protocol, block_flag()) {
        Verdict::Accept => TC_ACT_PIPE,
        Verdict::Drop => {
            trace_drop(ctx, point);
            TC_ACT_SHOT
        }
    }
}

#[inline(always)]
fn trace_drop(ctx: &TcContext, point: HookPoint) {
    if unsafe { core::ptr::read_volatile(&TRACE_DROPS) } == 0 {
        return;
    }

    let Some(last) = TRACE_CLOCK.get_ptr_mut(0) else {
        return;
    };
    let now = unsafe { bpf_ktime_get_ns() };
    unsafe {
        if *last != 0 && now.wrapping_sub(*last) < TRACE_INTERVAL_NS {
            return;
        }
        *last = now;
    }

    info!(ctx, "kac_net: dropping packet (hook={})", point.id());
}

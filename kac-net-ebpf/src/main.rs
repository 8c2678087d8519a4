#![no_std]
#![no_main]

use aya_ebpf::{macros::classifier, programs::TcContext};

use kac_net_common::HookPoint;
use kac_net_ebpf::run_hook;

#[classifier]
pub fn kac_pre_routing_v4(ctx: TcContext) -> i32 {
    run_hook(&ctx, HookPoint::IPV4_PRE_ROUTING)
}

#[classifier]
pub fn kac_local_out_v4(ctx: TcContext) -> i32 {
    run_hook(&ctx, HookPoint::IPV4_LOCAL_OUT)
}

#[classifier]
pub fn kac_pre_routing_v6(ctx: TcContext) -> i32 {
    run_hook(&ctx, HookPoint::IPV6_PRE_ROUTING)
}

#[classifier]
pub fn kac_local_out_v6(ctx: TcContext) -> i32 {
    run_hook(&ctx, HookPoint::IPV6_LOCAL_OUT)
}

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

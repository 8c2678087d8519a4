use which::which;

/// The object links through `bpf-linker`, which cargo knows nothing about.
/// Rebuild whenever the linker binary changes so a linker upgrade is picked up.
fn main() {
    match which("bpf-linker") {
        Ok(bpf_linker) => println!("cargo:rerun-if-changed={}", bpf_linker.display()),
        Err(_) => println!("cargo:rerun-if-changed=build.rs"),
    }
}

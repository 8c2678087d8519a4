use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

use cargo_metadata::{MetadataCommand, Package};

const EBPF_PACKAGE: &str = "kac-net-ebpf";
const EBPF_BIN: &str = "kac-net";

/// Builds the eBPF object with a nested cargo and drops it into `OUT_DIR`,
/// where `runner.rs` embeds it.
///
/// Without a BPF toolchain (nightly + `bpf-linker`) an empty object is
/// written instead, so the host-side library and its tests still build.
fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("cargo sets OUT_DIR"));
    let object = out_dir.join(EBPF_BIN);

    if let Err(reason) = build_ebpf(&out_dir, &object) {
        println!("cargo:warning=eBPF object not built ({reason}); `kac-net run` will refuse to load");
        fs::write(&object, []).expect("write placeholder eBPF object");
    }
}

fn build_ebpf(out_dir: &Path, object: &Path) -> Result<(), String> {
    let metadata = MetadataCommand::new()
        .no_deps()
        .exec()
        .map_err(|e| format!("cargo metadata failed: {e}"))?;
    let Package { manifest_path, .. } = metadata
        .packages
        .into_iter()
        .find(|Package { name, .. }| name == EBPF_PACKAGE)
        .ok_or_else(|| format!("package {EBPF_PACKAGE} not in workspace"))?;
    let ebpf_dir = manifest_path
        .parent()
        .ok_or_else(|| format!("{manifest_path} has no parent"))?;
    println!("cargo:rerun-if-changed={ebpf_dir}");

    let endian = env::var("CARGO_CFG_TARGET_ENDIAN").map_err(|e| e.to_string())?;
    let target = match endian.as_str() {
        "big" => "bpfeb-unknown-none",
        "little" => "bpfel-unknown-none",
        other => return Err(format!("unsupported endian {other:?}")),
    };
    let arch = env::var("CARGO_CFG_TARGET_ARCH").map_err(|e| e.to_string())?;
    let target_dir = out_dir.join(EBPF_PACKAGE);

    let mut cmd = Command::new("cargo");
    cmd.current_dir(ebpf_dir)
        .args([
            "+nightly",
            "build",
            "-Z",
            "build-std=core",
            "--bins",
            "--release",
            "--target",
            target,
        ])
        .arg("--target-dir")
        .arg(&target_dir)
        .env("CARGO_CFG_BPF_TARGET_ARCH", arch);
    // Host compiler settings must not leak into the BPF build.
    for key in [
        "RUSTC",
        "RUSTC_WORKSPACE_WRAPPER",
        "RUSTFLAGS",
        "CARGO_ENCODED_RUSTFLAGS",
    ] {
        cmd.env_remove(key);
    }

    let status = cmd
        .status()
        .map_err(|e| format!("failed to spawn cargo: {e}"))?;
    if !status.success() {
        return Err(format!("cargo build exited with {status}"));
    }

    let built = target_dir.join(target).join("release").join(EBPF_BIN);
    fs::copy(&built, object).map_err(|e| format!("copy {}: {e}", built.display()))?;
    Ok(())
}

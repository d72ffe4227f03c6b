use std::path::Path;
use std::process::Command;

fn main() {
    let version = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=GIT_VERSION={version}");
    println!("cargo::rustc-check-cfg=cfg(distribute)");

    // PROFILE only reports "debug" or "release"; custom profiles show up as a
    // component of OUT_DIR (target/<profile>/build/...).
    let distribute = std::env::var("OUT_DIR")
        .map(|dir| Path::new(&dir).components().any(|c| c.as_os_str() == "distribute"))
        .unwrap_or(false);
    if distribute {
        println!("cargo:rustc-cfg=distribute");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=migrations");
}

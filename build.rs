use std::process::Command;

fn git_describe() -> Option<String> {
    let head = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let mut hash = String::from_utf8_lossy(&head.stdout).trim().to_string();

    let clean = Command::new("git")
        .args(["diff", "--quiet"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true);
    if !clean {
        hash.push_str("-dirty");
    }
    Some(hash)
}

fn main() {
    let git_hash = git_describe().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={git_hash}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}

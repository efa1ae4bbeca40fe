use std::process::Command;

use chrono::Utc;

fn main() {
    println!("cargo:rerun-if-env-changed=WATCHDOG_BUILD_ID_OVERRIDE");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let built_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let revision = git_revision().unwrap_or_else(|| "unknown".to_string());
    let build_id = std::env::var("WATCHDOG_BUILD_ID_OVERRIDE")
        .unwrap_or_else(|_| format!("{} | {}", built_at, revision));

    println!("cargo:rustc-env=WATCHDOG_BUILD_ID={}", build_id);
}

fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--dirty", "--always"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let label = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!label.is_empty()).then_some(label)
}

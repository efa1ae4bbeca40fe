//! Build metadata stamped in by `build.rs`, logged by every binary at startup.

const fn or_unknown(value: Option<&'static str>) -> &'static str {
    match value {
        Some(value) => value,
        None => "unknown",
    }
}

const BUILD_ID: &str = or_unknown(option_env!("WATCHDOG_BUILD_ID"));

/// e.g. `2026-10-19 08:12:40 UTC | v0.1.0-3-gd1e2f3a`
pub fn build_id() -> &'static str {
    BUILD_ID
}

pub fn formatted_banner(package: &str, version: &str) -> String {
    format!("{} {} | {}", package, version, build_id())
}

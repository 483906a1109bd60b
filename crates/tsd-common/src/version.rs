//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Build metadata surfaced by `tsdctl -V`."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub package: &'static str,
    pub semver: &'static str,
    pub target_os: &'static str,
    pub target_arch: &'static str,
    pub profile: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            package: env!("CARGO_PKG_NAME"),
            semver: env!("CARGO_PKG_VERSION"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }

    pub fn short(&self) -> String {
        format!("{} ({}-{}, {})", self.semver, self.target_os, self.target_arch, self.profile)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.short())
    }
}

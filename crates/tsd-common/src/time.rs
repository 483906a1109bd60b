//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Duration and timestamp helpers used in reports and artifact ids."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::time::Duration;

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Render a duration compactly for operator-facing output (`850ms`, `12.4s`, `3m05s`).
pub fn human_duration(duration: Duration) -> String {
    let millis = duration_to_millis(duration);
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Compact UTC stamp used in artifact identifiers.
pub const ARTIFACT_STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_duration_switches_units() {
        assert_eq!(human_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(human_duration(Duration::from_millis(12_400)), "12.4s");
        assert_eq!(human_duration(Duration::from_secs(185)), "3m05s");
    }
}

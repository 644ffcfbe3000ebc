//! Human-readable formatters shared by the CLI `status`/`add`/`embed`
//! printers (§4.6.1). Generalises the teacher's `stats.rs` helpers
//! (`format_bytes`, `format_ts_relative`) with an ETA variant for ingest
//! progress and a percentage formatter for retrieval scores.

use chrono::{DateTime, Utc};

/// Format a byte count as a human-readable string (B/KB/MB/GB).
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format the time elapsed since `when` as "just now" / "N mins ago" /
/// "N hours ago" / "N days ago", falling back to an ISO date beyond a month.
pub fn format_time_ago(when: DateTime<Utc>) -> String {
    let delta = (Utc::now() - when).num_seconds();
    if delta < 0 {
        return when.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        when.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Estimate and format remaining time for a progress counter, given the
/// elapsed duration so far. Returns "unknown" when nothing has completed yet.
pub fn format_eta(done: u64, total: u64, elapsed_secs: f64) -> String {
    if done == 0 || total == 0 || done >= total {
        return "unknown".to_string();
    }

    let rate = done as f64 / elapsed_secs.max(f64::EPSILON);
    let remaining_secs = (total - done) as f64 / rate;

    if remaining_secs < 60.0 {
        format!("{}s", remaining_secs.round() as u64)
    } else if remaining_secs < 3600.0 {
        format!("{}m", (remaining_secs / 60.0).round() as u64)
    } else {
        format!("{:.1}h", remaining_secs / 3600.0)
    }
}

/// Format a `[0, 1]` score as a rounded percentage, e.g. `0.873 → "87%"`.
pub fn format_score(score: f64) -> String {
    format!("{}%", (score * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bytes_pick_the_right_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn time_ago_buckets() {
        assert_eq!(format_time_ago(Utc::now()), "just now");
        assert_eq!(format_time_ago(Utc::now() - Duration::minutes(5)), "5 mins ago");
        assert_eq!(format_time_ago(Utc::now() - Duration::hours(2)), "2 hours ago");
        assert_eq!(format_time_ago(Utc::now() - Duration::days(3)), "3 days ago");
    }

    #[test]
    fn eta_unknown_before_any_progress() {
        assert_eq!(format_eta(0, 100, 10.0), "unknown");
        assert_eq!(format_eta(100, 100, 10.0), "unknown");
    }

    #[test]
    fn eta_extrapolates_from_rate() {
        let eta = format_eta(50, 100, 10.0);
        assert_eq!(eta, "10s");
    }

    #[test]
    fn score_rounds_to_percent() {
        assert_eq!(format_score(0.873), "87%");
        assert_eq!(format_score(1.0), "100%");
        assert_eq!(format_score(0.0), "0%");
    }
}

use std::fmt::Write;

use anyhow::Result;
use drest_lib::ratelimit::RouteStatsMap;

use crate::{
    color::{BOLD, DIM},
    options::StatsFormat,
};

/// Render per-route statistics in the requested format
pub(crate) fn format_statistics(stats: &RouteStatsMap, format: StatsFormat) -> Result<String> {
    match format {
        StatsFormat::Compact => Ok(compact(stats)),
        StatsFormat::Json => Ok(serde_json::to_string_pretty(stats)?),
    }
}

fn compact(stats: &RouteStatsMap) -> String {
    if stats.is_empty() {
        return DIM.apply_to("No calls were made").to_string();
    }

    let mut out = BOLD.apply_to("Route statistics").to_string();
    for (route, route_stats) in stats.sorted() {
        // Writing to a String cannot fail
        let _ = write!(out, "\n  {route}: {}", route_stats.summary());
        if route_stats.failures > 0 {
            let _ = write!(out, ", {} failed", route_stats.failures);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use drest_lib::{Route, ratelimit::RouteStats};

    use super::*;

    fn stats() -> RouteStatsMap {
        let mut user = RouteStats::default();
        user.record_response(200, Duration::from_millis(40));
        user.record_response(429, Duration::from_millis(20));
        user.record_response(200, Duration::from_millis(60));

        let mut guild = RouteStats::default();
        guild.record_failure();

        [(Route::GetUser, user), (Route::GetGuild, guild)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_compact() {
        console::set_colors_enabled(false);
        let out = format_statistics(&stats(), StatsFormat::Compact).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "Route statistics");
        // Busiest route first
        assert_eq!(
            lines[1],
            "  get_user: 3 requests (67% success, 1 rate limited, 0 reconnects), median: 40ms"
        );
        assert!(lines[2].starts_with("  get_guild: 0 requests"));
        assert!(lines[2].ends_with(", 1 failed"));
    }

    #[test]
    fn test_compact_empty() {
        console::set_colors_enabled(false);
        let out = format_statistics(&RouteStatsMap::default(), StatsFormat::Compact).unwrap();
        assert_eq!(out, "No calls were made");
    }

    #[test]
    fn test_json() {
        let out = format_statistics(&stats(), StatsFormat::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["get_user"]["total_requests"], 3);
        assert_eq!(json["get_user"]["rate_limited"], 1);
        assert_eq!(json["get_guild"]["total_requests"], 0);
    }
}

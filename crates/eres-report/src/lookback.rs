//! Lookback windows: how far back panel queries reach.
//!
//! Accepted forms: `""` (one schedule interval), plain seconds (`"3600"`),
//! or an amount with a unit, optionally prefixed by `now-`:
//! `s`, `m`, `h`, `d`, `w`, `M` (30 days), `y` (365 days).

use eres_core::error::{EresError, Result};
use eres_core::types::{ReportContent, Schedule};

/// Parse a lookback string into seconds. Empty input yields `None`.
pub fn parse_lookback(raw: &str) -> Result<Option<i64>> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix("now-").unwrap_or(trimmed).trim();
    if body.is_empty() {
        return Ok(None);
    }

    let invalid = || EresError::Materialize(format!("invalid lookback '{raw}'"));
    let split = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (digits, unit) = body.split_at(split);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let unit_secs = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        "M" => 30 * 86_400,
        "y" => 365 * 86_400,
        _ => return Err(invalid()),
    };
    let secs = amount.checked_mul(unit_secs).ok_or_else(invalid)?;
    if secs <= 0 {
        return Err(invalid());
    }
    Ok(Some(secs))
}

/// Query window `(from, to)` in unix seconds for one panel.
/// The panel's own lookback wins over the schedule's; neither means one interval.
pub fn window(schedule: &Schedule, content: &ReportContent, now: i64) -> Result<(i64, i64)> {
    let secs = match parse_lookback(&content.lookback)? {
        Some(secs) => secs,
        None => parse_lookback(&schedule.lookback)?.unwrap_or(schedule.interval),
    };
    Ok((now.saturating_sub(secs.max(0)), now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_lookback("45s").unwrap(), Some(45));
        assert_eq!(parse_lookback("30m").unwrap(), Some(1800));
        assert_eq!(parse_lookback("24h").unwrap(), Some(86_400));
        assert_eq!(parse_lookback("7d").unwrap(), Some(604_800));
        assert_eq!(parse_lookback("2w").unwrap(), Some(1_209_600));
        assert_eq!(parse_lookback("1M").unwrap(), Some(2_592_000));
        assert_eq!(parse_lookback("3600").unwrap(), Some(3600));
    }

    #[test]
    fn test_now_prefix_and_empty() {
        assert_eq!(parse_lookback("now-7d").unwrap(), Some(604_800));
        assert_eq!(parse_lookback("").unwrap(), None);
        assert_eq!(parse_lookback("  ").unwrap(), None);
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["d", "7x", "-5m", "0h", "1.5h"] {
            assert!(
                matches!(parse_lookback(bad), Err(EresError::Materialize(_))),
                "{bad} should be rejected"
            );
        }
        // a bare "now-" carries no amount
        assert_eq!(parse_lookback("now-").unwrap(), None);
    }

    #[test]
    fn test_window_precedence() {
        let mut schedule = Schedule::new("s", 86_400, "g");
        let mut content = ReportContent::new(&schedule.id, "dash", 1);

        assert_eq!(window(&schedule, &content, 100_000).unwrap(), (13_600, 100_000));

        schedule.lookback = "1h".into();
        assert_eq!(window(&schedule, &content, 100_000).unwrap(), (96_400, 100_000));

        content.lookback = "now-1m".into();
        assert_eq!(window(&schedule, &content, 100_000).unwrap(), (99_940, 100_000));
    }
}

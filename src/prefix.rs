//! C2 — Prefix Parser. Splits `[HH:MM:SS.ffffff][tid:HEX][...] BODY` into a
//! timestamp, a thread id, and the remaining payload.
//!
//! Grounded on `towl-db/towl/db/events/log_reader.py`'s `_parse_prefix` /
//! `_handle_line`: split bracketed tokens on `]`, parse the first as a
//! time-of-day, scan the rest for one starting with `tid:`.

use chrono::NaiveTime;

pub struct ParsedLine<'a> {
    pub timestamp: NaiveTime,
    pub tid: u64,
    pub payload: &'a str,
}

/// Returns `None` if the line has no valid leading timestamp token — such
/// lines are skipped, not errors (§4.2).
pub fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let (prefix, payload) = line.split_once(' ')?;

    let mut tokens = prefix.split(']').filter(|t| !t.is_empty());

    let first = tokens.next()?;
    let time_str = first.strip_prefix('[')?;
    let timestamp = NaiveTime::parse_from_str(time_str, "%H:%M:%S%.f").ok()?;

    let mut tid = 0u64;
    for tok in tokens {
        let tok = tok.strip_prefix('[').unwrap_or(tok);
        if let Some(hex) = tok.strip_prefix("tid:") {
            if let Ok(v) = u64::from_str_radix(hex, 16) {
                tid = v;
            }
        }
    }

    Some(ParsedLine {
        timestamp,
        tid,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_prefix() {
        let line = "[12:34:56.789012][tid:1a2b][other] devmem.malloc deadbeef 100 0";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.tid, 0x1a2b);
        assert_eq!(
            parsed.timestamp,
            NaiveTime::from_hms_micro_opt(12, 34, 56, 789012).unwrap()
        );
        assert_eq!(parsed.payload, "devmem.malloc deadbeef 100 0");
    }

    #[test]
    fn missing_tid_token_defaults_to_zero() {
        let line = "[00:00:01.000000][other] devmem.free deadbeef";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.tid, 0);
    }

    #[test]
    fn invalid_leading_token_is_skipped() {
        assert!(parse_line("not a log line at all").is_none());
        assert!(parse_line("[not-a-time][tid:1] body").is_none());
    }
}

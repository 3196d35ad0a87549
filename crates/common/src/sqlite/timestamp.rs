use crate::domain::LogError;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Fixed-width, sortable UTC format used for row keys
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const TIE_BREAK_SEPARATOR: char = '#';
const TIE_BREAK_WIDTH: usize = 6;
const MAX_SEQUENCE: u64 = 999_999;

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Hands out strictly increasing row keys for one stream
///
/// A key is the formatted observation time. When that would not sort after
/// the previous key (same microsecond, or the clock went backwards) the
/// previous base is reused with a `#NNNNNN` sequence suffix instead. Once
/// the suffix space of a base is used up the key moves on to the next
/// microsecond.
#[derive(Debug, Clone, Default)]
pub struct TimestampSequencer {
    last: Option<String>,
}

impl TimestampSequencer {
    /// Start after `last`, usually the greatest key already stored
    pub fn new(last: Option<String>) -> Self {
        Self { last }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Key for an event at `at`; not reserved until [`commit`](Self::commit)
    pub fn next_key(&self, at: DateTime<Utc>) -> Result<String, LogError> {
        let candidate = format_timestamp(at);
        let last = match &self.last {
            Some(last) if candidate.as_str() <= last.as_str() => last,
            _ => return Ok(candidate),
        };

        let (base, seq) = split_key(last);
        if seq < MAX_SEQUENCE {
            return Ok(format!(
                "{}{}{:0width$}",
                base,
                TIE_BREAK_SEPARATOR,
                seq + 1,
                width = TIE_BREAK_WIDTH
            ));
        }

        parse_timestamp(base)
            .map(|base| format_timestamp(base + Duration::microseconds(1)))
            .ok_or_else(|| LogError::Write(format!("cannot advance past key '{}'", last)))
    }

    /// Record that `key` was written
    pub fn commit(&mut self, key: String) {
        self.last = Some(key);
    }
}

fn parse_timestamp(base: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn split_key(key: &str) -> (&str, u64) {
    match key.split_once(TIE_BREAK_SEPARATOR) {
        Some((base, seq)) => (base, seq.parse().unwrap_or(0)),
        None => (key, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(micros: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap() + Duration::microseconds(micros)
    }

    #[test]
    fn test_format_is_fixed_width() {
        assert_eq!(format_timestamp(at(0)), "2026-10-15T09:30:00.000000Z");
        assert_eq!(format_timestamp(at(1_500_000)), "2026-10-15T09:30:01.500000Z");
    }

    #[test]
    fn test_distinct_times_use_plain_keys() {
        let mut seq = TimestampSequencer::default();
        let first = seq.next_key(at(1)).unwrap();
        seq.commit(first.clone());
        let second = seq.next_key(at(2)).unwrap();
        assert_eq!(first, "2026-10-15T09:30:00.000001Z");
        assert_eq!(second, "2026-10-15T09:30:00.000002Z");
    }

    #[test]
    fn test_collision_gets_suffix() {
        let mut seq = TimestampSequencer::default();
        let mut keys = Vec::new();
        for _ in 0..3 {
            let key = seq.next_key(at(7)).unwrap();
            seq.commit(key.clone());
            keys.push(key);
        }

        assert_eq!(
            keys,
            vec![
                "2026-10-15T09:30:00.000007Z",
                "2026-10-15T09:30:00.000007Z#000001",
                "2026-10-15T09:30:00.000007Z#000002",
            ]
        );

        let next = seq.next_key(at(8)).unwrap();
        assert_eq!(next, "2026-10-15T09:30:00.000008Z");
        assert!(next.as_str() > keys[2].as_str());
    }

    #[test]
    fn test_clock_regression_stays_monotonic() {
        let mut seq = TimestampSequencer::new(Some(format_timestamp(at(1_000))));
        let key = seq.next_key(at(10)).unwrap();
        assert_eq!(key, "2026-10-15T09:30:00.001000Z#000001");
        seq.commit(key.clone());
        assert!(seq.next_key(at(20)).unwrap() > key);
    }

    #[test]
    fn test_uncommitted_key_is_reissued() {
        let seq = TimestampSequencer::new(Some(format_timestamp(at(5))));
        assert_eq!(seq.next_key(at(5)).unwrap(), seq.next_key(at(5)).unwrap());
    }

    #[test]
    fn test_exhausted_suffix_moves_to_next_microsecond() {
        let last = "2026-10-15T09:30:00.000000Z#999999".to_string();
        let mut seq = TimestampSequencer::new(Some(last.clone()));

        let key = seq.next_key(at(0)).unwrap();
        assert_eq!(key, "2026-10-15T09:30:00.000001Z");
        assert!(key > last);

        seq.commit(key.clone());
        let after = seq.next_key(at(0)).unwrap();
        assert_eq!(after, "2026-10-15T09:30:00.000001Z#000001");
        assert!(after > key);
    }

    #[test]
    fn test_last_suffix_before_rollover() {
        let seq = TimestampSequencer::new(Some("2026-10-15T09:30:00.000000Z#999998".to_string()));
        assert_eq!(seq.next_key(at(0)).unwrap(), "2026-10-15T09:30:00.000000Z#999999");
    }

    #[test]
    fn test_unparseable_base_fails_instead_of_reordering() {
        let seq = TimestampSequencer::new(Some("zzzz#999999".to_string()));
        assert!(matches!(seq.next_key(at(0)), Err(LogError::Write(_))));
    }
}

//! Virtual wall clock
//!
//! The peer supplies a `YYYY_MM_DD_HH_MM_SS` timestamp; local ticks advance it.
//! Each successful [`DeviceClock::now`] re-captures the advanced value, so the
//! next query measures elapsed time from that query rather than from the
//! original write. Sub-second remainders are dropped at every query.
//!
//! Elapsed seconds carry into minutes and hours only. Hours wrap at 24 without
//! advancing the date.

use crate::error::ClockFormatError;

const FIELD_COUNT: usize = 6;
const SECONDS_PER_DAY: u64 = 24 * 3600;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceClock {
    captured: String,
    captured_tick: u64,
}

impl DeviceClock {
    /// Replace the reference timestamp, captured at `tick`
    pub fn set_reference(&mut self, timestamp: &str, tick: u64) {
        self.captured = timestamp.to_string();
        self.captured_tick = tick;
    }

    pub fn captured(&self) -> &str {
        &self.captured
    }

    pub fn captured_tick(&self) -> u64 {
        self.captured_tick
    }

    /// Advance the captured timestamp by whole seconds elapsed since capture
    pub fn now(&mut self, tick: u64) -> Result<String, ClockFormatError> {
        let [year, month, day, hours, minutes, seconds] = parse_fields(&self.captured)?;

        let elapsed = tick.saturating_sub(self.captured_tick) / 1000;
        let total = (hours * 3600 + minutes * 60 + seconds + elapsed) % SECONDS_PER_DAY;

        let formatted = format!(
            "{:04}_{:02}_{:02}_{:02}_{:02}_{:02}",
            year,
            month,
            day,
            total / 3600,
            total % 3600 / 60,
            total % 60
        );

        self.captured = formatted.clone();
        self.captured_tick = tick;
        Ok(formatted)
    }
}

fn parse_fields(raw: &str) -> Result<[u64; FIELD_COUNT], ClockFormatError> {
    let mut fields = [0u64; FIELD_COUNT];
    let mut parsed = 0;

    for part in raw.split('_') {
        let Ok(value) = part.trim().parse::<u64>() else {
            break;
        };
        if parsed < FIELD_COUNT {
            fields[parsed] = value;
        }
        parsed += 1;
    }

    if parsed != FIELD_COUNT {
        return Err(ClockFormatError {
            fields_parsed: parsed,
            raw: raw.to_string(),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(timestamp: &str, tick: u64) -> DeviceClock {
        let mut clock = DeviceClock::default();
        clock.set_reference(timestamp, tick);
        clock
    }

    #[test]
    fn test_no_elapsed_time_round_trips() {
        let mut clock = clock_at("2024_03_07_09_05_01", 500);
        assert_eq!(clock.now(500).unwrap(), "2024_03_07_09_05_01");
    }

    #[test]
    fn test_carry_seconds_into_minutes_and_hours() {
        let mut clock = clock_at("2024_01_01_10_59_30", 0);
        assert_eq!(clock.now(45_000).unwrap(), "2024_01_01_11_00_15");
    }

    #[test]
    fn test_hours_wrap_without_advancing_date() {
        let mut clock = clock_at("2024_01_01_23_59_50", 1_000);
        assert_eq!(clock.now(16_000).unwrap(), "2024_01_01_00_00_05");
    }

    #[test]
    fn test_each_query_recaptures_and_drops_fraction() {
        let mut clock = clock_at("2024_01_01_00_00_00", 0);
        assert_eq!(clock.now(1_500).unwrap(), "2024_01_01_00_00_01");
        assert_eq!(clock.captured_tick(), 1_500);
        // 1.5s more: only one whole second again, total drift of one second
        assert_eq!(clock.now(3_000).unwrap(), "2024_01_01_00_00_02");
    }

    #[test]
    fn test_malformed_timestamp_does_not_mutate() {
        let mut clock = clock_at("2024_01_01_12", 0);
        let err = clock.now(10_000).unwrap_err();
        assert_eq!(err.fields_parsed, 4);
        assert_eq!(clock.captured(), "2024_01_01_12");
        assert_eq!(clock.captured_tick(), 0);
    }

    #[test]
    fn test_unset_clock_is_an_error() {
        let mut clock = DeviceClock::default();
        assert_eq!(clock.now(0).unwrap_err().fields_parsed, 0);
    }

    #[test]
    fn test_extra_fields_are_rejected() {
        let mut clock = clock_at("2024_01_01_12_00_00_99", 0);
        assert_eq!(clock.now(0).unwrap_err().fields_parsed, 7);
    }

    #[test]
    fn test_every_second_of_a_day_carries_correctly() {
        for elapsed in (0..SECONDS_PER_DAY).step_by(997) {
            let mut clock = clock_at("2024_06_15_00_00_00", 0);
            let now = clock.now(elapsed * 1000).unwrap();
            let expected = format!(
                "2024_06_15_{:02}_{:02}_{:02}",
                elapsed / 3600,
                elapsed % 3600 / 60,
                elapsed % 60
            );
            assert_eq!(now, expected);
        }
    }
}

//! Configuration negotiation
//!
//! Accumulates the three peer-written fields and derives the canonical
//! recording file name `<clock>-<personName>-<activityType>.csv`. The derived
//! name is recomputed on every accepted write and never stored on its own.

use crate::domain::clock::DeviceClock;
use crate::error::ClockFormatError;
use crate::infrastructure::bluetooth::protocol::{Channel, CONFIG_FIELD_LEN};
use tracing::info;

/// A peer-writable configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    DateTime,
    PersonName,
    ActivityType,
}

impl ConfigField {
    pub fn from_channel(channel: Channel) -> Option<Self> {
        match channel {
            Channel::DateTime => Some(Self::DateTime),
            Channel::PersonName => Some(Self::PersonName),
            Channel::ActivityType => Some(Self::ActivityType),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigProfile {
    pub clock: DeviceClock,
    pub person_name: String,
    pub activity_type: String,
}

#[derive(Debug, Default)]
pub struct ConfigNegotiator {
    profile: ConfigProfile,
}

impl ConfigNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self) -> &ConfigProfile {
        &self.profile
    }

    /// Store a field written by the peer at `tick` and return the recomputed
    /// file name
    pub fn accept(
        &mut self,
        field: ConfigField,
        value: &str,
        tick: u64,
    ) -> Result<String, ClockFormatError> {
        let value = clamp(value);
        info!("New {:?} received: {}", field, value);

        match field {
            ConfigField::DateTime => self.profile.clock.set_reference(&value, tick),
            ConfigField::PersonName => self.profile.person_name = sanitize(&value),
            ConfigField::ActivityType => self.profile.activity_type = sanitize(&value),
        }

        let file_name = self.canonical_file_name(tick)?;
        info!("New file name: {}", file_name);
        Ok(file_name)
    }

    /// Derive the recording file name from the clock as of `tick`
    pub fn canonical_file_name(&mut self, tick: u64) -> Result<String, ClockFormatError> {
        let timestamp = self.profile.clock.now(tick)?;
        Ok(format!(
            "{}-{}-{}.csv",
            timestamp, self.profile.person_name, self.profile.activity_type
        ))
    }
}

/// Cut to at most `CONFIG_FIELD_LEN` bytes without splitting a character
fn clamp(value: &str) -> String {
    let mut end = value.len().min(CONFIG_FIELD_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Names become part of a storage path; separators are not allowed
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_write_recomputes_file_name() {
        let mut negotiator = ConfigNegotiator::new();
        negotiator
            .accept(ConfigField::DateTime, "2024_05_01_08_00_00", 0)
            .unwrap();
        let name = negotiator
            .accept(ConfigField::PersonName, "alex", 2_000)
            .unwrap();
        assert_eq!(name, "2024_05_01_08_00_02-alex-.csv");

        let name = negotiator
            .accept(ConfigField::ActivityType, "swim", 2_000)
            .unwrap();
        assert_eq!(name, "2024_05_01_08_00_02-alex-swim.csv");
    }

    #[test]
    fn test_missing_clock_reports_error() {
        let mut negotiator = ConfigNegotiator::new();
        let err = negotiator
            .accept(ConfigField::PersonName, "alex", 0)
            .unwrap_err();
        assert_eq!(err.fields_parsed, 0);
        assert_eq!(negotiator.profile().person_name, "alex");
    }

    #[test]
    fn test_names_are_clamped_and_sanitized() {
        let mut negotiator = ConfigNegotiator::new();
        let long = "x".repeat(40);
        let _ = negotiator.accept(ConfigField::ActivityType, &long, 0);
        assert_eq!(negotiator.profile().activity_type.len(), CONFIG_FIELD_LEN);

        let _ = negotiator.accept(ConfigField::PersonName, "../etc/a", 0);
        assert_eq!(negotiator.profile().person_name, ".._etc_a");
    }

    #[test]
    fn test_field_for_channel() {
        assert_eq!(
            ConfigField::from_channel(Channel::DateTime),
            Some(ConfigField::DateTime)
        );
        assert_eq!(ConfigField::from_channel(Channel::ImuRequest), None);
    }

    #[test]
    fn test_multibyte_names_fit_the_name_characteristic() {
        let mut negotiator = ConfigNegotiator::new();
        negotiator
            .accept(ConfigField::DateTime, "2024_05_01_08_00_00", 0)
            .unwrap();
        let wide = "\u{e9}".repeat(25);
        negotiator.accept(ConfigField::PersonName, &wide, 0).unwrap();
        let name = negotiator
            .accept(ConfigField::ActivityType, &wide, 0)
            .unwrap();

        assert_eq!(negotiator.profile().person_name, "\u{e9}".repeat(12));
        assert!(name.len() <= Channel::ConfigFileName.payload_cap());
        assert!(name.len() <= Channel::FileTxName.payload_cap());
    }
}

//! Serialization utilities for durations
//!
//! Config files and persisted records express durations as integer
//! milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a `Duration` as milliseconds (u64)
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
/// use tether_common::duration_millis;
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as [`duration_millis`] for `Option<Duration>`; `null` maps to `None`
pub mod option_duration_millis {
    use super::*;

    /// Serialize an optional Duration as milliseconds or null
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into an optional Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timeouts {
        #[serde(with = "duration_millis")]
        request: Duration,
        #[serde(default, with = "option_duration_millis")]
        idle: Option<Duration>,
    }

    #[test]
    fn durations_serialize_as_millis() {
        let data = Timeouts { request: Duration::from_millis(1500), idle: None };

        let json = serde_json::to_value(&data).expect("should serialize");
        assert_eq!(json["request"], 1500);
        assert!(json["idle"].is_null());
    }

    #[test]
    fn missing_optional_duration_defaults_to_none() {
        let parsed: Timeouts =
            serde_json::from_str(r#"{"request": 250}"#).expect("should deserialize");
        assert_eq!(parsed, Timeouts { request: Duration::from_millis(250), idle: None });
    }

    #[test]
    fn optional_duration_reads_millis() {
        let parsed: Timeouts = serde_json::from_str(r#"{"request": 0, "idle": 30000}"#)
            .expect("should deserialize");
        assert_eq!(parsed.request, Duration::ZERO);
        assert_eq!(parsed.idle, Some(Duration::from_secs(30)));
    }
}

//! Serde helpers shared by the configuration sections

/// `Duration` as whole seconds (u64), for timeouts and retry intervals
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// `Duration` as milliseconds (u64), for sub-second poll intervals
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        install: Duration,
        #[serde(with = "duration_millis")]
        poll: Duration,
    }

    #[test]
    fn test_durations_serialize_as_integers() {
        let t = Timeouts {
            install: Duration::from_secs(600),
            poll: Duration::from_millis(50),
        };
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"install":600,"poll":50}"#);
    }

    #[test]
    fn test_durations_from_toml() {
        let t: Timeouts = toml::from_str("install = 30\npoll = 250\n").unwrap();
        assert_eq!(t.install, Duration::from_secs(30));
        assert_eq!(t.poll, Duration::from_millis(250));
    }
}

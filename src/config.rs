use std::time::Duration;

use crate::error::ShaperError;

const DEFAULT_GRACE_SECS: u64 = 10;

/// How a device key is composed from a user identity and source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Device key is the user identity alone.
    Uuid,
    /// Device key is `"{user}|{src_ip}"`.
    Device,
}

impl KeyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyMode::Uuid => "uuid",
            KeyMode::Device => "device",
        }
    }

    /// Parses a `keyMode` configuration value.
    ///
    /// `"device"` selects per-device keying; `""` or `"uuid"` selects
    /// per-user keying. Any other value is a startup error.
    pub fn parse(raw: &str) -> Result<Self, ShaperError> {
        match raw.trim().to_lowercase().as_str() {
            "device" => Ok(KeyMode::Device),
            "" | "uuid" => Ok(KeyMode::Uuid),
            other => Err(ShaperError::InvalidArgument(format!(
                "unknown ratelimit.keyMode: {other}"
            ))),
        }
    }
}

/// Startup configuration for the shaper, loaded from the process environment.
#[derive(Debug, Clone)]
pub struct ShaperSettings {
    pub key_mode: KeyMode,
    pub grace: Duration,
}

impl ShaperSettings {
    /// Loads settings from the environment, falling back to an optional
    /// `.env` file the same way the host project's own settings loader does.
    pub fn from_env() -> Result<Self, ShaperError> {
        dotenvy::dotenv().ok();

        let key_mode = KeyMode::parse(
            &std::env::var("RATELIMIT_KEY_MODE").unwrap_or_else(|_| "device".to_string()),
        )?;

        let grace_secs = std::env::var("RATELIMIT_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_GRACE_SECS);

        Ok(Self {
            key_mode,
            grace: Duration::from_secs(grace_secs),
        })
    }
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::Device,
            grace: Duration::from_secs(DEFAULT_GRACE_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mode_parses_known_values() {
        assert_eq!(KeyMode::parse("device").unwrap(), KeyMode::Device);
        assert_eq!(KeyMode::parse("uuid").unwrap(), KeyMode::Uuid);
        assert_eq!(KeyMode::parse("").unwrap(), KeyMode::Uuid);
        assert_eq!(KeyMode::parse("  DEVICE  ").unwrap(), KeyMode::Device);
    }

    #[test]
    fn key_mode_rejects_unknown_values() {
        assert!(KeyMode::parse("bogus").is_err());
    }

    #[test]
    fn default_settings_match_spec_defaults() {
        let settings = ShaperSettings::default();
        assert_eq!(settings.key_mode, KeyMode::Device);
        assert_eq!(settings.grace, Duration::from_secs(10));
    }
}

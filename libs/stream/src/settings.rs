//! Process-wide settings used by the core
//!
//! Embedders install settings once at startup; until then the defaults apply.

use crate::error::{Result, StreamError};
use once_cell::sync::OnceCell;
use stream_config::StreamSettings;

static SETTINGS: OnceCell<StreamSettings> = OnceCell::new();

/// Active settings, defaults when none were installed
pub fn settings() -> &'static StreamSettings {
    SETTINGS.get_or_init(StreamSettings::default)
}

/// Install settings for the process. Fails once settings are in use.
pub fn install_settings(settings: StreamSettings) -> Result<()> {
    settings
        .validate()
        .map_err(|e| StreamError::illegal_state(format!("invalid settings: {:#}", e)))?;
    SETTINGS
        .set(settings)
        .map_err(|_| StreamError::illegal_state("settings already installed or in use"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_settings_rejected() {
        let mut invalid = StreamSettings::default();
        invalid.streaming.chunk_size = 0;

        assert!(install_settings(invalid).unwrap_err().is_illegal_state());
    }
}

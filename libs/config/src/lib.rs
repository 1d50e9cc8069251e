//! # Stream Configuration
//!
//! Settings and defaults for the streaming message core.
//!
//! ## Features
//!
//! - **Defaults**: memory spill threshold, bridge channel sizing, charset fallback
//! - **Settings**: TOML files with environment overlays and `STREAM_*` overrides
//! - **Logging**: `tracing-subscriber` bootstrap driven by the same settings
//!
//! ## Usage
//!
//! ```rust
//! use stream_config::{defaults, StreamSettings};
//!
//! let settings = StreamSettings::default();
//! assert_eq!(settings.message.memory_threshold, defaults::message::MEMORY_THRESHOLD);
//! assert!(settings.validate().is_ok());
//! ```

pub mod defaults;
pub mod logging;
pub mod settings;

// Re-export commonly used types
pub use logging::init_logging;
pub use settings::{
    load_settings, LoggingSettings, MessageSettings, StreamSettings, StreamingSettings,
};

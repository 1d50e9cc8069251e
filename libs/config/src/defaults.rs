//! Default values shared by the settings model and the core

/// Message representation defaults
pub mod message {
    /// Largest payload kept in memory by `preserve()` (512 KiB)
    pub const MEMORY_THRESHOLD: u64 = 512 * 1024;

    /// Charset used when neither the message nor the caller names one
    pub const DEFAULT_CHARSET: &str = "UTF-8";

    /// Context value that requests content-based charset detection
    pub const AUTO_DETECT_CHARSET: &str = "auto";

    /// Bytes inspected when sniffing a charset
    pub const CHARSET_SNIFF_LENGTH: usize = 8 * 1024;
}

/// Push/pull bridge defaults
pub mod streaming {
    /// Streaming between stages is enabled unless configured otherwise
    pub const ACTIVE: bool = true;

    /// Slots in the bounded channel between owner and consumer thread
    pub const CHANNEL_CAPACITY: usize = 16;

    /// Largest chunk carried by one channel slot (8 KiB)
    pub const CHUNK_SIZE: usize = 8 * 1024;

    /// Prefix for consumer thread names
    pub const THREAD_NAME_PREFIX: &str = "stream-bridge";
}

/// Logging defaults
pub mod logging {
    /// Default level filter when `RUST_LOG` is not set
    pub const LEVEL: &str = "info";
}

/// Settings loading defaults
pub mod loading {
    /// Base settings file, relative to the working directory
    pub const BASE_FILE: &str = "config/stream.toml";

    /// Directory holding `<environment>.toml` overlays
    pub const ENVIRONMENT_DIR: &str = "config/environments";

    /// Prefix for environment variable overrides
    pub const ENV_PREFIX: &str = "STREAM";
}

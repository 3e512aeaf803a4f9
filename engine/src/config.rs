//! Configuration types for mirror sessions.

use serde::{Deserialize, Serialize};

/// Smallest read buffer that can always hold one event with a maximal name.
pub const MIN_EVENT_BUFFER_SIZE: usize = 4096;

/// Configuration shared by every session started with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Bytes requested per read of the notification stream.
    pub event_buffer_size: usize,

    /// Maximum number of directories one session may watch.
    pub max_watches: usize,

    /// Whether a missing target root is created before validation.
    pub create_missing_target: bool,
}

impl MirrorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            event_buffer_size: 64 * 1024,
            max_watches: 65_536,
            create_missing_target: true,
        }
    }

    /// Set the read buffer size.
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Set the watch limit.
    pub fn with_max_watches(mut self, max: usize) -> Self {
        self.max_watches = max;
        self
    }

    /// Require the target root to exist already.
    pub fn require_existing_target(mut self) -> Self {
        self.create_missing_target = false;
        self
    }

    /// Buffer size actually used for reads.
    pub fn effective_buffer_size(&self) -> usize {
        self.event_buffer_size.max(MIN_EVENT_BUFFER_SIZE)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_builder() {
        let config = MirrorConfig::new()
            .with_max_watches(16)
            .with_event_buffer_size(8192)
            .require_existing_target();

        assert_eq!(config.max_watches, 16);
        assert_eq!(config.event_buffer_size, 8192);
        assert!(!config.create_missing_target);
    }

    #[test]
    fn test_small_buffer_is_raised() {
        let config = MirrorConfig::new().with_event_buffer_size(16);
        assert_eq!(config.effective_buffer_size(), MIN_EVENT_BUFFER_SIZE);
    }
}

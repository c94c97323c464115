//! Outbox configuration and batch limit resolution.

use serde::{Deserialize, Serialize};

use crate::batch_manager::BatchManagerOptions;
use crate::protocol::CompressionAlgorithm;

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionOptions {
    /// Batches smaller than this go out uncompressed. `None` disables
    /// compression entirely.
    pub minimum_batch_size_in_bytes: Option<usize>,
    pub compression_algorithm: CompressionAlgorithm,
}

impl CompressionOptions {
    pub fn disabled() -> Self {
        Self {
            minimum_batch_size_in_bytes: None,
            compression_algorithm: CompressionAlgorithm::Lz4,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.minimum_batch_size_in_bytes.is_some()
    }
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            minimum_batch_size_in_bytes: Some(600 * 1024), // 600KB
            compression_algorithm: CompressionAlgorithm::Lz4,
        }
    }
}

/// Outbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub compression: CompressionOptions,
    /// Wire ceiling for a single submission. Default: 950KB.
    pub max_batch_size_in_bytes: usize,
    /// Chunk size for splitting compressed batches. `None` disables chunking.
    pub chunk_size_in_bytes: Option<usize>,
    /// Reject ops pushed while their batch is being flushed.
    pub enable_op_reentry_check: bool,
    /// Soft limit for the attach batch when compression is off. Default: 64KB.
    pub attach_soft_limit_in_bytes: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            compression: CompressionOptions::default(),
            max_batch_size_in_bytes: 950 * 1024,      // 950KB
            chunk_size_in_bytes: Some(200 * 1024),   // 200KB
            enable_op_reentry_check: false,
            attach_soft_limit_in_bytes: 64 * 1024,   // 64KB
        }
    }
}

impl OutboxConfig {
    /// Config for testing (small thresholds).
    pub fn for_testing() -> Self {
        Self {
            compression: CompressionOptions {
                minimum_batch_size_in_bytes: Some(1024), // 1KB
                compression_algorithm: CompressionAlgorithm::Lz4,
            },
            max_batch_size_in_bytes: 4 * 1024,
            chunk_size_in_bytes: Some(1024),
            enable_op_reentry_check: true,
            attach_soft_limit_in_bytes: 2 * 1024,
        }
    }

    /// Same config with compression switched off.
    pub fn without_compression(mut self) -> Self {
        self.compression.minimum_batch_size_in_bytes = None;
        self
    }
}

/// Resolved limits for the two batch managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub attach: BatchManagerOptions,
    pub main: BatchManagerOptions,
}

/// Pick batch manager limits for a config.
///
/// | compression | main hard   | attach hard | attach soft      |
/// |-------------|-------------|-------------|------------------|
/// | enabled     | unbounded   | unbounded   | none             |
/// | disabled    | max batch   | max batch   | attach soft limit|
///
/// With compression on, the wire ceiling is enforced after compression
/// (and splitting) instead of at push time.
pub fn resolve_batch_limits(config: &OutboxConfig) -> BatchLimits {
    let enable_op_reentry_check = config.enable_op_reentry_check;

    if config.compression.is_enabled() {
        let unbounded = BatchManagerOptions {
            hard_limit: None,
            soft_limit: None,
            enable_op_reentry_check,
        };
        return BatchLimits {
            attach: unbounded,
            main: unbounded,
        };
    }

    let main = BatchManagerOptions {
        hard_limit: Some(config.max_batch_size_in_bytes),
        soft_limit: None,
        enable_op_reentry_check,
    };
    BatchLimits {
        attach: BatchManagerOptions {
            soft_limit: Some(config.attach_soft_limit_in_bytes),
            ..main
        },
        main,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OutboxConfig::default();
        assert!(config.compression.is_enabled());
        assert_eq!(config.max_batch_size_in_bytes, 972_800);
        assert_eq!(config.attach_soft_limit_in_bytes, 65_536);
        assert!(!config.enable_op_reentry_check);
    }

    #[test]
    fn test_limits_unbounded_with_compression() {
        let limits = resolve_batch_limits(&OutboxConfig::default());
        assert_eq!(limits.main.hard_limit, None);
        assert_eq!(limits.main.soft_limit, None);
        assert_eq!(limits.attach.hard_limit, None);
        assert_eq!(limits.attach.soft_limit, None);
    }

    #[test]
    fn test_limits_without_compression() {
        let config = OutboxConfig::default().without_compression();
        let limits = resolve_batch_limits(&config);

        assert_eq!(limits.main.hard_limit, Some(972_800));
        assert_eq!(limits.main.soft_limit, None);
        assert_eq!(limits.attach.hard_limit, Some(972_800));
        assert_eq!(limits.attach.soft_limit, Some(65_536));
    }

    #[test]
    fn test_reentry_check_propagates() {
        let limits = resolve_batch_limits(&OutboxConfig::for_testing());
        assert!(limits.main.enable_op_reentry_check);
        assert!(limits.attach.enable_op_reentry_check);
    }

    #[test]
    fn test_compression_disabled_helper() {
        assert!(!CompressionOptions::disabled().is_enabled());
    }
}

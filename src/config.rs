//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for QA Vision, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults matching the shipped behavior
//! - Programmatic overrides for embedding the engine
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `QA_VISION_ENDPOINT` | Vision model API endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `QA_VISION_MODEL` | Vision model name | `gemini-2.5-flash` |
//! | `QA_VISION_MAX_TOKENS` | Maximum tokens in model response | `1024` |
//! | `QA_VISION_TIMEOUT` | Activity timeout during streaming (seconds) | `60` |
//! | `QA_VISION_CONNECT_TIMEOUT` | Connection timeout (seconds) | `10` |
//! | `QA_VISION_EVIDENCE_DIR` | Base directory for run evidence | `/tmp/qa-vision` |
//! | `QA_VISION_MAX_RETRIES` | Default per-phase retry ceiling | `2` |
//! | `QA_VISION_BACKOFF_MS` | Base backoff between transient retries (ms) | `500` |
//! | `QA_VISION_PASS_THRESHOLD` | Verifier confidence required for a pass | `0.75` |
//!
//! # Example
//!
//! ```bash
//! # Point at a local llama.cpp server
//! export QA_VISION_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export QA_VISION_MODEL="llava"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default vision model API endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default vision model name
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default max tokens for model responses
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default connection timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default activity timeout during streaming (seconds)
pub const DEFAULT_ACTIVITY_TIMEOUT: u64 = 60;

/// Default evidence base directory
pub const DEFAULT_EVIDENCE_DIR: &str = "/tmp/qa-vision";

/// Default per-phase retry ceiling for step execution
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base backoff between transient retries (milliseconds)
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Default verifier confidence threshold for a pass
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.75;

/// Default confidence below which a negative verification is confident
pub const DEFAULT_FAIL_THRESHOLD: f64 = 0.50;

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the vision endpoint
pub const ENV_ENDPOINT: &str = "QA_VISION_ENDPOINT";

/// Environment variable for the vision model
pub const ENV_MODEL: &str = "QA_VISION_MODEL";

/// Environment variable for max tokens
pub const ENV_MAX_TOKENS: &str = "QA_VISION_MAX_TOKENS";

/// Environment variable for the connection timeout
pub const ENV_CONNECT_TIMEOUT: &str = "QA_VISION_CONNECT_TIMEOUT";

/// Environment variable for the activity timeout
pub const ENV_ACTIVITY_TIMEOUT: &str = "QA_VISION_TIMEOUT";

/// Environment variable for the evidence directory
pub const ENV_EVIDENCE_DIR: &str = "QA_VISION_EVIDENCE_DIR";

/// Environment variable for the retry ceiling
pub const ENV_MAX_RETRIES: &str = "QA_VISION_MAX_RETRIES";

/// Environment variable for the backoff base
pub const ENV_BACKOFF_MS: &str = "QA_VISION_BACKOFF_MS";

/// Environment variable for the pass threshold
pub const ENV_PASS_THRESHOLD: &str = "QA_VISION_PASS_THRESHOLD";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for QA Vision
#[derive(Debug, Clone)]
pub struct Config {
    /// Vision model configuration
    pub vision: VisionSettings,
    /// Evidence storage configuration
    pub evidence: EvidenceSettings,
    /// Default run options
    pub run: RunSettings,
}

/// Vision-model-related settings
#[derive(Debug, Clone)]
pub struct VisionSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
    /// Confidence at or above which a verification passes
    pub pass_threshold: f64,
    /// Confidence below which a negative verification is confident
    pub fail_threshold: f64,
}

/// Evidence-storage-related settings
#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    /// Base directory for run evidence storage
    pub base_dir: String,
}

/// Default values for run options
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Per-phase retry ceiling
    pub max_retries: u32,
    /// Base backoff between transient retries (milliseconds)
    pub backoff_ms: u64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            vision: VisionSettings::from_env(),
            evidence: EvidenceSettings::from_env(),
            run: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            vision: VisionSettings::defaults(),
            evidence: EvidenceSettings::defaults(),
            run: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VisionSettings {
    /// Create vision settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_ENDPOINT).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: env::var(ENV_MAX_TOKENS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
            connect_timeout: env::var(ENV_CONNECT_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            activity_timeout: env::var(ENV_ACTIVITY_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT),
            pass_threshold: env::var(ENV_PASS_THRESHOLD)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(DEFAULT_PASS_THRESHOLD),
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
        }
    }

    /// Create vision settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
        }
    }
}

impl EvidenceSettings {
    /// Create evidence settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_EVIDENCE_DIR).unwrap_or_else(|_| DEFAULT_EVIDENCE_DIR.to_string()),
        }
    }

    /// Create evidence settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_EVIDENCE_DIR.to_string(),
        }
    }
}

impl RunSettings {
    /// Create run settings from environment variables
    pub fn from_env() -> Self {
        Self {
            max_retries: env::var(ENV_MAX_RETRIES)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_ms: env::var(ENV_BACKOFF_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKOFF_MS),
        }
    }

    /// Create run settings with defaults
    pub fn defaults() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

/// Get the vision endpoint (convenience function)
pub fn endpoint() -> String {
    get().vision.endpoint.clone()
}

/// Get the vision model name (convenience function)
pub fn model() -> String {
    get().vision.model.clone()
}

/// Get the evidence base directory (convenience function)
pub fn evidence_base_dir() -> String {
    get().evidence.base_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.vision.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.vision.model, DEFAULT_MODEL);
        assert_eq!(config.evidence.base_dir, DEFAULT_EVIDENCE_DIR);
        assert_eq!(config.run.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_thresholds_ordered() {
        let config = Config::defaults();
        assert!(config.vision.fail_threshold < config.vision.pass_threshold);
        assert!(config.vision.pass_threshold <= 1.0);
    }
}

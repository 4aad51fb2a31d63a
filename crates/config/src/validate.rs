//! Semantic validation of a loaded configuration.
//!
//! Parsing already enforces types; this pass catches values that parse but
//! cannot work (zero batch sizes, inverted delay bounds, missing token).

use crate::schema::{CourierConfig, StorageBackend};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "rate_limit.min_delay_ms"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check a config for values that would make the engine misbehave.
#[must_use]
pub fn validate_config(config: &CourierConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let rl = &config.rate_limit;
    if rl.min_delay_ms > rl.max_delay_ms {
        result.push(
            Severity::Error,
            "rate_limit.min_delay_ms",
            format!(
                "min delay {}ms exceeds max delay {}ms",
                rl.min_delay_ms, rl.max_delay_ms
            ),
        );
    }
    if rl.base_delay_ms < rl.min_delay_ms || rl.base_delay_ms > rl.max_delay_ms {
        result.push(
            Severity::Warning,
            "rate_limit.base_delay_ms",
            "base delay is outside [min, max] and will be clamped",
        );
    }
    if !(rl.speedup_factor > 0.0 && rl.speedup_factor <= 1.0) {
        result.push(
            Severity::Error,
            "rate_limit.speedup_factor",
            "must be in (0, 1]",
        );
    }
    if rl.flood_margin < 1.0 {
        result.push(
            Severity::Warning,
            "rate_limit.flood_margin",
            "a margin below 1.0 waits less than the platform asked for",
        );
    }

    if config.backup.batch_size == 0 {
        result.push(Severity::Error, "backup.batch_size", "must be at least 1");
    }
    if config.backup.progress_every == 0 {
        result.push(Severity::Error, "backup.progress_every", "must be at least 1");
    }
    if config.forward.group_debounce_ms == 0 {
        result.push(
            Severity::Warning,
            "forward.group_debounce_ms",
            "albums will be relayed one part at a time",
        );
    }
    if config.forward.max_chain_depth > 20 {
        result.push(
            Severity::Warning,
            "forward.max_chain_depth",
            "chains deeper than the loop detector's 20-hop walk are never validated",
        );
    }
    if config.storage.backend == StorageBackend::Memory {
        result.push(
            Severity::Warning,
            "storage.backend",
            "rules and backup checkpoints are lost on restart",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let result = validate_config(&CourierConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn inverted_bounds_are_errors() {
        let mut cfg = CourierConfig::default();
        cfg.rate_limit.min_delay_ms = 10_000;
        let result = validate_config(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "rate_limit.min_delay_ms")
        );
    }

    #[test]
    fn zero_batch_size_is_error() {
        let mut cfg = CourierConfig::default();
        cfg.backup.batch_size = 0;
        assert!(validate_config(&cfg).has_errors());
    }

    #[test]
    fn memory_backend_only_warns() {
        let mut cfg = CourierConfig::default();
        cfg.storage.backend = StorageBackend::Memory;
        let result = validate_config(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
    }
}

//! Error type shared by every resolution stage.

/// Configuration resolution errors.
///
/// Every variant is fatal: resolution stops at the first one and the
/// message names the key, path, field or document responsible.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not found in config")]
    UnresolvedKey { key: String },

    #[error("cannot resolve override path '{path}': segment '{segment}' not found")]
    UnresolvedPath { path: String, segment: String },

    #[error("invalid override '{raw}': {reason}")]
    InvalidOverride { raw: String, reason: String },

    #[error("failed to load {layer} config '{name}': {reason}")]
    DocumentLoad {
        layer: String,
        name: String,
        reason: String,
    },

    #[error("failed to resolve '{expression}' at {location}: {reason}")]
    ExpressionResolution {
        location: String,
        expression: String,
        reason: String,
    },

    #[error("invalid device list '{raw}': {reason}")]
    InvalidDevices { raw: String, reason: String },

    #[error("missing config field {path}")]
    MissingField { path: String },

    #[error("invalid config field {path}: {reason}")]
    InvalidField { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = ConfigError::UnresolvedKey {
            key: "batch_size".into(),
        };
        assert_eq!(err.to_string(), "batch_size is not found in config");

        let err = ConfigError::UnresolvedPath {
            path: "dataset.a.b".into(),
            segment: "a".into(),
        };
        assert!(err.to_string().contains("dataset.a.b"));
        assert!(err.to_string().contains("'a'"));

        let err = ConfigError::DocumentLoad {
            layer: "model".into(),
            name: "motion_clip".into(),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load model config 'motion_clip': not found"
        );
    }
}

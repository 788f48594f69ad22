//! Error taxonomy for mapping operations
//!
//! None of these are fatal: each is contained where it happens and only
//! surfaced when it blocks an explicit operator action.

use crate::state::LayerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PadmapError {
    /// Incomplete or invalid editor selection; nothing was sent
    #[error("validation failed: {0}")]
    Validation(String),

    /// Intent attempted while the backend link is down; not retried
    #[error("backend unavailable: {0}")]
    TransportUnavailable(String),

    /// Something the editor session pointed at was deleted by a newer snapshot
    #[error("stale reference: {0}")]
    StaleReference(StaleReference),
}

/// What disappeared under an open editor session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReference {
    Layer(LayerId),
    /// Layer-switch target that does not name one of the layers
    LayerName(String),
    Channel(String),
    Variable(String),
}

impl std::fmt::Display for StaleReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReference::Layer(id) => write!(f, "layer '{}' no longer exists", id),
            StaleReference::LayerName(name) => write!(f, "'{}' is not a layer", name),
            StaleReference::Channel(name) => write!(f, "channel '{}' was deleted", name),
            StaleReference::Variable(name) => write!(f, "variable '{}' was deleted", name),
        }
    }
}

impl PadmapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PadmapError::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        PadmapError::TransportUnavailable(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PadmapError::Validation(_))
    }
}

pub type Result<T, E = PadmapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_reference_messages() {
        assert_eq!(
            StaleReference::Layer(LayerId::C).to_string(),
            "layer 'C' no longer exists"
        );
        assert_eq!(
            StaleReference::LayerName("Layer Z".into()).to_string(),
            "'Layer Z' is not a layer"
        );
        assert_eq!(
            PadmapError::StaleReference(StaleReference::Channel("Pan".into())).to_string(),
            "stale reference: channel 'Pan' was deleted"
        );
    }
}

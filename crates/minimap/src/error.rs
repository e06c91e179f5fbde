//! Error types surfaced by minimap operations.

use thiserror::Error;

use crate::icon::IconError;
use crate::store::StoreError;
use crate::transport::DeliveryError;

/// Errors returned at the operation boundary of the minimap engine.
///
/// None of these are fatal to the host except [`MinimapError::UnknownRenderer`]
/// and [`MinimapError::InvalidConfig`], which abort startup.
#[derive(Debug, Error)]
pub enum MinimapError {
    #[error("Unknown world renderer: {0}")]
    UnknownRenderer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Layer '{0}' already exists")]
    DuplicateLayerName(String),

    #[error("Marker limit of {limit} reached")]
    MarkerLimitExceeded { limit: usize },

    #[error(transparent)]
    InvalidIcon(#[from] IconError),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(#[from] DeliveryError),

    #[error("Failed to persist minimap state: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("Minimap is disabled")]
    Disabled,

    #[error("No layer named '{0}'")]
    UnknownLayer(String),
}

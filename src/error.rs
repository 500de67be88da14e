//! Error taxonomy shared by the registry operations. Every failure is
//! returned to the caller; nothing is retried at this layer.

use crate::geo::GeoError;
use crate::model::BatchStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("batch {0} not found")]
    NotFound(Uuid),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("storage error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

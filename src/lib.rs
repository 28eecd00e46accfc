use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Operation '{operation}' is not supported for {entity}")]
    NotSupported {
        entity: &'static str,
        operation: &'static str,
    },

    #[error("{entity} conflict: {message}")]
    Conflict {
        entity: &'static str,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[inline]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    #[inline]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// HTTP-equivalent status code the gateway should answer with
    #[inline]
    pub fn status_code(&self) -> u16 {
        match *self {
            Self::NotFound { .. } => 404,
            Self::NotSupported { .. } => 501,
            Self::Conflict { .. } => 409,
            Self::InvalidArgument(_) | Self::Config(_) => 400,
            Self::Embedding(_) => 502,
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) => 500,
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod documents;
pub mod embeddings;
pub mod ids;

pub use documents::{
    Document, DocumentFilter, DocumentUpdate, ListParams, Page, Point, PointFilter, PointUpdate,
    PointWithScore, QuerySet, SearchOptions, SearchResult,
};
pub use embeddings::{Embedder, EmbeddingProvider, embeddings_create_with_cache};

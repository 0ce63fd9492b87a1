//! Organization errors.

use thiserror::Error;

/// Errors raised by organization validation and storage.
#[derive(Debug, Error)]
pub enum OrgError {
    /// Slug is empty, too long or contains characters outside `[A-Za-z0-9-]`
    #[error("Invalid slug '{0}'")]
    InvalidSlug(String),

    /// Slug contains an underscore
    #[error("Slug cannot contain underscores (_): '{0}'")]
    SlugContainsUnderscore(String),

    /// Another organization already uses the slug
    #[error("Organization slug already exists: {0}")]
    DuplicateSlug(String),

    /// No organization matched
    #[error("Organization not found: {0}")]
    NotFound(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for organization operations.
pub type OrgResult<T> = Result<T, OrgError>;

//! Error types for codelens-core.
//!
//! Maps 1:1 onto the six error kinds of the design: Configuration, Parse,
//! Model, Store, Protocol, Not-found. Local recovery happens for Parse,
//! Model, and Protocol; Configuration, Store, and Not-found are surfaced
//! to the caller. User-visible messages carry the path or name involved,
//! never a stack trace.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all codelens-core operations.
#[derive(Debug, Error)]
pub enum OmniError {
    // ---- Recoverable (operation failed, system healthy) ----
    /// A single file failed to parse. The rest of the index is fine.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding inference failed for a chunk. Searches fall back to pre-model results.
    #[error("embedding error for chunk {chunk_id}: {message}")]
    Embed {
        /// Stable id of the chunk that failed to embed.
        chunk_id: String,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding model is unavailable; embedding backfill backs off, search degrades.
    #[error("embedding model unavailable: {reason}")]
    ModelUnavailable {
        /// Why the model couldn't be loaded.
        reason: String,
    },

    /// Malformed JSON-RPC input on the tool server. Never surfaced: the
    /// caller drops the offending line and emits no response.
    #[error("protocol error: {0}")]
    Protocol(String),

    // ---- Surfaced (reported to the caller) ----
    /// Requested bundle/chunk/file is absent from the index.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    /// I/O or integrity failure on a store transaction. The transaction is
    /// rolled back; subsequent operations retry with a fresh transaction.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration is unreadable or malformed; processing halts for that
    /// file but the rest of the server continues.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error, wrapped as a Store failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results in codelens-core.
pub type OmniResult<T> = Result<T, OmniError>;

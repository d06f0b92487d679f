//! studydeck-core library.
//!
//! Local study-progress state: a key-value [`store`] of named records, the
//! [`catalog`] of known keys, portable [`snapshot`] documents, the smart
//! [`merge`] that imports them, and the bundled [`seed`] baseline.

pub mod catalog;
pub mod chat;
pub mod config;
pub mod error;
pub mod lock;
pub mod merge;
pub mod notify;
pub mod seed;
pub mod snapshot;
pub mod stats;
pub mod store;

/// # Conventions
///
/// - **Errors**: `thiserror` enums in the library, mapped to
///   [`error::ErrorCode`] for anything shown to a person.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).
pub use error::{ErrorCode, SyncError};

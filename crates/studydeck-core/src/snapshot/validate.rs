//! Gatekeeper for imported documents.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the bytes parse as a JSON object with a `meta` object naming an app;
//! 2. `meta.app` is [`APP_ID`];
//! 3. the rest of `meta` is well formed;
//! 4. a `data` object is present;
//! 5. `meta.version` is in [`SUPPORTED_SCHEMA_VERSIONS`].
//!
//! Nothing here touches the store.

use serde_json::Value;

use super::{APP_ID, SUPPORTED_SCHEMA_VERSIONS, Snapshot, SnapshotMeta};
use crate::error::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("document is not a valid snapshot: {0}")]
    Malformed(String),

    #[error("document belongs to `{found}`, expected `studydeck`")]
    Foreign { found: String },

    #[error("document has no `data` section")]
    MissingPayload,

    #[error("schema version {found} is not supported (supported: {supported:?})")]
    UnsupportedVersion {
        found: u32,
        supported: &'static [u32],
    },
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedDocument,
            Self::Foreign { .. } => ErrorCode::ForeignDocument,
            Self::MissingPayload => ErrorCode::MissingPayload,
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
        }
    }
}

/// Parse and validate a user-supplied snapshot file.
///
/// # Errors
///
/// Returns the first [`ValidationError`] in check order.
pub fn validate_document(raw: &[u8]) -> Result<Snapshot, ValidationError> {
    let root: Value = serde_json::from_slice(raw)
        .map_err(|err| ValidationError::Malformed(format!("not JSON ({err})")))?;
    let Value::Object(mut root) = root else {
        return Err(ValidationError::Malformed(
            "top level is not an object".to_string(),
        ));
    };

    let meta = root
        .remove("meta")
        .ok_or_else(|| ValidationError::Malformed("missing `meta`".to_string()))?;
    let app = meta
        .get("app")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::Malformed("`meta.app` is missing".to_string()))?;
    if app != APP_ID {
        return Err(ValidationError::Foreign {
            found: app.to_string(),
        });
    }

    let meta: SnapshotMeta = serde_json::from_value(meta)
        .map_err(|err| ValidationError::Malformed(format!("bad `meta` ({err})")))?;

    let data = match root.remove("data") {
        None | Some(Value::Null) => return Err(ValidationError::MissingPayload),
        Some(Value::Object(data)) => data,
        Some(_) => {
            return Err(ValidationError::Malformed(
                "`data` is not an object".to_string(),
            ));
        }
    };

    if !SUPPORTED_SCHEMA_VERSIONS.contains(&meta.schema_version) {
        return Err(ValidationError::UnsupportedVersion {
            found: meta.schema_version,
            supported: SUPPORTED_SCHEMA_VERSIONS,
        });
    }

    tracing::debug!(
        version = meta.schema_version,
        device = %meta.device_label,
        records = data.len(),
        "snapshot document validated"
    );

    Ok(Snapshot {
        meta,
        data: data.into_iter().collect(),
    })
}

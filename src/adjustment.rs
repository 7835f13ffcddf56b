/// Adjustment record codec
///
/// Every committed edit carries an AdjustmentRecord: which tool produced it,
/// in which revision of its format, and an opaque payload describing the edit
/// parameters. A later session presents the record to the compatibility
/// predicate to decide whether it can reopen the edited state or must fall
/// back to the pristine original.
use serde::{Deserialize, Serialize};

use crate::error::EditorError;

/// Identity of this tool's adjustment format
///
/// Compatibility is exact string equality on both fields. A version bump
/// always invalidates reopen compatibility for records written under the
/// previous version; the store then serves the pristine original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFormat {
    pub identifier: String,
    pub version: String,
}

impl ToolFormat {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            version: version.into(),
        }
    }
}

/// Metadata attached to a saved edit
///
/// This triple is the only state that survives across sessions; its layout
/// must stay stable for reopen compatibility to keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub format_identifier: String,
    pub format_version: String,
    /// Opaque edit parameters; only the producing tool interprets these
    pub payload: Vec<u8>,
}

impl AdjustmentRecord {
    pub fn new(format: &ToolFormat, payload: Vec<u8>) -> Self {
        Self {
            format_identifier: format.identifier.clone(),
            format_version: format.version.clone(),
            payload,
        }
    }

    /// Serialize for storage alongside the committed asset
    pub fn encode(&self) -> Result<Vec<u8>, EditorError> {
        serde_json::to_vec(self).map_err(EditorError::CorruptData)
    }

    /// Parse a stored record; fails with CorruptData on malformed bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, EditorError> {
        serde_json::from_slice(bytes).map_err(EditorError::CorruptData)
    }

    /// Compatibility predicate: was this record produced by `format`?
    pub fn matches(&self, format: &ToolFormat) -> bool {
        self.format_identifier == format.identifier && self.format_version == format.version
    }
}

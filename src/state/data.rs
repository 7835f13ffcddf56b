/// Shared data structures for the edit session
///
/// These structs flow between the asset store and the session core.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};

use crate::adjustment::AdjustmentRecord;

/// Caller-side reference to a stored photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetReference {
    /// Catalog row id
    Id(i64),
    /// Path the original file was imported from
    Path(PathBuf),
}

impl std::fmt::Display for AssetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetReference::Id(id) => write!(f, "#{}", id),
            AssetReference::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Opaque reference to a stored photo; identity only, no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetHandle {
    id: i64,
}

impl AssetHandle {
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

/// Read-only editable representation of an asset
///
/// Valid only within the session that requested it; immutable once obtained.
#[derive(Clone)]
pub struct EditingInput {
    /// Display-size preview for immediate presentation
    pub preview: Arc<DynamicImage>,
    /// Location of the full-resolution source the save path reads
    pub full_size_path: PathBuf,
    /// Prior edit context, present exactly when the store served a
    /// previously-edited state whose record passed the compatibility check
    pub adjustment: Option<AdjustmentRecord>,
}

impl std::fmt::Debug for EditingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditingInput")
            .field(
                "preview",
                &format_args!("{}x{}", self.preview.width(), self.preview.height()),
            )
            .field("full_size_path", &self.full_size_path)
            .field("adjustment", &self.adjustment)
            .finish()
    }
}

/// Scaffold for an uncommitted output, handed out by the store
///
/// The rendered location is fresh and unique per save attempt.
#[derive(Debug)]
pub struct EditingOutputBuilder {
    rendered_path: PathBuf,
}

impl EditingOutputBuilder {
    pub fn new(rendered_path: PathBuf) -> Self {
        Self { rendered_path }
    }

    /// Where the save path must land the rendered bytes before committing
    pub fn rendered_path(&self) -> &Path {
        &self.rendered_path
    }

    /// Attach the adjustment record once the rendered bytes are on disk
    pub fn finish(self, adjustment: AdjustmentRecord) -> EditingOutput {
        EditingOutput {
            rendered_path: self.rendered_path,
            adjustment,
        }
    }
}

/// A rendered result plus its adjustment record, ready to commit
///
/// Built once per save attempt and consumed by the commit; never retained
/// after the attempt resolves.
#[derive(Debug)]
pub struct EditingOutput {
    pub rendered_path: PathBuf,
    pub adjustment: AdjustmentRecord,
}

/// Asset store module
///
/// This module defines the contract the edit session drives, and ships two
/// stores that honor it:
/// - CatalogStore: SQLite catalog with on-disk renders (catalog.rs)
/// - MemoryStore: in-memory catalog for tests and embedding (memory.rs)

pub mod catalog;
pub mod memory;

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;

use crate::adjustment::AdjustmentRecord;
use crate::error::EditorError;
use crate::state::data::{
    AssetHandle, AssetReference, EditingInput, EditingOutput, EditingOutputBuilder,
};

/// Long edge of the display-size preview served with an editing input
pub const PREVIEW_LONG_EDGE: u32 = 1280;

/// Contract with the asset store
///
/// Methods are blocking; the session wraps every call in a background task,
/// so implementations must be shareable across threads.
pub trait AssetStore: Send + Sync {
    /// Resolve a caller reference to a handle
    fn fetch_handle(&self, reference: &AssetReference) -> Result<AssetHandle, EditorError>;

    /// Whether the store allows content edits for this asset
    fn can_edit(&self, handle: &AssetHandle) -> Result<bool, EditorError>;

    /// Serve an editable representation of the asset
    ///
    /// The predicate receives the previously-stored adjustment record, if
    /// any. When it accepts, the store serves the edited state together with
    /// the record so the tool can recover its edit context; otherwise it
    /// serves the pristine original.
    fn request_editing_input(
        &self,
        handle: &AssetHandle,
        can_handle_adjustment: &dyn Fn(&AdjustmentRecord) -> bool,
    ) -> Result<EditingInput, EditorError>;

    /// Hand out a fresh, uncommitted output location for a save attempt
    fn begin_output(&self, input: &EditingInput) -> Result<EditingOutputBuilder, EditorError>;

    /// Atomically register the rendered bytes and adjustment record as the
    /// new authoritative state of the asset
    ///
    /// Called at most once per save attempt. Never partially applied: on
    /// failure the asset is unchanged.
    fn commit(&self, handle: &AssetHandle, output: EditingOutput) -> Result<(), EditorError>;
}

/// Write `bytes` to `dest` atomically
///
/// The bytes land in a temp file in the destination directory first, then a
/// rename moves them into place. Either the full content lands or `dest`
/// keeps its prior state.
pub fn write_atomic(bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    let file_name = dest.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination has no file name",
        )
    })?;
    let tmp = dest.with_file_name(format!(
        "{}.tmp-{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Load the display-size preview served with an editing input
pub(crate) fn load_preview(path: &Path) -> Result<Arc<DynamicImage>, EditorError> {
    let full = image::open(path)?;
    Ok(Arc::new(full.thumbnail(PREVIEW_LONG_EDGE, PREVIEW_LONG_EDGE)))
}

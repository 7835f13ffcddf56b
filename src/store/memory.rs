/// In-memory asset store
///
/// Keeps the catalog in a HashMap while committed renders live on disk under
/// a caller-provided directory. Useful as a test double and for embedding
/// the session core without a database.
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::adjustment::AdjustmentRecord;
use crate::error::EditorError;
use crate::state::data::{
    AssetHandle, AssetReference, EditingInput, EditingOutput, EditingOutputBuilder,
};
use crate::store::{load_preview, AssetStore};

struct MemoryAsset {
    original_path: PathBuf,
    editable: bool,
    /// Committed render location plus its adjustment record
    edit: Option<(PathBuf, AdjustmentRecord)>,
}

struct Inner {
    next_id: i64,
    next_nonce: u64,
    assets: HashMap<i64, MemoryAsset>,
}

pub struct MemoryStore {
    render_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create a store that keeps renders under `render_dir`
    pub fn new(render_dir: impl Into<PathBuf>) -> Result<Self, EditorError> {
        let render_dir = render_dir.into();
        fs::create_dir_all(&render_dir)?;
        Ok(Self {
            render_dir,
            inner: Mutex::new(Inner {
                next_id: 1,
                next_nonce: 0,
                assets: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    /// Register an existing image file as an asset
    pub fn add_asset(&self, original_path: impl Into<PathBuf>, editable: bool) -> AssetHandle {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.assets.insert(
            id,
            MemoryAsset {
                original_path: original_path.into(),
                editable,
                edit: None,
            },
        );
        AssetHandle::new(id)
    }

    /// Committed adjustment record for an asset, if any
    pub fn committed_record(&self, handle: &AssetHandle) -> Option<AdjustmentRecord> {
        self.lock()
            .assets
            .get(&handle.id())
            .and_then(|asset| asset.edit.as_ref().map(|(_, record)| record.clone()))
    }

    /// Committed render location for an asset, if any
    pub fn committed_render(&self, handle: &AssetHandle) -> Option<PathBuf> {
        self.lock()
            .assets
            .get(&handle.id())
            .and_then(|asset| asset.edit.as_ref().map(|(path, _)| path.clone()))
    }
}

impl AssetStore for MemoryStore {
    fn fetch_handle(&self, reference: &AssetReference) -> Result<AssetHandle, EditorError> {
        let inner = self.lock();
        let found = match reference {
            AssetReference::Id(id) => inner.assets.contains_key(id).then_some(*id),
            AssetReference::Path(path) => inner
                .assets
                .iter()
                .find(|(_, asset)| asset.original_path == *path)
                .map(|(id, _)| *id),
        };
        found
            .map(AssetHandle::new)
            .ok_or_else(|| EditorError::NotFound(reference.to_string()))
    }

    fn can_edit(&self, handle: &AssetHandle) -> Result<bool, EditorError> {
        let inner = self.lock();
        let asset = inner
            .assets
            .get(&handle.id())
            .ok_or_else(|| EditorError::NotFound(format!("#{}", handle.id())))?;
        Ok(asset.editable && asset.original_path.exists())
    }

    fn request_editing_input(
        &self,
        handle: &AssetHandle,
        can_handle_adjustment: &dyn Fn(&AdjustmentRecord) -> bool,
    ) -> Result<EditingInput, EditorError> {
        let (full_size_path, adjustment) = {
            let inner = self.lock();
            let asset = inner
                .assets
                .get(&handle.id())
                .ok_or_else(|| EditorError::NotFound(format!("#{}", handle.id())))?;
            match &asset.edit {
                Some((rendered, record)) if can_handle_adjustment(record) => {
                    (rendered.clone(), Some(record.clone()))
                }
                _ => (asset.original_path.clone(), None),
            }
        };

        let preview = load_preview(&full_size_path)?;
        Ok(EditingInput {
            preview,
            full_size_path,
            adjustment,
        })
    }

    fn begin_output(&self, _input: &EditingInput) -> Result<EditingOutputBuilder, EditorError> {
        let mut inner = self.lock();
        inner.next_nonce += 1;
        let path = self
            .render_dir
            .join(format!("pending-{}.jpg", inner.next_nonce));
        Ok(EditingOutputBuilder::new(path))
    }

    fn commit(&self, handle: &AssetHandle, output: EditingOutput) -> Result<(), EditorError> {
        if !output.rendered_path.exists() {
            return Err(EditorError::CommitFailure(
                "rendered content missing".to_string(),
            ));
        }

        let mut inner = self.lock();
        let Some(asset) = inner.assets.get_mut(&handle.id()) else {
            return Err(EditorError::MissingAsset);
        };

        let final_path = self.render_dir.join(format!("asset-{}.jpg", handle.id()));
        fs::rename(&output.rendered_path, &final_path)
            .map_err(|err| EditorError::CommitFailure(err.to_string()))?;
        asset.edit = Some((final_path, output.adjustment));
        Ok(())
    }
}

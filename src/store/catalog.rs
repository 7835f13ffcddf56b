/// SQLite-backed asset store
///
/// The catalog database keeps asset metadata and committed edits. Originals
/// stay where they were imported from; rendered edits live under a managed
/// renders directory next to the database.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use walkdir::WalkDir;

use crate::adjustment::AdjustmentRecord;
use crate::error::EditorError;
use crate::state::data::{
    AssetHandle, AssetReference, EditingInput, EditingOutput, EditingOutputBuilder,
};
use crate::store::{load_preview, AssetStore};

/// File extensions picked up by folder import
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "webp"];

pub struct CatalogStore {
    db_path: PathBuf,
    renders_dir: PathBuf,
}

impl CatalogStore {
    /// Open or create the catalog in the user's data directory
    ///
    /// - Linux: ~/.local/share/photo-annotator
    /// - macOS: ~/Library/Application Support/photo-annotator
    /// - Windows: %APPDATA%\photo-annotator
    pub fn new() -> Result<Self, EditorError> {
        let mut root = dirs::data_dir().or_else(dirs::home_dir).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine user data directory",
            )
        })?;
        root.push("photo-annotator");
        Self::open(root)
    }

    /// Open or create a catalog rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EditorError> {
        let root = root.into();
        let renders_dir = root.join("renders");
        fs::create_dir_all(&renders_dir)?;

        let store = Self {
            db_path: root.join("catalog.db"),
            renders_dir,
        };
        store.init_schema()?;

        println!("📁 Catalog initialized at: {}", store.db_path.display());
        Ok(store)
    }

    /// Path to the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // Connections are opened per operation so the store can be shared
    // across threads; rusqlite::Connection is not Send.
    fn connect(&self) -> Result<Connection, EditorError> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn init_schema(&self) -> Result<(), EditorError> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS assets (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE,
                filename        TEXT NOT NULL,
                editable        INTEGER NOT NULL DEFAULT 1,
                imported_at     INTEGER NOT NULL
            )",
            [],
        )?;

        // One committed edit per asset: the rendered file plus the
        // adjustment record that produced it
        conn.execute(
            "CREATE TABLE IF NOT EXISTS edits (
                asset_id        INTEGER PRIMARY KEY,
                rendered_path   TEXT NOT NULL,
                adjustment      BLOB NOT NULL,
                saved_at        INTEGER NOT NULL,
                FOREIGN KEY(asset_id) REFERENCES assets(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_imported_at
             ON assets(imported_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Import a single image file
    /// Duplicate paths are rejected by the UNIQUE constraint
    pub fn import_image(&self, path: &Path) -> Result<AssetHandle, EditorError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO assets (path, filename, imported_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                path.to_string_lossy().to_string(),
                filename,
                Utc::now().timestamp()
            ],
        )?;
        Ok(AssetHandle::new(conn.last_insert_rowid()))
    }

    /// Recursively import every image file under `folder`
    /// Returns (imported, skipped) counts; already-known paths are skipped
    pub fn import_folder(&self, folder: &Path) -> Result<(usize, usize), EditorError> {
        let mut imported = 0;
        let mut skipped = 0;

        println!("🔍 Scanning folder: {}", folder.display());

        for entry in WalkDir::new(folder)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(extension) = path.extension() else {
                continue;
            };
            let ext = extension.to_string_lossy().to_lowercase();
            if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }

            match self.import_image(path) {
                Ok(_) => imported += 1,
                Err(EditorError::Database(rusqlite::Error::SqliteFailure(err, _)))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        println!("📊 Import summary: {} new, {} skipped", imported, skipped);
        Ok((imported, skipped))
    }

    /// Count of assets in the catalog
    pub fn asset_count(&self) -> Result<i64, EditorError> {
        let conn = self.connect()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?)
    }

    /// Flip the editable flag for an asset
    pub fn set_editable(&self, handle: &AssetHandle, editable: bool) -> Result<(), EditorError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE assets SET editable = ?1 WHERE id = ?2",
            rusqlite::params![editable, handle.id()],
        )?;
        Ok(())
    }
}

impl AssetStore for CatalogStore {
    fn fetch_handle(&self, reference: &AssetReference) -> Result<AssetHandle, EditorError> {
        let conn = self.connect()?;
        let row: Option<i64> = match reference {
            AssetReference::Id(id) => conn
                .query_row("SELECT id FROM assets WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?,
            AssetReference::Path(path) => conn
                .query_row(
                    "SELECT id FROM assets WHERE path = ?1",
                    [path.to_string_lossy().to_string()],
                    |row| row.get(0),
                )
                .optional()?,
        };
        row.map(AssetHandle::new)
            .ok_or_else(|| EditorError::NotFound(reference.to_string()))
    }

    fn can_edit(&self, handle: &AssetHandle) -> Result<bool, EditorError> {
        let conn = self.connect()?;
        let row: Option<(String, bool)> = conn
            .query_row(
                "SELECT path, editable FROM assets WHERE id = ?1",
                [handle.id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((path, editable)) = row else {
            return Err(EditorError::NotFound(format!("#{}", handle.id())));
        };
        Ok(editable && Path::new(&path).exists())
    }

    fn request_editing_input(
        &self,
        handle: &AssetHandle,
        can_handle_adjustment: &dyn Fn(&AdjustmentRecord) -> bool,
    ) -> Result<EditingInput, EditorError> {
        let conn = self.connect()?;
        let original: Option<String> = conn
            .query_row(
                "SELECT path FROM assets WHERE id = ?1",
                [handle.id()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(original) = original else {
            return Err(EditorError::NotFound(format!("#{}", handle.id())));
        };

        let edit: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT rendered_path, adjustment FROM edits WHERE asset_id = ?1",
                [handle.id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // A stored edit is served only when its record was produced by the
        // requesting tool; a mismatched, absent or unreadable record yields
        // the pristine original.
        let (full_size_path, adjustment) = match edit {
            Some((rendered, blob)) => match AdjustmentRecord::decode(&blob) {
                Ok(record) if can_handle_adjustment(&record) => {
                    (PathBuf::from(rendered), Some(record))
                }
                Ok(_) => (PathBuf::from(original), None),
                Err(err) => {
                    eprintln!(
                        "⚠️  Unreadable adjustment record for asset {}: {}",
                        handle.id(),
                        err
                    );
                    (PathBuf::from(original), None)
                }
            },
            None => (PathBuf::from(original), None),
        };

        let preview = load_preview(&full_size_path)?;
        Ok(EditingInput {
            preview,
            full_size_path,
            adjustment,
        })
    }

    fn begin_output(&self, _input: &EditingInput) -> Result<EditingOutputBuilder, EditorError> {
        let nonce = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Ok(EditingOutputBuilder::new(
            self.renders_dir.join(format!("pending-{}.jpg", nonce)),
        ))
    }

    fn commit(&self, handle: &AssetHandle, output: EditingOutput) -> Result<(), EditorError> {
        if !output.rendered_path.exists() {
            return Err(EditorError::CommitFailure(
                "rendered content missing".to_string(),
            ));
        }
        let blob = output.adjustment.encode()?;

        let conn = self.connect()?;
        let known: Option<i64> = conn
            .query_row(
                "SELECT id FROM assets WHERE id = ?1",
                [handle.id()],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(EditorError::MissingAsset);
        }
        let prior: Option<String> = conn
            .query_row(
                "SELECT rendered_path FROM edits WHERE asset_id = ?1",
                [handle.id()],
                |row| row.get(0),
            )
            .optional()?;

        // Land the rendered file under its final name first; the edits row
        // is the authoritative state, so until it is written the asset is
        // unchanged.
        let final_path = self.renders_dir.join(format!(
            "asset-{}-{}.jpg",
            handle.id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::rename(&output.rendered_path, &final_path)
            .map_err(|err| EditorError::CommitFailure(err.to_string()))?;

        let upsert = conn.execute(
            "INSERT INTO edits (asset_id, rendered_path, adjustment, saved_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(asset_id) DO UPDATE SET
                rendered_path = excluded.rendered_path,
                adjustment = excluded.adjustment,
                saved_at = excluded.saved_at",
            rusqlite::params![
                handle.id(),
                final_path.to_string_lossy().to_string(),
                blob,
                Utc::now().timestamp()
            ],
        );

        match upsert {
            Ok(_) => {
                // The previous render is no longer referenced
                if let Some(prior) = prior {
                    if Path::new(&prior) != final_path {
                        let _ = fs::remove_file(prior);
                    }
                }
                println!("💾 Committed edit for asset {}", handle.id());
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&final_path);
                Err(EditorError::CommitFailure(err.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

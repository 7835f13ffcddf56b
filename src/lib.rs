/// Non-destructive photo annotation editor core
///
/// This crate implements the edit-session core of a non-destructive photo
/// editor: open an asset from a store, apply a transformation, and commit the
/// result back so the edit can be reopened or discarded later.
///
/// - Adjustment record codec and compatibility check (adjustment.rs)
/// - Session state machine and async session facade (state/)
/// - Asset store contract plus catalog and in-memory stores (store/)
/// - Transformation engine seam and the overlay annotator (annotate.rs)
///
/// Asynchronous operations expect to run inside a tokio runtime.
pub mod adjustment;
pub mod annotate;
pub mod error;
pub mod state;
pub mod store;

pub use adjustment::{AdjustmentRecord, ToolFormat};
pub use annotate::{OverlayAnnotator, OverlaySettings, TransformEngine};
pub use error::EditorError;
pub use state::data::{
    AssetHandle, AssetReference, EditingInput, EditingOutput, EditingOutputBuilder,
};
pub use state::machine::{SessionPhase, SessionStateMachine};
pub use state::session::EditSession;
pub use store::catalog::CatalogStore;
pub use store::memory::MemoryStore;
pub use store::{write_atomic, AssetStore};

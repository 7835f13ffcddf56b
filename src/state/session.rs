/// Async edit session: completion gate plus request coordinator
///
/// EditSession owns the state machine behind a mutex-guarded gate. Store and
/// pixel work runs on background tasks; every completion re-enters through
/// the gate, which checks an explicit liveness flag and a generation counter
/// before touching the machine. A completion that loses that check is a
/// no-op: the result is discarded, nothing is mutated.
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};
use tokio::task;

use crate::adjustment::{AdjustmentRecord, ToolFormat};
use crate::annotate::TransformEngine;
use crate::error::EditorError;
use crate::state::data::{AssetHandle, AssetReference, EditingInput};
use crate::state::machine::{SaveContext, SessionPhase, SessionStateMachine};
use crate::store::{write_atomic, AssetStore};

/// JPEG quality for committed renders
const RENDER_JPEG_QUALITY: u8 = 90;

struct Gate {
    alive: bool,
    generation: u64,
    machine: SessionStateMachine,
}

struct SessionInner {
    store: Arc<dyn AssetStore>,
    engine: Arc<dyn TransformEngine>,
    format: ToolFormat,
    gate: Mutex<Gate>,
    phase_tx: watch::Sender<SessionPhase>,
}

/// One editing interaction with one asset
///
/// At most one open or save is in flight at a time, enforced by the state
/// machine's guards. Operations resolve when the store's completion comes
/// back; dropping the returned future does not abandon the completion, which
/// still lands through the gate.
pub struct EditSession {
    inner: Arc<SessionInner>,
}

impl EditSession {
    pub fn new(
        store: Arc<dyn AssetStore>,
        engine: Arc<dyn TransformEngine>,
        format: ToolFormat,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Self {
            inner: Arc::new(SessionInner {
                store,
                engine,
                format,
                gate: Mutex::new(Gate {
                    alive: true,
                    generation: 0,
                    machine: SessionStateMachine::new(),
                }),
                phase_tx,
            }),
        }
    }

    /// Subscribe to phase changes, one value per transition
    ///
    /// This is all the presentation layer needs: it never sees the machine's
    /// internals.
    pub fn phases(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.gate().machine.phase()
    }

    /// Asset held by the session, if any
    pub fn asset(&self) -> Option<AssetHandle> {
        self.inner.gate().machine.asset()
    }

    /// Editing input held by the session, if any
    pub fn input(&self) -> Option<EditingInput> {
        self.inner.gate().machine.input().cloned()
    }

    /// Open an asset for editing
    ///
    /// Legal only from Idle; a second open while one is in flight is
    /// rejected with InvalidState. The store resolves the reference, is
    /// asked whether the asset can be edited at all, and then serves the
    /// editable input, preferring a previously-edited state whose
    /// adjustment record matches this tool's format. On any failure the
    /// session is back in Idle with nothing retained.
    pub async fn open(&self, reference: AssetReference) -> Result<(), EditorError> {
        let generation = {
            let mut gate = self.inner.gate();
            if !gate.alive {
                return Err(EditorError::StaleSession);
            }
            gate.machine.begin_open()?;
            self.inner.publish(&gate);
            gate.generation
        };

        let inner = self.inner.clone();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let store = inner.store.clone();
            let format = inner.format.clone();
            let outcome = task::spawn_blocking(move || {
                let handle = store.fetch_handle(&reference)?;
                if !store.can_edit(&handle)? {
                    return Err(EditorError::NotEditable);
                }
                let input = store.request_editing_input(&handle, &|record: &AdjustmentRecord| {
                    record.matches(&format)
                })?;
                Ok((handle, input))
            })
            .await
            .unwrap_or_else(|err| Err(EditorError::Background(err.to_string())));

            let resolved = inner.resolve_open(generation, outcome);
            let _ = done_tx.send(resolved);
        });

        done_rx
            .await
            .unwrap_or_else(|_| Err(EditorError::Background("open task dropped".to_string())))
    }

    /// Render and commit the current edit
    ///
    /// Reads the full-resolution source, runs the transformation engine,
    /// lands the rendered JPEG atomically and submits the commit. The
    /// session returns to Ready whether the attempt succeeds or fails, so a
    /// failed save can be retried with the same input.
    pub async fn save(&self) -> Result<(), EditorError> {
        let (generation, ctx) = {
            let mut gate = self.inner.gate();
            if !gate.alive {
                return Err(EditorError::StaleSession);
            }
            let ctx = gate.machine.begin_save()?;
            self.inner.publish(&gate);
            (gate.generation, ctx)
        };

        let inner = self.inner.clone();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let store = inner.store.clone();
            let engine = inner.engine.clone();
            let format = inner.format.clone();
            let outcome = task::spawn_blocking(move || {
                render_and_commit(store.as_ref(), engine.as_ref(), &format, ctx)
            })
            .await
            .unwrap_or_else(|err| Err(EditorError::Background(err.to_string())));

            let resolved = inner.resolve_save(generation, outcome);
            let _ = done_tx.send(resolved);
        });

        done_rx
            .await
            .unwrap_or_else(|_| Err(EditorError::Background("save task dropped".to_string())))
    }

    /// Abort an in-flight open
    ///
    /// The store keeps working, but its completion is discarded when it
    /// eventually arrives.
    pub fn cancel(&self) -> Result<(), EditorError> {
        let mut gate = self.inner.gate();
        gate.machine.cancel()?;
        gate.generation += 1;
        self.inner.publish(&gate);
        Ok(())
    }

    /// Tear the session down
    ///
    /// Pending completions become no-ops and further operations are
    /// rejected. Cancellation is best-effort: work already submitted to the
    /// store runs to completion, its result is simply dropped.
    pub fn close(&self) {
        let mut gate = self.inner.gate();
        gate.alive = false;
        gate.generation += 1;
        gate.machine.reset();
        self.inner.publish(&gate);
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().expect("session gate poisoned")
    }

    fn publish(&self, gate: &Gate) {
        self.phase_tx.send_replace(gate.machine.phase());
    }

    /// Deliver an open completion through the gate
    fn resolve_open(
        &self,
        generation: u64,
        outcome: Result<(AssetHandle, EditingInput), EditorError>,
    ) -> Result<(), EditorError> {
        let mut gate = self.gate();
        if !gate.alive || gate.generation != generation {
            println!("⚠️  Discarding stale open completion");
            return Err(EditorError::StaleSession);
        }
        let result = gate.machine.complete_open(outcome);
        self.publish(&gate);
        result
    }

    /// Deliver a save completion through the gate
    fn resolve_save(&self, generation: u64, outcome: Result<(), EditorError>) -> Result<(), EditorError> {
        let mut gate = self.gate();
        if !gate.alive || gate.generation != generation {
            println!("⚠️  Discarding stale save completion");
            return Err(EditorError::StaleSession);
        }
        let result = gate.machine.complete_save(outcome);
        self.publish(&gate);
        result
    }
}

/// The save path, run on a blocking task: transform the full-size source,
/// land the bytes atomically, submit the commit
fn render_and_commit(
    store: &dyn AssetStore,
    engine: &dyn TransformEngine,
    format: &ToolFormat,
    ctx: SaveContext,
) -> Result<(), EditorError> {
    if !ctx.input.full_size_path.exists() {
        return Err(EditorError::MissingInput);
    }
    let source = image::open(&ctx.input.full_size_path)?;
    let rendered = engine.transform(&source);

    let mut jpeg = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, RENDER_JPEG_QUALITY);
    encoder.encode_image(&rendered.to_rgb8())?;

    let builder = store.begin_output(&ctx.input)?;
    write_atomic(&jpeg, builder.rendered_path()).map_err(EditorError::WriteFailure)?;

    let record = AdjustmentRecord::new(format, engine.adjustment_payload());
    let output = builder.finish(record);
    store.commit(&ctx.asset, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{EditingOutput, EditingOutputBuilder};
    use crate::store::memory::MemoryStore;
    use image::{DynamicImage, GenericImageView};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn format() -> ToolFormat {
        ToolFormat::new("com.example.tool", "0.1")
    }

    fn write_source_image(dir: &Path) -> PathBuf {
        let path = dir.join("source.png");
        let img = image::RgbaImage::from_pixel(32, 32, image::Rgba([40, 80, 120, 255]));
        img.save(&path).expect("write source image");
        path
    }

    /// Counts invocations so tests can assert the engine never ran
    struct BrightenEngine {
        calls: AtomicUsize,
    }

    impl BrightenEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl TransformEngine for BrightenEngine {
        fn transform(&self, source: &DynamicImage) -> DynamicImage {
            self.calls.fetch_add(1, Ordering::SeqCst);
            source.brighten(64)
        }

        fn adjustment_payload(&self) -> Vec<u8> {
            b"brighten".to_vec()
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        engine: Arc<BrightenEngine>,
        original: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path().join("renders")).unwrap());
        let original = write_source_image(dir.path());
        Fixture {
            _dir: dir,
            store,
            engine: BrightenEngine::new(),
            original,
        }
    }

    fn session(fx: &Fixture) -> EditSession {
        EditSession::new(fx.store.clone(), fx.engine.clone(), format())
    }

    #[tokio::test]
    async fn test_open_reaches_ready() {
        let fx = fixture();
        let handle = fx.store.add_asset(&fx.original, true);
        let session = session(&fx);
        let phases = session.phases();

        session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap();

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(*phases.borrow(), SessionPhase::Ready);
        assert_eq!(session.asset(), Some(handle));

        let input = session.input().unwrap();
        assert_eq!(input.full_size_path, fx.original);
        assert!(input.adjustment.is_none());
        assert_eq!(input.preview.width(), 32);
    }

    #[tokio::test]
    async fn test_open_unknown_reference_is_not_found() {
        let fx = fixture();
        let session = session(&fx);

        let err = session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::NotFound(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.asset().is_none());
    }

    #[tokio::test]
    async fn test_open_not_editable_returns_to_idle() {
        let fx = fixture();
        fx.store.add_asset(&fx.original, false);
        let session = session(&fx);

        let err = session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::NotEditable));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.input().is_none());
    }

    #[tokio::test]
    async fn test_open_twice_is_invalid() {
        let fx = fixture();
        fx.store.add_asset(&fx.original, true);
        let session = session(&fx);
        session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap();

        let err = session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EditorError::InvalidState {
                operation: "open",
                phase: SessionPhase::Ready,
            }
        ));
    }

    #[tokio::test]
    async fn test_save_commits_and_returns_to_ready() {
        let fx = fixture();
        let handle = fx.store.add_asset(&fx.original, true);
        let session = session(&fx);
        session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap();

        session.save().await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 1);

        let record = fx.store.committed_record(&handle).unwrap();
        assert!(record.matches(&format()));
        assert_eq!(record.payload, b"brighten".to_vec());

        let render = fx.store.committed_render(&handle).unwrap();
        assert!(render.exists());
        // The committed render decodes and carries the transformation
        let rendered = image::open(render).unwrap().to_rgb8();
        assert!(rendered.get_pixel(16, 16)[0] > 40);
    }

    #[tokio::test]
    async fn test_save_while_idle_runs_nothing() {
        let fx = fixture();
        fx.store.add_asset(&fx.original, true);
        let session = session(&fx);

        let err = session.save().await.unwrap_err();
        assert!(matches!(
            err,
            EditorError::InvalidState {
                operation: "save",
                phase: SessionPhase::Idle,
            }
        ));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_save_with_missing_source_is_missing_input() {
        let fx = fixture();
        fx.store.add_asset(&fx.original, true);
        let session = session(&fx);
        session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap();

        std::fs::remove_file(&fx.original).unwrap();

        let err = session.save().await.unwrap_err();
        assert!(matches!(err, EditorError::MissingInput));
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    /// Delegates to a MemoryStore but can be told to reject commits
    struct FlakyCommitStore {
        inner: MemoryStore,
        fail_commit: AtomicBool,
    }

    impl AssetStore for FlakyCommitStore {
        fn fetch_handle(&self, reference: &AssetReference) -> Result<AssetHandle, EditorError> {
            self.inner.fetch_handle(reference)
        }

        fn can_edit(&self, handle: &AssetHandle) -> Result<bool, EditorError> {
            self.inner.can_edit(handle)
        }

        fn request_editing_input(
            &self,
            handle: &AssetHandle,
            can_handle_adjustment: &dyn Fn(&AdjustmentRecord) -> bool,
        ) -> Result<EditingInput, EditorError> {
            self.inner.request_editing_input(handle, can_handle_adjustment)
        }

        fn begin_output(&self, input: &EditingInput) -> Result<EditingOutputBuilder, EditorError> {
            self.inner.begin_output(input)
        }

        fn commit(&self, handle: &AssetHandle, output: EditingOutput) -> Result<(), EditorError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(EditorError::CommitFailure("store said no".to_string()));
            }
            self.inner.commit(handle, output)
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_session_ready_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyCommitStore {
            inner: MemoryStore::new(dir.path().join("renders")).unwrap(),
            fail_commit: AtomicBool::new(true),
        });
        let original = write_source_image(dir.path());
        store.inner.add_asset(&original, true);

        let engine = BrightenEngine::new();
        let session = EditSession::new(store.clone(), engine, format());
        session
            .open(AssetReference::Path(original.clone()))
            .await
            .unwrap();

        let err = session.save().await.unwrap_err();
        assert!(matches!(err, EditorError::CommitFailure(_)));
        assert_eq!(session.phase(), SessionPhase::Ready);

        // The prior input is still usable; the retry goes through
        store.fail_commit.store(false, Ordering::SeqCst);
        session.save().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    /// Blocks the first fetch until released, so tests can tear the session
    /// down while the store is still working
    struct BlockingStore {
        inner: MemoryStore,
        release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl AssetStore for BlockingStore {
        fn fetch_handle(&self, reference: &AssetReference) -> Result<AssetHandle, EditorError> {
            let gate = self.release.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.recv();
            }
            self.inner.fetch_handle(reference)
        }

        fn can_edit(&self, handle: &AssetHandle) -> Result<bool, EditorError> {
            self.inner.can_edit(handle)
        }

        fn request_editing_input(
            &self,
            handle: &AssetHandle,
            can_handle_adjustment: &dyn Fn(&AdjustmentRecord) -> bool,
        ) -> Result<EditingInput, EditorError> {
            self.inner.request_editing_input(handle, can_handle_adjustment)
        }

        fn begin_output(&self, input: &EditingInput) -> Result<EditingOutputBuilder, EditorError> {
            self.inner.begin_output(input)
        }

        fn commit(&self, handle: &AssetHandle, output: EditingOutput) -> Result<(), EditorError> {
            self.inner.commit(handle, output)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_after_teardown_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let original = write_source_image(dir.path());
        let store = Arc::new(BlockingStore {
            inner: MemoryStore::new(dir.path().join("renders")).unwrap(),
            release: Mutex::new(Some(release_rx)),
        });
        store.inner.add_asset(&original, true);

        let session = Arc::new(EditSession::new(store, BrightenEngine::new(), format()));
        let mut phases = session.phases();

        let opener = session.clone();
        let pending = tokio::spawn(async move { opener.open(AssetReference::Path(original)).await });

        phases
            .wait_for(|phase| *phase == SessionPhase::Loading)
            .await
            .unwrap();
        session.close();

        // Let the store finish; its completion must be suppressed
        release_tx.send(()).unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(EditorError::StaleSession)));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.asset().is_none());
        assert!(session.input().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_discards_in_flight_open_and_allows_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let original = write_source_image(dir.path());
        let store = Arc::new(BlockingStore {
            inner: MemoryStore::new(dir.path().join("renders")).unwrap(),
            release: Mutex::new(Some(release_rx)),
        });
        store.inner.add_asset(&original, true);

        let session = Arc::new(EditSession::new(store, BrightenEngine::new(), format()));
        let mut phases = session.phases();

        let opener = session.clone();
        let reference = AssetReference::Path(original.clone());
        let pending = tokio::spawn(async move { opener.open(reference).await });

        phases
            .wait_for(|phase| *phase == SessionPhase::Loading)
            .await
            .unwrap();
        session.cancel().unwrap();
        assert_eq!(session.phase(), SessionPhase::Idle);

        release_tx.send(()).unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(EditorError::StaleSession)));
        assert!(session.asset().is_none());

        // The session is reusable after a cancel
        session
            .open(AssetReference::Path(original))
            .await
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_operations_on_closed_session_are_rejected() {
        let fx = fixture();
        fx.store.add_asset(&fx.original, true);
        let session = session(&fx);
        session.close();

        let err = session
            .open(AssetReference::Path(fx.original.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::StaleSession));
    }

    #[tokio::test]
    async fn test_reopen_recovers_edit_context_with_matching_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            crate::store::catalog::CatalogStore::open(dir.path().join("catalog")).unwrap(),
        );
        let original = write_source_image(dir.path());
        store.import_image(&original).unwrap();

        // First interaction: open and save an edit
        {
            let session = EditSession::new(store.clone(), BrightenEngine::new(), format());
            session
                .open(AssetReference::Path(original.clone()))
                .await
                .unwrap();
            session.save().await.unwrap();
        }

        // Same tool format: the edited state comes back with its record
        let session = EditSession::new(store.clone(), BrightenEngine::new(), format());
        session
            .open(AssetReference::Path(original.clone()))
            .await
            .unwrap();
        let input = session.input().unwrap();
        assert_ne!(input.full_size_path, original);
        assert_eq!(input.adjustment.unwrap().payload, b"brighten".to_vec());
        drop(session);

        // Bumped version: the pristine original comes back
        let bumped = ToolFormat::new("com.example.tool", "0.2");
        let session = EditSession::new(store, BrightenEngine::new(), bumped);
        session
            .open(AssetReference::Path(original.clone()))
            .await
            .unwrap();
        let input = session.input().unwrap();
        assert_eq!(input.full_size_path, original);
        assert!(input.adjustment.is_none());
    }
}

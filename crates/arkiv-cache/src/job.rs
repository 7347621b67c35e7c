//! A single extraction job.
//!
//! An [`ArchiveExtractor`] owns one backend and the worker thread that runs
//! it. It records every entry the backend reports and reaches a terminal
//! state exactly once, whatever the backend does: success, failure, panic
//! or interruption.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use arkiv_archive::{BackendKind, ExtractedEntry, Extractor, ExtractorResult};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
    Interrupted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Interrupted)
    }

    fn for_result(result: &ExtractorResult) -> Self {
        if result.is_success() {
            Self::Succeeded
        } else if result.is_interrupted() {
            Self::Interrupted
        } else {
            Self::Failed
        }
    }
}

/// Lifecycle hooks run on the worker thread, ahead of public callbacks.
pub trait JobHooks: Send + Sync {
    fn started(&self, _job: &ArchiveExtractor) {}

    fn finished(&self, _job: &ArchiveExtractor, _result: &ExtractorResult) {}
}

/// Hooks that do nothing, for jobs run outside a manager.
pub struct NoHooks;

impl JobHooks for NoHooks {}

type EntryCallback = Arc<dyn Fn(&ExtractedEntry) + Send + Sync>;
type FinishedCallback = Box<dyn FnOnce(&ArchiveExtractor, &ExtractorResult) + Send>;

#[derive(Default)]
struct Callbacks {
    entry: Vec<EntryCallback>,
    finished: Vec<FinishedCallback>,
}

struct Inner {
    archive: PathBuf,
    output_dir: PathBuf,
    mtime: f64,
    backend: Box<dyn Extractor>,
    state: watch::Sender<JobState>,
    entries: Mutex<Vec<ExtractedEntry>>,
    callbacks: Mutex<Callbacks>,
    result: OnceLock<ExtractorResult>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an extraction job. Clones share the job.
#[derive(Clone)]
pub struct ArchiveExtractor {
    inner: Arc<Inner>,
}

impl ArchiveExtractor {
    /// `output_dir` must already exist so a watcher can be attached to it
    /// before the first entry appears.
    pub fn new(
        archive: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        backend: Box<dyn Extractor>,
    ) -> Self {
        let archive = archive.into();
        let mtime = arkiv_fs::mtime_secs(&archive);
        let (state, _) = watch::channel(JobState::Created);
        Self {
            inner: Arc::new(Inner {
                archive,
                output_dir: output_dir.into(),
                mtime,
                backend,
                state,
                entries: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Callbacks::default()),
                result: OnceLock::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.inner.archive
    }

    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    /// Archive mtime, in seconds since the epoch, taken at construction.
    pub fn mtime(&self) -> f64 {
        self.inner.mtime
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub fn state(&self) -> JobState {
        *self.inner.state.borrow()
    }

    pub fn result(&self) -> Option<ExtractorResult> {
        self.inner.result.get().cloned()
    }

    pub fn entries(&self) -> Vec<ExtractedEntry> {
        lock(&self.inner.entries).clone()
    }

    pub fn entry_names(&self) -> Vec<String> {
        lock(&self.inner.entries)
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Called on the worker for each entry reported after registration.
    pub fn on_entry_extracted<F>(&self, callback: F)
    where
        F: Fn(&ExtractedEntry) + Send + Sync + 'static,
    {
        lock(&self.inner.callbacks).entry.push(Arc::new(callback));
    }

    /// Called once with the terminal result. Fires immediately when the job
    /// has already finished.
    pub fn on_finished<F>(&self, callback: F)
    where
        F: FnOnce(&ArchiveExtractor, &ExtractorResult) + Send + 'static,
    {
        let mut callbacks = lock(&self.inner.callbacks);
        match self.inner.result.get() {
            Some(result) => {
                drop(callbacks);
                callback(self, result);
            }
            None => callbacks.finished.push(Box::new(callback)),
        }
    }

    /// Spawn the worker. Only the first call on a fresh job has an effect.
    pub fn start(&self, hooks: Arc<dyn JobHooks>) {
        if !self.claim() {
            return;
        }

        let job = self.clone();
        let worker_hooks = Arc::clone(&hooks);
        let spawned = thread::Builder::new()
            .name("arkiv-extract".into())
            .spawn(move || job.run(worker_hooks.as_ref()));
        match spawned {
            Ok(handle) => *lock(&self.inner.worker) = Some(handle),
            Err(err) => {
                let result = ExtractorResult::failure(format!("failed to spawn worker: {err}"));
                hooks.finished(self, &result);
                self.complete(result);
            }
        }
    }

    /// Ask the backend to stop. The job still reaches a terminal state.
    pub fn interrupt(&self) {
        debug!(archive = %self.inner.archive.display(), "interrupt requested");
        self.inner.backend.interrupt();
    }

    /// Interrupt and join the worker thread. Blocks; do not call from an
    /// async context.
    pub fn close(&self) {
        self.interrupt();
        let handle = lock(&self.inner.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self) -> ExtractorResult {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| state.is_terminal()).await;
        self.result()
            .unwrap_or_else(|| ExtractorResult::failure("job ended without a result"))
    }

    /// Finish a job that never started, skipping the worker and its hooks.
    pub(crate) fn abandon(&self, result: ExtractorResult) {
        if self.claim() {
            self.complete(result);
        }
    }

    /// `Created -> Running`, at most once.
    fn claim(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            let fresh = *state == JobState::Created;
            if fresh {
                *state = JobState::Running;
            }
            fresh
        })
    }

    fn run(&self, hooks: &dyn JobHooks) {
        info!(
            archive = %self.inner.archive.display(),
            backend = %self.inner.backend.kind(),
            "extraction started"
        );
        hooks.started(self);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.backend.extract(&mut |entry| self.record(entry))
        }));
        let result = outcome.unwrap_or_else(|payload| {
            ExtractorResult::failure(format!("extractor panicked: {}", panic_message(payload.as_ref())))
        });

        hooks.finished(self, &result);
        self.complete(result);
    }

    fn record(&self, entry: ExtractedEntry) {
        debug!(entry = %entry.name, path = %entry.path.display(), "entry extracted");
        lock(&self.inner.entries).push(entry.clone());
        let handlers = lock(&self.inner.callbacks).entry.clone();
        for handler in handlers {
            handler(&entry);
        }
    }

    fn complete(&self, result: ExtractorResult) {
        let finished = {
            let mut callbacks = lock(&self.inner.callbacks);
            if self.inner.result.set(result.clone()).is_err() {
                return;
            }
            callbacks.entry.clear();
            std::mem::take(&mut callbacks.finished)
        };
        self.inner.state.send_replace(JobState::for_result(&result));
        info!(
            archive = %self.inner.archive.display(),
            status = ?result.status,
            message = %result.message,
            "extraction finished"
        );
        for callback in finished {
            callback(self, &result);
        }
    }
}

impl PartialEq for ArchiveExtractor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ArchiveExtractor {}

impl fmt::Debug for ArchiveExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveExtractor")
            .field("archive", &self.inner.archive)
            .field("output_dir", &self.inner.output_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

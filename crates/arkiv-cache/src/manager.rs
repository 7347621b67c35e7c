//! The extraction cache coordinator.
//!
//! All bookkeeping (the key to job map, the FIFO queue and the running
//! count) belongs to a single controller task. Callers and worker threads
//! talk to it over an unbounded channel, so the state needs no locks.
//!
//! Per archive the controller guarantees:
//!
//! - at most one job, shared by every caller asking for it;
//! - at most `max_extractors` jobs running at once, the rest queued FIFO;
//! - no job when the output directory already exists, in this process or
//!   left behind by another one;
//! - `status.json` says `Working` from the moment a job runs until its
//!   final status replaces it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arkiv_archive::{ExtractorFactory, ExtractorResult, ExtractorResultStatus};
use arkiv_location::{ARCHIVE_PROTOCOL, Location};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{CacheError, Result};
use crate::job::{ArchiveExtractor, JobHooks};
use crate::layout::CacheLayout;
use crate::resolver::{CacheResolver, StdioResolver};
use crate::status::ExtractorStatus;

const EVENT_CAPACITY: usize = 64;

/// Notifications for observers. Sending never blocks the controller; slow
/// receivers miss events.
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    JobQueued { location: Location, archive: PathBuf },
    JobStarted { archive: PathBuf },
    JobFinished { archive: PathBuf, result: ExtractorResult },
    /// A request hit a cache entry whose extraction had failed.
    CachedFailure { location: Location, message: String },
}

enum Command {
    Extract {
        location: Location,
        reply: oneshot::Sender<Result<Option<ArchiveExtractor>>>,
    },
    Started {
        key: String,
    },
    Finished {
        key: String,
        result: ExtractorResult,
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<ArchiveExtractor>>,
    },
}

/// Handle to the extraction cache. Clones talk to the same controller.
#[derive(Clone)]
pub struct ArchiveManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ManagerEvent>,
    layout: CacheLayout,
}

impl ArchiveManager {
    /// Start a manager with the configured backends. Must be called inside
    /// a tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let layout = CacheLayout::new(&config.cache_root);
        let factory = Arc::new(config.backend_table());
        let resolver = Arc::new(CacheResolver::new(layout));
        Ok(Self::with_parts(&config, factory, resolver))
    }

    pub fn with_parts(
        config: &ManagerConfig,
        factory: Arc<dyn ExtractorFactory>,
        resolver: Arc<dyn StdioResolver>,
    ) -> Self {
        let layout = CacheLayout::new(&config.cache_root);
        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = Controller {
            layout: layout.clone(),
            max_extractors: config.max_extractors.max(1),
            invalidate_on_mtime: config.invalidate_on_mtime,
            factory,
            resolver,
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            running: 0,
            stopping: false,
            events: events.clone(),
            commands: commands.downgrade(),
        };
        tokio::spawn(controller.run(receiver));

        Self {
            commands,
            events,
            layout,
        }
    }

    /// Get the job extracting the archive that `location` points into.
    ///
    /// Returns `None` when the archive already has a cache directory. The
    /// caller should then treat [`ArchiveManager::content_dir`] as
    /// authoritative. A cached failure is reported through
    /// [`ManagerEvent::CachedFailure`].
    pub async fn extract(&self, location: &Location) -> Result<Option<ArchiveExtractor>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Extract {
                location: location.clone(),
                reply,
            })
            .map_err(|_| CacheError::ControllerStopped)?;
        response.await.map_err(|_| CacheError::ControllerStopped)?
    }

    /// Directory the archive's members are extracted into. Depends only on
    /// the location, not on any job.
    pub fn content_dir(&self, location: &Location) -> PathBuf {
        self.layout.content_dir(location)
    }

    pub fn cache_root(&self) -> &Path {
        self.layout.root()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Stop admitting work, drop queued jobs and wait for running ones to
    /// wind down after interrupting them.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| CacheError::ControllerStopped)?;
        let running = response.await.map_err(|_| CacheError::ControllerStopped)?;

        for job in running {
            job.wait().await;
            let _ = tokio::task::spawn_blocking(move || job.close()).await;
        }
        Ok(())
    }
}

struct Controller {
    layout: CacheLayout,
    max_extractors: usize,
    invalidate_on_mtime: bool,
    factory: Arc<dyn ExtractorFactory>,
    resolver: Arc<dyn StdioResolver>,
    jobs: HashMap<String, ArchiveExtractor>,
    queue: VecDeque<String>,
    running: usize,
    stopping: bool,
    events: broadcast::Sender<ManagerEvent>,
    // Weak, so the loop ends once every manager handle and running job is gone.
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Controller {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Extract { location, reply } => {
                    let _ = reply.send(self.extract(&location));
                }
                Command::Started { key } => {
                    if let Some(job) = self.jobs.get(&key) {
                        self.notify(ManagerEvent::JobStarted {
                            archive: job.archive_path().to_path_buf(),
                        });
                    }
                }
                Command::Finished { key, result, ack } => {
                    self.finished(&key, result);
                    let _ = ack.send(());
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(self.shutdown());
                }
            }
        }
        debug!(cache_root = %self.layout.root().display(), "archive controller stopped");
    }

    fn extract(&mut self, location: &Location) -> Result<Option<ArchiveExtractor>> {
        if self.stopping {
            return Err(CacheError::ControllerStopped);
        }
        let payload = location
            .innermost()
            .ok_or_else(|| CacheError::NotInArchive(location.as_url()))?;
        if payload.protocol() != ARCHIVE_PROTOCOL {
            return Err(CacheError::UnsupportedProtocol {
                protocol: payload.protocol().to_string(),
                location: location.as_url(),
            });
        }

        let key = self.layout.key(location);
        if let Some(job) = self.jobs.get(&key) {
            debug!(%key, "joining in-flight extraction");
            return Ok(Some(job.clone()));
        }

        let output_dir = self.layout.output_dir(&key);
        if output_dir.exists() {
            let status = ExtractorStatus::read_or_failure(&self.layout.status_path(&key));
            if !self.is_stale(&status) {
                debug!(%key, status = ?status.status, "archive already extracted");
                if status.status == ExtractorResultStatus::Failure {
                    self.notify(ManagerEvent::CachedFailure {
                        location: location.clone(),
                        message: status.message,
                    });
                }
                return Ok(None);
            }
            info!(%key, archive = %status.path.display(), "archive changed, discarding cache");
            std::fs::remove_dir_all(&output_dir).map_err(|source| CacheError::Remove {
                path: output_dir.clone(),
                source,
            })?;
        }

        let archive = self.resolver.resolve(location)?;
        if !archive.is_file() {
            return Err(CacheError::ArchiveMissing(archive));
        }
        let contents = self.layout.contents_dir(&key);
        let backend = self.factory.create(&archive, &contents)?;
        arkiv_fs::ensure_dir(&contents)?;

        let job = ArchiveExtractor::new(archive, contents, backend);
        self.jobs.insert(key.clone(), job.clone());
        self.notify(ManagerEvent::JobQueued {
            location: location.clone(),
            archive: job.archive_path().to_path_buf(),
        });

        if self.running < self.max_extractors {
            self.start(&key, &job);
        } else {
            debug!(%key, queued = self.queue.len() + 1, "all extractor slots busy");
            self.queue.push_back(key);
        }
        Ok(Some(job))
    }

    /// Only finished extractions of archives that still exist are checked.
    fn is_stale(&self, status: &ExtractorStatus) -> bool {
        self.invalidate_on_mtime
            && status.status != ExtractorResultStatus::Working
            && status.path.is_file()
            && status.mtime_changed(arkiv_fs::mtime_secs(&status.path))
    }

    fn start(&mut self, key: &str, job: &ArchiveExtractor) {
        self.running += 1;
        debug!(%key, running = self.running, "admitting extraction");
        job.start(Arc::new(StatusHooks {
            key: key.to_string(),
            status_path: self.layout.status_path(key),
            commands: self.commands.upgrade(),
        }));
    }

    fn finished(&mut self, key: &str, result: ExtractorResult) {
        let Some(job) = self.jobs.remove(key) else {
            return;
        };
        self.running = self.running.saturating_sub(1);
        self.notify(ManagerEvent::JobFinished {
            archive: job.archive_path().to_path_buf(),
            result,
        });

        while !self.stopping && self.running < self.max_extractors {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            if let Some(job) = self.jobs.get(&next).cloned() {
                self.start(&next, &job);
            }
        }
    }

    fn shutdown(&mut self) -> Vec<ArchiveExtractor> {
        self.stopping = true;

        for key in std::mem::take(&mut self.queue) {
            let Some(job) = self.jobs.remove(&key) else {
                continue;
            };
            // Nothing was extracted yet, so a later run may start over.
            let output_dir = self.layout.output_dir(&key);
            if let Err(err) = std::fs::remove_dir_all(&output_dir) {
                warn!(path = %output_dir.display(), %err, "failed to remove queued output dir");
            }
            let result = ExtractorResult::interrupted();
            job.abandon(result.clone());
            self.notify(ManagerEvent::JobFinished {
                archive: job.archive_path().to_path_buf(),
                result,
            });
        }

        let running: Vec<_> = self.jobs.values().cloned().collect();
        info!(running = running.len(), "shutting down archive manager");
        for job in &running {
            job.interrupt();
        }
        running
    }

    fn notify(&self, event: ManagerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Persists status around a job's run and reports back to the controller.
struct StatusHooks {
    key: String,
    status_path: PathBuf,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl JobHooks for StatusHooks {
    fn started(&self, job: &ArchiveExtractor) {
        let status = ExtractorStatus::working(job.archive_path(), job.mtime());
        if let Err(err) = status.write(&self.status_path) {
            warn!(path = %self.status_path.display(), %err, "failed to persist working status");
        }
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Started {
                key: self.key.clone(),
            });
        }
    }

    fn finished(&self, job: &ArchiveExtractor, result: &ExtractorResult) {
        let status =
            ExtractorStatus::finished(job.archive_path(), job.mtime(), result, job.entry_names());
        if let Err(err) = status.write(&self.status_path) {
            warn!(path = %self.status_path.display(), %err, "failed to persist final status");
        }

        let Some(commands) = &self.commands else {
            return;
        };
        let (ack, done) = oneshot::channel();
        let sent = commands.send(Command::Finished {
            key: self.key.clone(),
            result: result.clone(),
            ack,
        });
        // Workers wait until the controller has let go of the job; when
        // called from async code the ack can't be awaited here.
        if sent.is_ok() && tokio::runtime::Handle::try_current().is_err() {
            let _ = done.blocking_recv();
        }
    }
}

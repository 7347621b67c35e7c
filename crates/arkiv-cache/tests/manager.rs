use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use arkiv_archive::{
    BackendKind, BackendTable, ExtractedEntry, Extractor, ExtractorFactory, ExtractorResult,
    ExtractorResultStatus, INTERRUPTED_MESSAGE,
};
use arkiv_cache::{
    ArchiveManager, CacheError, CacheLayout, CacheResolver, ExtractorStatus, JobState,
    ManagerConfig, ManagerEvent, STATUS_FILE,
};
use arkiv_location::{ARCHIVE_PROTOCOL, Location};
use tokio::sync::broadcast;
use tokio::time::timeout;
use zip::write::SimpleFileOptions;

const PATIENCE: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scratch() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("arkiv-cache-test-")
        .tempdir()
        .expect("Failed to create temp dir")
}

fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).expect("Failed to create zip"));
    for (name, data) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer.write_all(data).expect("Failed to write zip entry");
    }
    writer.finish().expect("Failed to finish zip");
}

fn inside(archive: &Path, member: &str) -> Location {
    Location::from_path(archive)
        .unwrap()
        .with_payload(ARCHIVE_PROTOCOL, member)
        .unwrap()
}

fn manager_with(config: &ManagerConfig, factory: Arc<dyn ExtractorFactory>) -> ArchiveManager {
    let resolver = Arc::new(CacheResolver::new(CacheLayout::new(&config.cache_root)));
    ArchiveManager::with_parts(config, factory, resolver)
}

fn status_of(manager: &ArchiveManager, location: &Location) -> ExtractorStatus {
    let status_path = manager
        .content_dir(location)
        .parent()
        .unwrap()
        .join(STATUS_FILE);
    ExtractorStatus::read(&status_path).unwrap()
}

async fn next_event<F>(events: &mut broadcast::Receiver<ManagerEvent>, mut matches: F) -> ManagerEvent
where
    F: FnMut(&ManagerEvent) -> bool,
{
    timeout(PATIENCE, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wraps the real backends, counting creations and concurrent runs.
struct Metered {
    table: BackendTable,
    delay: Duration,
    created: AtomicUsize,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Metered {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            table: BackendTable::default(),
            delay,
            created: AtomicUsize::new(0),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

struct Timed {
    inner: Box<dyn Extractor>,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Extractor for Timed {
    fn extract(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        let result = self.inner.extract(on_entry);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn interrupt(&self) {
        self.inner.interrupt();
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }
}

impl ExtractorFactory for Metered {
    fn create(&self, archive: &Path, outdir: &Path) -> arkiv_archive::Result<Box<dyn Extractor>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Timed {
            inner: self.table.create(archive, outdir)?,
            delay: self.delay,
            running: Arc::clone(&self.running),
            peak: Arc::clone(&self.peak),
        }))
    }
}

/// Runs until interrupted.
#[derive(Default)]
struct Stuck {
    interrupted: AtomicBool,
}

impl Extractor for Stuck {
    fn extract(&self, _on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult {
        while !self.interrupted.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        ExtractorResult::interrupted()
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }
}

struct StuckFactory;

impl ExtractorFactory for StuckFactory {
    fn create(&self, _archive: &Path, _outdir: &Path) -> arkiv_archive::Result<Box<dyn Extractor>> {
        Ok(Box::new(Stuck::default()))
    }
}

fn dummy_archives(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("stuck-{i}.zip"));
            fs::write(&path, b"never read").unwrap();
            path
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_short_circuit_across_managers() {
    init_tracing();
    let dir = scratch();
    let archive = dir.path().join("foo.zip");
    write_zip(&archive, &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
    let config = ManagerConfig::with_cache_root(dir.path().join("cache"));
    let location = inside(&archive, "sub/b.txt");

    let first = ArchiveManager::new(config.clone()).unwrap();
    let job = first.extract(&location).await.unwrap().expect("first request starts a job");
    assert_eq!(job.output_dir(), first.content_dir(&location));
    let result = timeout(PATIENCE, job.wait()).await.unwrap();
    assert!(result.is_success(), "{}", result.message);
    assert_eq!(job.entry_names(), ["a.txt", "sub/b.txt"]);

    let status = status_of(&first, &location);
    assert_eq!(status.status, ExtractorResultStatus::Success);
    assert_eq!(status.entries, ["a.txt", "sub/b.txt"]);
    assert_eq!(status.path, archive);

    let metered = Metered::new(Duration::ZERO);
    let second = manager_with(&config, metered.clone());
    assert!(second.extract(&inside(&archive, "a.txt")).await.unwrap().is_none());
    assert_eq!(metered.created(), 0);

    let contents = second.content_dir(&location);
    assert_eq!(fs::read(contents.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(contents.join("sub/b.txt")).unwrap(), b"beta");
}

#[tokio::test(flavor = "multi_thread")]
async fn at_most_one_job_per_archive() {
    init_tracing();
    let dir = scratch();
    let archive = dir.path().join("foo.zip");
    write_zip(&archive, &[("a.txt", b"alpha")]);
    let metered = Metered::new(Duration::from_millis(300));
    let manager = manager_with(&ManagerConfig::with_cache_root(dir.path().join("cache")), metered.clone());

    let requests: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            let location = inside(&archive, &format!("member-{i}"));
            tokio::spawn(async move { manager.extract(&location).await })
        })
        .collect();

    let mut jobs = Vec::new();
    for request in requests {
        jobs.push(request.await.unwrap().unwrap().expect("in-flight job is shared"));
    }
    assert!(jobs.iter().all(|job| *job == jobs[0]));
    assert_eq!(metered.created(), 1);

    let result = timeout(PATIENCE, jobs[0].wait()).await.unwrap();
    assert!(result.is_success(), "{}", result.message);
    assert_eq!(metered.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn admission_is_bounded() {
    init_tracing();
    let dir = scratch();
    let archives: Vec<_> = (0..5)
        .map(|i| {
            let path = dir.path().join(format!("a{i}.zip"));
            write_zip(&path, &[("x.txt", b"x")]);
            path
        })
        .collect();
    let config = ManagerConfig {
        max_extractors: 2,
        ..ManagerConfig::with_cache_root(dir.path().join("cache"))
    };
    let metered = Metered::new(Duration::from_millis(150));
    let manager = manager_with(&config, metered.clone());

    let mut jobs = Vec::new();
    for archive in &archives {
        jobs.push(manager.extract(&inside(archive, "")).await.unwrap().unwrap());
    }
    assert_eq!(jobs[4].state(), JobState::Created);

    for job in &jobs {
        let result = timeout(PATIENCE, job.wait()).await.unwrap();
        assert!(result.is_success(), "{}", result.message);
    }
    assert_eq!(metered.created(), 5);
    assert!(metered.peak.load(Ordering::SeqCst) <= 2);
    assert!(metered.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_persist_and_are_reported() {
    init_tracing();
    let dir = scratch();
    let archive = dir.path().join("corrupt.zip");
    fs::write(&archive, b"PK\x03\x04 but not really a zip").unwrap();
    let metered = Metered::new(Duration::ZERO);
    let manager = manager_with(&ManagerConfig::with_cache_root(dir.path().join("cache")), metered.clone());
    let location = inside(&archive, "");

    let job = manager.extract(&location).await.unwrap().unwrap();
    let result = timeout(PATIENCE, job.wait()).await.unwrap();
    assert_eq!(result.status, ExtractorResultStatus::Failure);
    assert!(!result.message.is_empty());

    let status = status_of(&manager, &location);
    assert_eq!(status.status, ExtractorResultStatus::Failure);
    assert_eq!(status.message, result.message);

    let mut events = manager.subscribe();
    assert!(manager.extract(&location).await.unwrap().is_none());
    let event = next_event(&mut events, |e| matches!(e, ManagerEvent::CachedFailure { .. })).await;
    match event {
        ManagerEvent::CachedFailure { message, location: reported } => {
            assert_eq!(message, result.message);
            assert_eq!(reported, location);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(metered.created(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn traversal_entries_never_escape() {
    init_tracing();
    let dir = scratch();
    let archive = dir.path().join("evil.zip");
    write_zip(
        &archive,
        &[
            ("../../etc/evil", b"pwned"),
            ("/etc/evil", b"pwned"),
            ("ok.txt", b"fine"),
        ],
    );
    let cache_root = dir.path().join("cache");
    let manager = ArchiveManager::new(ManagerConfig::with_cache_root(&cache_root)).unwrap();
    let location = inside(&archive, "");

    let job = manager.extract(&location).await.unwrap().unwrap();
    let result = timeout(PATIENCE, job.wait()).await.unwrap();
    assert!(result.is_success(), "{}", result.message);

    let status = status_of(&manager, &location);
    assert_eq!(status.entries, ["ok.txt"]);
    assert!(!cache_root.join("etc/evil").exists());
    assert!(!dir.path().join("etc/evil").exists());
    assert!(!manager.content_dir(&location).join("etc/evil").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_job_always_finishes() {
    init_tracing();
    let dir = scratch();
    let archive = dummy_archives(dir.path(), 1).remove(0);
    let manager = manager_with(
        &ManagerConfig::with_cache_root(dir.path().join("cache")),
        Arc::new(StuckFactory),
    );
    let location = inside(&archive, "");
    let mut events = manager.subscribe();

    let job = manager.extract(&location).await.unwrap().unwrap();
    next_event(&mut events, |e| matches!(e, ManagerEvent::JobStarted { .. })).await;
    assert_eq!(status_of(&manager, &location).status, ExtractorResultStatus::Working);

    let (tx, rx) = tokio::sync::oneshot::channel();
    job.on_finished(move |_, result| {
        let _ = tx.send(result.clone());
    });
    job.interrupt();

    let result = timeout(PATIENCE, rx).await.unwrap().unwrap();
    assert_eq!(result.message, INTERRUPTED_MESSAGE);
    assert_eq!(job.state(), JobState::Interrupted);

    let status = status_of(&manager, &location);
    assert_eq!(status.status, ExtractorResultStatus::Failure);
    assert_eq!(status.message, INTERRUPTED_MESSAGE);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_running_and_drops_queued() {
    init_tracing();
    let dir = scratch();
    let archives = dummy_archives(dir.path(), 2);
    let config = ManagerConfig {
        max_extractors: 1,
        ..ManagerConfig::with_cache_root(dir.path().join("cache"))
    };
    let manager = manager_with(&config, Arc::new(StuckFactory));

    let running = manager.extract(&inside(&archives[0], "")).await.unwrap().unwrap();
    let queued_location = inside(&archives[1], "");
    let queued = manager.extract(&queued_location).await.unwrap().unwrap();
    assert_eq!(queued.state(), JobState::Created);

    timeout(PATIENCE, manager.shutdown()).await.unwrap().unwrap();

    assert!(running.result().unwrap().is_interrupted());
    assert!(queued.result().unwrap().is_interrupted());
    assert!(!manager.content_dir(&queued_location).exists());
    assert!(matches!(
        manager.extract(&queued_location).await,
        Err(CacheError::ControllerStopped)
    ));
}

#[tokio::test]
async fn rejects_locations_it_cannot_serve() {
    init_tracing();
    let dir = scratch();
    let cache_root = dir.path().join("cache");
    let manager = ArchiveManager::new(ManagerConfig::with_cache_root(&cache_root)).unwrap();

    let plain = Location::from_path(dir.path().join("a.zip")).unwrap();
    assert!(matches!(
        manager.extract(&plain).await,
        Err(CacheError::NotInArchive(_))
    ));

    let query = plain.with_payload("query", "needle").unwrap();
    assert!(matches!(
        manager.extract(&query).await,
        Err(CacheError::UnsupportedProtocol { .. })
    ));

    let missing = inside(&dir.path().join("missing.zip"), "");
    assert!(matches!(
        manager.extract(&missing).await,
        Err(CacheError::ArchiveMissing(_))
    ));
    assert!(!manager.content_dir(&missing).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_archives_resolve_through_the_cache() {
    init_tracing();
    let dir = scratch();
    let inner = dir.path().join("inner.zip");
    write_zip(&inner, &[("deep.txt", b"deep")]);
    let outer = dir.path().join("outer.zip");
    write_zip(&outer, &[("nested/inner.zip", &fs::read(&inner).unwrap())]);

    let manager = ArchiveManager::new(ManagerConfig::with_cache_root(dir.path().join("cache"))).unwrap();
    let outer_job = manager.extract(&inside(&outer, "")).await.unwrap().unwrap();
    assert!(timeout(PATIENCE, outer_job.wait()).await.unwrap().is_success());

    let nested = inside(&outer, "nested/inner.zip")
        .with_payload(ARCHIVE_PROTOCOL, "deep.txt")
        .unwrap();
    let inner_job = manager.extract(&nested).await.unwrap().unwrap();
    assert_eq!(
        inner_job.archive_path(),
        manager.content_dir(&inside(&outer, "")).join("nested/inner.zip")
    );
    assert!(timeout(PATIENCE, inner_job.wait()).await.unwrap().is_success());
    assert_eq!(
        fs::read(manager.content_dir(&nested).join("deep.txt")).unwrap(),
        b"deep"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_archives_are_re_extracted_when_enabled() {
    init_tracing();
    let dir = scratch();
    let archive = dir.path().join("foo.zip");
    write_zip(&archive, &[("a.txt", b"v1")]);
    let base = ManagerConfig::with_cache_root(dir.path().join("cache"));
    let location = inside(&archive, "");

    let manager = ArchiveManager::new(base.clone()).unwrap();
    let job = manager.extract(&location).await.unwrap().unwrap();
    assert!(timeout(PATIENCE, job.wait()).await.unwrap().is_success());

    write_zip(&archive, &[("a.txt", b"v2")]);
    let later = SystemTime::now() + Duration::from_secs(60);
    File::options()
        .write(true)
        .open(&archive)
        .unwrap()
        .set_modified(later)
        .unwrap();

    assert!(manager.extract(&location).await.unwrap().is_none());

    let invalidating = ArchiveManager::new(ManagerConfig {
        invalidate_on_mtime: true,
        ..base
    })
    .unwrap();
    let job = invalidating
        .extract(&location)
        .await
        .unwrap()
        .expect("stale cache is re-extracted");
    assert!(timeout(PATIENCE, job.wait()).await.unwrap().is_success());
    assert_eq!(
        fs::read(invalidating.content_dir(&location).join("a.txt")).unwrap(),
        b"v2"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_archives_stay_cached_with_invalidation() {
    init_tracing();
    let dir = scratch();
    let config = ManagerConfig {
        invalidate_on_mtime: true,
        ..ManagerConfig::with_cache_root(dir.path().join("cache"))
    };
    let manager = ArchiveManager::new(config).unwrap();

    for i in 0..8 {
        let archive = dir.path().join(format!("a{i}.zip"));
        write_zip(&archive, &[("a.txt", b"alpha")]);
        let location = inside(&archive, "a.txt");

        let job = manager.extract(&location).await.unwrap().unwrap();
        assert!(timeout(PATIENCE, job.wait()).await.unwrap().is_success());
        for _ in 0..3 {
            assert!(manager.extract(&location).await.unwrap().is_none());
        }
    }
}

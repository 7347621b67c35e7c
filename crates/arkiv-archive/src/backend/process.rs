use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::result::{ExtractedEntry, ExtractorResult};
use crate::sanitize::sanitize_entry;

const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// A child process driven line by line.
///
/// The child lives behind a mutex so that `interrupt` can signal it from
/// another thread while the worker is reading its output.
pub(crate) struct ProcessRunner {
    program: PathBuf,
    args: Vec<OsString>,
    child: Mutex<Option<Child>>,
    interrupted: AtomicBool,
}

impl ProcessRunner {
    pub(crate) fn new(program: &Path, args: Vec<OsString>) -> Self {
        Self {
            program: program.to_path_buf(),
            args,
            child: Mutex::new(None),
            interrupted: AtomicBool::new(false),
        }
    }

    pub(crate) fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Run the child to completion, handing every stdout line to `on_line`.
    pub(crate) fn run(&self, mut on_line: impl FnMut(&str)) -> ExtractorResult {
        if self.is_interrupted() {
            return ExtractorResult::interrupted();
        }

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                let err = ArchiveError::Spawn {
                    program: self.program.clone(),
                    source,
                };
                return ExtractorResult::failure(err.to_string());
            }
        };
        debug!(program = %self.program.display(), pid = child.id(), "spawned extractor");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.lock_child() = Some(child);

        // An interrupt that landed between the check above and the store
        // found no child to signal.
        if self.is_interrupted() {
            self.terminate();
        }

        let stderr_reader = stderr.map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                if let Err(err) = pipe.read_to_end(&mut buf) {
                    debug!(%err, "failed to read extractor stderr");
                }
                String::from_utf8_lossy(&buf).trim().to_string()
            })
        });

        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).split(b'\n') {
                let Ok(line) = line else { break };
                let line = String::from_utf8_lossy(&line);
                on_line(line.trim_end_matches('\r'));
            }
        }

        let status = self.reap();
        let stderr_text = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if self.is_interrupted() {
            return ExtractorResult::interrupted();
        }
        match status {
            Ok(status) if status.success() => ExtractorResult::success_with(stderr_text),
            Ok(status) if stderr_text.is_empty() => ExtractorResult::failure(format!(
                "{} exited with {status}",
                self.program.display()
            )),
            Ok(_) => ExtractorResult::failure(stderr_text),
            Err(err) => ExtractorResult::failure(err.to_string()),
        }
    }

    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.terminate();
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Poll for exit, releasing the lock between polls so `terminate` can
    /// still reach the child.
    fn reap(&self) -> std::io::Result<ExitStatus> {
        loop {
            {
                let mut slot = self.lock_child();
                let Some(child) = slot.as_mut() else {
                    return Err(std::io::Error::other("child process already reaped"));
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *slot = None;
                        return Ok(status);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        *slot = None;
                        return Err(err);
                    }
                }
            }
            thread::sleep(REAP_INTERVAL);
        }
    }

    fn terminate(&self) {
        let mut slot = self.lock_child();
        let Some(child) = slot.as_mut() else { return };

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if let Err(err) = kill(pid, Signal::SIGTERM) {
                debug!(%pid, %err, "SIGTERM failed");
            }
        }
        #[cfg(not(unix))]
        if let Err(err) = child.kill() {
            debug!(pid = child.id(), %err, "kill failed");
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Report an entry name printed by an external tool, unless it is unsafe.
pub(crate) fn emit_entry(name: &str, outdir: &Path, on_entry: &mut dyn FnMut(ExtractedEntry)) {
    match sanitize_entry(name, outdir) {
        Ok(sanitized) => on_entry(ExtractedEntry {
            name: sanitized.original,
            path: sanitized.resolved,
        }),
        Err(err) => warn!(entry = name, %err, "skipping unsafe archive entry"),
    }
}

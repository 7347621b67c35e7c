use std::ffi::OsString;
use std::path::{MAIN_SEPARATOR_STR, Path, PathBuf};

use regex::Regex;

use super::process::{ProcessRunner, emit_entry};
use super::{BackendKind, Extractor};
use crate::error::Result;
use crate::result::{ExtractedEntry, ExtractorResult};

pub const DEFAULT_RAR_KEYWORDS: &[&str] = &["Extracting", "Creating"];

/// Matches `<keyword> <name> <percent noise> OK`.
///
/// unrar pads progress with backspaces, so the noise between the name and
/// the trailing `OK` is any run of whitespace, `\x08` and `NN%` tokens.
pub fn rar_entry_pattern<S: AsRef<str>>(keywords: &[S]) -> Result<Regex> {
    let alternatives = keywords
        .iter()
        .map(|keyword| regex::escape(keyword.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"^(?:{alternatives})\s+(.+?)[\s\x08]+(?:\d+%[\s\x08]*)*OK\s*$");
    Ok(Regex::new(&pattern)?)
}

pub fn parse_rar_line<'a>(pattern: &Regex, line: &'a str) -> Option<&'a str> {
    pattern
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

pub struct RarExtractor {
    outdir: PathBuf,
    pattern: Regex,
    runner: ProcessRunner,
}

impl RarExtractor {
    pub fn new<S: AsRef<str>>(
        program: &Path,
        archive: &Path,
        outdir: &Path,
        keywords: &[S],
    ) -> Result<Self> {
        // unrar treats a destination ending in a separator as a directory.
        let mut destination = outdir.as_os_str().to_os_string();
        destination.push(MAIN_SEPARATOR_STR);

        let args: Vec<OsString> = vec![
            "x".into(),
            "-y".into(),
            "-o+".into(),
            "-p-".into(),
            "--".into(),
            archive.as_os_str().to_os_string(),
            destination,
        ];

        Ok(Self {
            outdir: outdir.to_path_buf(),
            pattern: rar_entry_pattern(keywords)?,
            runner: ProcessRunner::new(program, args),
        })
    }
}

impl Extractor for RarExtractor {
    fn extract(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult {
        self.runner.run(|line| {
            if let Some(name) = parse_rar_line(&self.pattern, line) {
                emit_entry(name, &self.outdir, on_entry);
            }
        })
    }

    fn interrupt(&self) {
        self.runner.interrupt();
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Rar
    }
}

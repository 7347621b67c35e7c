use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::process::{ProcessRunner, emit_entry};
use super::{BackendKind, Extractor};
use crate::result::{ExtractedEntry, ExtractorResult};

/// With `-bb1`, 7z prints one `- <name>` line per extracted entry.
pub fn parse_7z_line(line: &str) -> Option<&str> {
    line.strip_prefix("- ").filter(|name| !name.is_empty())
}

pub struct SevenZipExtractor {
    outdir: PathBuf,
    runner: ProcessRunner,
}

impl SevenZipExtractor {
    pub fn new(program: &Path, archive: &Path, outdir: &Path) -> Self {
        let mut output_flag = OsString::from("-o");
        output_flag.push(outdir.as_os_str());

        let args: Vec<OsString> = vec![
            "x".into(),
            "-y".into(),
            "-bb1".into(),
            "-bd".into(),
            output_flag,
            "--".into(),
            archive.as_os_str().to_os_string(),
        ];

        Self {
            outdir: outdir.to_path_buf(),
            runner: ProcessRunner::new(program, args),
        }
    }
}

impl Extractor for SevenZipExtractor {
    fn extract(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult {
        self.runner.run(|line| {
            if let Some(name) = parse_7z_line(line) {
                emit_entry(name, &self.outdir, on_entry);
            }
        })
    }

    fn interrupt(&self) {
        self.runner.interrupt();
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SevenZip
    }
}

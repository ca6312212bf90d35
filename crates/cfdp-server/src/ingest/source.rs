//! Source file resolution
//!
//! Downloading is an external concern; the pipeline only needs a readable
//! local file per (data type, cycle). `SourceLocator` is the seam, and
//! `LocalSourceLocator` is the directory-convention implementation used in
//! production: `<data_dir>/<cycle>/<stem><yy>.txt` or the zipped
//! `<stem><yy>.zip` the publisher ships.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use cfdp_common::types::{cycle_suffix, Cycle, DataType};
use cfdp_common::{CfdpError, Result};

use super::parser::FileLayout;

/// A resolved source file ready for the chunked reader.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub layout: FileLayout,
    /// Filesystem mtime, used for the freshness check.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Resolves the bulk file for a (data type, cycle) pair.
pub trait SourceLocator: Send + Sync {
    /// Find the source file, or `SourceUnavailable` if nothing is on disk.
    fn locate(&self, data_type: DataType, cycle: Cycle) -> Result<SourceFile>;
}

/// Directory-convention locator over a local data directory.
#[derive(Debug, Clone)]
pub struct LocalSourceLocator {
    data_dir: PathBuf,
}

impl LocalSourceLocator {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn candidate_paths(&self, data_type: DataType, cycle: Cycle) -> Vec<PathBuf> {
        let stem = format!("{}{}", data_type.file_stem(), cycle_suffix(cycle));
        let cycle_dir = self.data_dir.join(cycle.to_string());
        vec![
            cycle_dir.join(format!("{stem}.txt")),
            cycle_dir.join(format!("{stem}.zip")),
            self.data_dir.join(format!("{stem}.txt")),
            self.data_dir.join(format!("{stem}.zip")),
        ]
    }
}

impl SourceLocator for LocalSourceLocator {
    fn locate(&self, data_type: DataType, cycle: Cycle) -> Result<SourceFile> {
        for path in self.candidate_paths(data_type, cycle) {
            if path.is_file() {
                let modified_at = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                return Ok(SourceFile {
                    layout: FileLayout::for_data_type(data_type),
                    path,
                    modified_at,
                });
            }
        }
        Err(CfdpError::SourceUnavailable(format!(
            "no bulk file for {} cycle {} under {:?}",
            data_type, cycle, self.data_dir
        )))
    }
}

/// A source spilled to a plain local file: either the original path, or a
/// scratch temp file holding the extracted archive member.
///
/// The scratch file lives exactly as long as this guard, so callers that
/// open the path more than once (count pass, then import pass) must hold
/// the guard across all of them.
pub struct MaterializedSource {
    path: PathBuf,
    _scratch: Option<tempfile::NamedTempFile>,
}

impl MaterializedSource {
    /// Plain, directly readable path to the source data.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve a source path to a plain readable file, extracting the expected
/// archive member once when the path is a zip.
///
/// Zip entries are not seekable streams, so archive members are spilled to a
/// scratch temp file; plain paths pass through untouched.
pub fn materialize(path: &Path, layout: &FileLayout) -> anyhow::Result<MaterializedSource> {
    let is_zip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    if !is_zip {
        return Ok(MaterializedSource { path: path.to_path_buf(), _scratch: None });
    }

    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive {:?}", path))?;

    let member_name = match &layout.archive_member {
        Some(name) => name.clone(),
        // Single-member archives need no name.
        None if archive.len() == 1 => archive
            .by_index(0)
            .context("Failed to read archive member")?
            .name()
            .to_string(),
        None => anyhow::bail!("archive {:?} has {} members and no member name configured", path, archive.len()),
    };

    let mut member = archive
        .by_name(&member_name)
        .with_context(|| format!("Archive {:?} has no member {:?}", path, member_name))?;

    let mut scratch = tempfile::NamedTempFile::new().context("Failed to create scratch file")?;
    io::copy(&mut member, &mut scratch)
        .with_context(|| format!("Failed to extract {:?} from {:?}", member_name, path))?;

    Ok(MaterializedSource { path: scratch.path().to_path_buf(), _scratch: Some(scratch) })
}

/// Open a source file for reading, transparently extracting the expected
/// archive member when the path is a zip.
pub fn open_source(path: &Path, layout: &FileLayout) -> anyhow::Result<SourceReader> {
    let local = materialize(path, layout)?;
    let file = File::open(local.path())
        .with_context(|| format!("Failed to open {:?}", local.path()))?;
    Ok(SourceReader { inner: Box::new(file), _scratch: local._scratch })
}

/// A readable source stream plus the scratch file backing it, if any.
pub struct SourceReader {
    inner: Box<dyn Read + Send>,
    _scratch: Option<tempfile::NamedTempFile>,
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

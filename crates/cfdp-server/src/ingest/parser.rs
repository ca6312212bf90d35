//! Chunked streaming parser for pipe-delimited bulk files
//!
//! Files are multi-gigabyte, so the whole layer works on batches: the
//! pipeline pulls `chunk_size` rows at a time and never holds more than one
//! chunk in memory. Byte records are decoded per field; fields that are not
//! valid UTF-8 get one fallback pass through WINDOWS-1252, which the
//! publisher's older files actually use.
//!
//! `position` counts data rows consumed from the file, malformed ones
//! included, and is what the ledger persists as `file_position`. Resume skips
//! exactly that many rows without counting them again.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::Context;
use encoding_rs::WINDOWS_1252;

use cfdp_common::types::DataType;

use super::source::{open_source, SourceReader};

/// Physical layout of a bulk file.
#[derive(Debug, Clone)]
pub struct FileLayout {
    pub delimiter: u8,
    pub has_headers: bool,
    pub expected_columns: usize,
    /// Member to extract when the file is a zip archive
    pub archive_member: Option<String>,
}

impl FileLayout {
    /// The published layout for a data type: pipe-delimited, headerless,
    /// fixed column count.
    pub fn for_data_type(data_type: DataType) -> Self {
        Self {
            delimiter: b'|',
            has_headers: false,
            expected_columns: data_type.bulk_column_count(),
            archive_member: Some(data_type.archive_member().to_string()),
        }
    }
}

/// One batch of raw rows pulled from the file.
#[derive(Debug)]
pub struct RawBatch {
    /// Well-formed rows, each with exactly `expected_columns` fields
    pub rows: Vec<Vec<String>>,
    /// Malformed rows dropped while producing this batch
    pub skipped: u64,
    /// File position after this batch (row offset)
    pub next_position: u64,
}

/// Streaming reader producing `RawBatch`es.
///
/// Blocking; callers on the async side drive it through `spawn_blocking`.
pub struct ChunkedReader {
    reader: csv::Reader<SourceReader>,
    layout: FileLayout,
    path: PathBuf,
    position: u64,
    fallback_used: bool,
}

impl ChunkedReader {
    /// Open a file at the beginning.
    pub fn open(path: &Path, layout: FileLayout) -> anyhow::Result<Self> {
        let source = open_source(path, &layout)?;
        let reader = csv::ReaderBuilder::new()
            .delimiter(layout.delimiter)
            .has_headers(layout.has_headers)
            .flexible(true)
            .from_reader(source);
        Ok(Self {
            reader,
            layout,
            path: path.to_path_buf(),
            position: 0,
            fallback_used: false,
        })
    }

    /// Open a file and skip the first `file_position` data rows. Skipped-over
    /// rows are not re-counted as imported or malformed.
    pub fn resume(path: &Path, layout: FileLayout, file_position: u64) -> anyhow::Result<Self> {
        let mut this = Self::open(path, layout)?;
        let mut record = csv::ByteRecord::new();
        for _ in 0..file_position {
            if !this
                .reader
                .read_byte_record(&mut record)
                .with_context(|| format!("Failed to skip rows in {:?}", this.path))?
            {
                // Shorter than the recorded position; the next read reports end.
                break;
            }
            this.position += 1;
        }
        Ok(this)
    }

    /// Current file position (row offset).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Pull the next batch of up to `chunk_size` well-formed rows.
    ///
    /// Returns `None` at end of file. A short batch is a normal final batch,
    /// not an error. A batch consisting entirely of malformed rows is still
    /// returned so the ledger sees the skips.
    pub fn next_batch(&mut self, chunk_size: usize) -> anyhow::Result<Option<RawBatch>> {
        let mut rows = Vec::with_capacity(chunk_size);
        let mut skipped = 0u64;
        let mut record = csv::ByteRecord::new();
        let mut consumed = 0u64;

        while rows.len() < chunk_size {
            let more = match self.reader.read_byte_record(&mut record) {
                Ok(more) => more,
                Err(err) => {
                    // A row the csv layer itself cannot frame is a skip, not
                    // a job failure.
                    if err.is_io_error() {
                        return Err(err).with_context(|| format!("Read error in {:?}", self.path));
                    }
                    self.position += 1;
                    consumed += 1;
                    skipped += 1;
                    continue;
                }
            };
            if !more {
                break;
            }
            self.position += 1;
            consumed += 1;

            if record.len() != self.layout.expected_columns {
                skipped += 1;
                continue;
            }

            rows.push(self.decode_record(&record));
        }

        if consumed == 0 {
            return Ok(None);
        }

        Ok(Some(RawBatch { rows, skipped, next_position: self.position }))
    }

    fn decode_record(&mut self, record: &csv::ByteRecord) -> Vec<String> {
        record
            .iter()
            .map(|field| match std::str::from_utf8(field) {
                Ok(s) => s.trim().to_string(),
                Err(_) => {
                    if !self.fallback_used {
                        self.fallback_used = true;
                        tracing::warn!(
                            path = ?self.path,
                            "Non-UTF-8 content, falling back to WINDOWS-1252"
                        );
                    }
                    let (decoded, _, _) = WINDOWS_1252.decode(field);
                    match decoded {
                        Cow::Borrowed(s) => s.trim().to_string(),
                        Cow::Owned(s) => s.trim().to_string(),
                    }
                }
            })
            .collect()
    }

    /// Count every data row in a file without materializing any of them.
    /// Used up front so the ledger can report total_records/total_chunks.
    pub fn count_rows(path: &Path, layout: FileLayout) -> anyhow::Result<u64> {
        let mut reader = Self::open(path, layout)?;
        let mut record = csv::ByteRecord::new();
        let mut count = 0u64;
        loop {
            match reader.reader.read_byte_record(&mut record) {
                Ok(true) => count += 1,
                Ok(false) => break,
                Err(err) if err.is_io_error() => {
                    return Err(err).with_context(|| format!("Read error in {:?}", path));
                }
                Err(_) => count += 1,
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn layout(columns: usize) -> FileLayout {
        FileLayout {
            delimiter: b'|',
            has_headers: false,
            expected_columns: columns,
            archive_member: None,
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body).unwrap();
        path
    }

    #[test]
    fn test_reads_batches_and_counts_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "rows.txt",
            b"a|b|c\nd|e|f\nbad-row\ng|h|i\n",
        );

        let mut reader = ChunkedReader::open(&path, layout(3)).unwrap();
        let batch = reader.next_batch(10).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 3);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.next_position, 4);
        assert!(reader.next_batch(10).unwrap().is_none());
    }

    #[test]
    fn test_empty_file_yields_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.txt", b"");
        let mut reader = ChunkedReader::open(&path, layout(3)).unwrap();
        assert!(reader.next_batch(10).unwrap().is_none());
    }

    #[test]
    fn test_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rows.txt", b"1|x\n2|x\n3|x\n4|x\n5|x\n");

        let mut reader = ChunkedReader::open(&path, layout(2)).unwrap();
        let first = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.next_position, 2);

        let second = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(second.next_position, 4);

        // Short final batch.
        let last = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(last.rows.len(), 1);
        assert_eq!(last.next_position, 5);
        assert!(reader.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn test_resume_skips_exactly_position_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rows.txt", b"1|x\n2|x\nbad\n3|x\n4|x\n");

        let mut reader = ChunkedReader::resume(&path, layout(2), 3).unwrap();
        let batch = reader.next_batch(10).unwrap().unwrap();
        // The malformed row sits before the resume point and must not be
        // re-counted.
        assert_eq!(batch.skipped, 0);
        assert_eq!(
            batch.rows,
            vec![vec!["3".to_string(), "x".to_string()], vec!["4".to_string(), "x".to_string()]]
        );
        assert_eq!(batch.next_position, 5);
    }

    #[test]
    fn test_windows_1252_fallback() {
        let dir = tempfile::tempdir().unwrap();
        // 0xE9 is é in WINDOWS-1252 and invalid UTF-8.
        let path = write_file(&dir, "latin.txt", b"C1|REN\xc9E\n");

        let mut reader = ChunkedReader::open(&path, layout(2)).unwrap();
        let batch = reader.next_batch(10).unwrap().unwrap();
        assert_eq!(batch.rows[0][1], "REN\u{c9}E");
    }

    #[test]
    fn test_count_rows_includes_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rows.txt", b"a|b\nbad\nc|d\n");
        assert_eq!(ChunkedReader::count_rows(&path, layout(2)).unwrap(), 3);
    }
}

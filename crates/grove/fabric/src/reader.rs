//! Lock-free reading of append-only logs.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FabricError;

/// Chunk size for backward history reads.
const TAIL_CHUNK: u64 = 8192;

/// Byte offset into one log file.
///
/// Serializable so a consumer can persist it and resume after a restart
/// without re-reading or losing rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    pub position: u64,
}

/// Reader over one append-only log. Never takes a lock; appends are single
/// atomic lines, so the only partial state a reader can observe is an
/// unterminated tail, which it leaves for the next call.
#[derive(Debug, Clone)]
pub struct LogReader {
    path: PathBuf,
}

impl LogReader {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Complete lines appended since `cursor`, advancing it past exactly the
    /// bytes consumed.
    ///
    /// A missing file reads as empty. A file shorter than the cursor means
    /// truncation or rotation; the cursor resets and the file is reread from
    /// the start.
    pub fn read_new(&self, cursor: &mut LogCursor) -> Result<Vec<String>, FabricError> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if size < cursor.position {
            warn!(
                path = %self.path.display(),
                size,
                position = cursor.position,
                "Log shrank under the cursor, rereading from the start"
            );
            cursor.position = 0;
        }
        if size == cursor.position {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(cursor.position))?;
        let mut buf = Vec::with_capacity((size - cursor.position) as usize);
        file.read_to_end(&mut buf)?;

        // Only consume up to the last newline; the fragment past it is a
        // write still in flight.
        let consumed = match buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => return Ok(Vec::new()),
        };
        cursor.position += consumed as u64;
        Ok(split_lines(&buf[..consumed]))
    }

    /// Cursor pointing at the current end of the file, for consumers that
    /// only care about rows from now on.
    pub fn end_cursor(&self) -> Result<LogCursor, FabricError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(LogCursor {
                position: meta.len(),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(LogCursor::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Last `max_lines` lines, scanned backwards in chunks so opening a long
    /// history stays cheap.
    pub fn tail(&self, max_lines: usize) -> Result<Vec<String>, FabricError> {
        if max_lines == 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut pos = file.metadata()?.len();
        let mut collected: Vec<u8> = Vec::new();
        while pos > 0 && count_newlines(&collected) <= max_lines {
            let step = TAIL_CHUNK.min(pos);
            pos -= step;
            file.seek(SeekFrom::Start(pos))?;
            let mut chunk = vec![0u8; step as usize];
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&collected);
            collected = chunk;
        }
        let lines = split_lines(&collected);
        let keep_from = lines.len().saturating_sub(max_lines);
        Ok(lines[keep_from..].to_vec())
    }
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn reads_only_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, b"a\nb\npart");

        let reader = LogReader::open(&path);
        let mut cursor = LogCursor::default();
        assert_eq!(reader.read_new(&mut cursor).unwrap(), vec!["a", "b"]);
        assert_eq!(cursor.position, 4);

        // Nothing new until the fragment is terminated.
        assert!(reader.read_new(&mut cursor).unwrap().is_empty());

        append(&path, b"ial\n");
        assert_eq!(reader.read_new(&mut cursor).unwrap(), vec!["partial"]);
        assert_eq!(cursor.position, 12);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = LogReader::open(dir.path().join("absent.jsonl"));
        let mut cursor = LogCursor { position: 7 };
        assert!(reader.read_new(&mut cursor).unwrap().is_empty());
        assert_eq!(cursor.position, 7);
    }

    #[test]
    fn truncation_resets_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, b"one\ntwo\nthree\n");

        let reader = LogReader::open(&path);
        let mut cursor = LogCursor::default();
        assert_eq!(reader.read_new(&mut cursor).unwrap().len(), 3);

        std::fs::write(&path, b"fresh\n").unwrap();
        assert_eq!(reader.read_new(&mut cursor).unwrap(), vec!["fresh"]);
        assert_eq!(cursor.position, 6);
    }

    #[test]
    fn crlf_and_blank_lines_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, b"a\r\n\r\n  \nb\n");

        let reader = LogReader::open(&path);
        let mut cursor = LogCursor::default();
        assert_eq!(reader.read_new(&mut cursor).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn persisted_cursor_resumes_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, b"one\ntwo\n");

        let reader = LogReader::open(&path);
        let mut cursor = LogCursor::default();
        reader.read_new(&mut cursor).unwrap();

        // Round-trip through serde, as a client restart would.
        let saved = serde_json::to_string(&cursor).unwrap();
        let mut restored: LogCursor = serde_json::from_str(&saved).unwrap();

        append(&path, b"three\n");
        assert_eq!(reader.read_new(&mut restored).unwrap(), vec!["three"]);
    }

    #[test]
    fn tail_returns_last_lines_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut contents = String::new();
        for i in 0..3000 {
            contents.push_str(&format!("row-{i:05}\n"));
        }
        std::fs::write(&path, contents).unwrap();

        let reader = LogReader::open(&path);
        assert_eq!(
            reader.tail(3).unwrap(),
            vec!["row-02997", "row-02998", "row-02999"]
        );
        assert_eq!(reader.tail(0).unwrap(), Vec::<String>::new());
        assert_eq!(reader.tail(5000).unwrap().len(), 3000);
    }

    #[test]
    fn tail_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = LogReader::open(dir.path().join("absent.jsonl"));
        assert!(reader.tail(10).unwrap().is_empty());
    }

    #[test]
    fn end_cursor_points_past_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, b"old\n");

        let reader = LogReader::open(&path);
        let mut cursor = reader.end_cursor().unwrap();
        assert!(reader.read_new(&mut cursor).unwrap().is_empty());

        append(&path, b"new\n");
        assert_eq!(reader.read_new(&mut cursor).unwrap(), vec!["new"]);
    }
}

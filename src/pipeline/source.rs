//! Newline-delimited JSON recording input
//!
//! Feeds `qrm-ledger ingest`, e.g. `simulation --count 24 | qrm-ledger ingest -`.

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::types::Recording;

/// Reads one `Recording` per line from stdin or a file.
///
/// Blank lines are skipped; malformed lines are logged and skipped so one
/// bad record does not abort a batch.
pub struct RecordingSource {
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    line_buffer: String,
    line_no: usize,
    name: String,
}

impl RecordingSource {
    pub fn stdin() -> Self {
        Self::from_reader(Box::new(tokio::io::stdin()), "stdin")
    }

    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(Box::new(file), &path.display().to_string()))
    }

    pub fn from_reader(reader: Box<dyn AsyncRead + Unpin + Send>, name: &str) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_buffer: String::with_capacity(16 * 1024),
            line_no: 0,
            name: name.to_string(),
        }
    }

    /// Next parsable recording, `None` at end of input.
    pub async fn next_recording(&mut self) -> std::io::Result<Option<Recording>> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Recording>(line) {
                Ok(recording) => return Ok(Some(recording)),
                Err(e) => {
                    tracing::warn!(source = %self.name, line = self.line_no, error = %e, "Skipping malformed recording");
                }
            }
        }
    }

    pub fn source_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skips_blank_and_malformed_lines() {
        let input = concat!(
            "\n",
            "{\"capture_set_id\":\"HF_bands\",\"date\":\"2024-03-01\",\"time\":\"10:00\"}\n",
            "not json\n",
            "{\"capture_set_id\":\"HF_bands\",\"date\":\"2024-03-01\",\"time\":\"11:00\",\"note\":\"x\"}\n",
        );
        let mut src = RecordingSource::from_reader(Box::new(std::io::Cursor::new(input.as_bytes().to_vec())), "test");
        let first = src.next_recording().await.unwrap().unwrap();
        assert_eq!(first.time, "10:00");
        let second = src.next_recording().await.unwrap().unwrap();
        assert_eq!(second.note, "x");
        assert!(src.next_recording().await.unwrap().is_none());
        assert_eq!(src.source_name(), "test");
    }
}

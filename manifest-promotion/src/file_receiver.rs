//! Reassembles chunked file uploads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::IngestError;
use crate::model::FileChunk;
use crate::reporter::{Heartbeat, HeartbeatTemplate, Reporter};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(2);

/// Stateful per-request file reassembler. Buffers live per-filename until
/// their last chunk arrives, at which point the file is written under
/// `destination_dir` and the buffer is dropped.
pub struct FileReceiver {
    reporter: Reporter,
    buffers: HashMap<String, Vec<u8>>,
    destination_dir: PathBuf,
    total_files: u32,
    received_count: Arc<AtomicU32>,
    started: bool,
    heartbeat: Option<Heartbeat>,
}

impl FileReceiver {
    pub fn new(destination_dir: PathBuf, total_files: u32, reporter: Reporter) -> Self {
        Self {
            reporter,
            buffers: HashMap::new(),
            destination_dir,
            total_files,
            received_count: Arc::new(AtomicU32::new(0)),
            started: false,
            heartbeat: None,
        }
    }

    pub fn received_count(&self) -> u32 {
        self.received_count.load(Ordering::Relaxed)
    }

    /// Appends `chunk.content` to the named buffer, created on first sight.
    /// On `is_last_chunk`, writes the reassembled file under
    /// `destination_dir` and drops the buffer.
    pub async fn receive_chunk(&mut self, chunk: FileChunk) -> Result<()> {
        if !self.started {
            self.started = true;
            self.reporter.heading("Receiving files").await;
            self.heartbeat = Some(Heartbeat::start(
                self.reporter.clone(),
                HEARTBEAT_PERIOD,
                self.total_files,
                HeartbeatTemplate {
                    present_action: "receiving",
                    past_action: "received",
                    subject: "files",
                },
                self.received_count.clone(),
            ));
        }

        let buffer = self.buffers.entry(chunk.filename.clone()).or_default();
        buffer.extend_from_slice(&chunk.content);

        if chunk.is_last_chunk {
            let contents = self.buffers.remove(&chunk.filename).unwrap_or_default();
            let absolute = self.destination_dir.join(&chunk.filename);
            if let Some(parent) = absolute.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create parent directory for {absolute:?}"))?;
            }
            tokio::fs::write(&absolute, &contents)
                .await
                .with_context(|| format!("failed to write file {absolute:?}"))?;

            self.received_count.fetch_add(1, Ordering::Relaxed);
            self.reporter
                .progress(format!("received file {}", chunk.filename))
                .await;
        }

        Ok(())
    }

    /// Finalises ingestion: fails if nothing was received, if any buffer is
    /// still open, or if the received count doesn't match `total_files`.
    pub async fn done(mut self) -> Result<u32, IngestError> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }

        if !self.started {
            self.reporter.failure("No files received").await;
            return Err(IngestError::NoFilesReceived);
        }

        if !self.buffers.is_empty() {
            self.reporter
                .failure(format!("Partially received {} files", self.buffers.len()))
                .await;
            return Err(IngestError::PartiallyReceivedFiles(self.buffers.len()));
        }

        let received = self.received_count();
        if received != self.total_files {
            self.reporter
                .failure(format!("Received {received}/{} files", self.total_files))
                .await;
            return Err(IngestError::FileCountMismatch {
                received,
                total: self.total_files,
            });
        }

        self.reporter.success("Received all files").await;
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(filename: &str, content: &[u8], is_last: bool) -> FileChunk {
        FileChunk {
            filename: filename.to_string(),
            content: content.to_vec(),
            is_last_chunk: is_last,
        }
    }

    #[tokio::test]
    async fn writes_reassembled_file_on_last_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let mut receiver = FileReceiver::new(dir.path().to_path_buf(), 1, reporter);
        receiver.receive_chunk(chunk("a.yaml", b"hello ", false)).await.unwrap();
        receiver.receive_chunk(chunk("a.yaml", b"world", true)).await.unwrap();

        let written = tokio::fs::read(dir.path().join("a.yaml")).await.unwrap();
        assert_eq!(written, b"hello world");
        assert_eq!(receiver.done().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fails_when_nothing_received() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let receiver = FileReceiver::new(dir.path().to_path_buf(), 2, reporter);
        let err = receiver.done().await.unwrap_err();
        assert!(matches!(err, IngestError::NoFilesReceived));
    }

    #[tokio::test]
    async fn fails_on_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let mut receiver = FileReceiver::new(dir.path().to_path_buf(), 3, reporter);
        receiver.receive_chunk(chunk("a.yaml", b"x", true)).await.unwrap();
        receiver.receive_chunk(chunk("b.yaml", b"y", true)).await.unwrap();

        let err = receiver.done().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::FileCountMismatch { received: 2, total: 3 }
        ));
    }

    #[tokio::test]
    async fn fails_when_a_file_is_left_partial() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let mut receiver = FileReceiver::new(dir.path().to_path_buf(), 2, reporter);
        receiver.receive_chunk(chunk("a.yaml", b"x", true)).await.unwrap();
        receiver.receive_chunk(chunk("b.yaml", b"partial", false)).await.unwrap();

        let err = receiver.done().await.unwrap_err();
        assert!(matches!(err, IngestError::PartiallyReceivedFiles(1)));
    }
}

//! Progress reporter: a single-producer-per-call, single-consumer event
//! serialiser.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use manifest_promotion_proto as proto;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{ProgressEvent, ProgressKind};

/// A cheaply-clonable handle producers use to submit progress events.
/// Backed by a bounded channel of capacity 1 so that submitting a progress
/// event blocks the caller until the drain has taken the previous one —
/// the intentional backpressure a progress stream should have.
#[derive(Clone)]
pub struct Reporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl Reporter {
    /// Events submitted from a single async task arrive to the client in
    /// submission order (the channel preserves FIFO order); events from
    /// different tasks interleave arbitrarily.
    pub fn channel() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    async fn emit(&self, kind: ProgressKind, status: impl Into<String>) {
        let event = ProgressEvent {
            kind,
            status: status.into(),
        };
        // A full receiver means the client is gone or the drain has exited;
        // there is nothing more useful to do than drop the event.
        let _ = self.tx.send(event).await;
    }

    pub async fn heading(&self, status: impl Into<String>) {
        self.emit(ProgressKind::Heading, status).await;
    }

    pub async fn progress(&self, status: impl Into<String>) {
        self.emit(ProgressKind::Progress, status).await;
    }

    /// Alias for [`Reporter::progress`], for callers that don't need
    /// `format!`-style formatting at the call site.
    pub async fn basic_progress(&self, status: impl Into<String>) {
        self.progress(status).await;
    }

    pub async fn success(&self, status: impl Into<String>) {
        self.emit(ProgressKind::Success, status).await;
    }

    pub async fn failure(&self, status: impl Into<String>) {
        self.emit(ProgressKind::Failure, status).await;
    }

    /// Sends a failure progress if `is_err`, else a success progress.
    pub async fn result(&self, is_err: bool, success: impl Into<String>, failure: impl Into<String>) {
        if is_err {
            self.failure(failure).await;
        } else {
            self.success(success).await;
        }
    }
}

fn to_proto(event: ProgressEvent) -> proto::ManifestResponse {
    proto::ManifestResponse {
        response: Some(proto::manifest_response::Response::Progress(
            proto::Progress {
                kind: proto::ProgressKind::from(event.kind) as i32,
                status: event.status,
            },
        )),
    }
}

/// Drains progress events and forwards each as a `Progress` response frame.
/// Exits once the channel is closed — callers must close it only after all
/// producers have quit. Send failures (client gone) are logged, not fatal:
/// background-task errors don't abort the pipeline.
pub async fn drain(
    mut rx: mpsc::Receiver<ProgressEvent>,
    out: mpsc::Sender<Result<proto::ManifestResponse, tonic::Status>>,
) {
    while let Some(event) = rx.recv().await {
        if out.send(Ok(to_proto(event))).await.is_err() {
            tracing::warn!("progress receiver dropped; continuing to drain");
        }
    }
}

/// The present/past-tense/subject vocabulary used by a heartbeat's
/// message template, e.g. `("receiving", "received", "files")`.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTemplate {
    pub present_action: &'static str,
    pub past_action: &'static str,
    pub subject: &'static str,
}

/// A periodic "N/M processed" progress ticker, used by the file receiver,
/// mutation, and validation stages.
pub struct Heartbeat {
    handle: JoinHandle<()>,
    cancel: Arc<tokio::sync::Notify>,
}

impl Heartbeat {
    pub fn start(
        reporter: Reporter,
        period: Duration,
        total: u32,
        template: HeartbeatTemplate,
        progressed: Arc<AtomicU32>,
    ) -> Self {
        let cancel = Arc::new(tokio::sync::Notify::new());
        let cancel_task = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; discard it
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let done = progressed.load(Ordering::Relaxed);
                        reporter
                            .progress(format!(
                                "{} {done}/{total} {}",
                                template.past_action, template.subject
                            ))
                            .await;
                    }
                    () = cancel_task.notified() => {
                        let done = progressed.load(Ordering::Relaxed);
                        reporter
                            .progress(format!(
                                "{} {done}/{total} {}",
                                template.past_action, template.subject
                            ))
                            .await;
                        break;
                    }
                }
            }
        });

        Self { handle, cancel }
    }

    /// Stops the ticker, sending one final cumulative progress event.
    pub async fn stop(self) {
        self.cancel.notify_one();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_from_one_task_preserve_submission_order() {
        let (reporter, mut rx) = Reporter::channel();
        let task_reporter = reporter.clone();
        let producer = tokio::spawn(async move {
            task_reporter.heading("start").await;
            task_reporter.progress("step 1").await;
            task_reporter.progress("step 2").await;
            task_reporter.success("done").await;
        });

        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(rx.recv().await.unwrap().status);
        }
        producer.await.unwrap();

        assert_eq!(statuses, vec!["start", "step 1", "step 2", "done"]);
    }

    #[tokio::test]
    async fn drain_exits_when_channel_closed() {
        let (reporter, rx) = Reporter::channel();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let drain_task = tokio::spawn(drain(rx, out_tx));

        reporter.heading("hello").await;
        drop(reporter);

        let first = out_rx.recv().await.unwrap().unwrap();
        assert!(matches!(
            first.response,
            Some(proto::manifest_response::Response::Progress(_))
        ));
        drain_task.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_reports_final_count_on_stop() {
        let (reporter, mut rx) = Reporter::channel();
        let progressed = Arc::new(AtomicU32::new(0));
        let heartbeat = Heartbeat::start(
            reporter,
            Duration::from_secs(60),
            10,
            HeartbeatTemplate {
                present_action: "mutating",
                past_action: "mutated",
                subject: "files",
            },
            progressed.clone(),
        );

        progressed.store(3, Ordering::Relaxed);
        heartbeat.stop().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, "mutated 3/10 files");
    }
}

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::auth::AuthGate;
use crate::transport::ApiRequest;
use crate::utils::{RetryPolicy, sleep_or_cancel};
use super::errors::Result;
use super::types::{ExecutorEvent, ExecutorEventKind, FilePayload, UploadId};

/// Runs the attempts of one task until it completes, fails for good, or is cancelled.
///
/// The executor never touches the store. It only reports events tagged with
/// its generation; the manager worker decides whether they still apply.
pub(crate) struct TaskExecutor {
    pub upload_id: UploadId,
    pub generation: u64,
    pub payload: FilePayload,
    pub upload_url: String,
    pub gate: AuthGate,
    pub retry: RetryPolicy,
    pub cancellation_token: CancellationToken,
    pub event_tx: mpsc::UnboundedSender<ExecutorEvent>,
}

impl TaskExecutor {
    pub async fn run(self) {
        let mut attempt = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                debug!(upload_id = %self.upload_id, attempt, "Cancelled before attempt");
                return;
            }

            self.emit(ExecutorEventKind::AttemptStarted { attempt });

            let result = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    debug!(upload_id = %self.upload_id, attempt, "Attempt cancelled");
                    return;
                }
                result = self.attempt(attempt) => result,
            };

            match result {
                Ok(()) => {
                    info!(upload_id = %self.upload_id, attempt, "Upload completed");
                    self.emit(ExecutorEventKind::Completed);
                    return;
                }
                Err(err) if self.retry.should_retry(&err, attempt) => {
                    let delay = self.retry.get_delay(attempt);
                    warn!(
                        upload_id = %self.upload_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "Upload attempt failed, backing off"
                    );
                    self.emit(ExecutorEventKind::BackingOff { attempt, delay });

                    if !sleep_or_cancel(delay, &self.cancellation_token).await {
                        debug!(upload_id = %self.upload_id, attempt, "Backoff interrupted");
                        return;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(upload_id = %self.upload_id, attempt, status = ?err.status(), %err, "Upload failed");
                    self.emit(ExecutorEventKind::Failed { error: err.to_string() });
                    return;
                }
            }
        }
    }

    /// One request through the auth gate, forwarding progress as it arrives.
    async fn attempt(&self, attempt: u32) -> Result<()> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let request = ApiRequest::upload(self.upload_url.clone(), &self.payload);

        let send = self.gate.send(request, Some(progress_tx));
        tokio::pin!(send);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                Some(progress) = progress_rx.recv() => {
                    self.emit(ExecutorEventKind::Progress { attempt, percent: progress.percent() });
                }
            }
        };

        // 请求结束后还可能有没转发的进度
        while let Ok(progress) = progress_rx.try_recv() {
            self.emit(ExecutorEventKind::Progress { attempt, percent: progress.percent() });
        }

        result.map(|_| ())
    }

    fn emit(&self, kind: ExecutorEventKind) {
        let _ = self.event_tx.send(ExecutorEvent {
            upload_id: self.upload_id,
            generation: self.generation,
            kind,
        });
    }
}

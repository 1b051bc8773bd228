//! Cancellable receipt subscriptions over the compliance service's
//! server-push event stream.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ComplianceError;

use super::models::Receipt;

/// A handle over a live receipt event stream. Yields Receipt snapshots until
/// a terminal status is observed, the stream fails (a typed error, after
/// which the caller falls back to polling), or the subscription is
/// cancelled.
pub struct ReceiptSubscription {
    pub(super) rx: mpsc::Receiver<Result<Receipt, ComplianceError>>,
    pub(super) task: JoinHandle<()>,
}

impl ReceiptSubscription {
    /// Next snapshot; `None` once the stream has ended or been cancelled.
    pub async fn next(&mut self) -> Option<Result<Receipt, ComplianceError>> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for ReceiptSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Incremental server-sent-events parser. Feeds arbitrary chunk boundaries,
/// yields the `data` payload of each complete event.
#[derive(Default)]
pub(super) struct SseParser {
    buffer: String,
}

impl SseParser {
    pub(super) fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        // Normalize CRLF so event boundaries are always "\n\n"
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let event: String = self.buffer[..boundary].to_string();
            self.buffer.drain(..boundary + 2);

            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect();
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

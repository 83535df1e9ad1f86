//! Cancellable completion stream.
//!
//! A [`CompletionStream`] is the consumer half of one completion exchange:
//! a finite sequence of [`StreamEvent`]s ending with `Done` or `Error`.
//! The producer half ([`StreamSender`]) is usually a background task
//! reading an HTTP body. Calling [`CompletionStream::cancel`] trips a
//! shared `CancellationToken`; the producer observes it and drops the
//! exchange, and the consumer sees no further events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, ProviderError};
use crate::provider::Usage;

/// One event from a completion exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text
    Token { text: String },
    /// Terminal: the model finished normally
    Done { usage: Usage },
    /// Terminal: the exchange failed
    Error { code: ErrorCode, message: String },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Producer half of a completion stream.
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamSender {
    /// Deliver an event. Returns `false` once the consumer has cancelled
    /// or gone away; the producer should stop at that point.
    pub async fn send(&self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Resolves when the consumer cancels the exchange.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Consumer half of a completion stream. Not restartable.
#[derive(Debug)]
pub struct CompletionStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl CompletionStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer: usize) -> (StreamSender, CompletionStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        (
            StreamSender {
                tx,
                cancel: cancel.clone(),
            },
            CompletionStream {
                rx,
                cancel,
                finished: false,
            },
        )
    }

    /// A stream that replays a fixed list of events. Used by scripted
    /// providers and tests.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (sender, stream) = Self::channel(events.len());
        for event in events {
            // Capacity equals the event count, so this never fills.
            let _ = sender.tx.try_send(event);
        }
        stream
    }

    /// Next event, or `None` after a terminal event, after `cancel()`, or
    /// when the producer disappears without a terminal event.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        };

        match &event {
            Some(e) if !e.is_terminal() => {}
            _ => self.finished = true,
        }
        event
    }

    /// Close the exchange. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.finished = true;
        self.rx.close();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream into its full text.
    ///
    /// An `Error` event becomes `ProviderError::Api`; a stream that ends
    /// without a terminal event is reported as interrupted.
    pub async fn collect_text(mut self) -> Result<(String, Usage), ProviderError> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Token { text: t } => text.push_str(&t),
                StreamEvent::Done { usage } => return Ok((text, usage)),
                StreamEvent::Error { code, message } => {
                    return Err(ProviderError::Api { code, message });
                }
            }
        }
        Err(ProviderError::StreamInterrupted(
            "stream ended without a terminal event".into(),
        ))
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        // Stop any producer still reading the upstream body.
        self.cancel.cancel();
    }
}

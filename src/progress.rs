//! Progress reporting
//!
//! Long-running admin operations push `ProgressMessage`s to an optional
//! consumer (a terminal renderer, a log sink). Without a consumer every
//! message is dropped. `done` consumes the reporter, closing the channel.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Messages emitted by an admin operation, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressMessage {
    /// Operation started with this many steps
    Start { steps: usize },

    /// One step advanced on a component (node, drive, volume)
    Progress {
        message: String,
        step: usize,
        component: String,
    },

    /// Work on a component finished
    End {
        component: String,
        error: Option<String>,
    },

    /// Free-form log line
    Log { text: String },

    /// Operation finished; always the last message
    Done { error: Option<String> },
}

/// Sender half handed to admin operations
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<ProgressMessage>>,
}

impl Progress {
    /// A reporter with no consumer
    pub fn none() -> Self {
        Self::default()
    }

    /// A reporter and the receiver its messages arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_observed(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    fn send(&self, message: ProgressMessage) {
        if let Some(tx) = &self.tx {
            // A consumer that went away just stops receiving
            let _ = tx.send(message);
        }
    }

    pub fn start(&self, steps: usize) {
        self.send(ProgressMessage::Start { steps });
    }

    pub fn progress(&self, message: impl Into<String>, step: usize, component: impl Into<String>) {
        self.send(ProgressMessage::Progress {
            message: message.into(),
            step,
            component: component.into(),
        });
    }

    pub fn end(&self, component: impl Into<String>, error: Option<&Error>) {
        self.send(ProgressMessage::End {
            component: component.into(),
            error: error.map(ToString::to_string),
        });
    }

    pub fn log(&self, text: impl Into<String>) {
        self.send(ProgressMessage::Log { text: text.into() });
    }

    /// Emit the final message and close the channel
    pub fn done(self, error: Option<&Error>) {
        self.send(ProgressMessage::Done {
            error: error.map(ToString::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_in_order_then_closed() {
        let (progress, mut rx) = Progress::channel();
        progress.start(2);
        progress.progress("formatting", 1, "sda");
        progress.end("sda", None);
        progress.log("one device skipped");
        progress.done(Some(&Error::NoMatchingResourcesFound));

        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            messages.push(message);
        }
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], ProgressMessage::Start { steps: 2 });
        assert_eq!(
            messages[2],
            ProgressMessage::End {
                component: "sda".into(),
                error: None
            }
        );
        assert_eq!(
            messages[4],
            ProgressMessage::Done {
                error: Some(Error::NoMatchingResourcesFound.to_string())
            }
        );
    }

    #[test]
    fn test_no_consumer_drops() {
        let progress = Progress::none();
        assert!(!progress.is_observed());
        progress.start(1);
        progress.done(None);

        let (progress, rx) = Progress::channel();
        drop(rx);
        assert!(!progress.is_observed());
        progress.log("nobody listening");
    }

    #[test]
    fn test_message_json() {
        let json = serde_json::to_value(ProgressMessage::Progress {
            message: "m".into(),
            step: 3,
            component: "node-1".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["step"], 3);
    }
}

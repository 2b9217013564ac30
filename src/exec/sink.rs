// src/exec/sink.rs

//! Attachable consumers of a runner's live output.

use std::fmt::Debug;

use tokio::sync::mpsc;

/// Receives decoded output text from one runner.
///
/// Stderr chunks arrive with one trailing newline trimmed; stdout chunks
/// arrive verbatim.
pub trait OutputSink: Send + Debug {
    fn append(&mut self, text: &str);
}

/// Sink that forwards every chunk into an unbounded channel.
///
/// Never blocks the control loop; a dropped receiver just discards output.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn append(&mut self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }
}

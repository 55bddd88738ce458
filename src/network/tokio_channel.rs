//! Tokio mpsc adapter for [`FrameChannel`].
//!
//! [`TokioChannel`] bridges the synchronous session API and an async transport task. The
//! transport task (a WebSocket reader/writer, typically) owns the other ends of two
//! unbounded mpsc channels: it forwards received text frames into one and writes out
//! whatever arrives on the other.
//!
//! # Usage Pattern
//!
//! 1. Create the channel halves with [`TokioChannel::pair`] or [`TokioChannel::new`].
//! 2. Hand the `TokioChannel` to [`SessionBuilder::with_channel`].
//! 3. Poll the session from your async loop, or let
//!    [`SessionDriver`](crate::driver::SessionDriver) do it.
//!
//! # Feature Flag
//!
//! This module requires the `tokio` feature flag:
//!
//! ```toml
//! [dependencies]
//! captcha-duel = { version = "0.3", features = ["tokio"] }
//! ```
//!
//! [`SessionBuilder::with_channel`]: crate::SessionBuilder::with_channel

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::FrameChannel;

/// A [`FrameChannel`] backed by tokio unbounded mpsc channels.
#[derive(Debug)]
pub struct TokioChannel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

impl TokioChannel {
    /// Wraps existing channel halves.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            closed: false,
        }
    }

    /// Creates a connected pair, one end for the session and one for the transport.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// Returns `true` once the other end has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed || self.outbound.is_closed()
    }

    /// Waits for the next frame. Returns `None` once the sending side is dropped.
    pub async fn recv_frame(&mut self) -> Option<String> {
        let frame = self.inbound.recv().await;
        if frame.is_none() {
            self.closed = true;
        }
        frame
    }
}

impl FrameChannel for TokioChannel {
    fn send_frame(&mut self, frame: String) {
        if self.outbound.send(frame).is_err() {
            self.closed = true;
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Channel,
                "transport closed, outgoing frame dropped"
            );
        }
    }

    fn receive_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            match self.inbound.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                },
            }
        }
        frames
    }
}

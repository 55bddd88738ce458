//! In-process [`FrameChannel`] pairs.
//!
//! A [`LocalChannel`] pair behaves like a perfect network link between two endpoints in the
//! same process: every frame sent on one end is received, in order and exactly once, on the
//! other. Use it to wire a [`DuelSession`](crate::DuelSession) to a
//! [`Referee`](crate::Referee) in tests and local tooling, optionally wrapped in a
//! [`ChaosChannel`](crate::ChaosChannel) to make the link misbehave.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::FrameChannel;

type Queue = Arc<Mutex<VecDeque<String>>>;

/// One end of an in-memory frame link.
#[derive(Clone, Default)]
pub struct LocalChannel {
    inbox: Queue,
    outbox: Queue,
}

impl LocalChannel {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Queue::default();
        let b_to_a = Queue::default();
        let a = Self {
            inbox: Arc::clone(&b_to_a),
            outbox: Arc::clone(&a_to_b),
        };
        let b = Self {
            inbox: a_to_b,
            outbox: b_to_a,
        };
        (a, b)
    }

    /// Number of frames waiting to be received on this end.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbox.lock().len()
    }
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChannel")
            .field("pending", &self.pending())
            .field("unread_by_peer", &self.outbox.lock().len())
            .finish()
    }
}

impl FrameChannel for LocalChannel {
    fn send_frame(&mut self, frame: String) {
        self.outbox.lock().push_back(frame);
    }

    fn receive_frames(&mut self) -> Vec<String> {
        self.inbox.lock().drain(..).collect()
    }
}

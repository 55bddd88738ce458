use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use crate::DuelEvent;

/// Iterator over the events a session queued since the last drain.
///
/// Wraps the session's internal queue drain so the queue type stays private. Obtain one
/// with [`DuelSession::events`](crate::DuelSession::events). Events not consumed before
/// the drain is dropped are discarded.
///
/// ```
/// use captcha_duel::{DuelEvent, Intent, SessionBuilder};
/// use web_time::Instant;
///
/// let mut session = SessionBuilder::new().with_seed(1).build()?;
/// session.apply_intent(Intent::StartLocalMatch, Instant::now())?;
///
/// let started = session
///     .events()
///     .any(|event| matches!(event, DuelEvent::MatchStarted { .. }));
/// assert!(started);
/// assert_eq!(session.events().len(), 0);
/// # Ok::<(), captcha_duel::DuelError>(())
/// ```
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a> {
    inner: Drain<'a, DuelEvent>,
}

impl<'a> EventDrain<'a> {
    pub(crate) fn from_drain(drain: Drain<'a, DuelEvent>) -> Self {
        Self { inner: drain }
    }
}

impl Iterator for EventDrain<'_> {
    type Item = DuelEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for EventDrain<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for EventDrain<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for EventDrain<'_> {}

impl std::fmt::Debug for EventDrain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::{MatchMode, SessionState, Side, Verdict};
    use std::collections::VecDeque;

    fn queue() -> VecDeque<DuelEvent> {
        VecDeque::from(vec![
            DuelEvent::MatchStarted {
                mode: MatchMode::Cpu,
            },
            DuelEvent::Verified {
                side: Side::Local,
                verdict: Verdict::Correct,
            },
            DuelEvent::StateChanged {
                from: SessionState::Playing,
                to: SessionState::Result,
            },
        ])
    }

    #[test]
    fn drains_in_order_and_empties_queue() {
        let mut events = queue();
        let drained: Vec<_> = EventDrain::from_drain(events.drain(..)).collect();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], DuelEvent::MatchStarted { .. }));
        assert!(events.is_empty());
    }

    #[test]
    fn exact_size_and_double_ended() {
        let mut events = queue();
        let mut drain = EventDrain::from_drain(events.drain(..));
        assert_eq!(drain.len(), 3);
        assert!(matches!(
            drain.next_back(),
            Some(DuelEvent::StateChanged { .. })
        ));
        assert_eq!(drain.len(), 2);
        assert!(format!("{drain:?}").contains("remaining: 2"));
    }

    #[test]
    fn dropping_discards_remaining_events() {
        let mut events = queue();
        {
            let mut drain = EventDrain::from_drain(events.drain(..));
            let _ = drain.next();
        }
        assert!(events.is_empty());
    }

    #[test]
    fn fused_after_exhaustion() {
        let mut events = VecDeque::new();
        let mut drain = EventDrain::from_drain(events.drain(..));
        assert!(drain.next().is_none());
        assert!(drain.next().is_none());
    }
}

//! Per-job negotiation timer.
//!
//! Each job carries at most one pending timer; arming replaces any prior
//! one. The timer is a spawned sleep that posts `TimerFired` back to the
//! dispatcher, tagged with a sequence number so a fire that raced a `clear`
//! is recognized as stale and ignored. What to tear down when a timer
//! legitimately fires is decided by its [`TimerKind`].

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::engine::event::{Event, EventTx};

/// What the armed window is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// A `DCC SEND` offer after `XDCC SEND <n>` went out.
    Offer,
    /// A `DCC ACCEPT` after the engine replied `DCC RESUME`. Firing must
    /// also discard the parked resume entry.
    Accept,
}

#[derive(Debug, Default)]
pub(crate) enum TimerState {
    #[default]
    Idle,
    Armed {
        kind: TimerKind,
        seq: u64,
        handle: JoinHandle<()>,
    },
}

impl TimerState {
    /// Arm a fresh window, replacing any pending one.
    pub fn arm(&mut self, tx: EventTx, job: String, kind: TimerKind, delay: Duration, seq: u64) {
        self.clear();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::TimerFired { job, seq });
        });
        *self = TimerState::Armed { kind, seq, handle };
    }

    /// Cancel the pending window. Idempotent.
    pub fn clear(&mut self) {
        if let TimerState::Armed { handle, .. } = std::mem::take(self) {
            handle.abort();
        }
    }

    /// Consume a fire notification. Returns the kind only when `seq` matches
    /// the currently armed window; stale fires yield `None`.
    pub fn fire(&mut self, seq: u64) -> Option<TimerKind> {
        if !matches!(self, TimerState::Armed { seq: armed, .. } if *armed == seq) {
            return None;
        }
        match std::mem::take(self) {
            TimerState::Armed { kind, .. } => Some(kind),
            TimerState::Idle => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, TimerState::Armed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_with_matching_seq() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerState::default();
        timer.arm(tx, "bot".into(), TimerKind::Offer, Duration::from_secs(15), 7);
        assert!(timer.is_armed());

        let Some(Event::TimerFired { job, seq }) = rx.recv().await else {
            panic!("expected a timer fire");
        };
        assert_eq!(job, "bot");
        assert_eq!(timer.fire(seq), Some(TimerKind::Offer));
        assert!(!timer.is_armed());
        // A duplicate fire for the same seq is stale now.
        assert_eq!(timer.fire(seq), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_invalidates_the_old_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerState::default();
        timer.arm(
            tx.clone(),
            "bot".into(),
            TimerKind::Offer,
            Duration::from_secs(1),
            1,
        );
        timer.arm(tx, "bot".into(), TimerKind::Accept, Duration::from_secs(1), 2);

        // Only the second window is live; a stale seq must not fire.
        let Some(Event::TimerFired { seq, .. }) = rx.recv().await else {
            panic!("expected a timer fire");
        };
        assert_eq!(timer.fire(1), None);
        assert_eq!(timer.fire(seq), Some(TimerKind::Accept));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_is_idempotent_and_aborts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerState::default();
        timer.arm(tx, "bot".into(), TimerKind::Offer, Duration::from_secs(5), 3);
        timer.clear();
        timer.clear();
        assert!(!timer.is_armed());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}

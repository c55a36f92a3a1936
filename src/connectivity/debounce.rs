//! Pure debounce state machine behind [`ConnectionMonitor`](super::ConnectionMonitor).
//!
//! A raw signal that differs from the committed status arms a pending
//! transition identified by a [`PendingToken`]. The transition commits only
//! when that exact token fires; any later signal replaces or cancels it.

use crate::domain::{ConnectivityState, ConnectivityStatus, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEffect {
    /// Signal matches the committed status and nothing was pending.
    Ignored,
    /// A transition is pending; fire the token once the debounce elapses.
    Scheduled(PendingToken),
    /// Status flipped back before the pending transition fired.
    Cancelled,
}

#[derive(Debug)]
pub struct Debouncer {
    state: ConnectivityState,
    pending: Option<(ConnectivityStatus, PendingToken)>,
    next_token: u64,
}

impl Debouncer {
    pub fn new(initial: ConnectivityStatus, now_ms: u64) -> Self {
        Self {
            state: ConnectivityState {
                status: initial,
                last_changed: now_ms,
                change_count: 0,
            },
            pending: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn pending(&self) -> Option<ConnectivityStatus> {
        self.pending.map(|(status, _)| status)
    }

    pub fn signal(&mut self, status: ConnectivityStatus) -> SignalEffect {
        if status == self.state.status {
            return match self.pending.take() {
                Some(_) => SignalEffect::Cancelled,
                None => SignalEffect::Ignored,
            };
        }

        // Re-arm: a repeated signal restarts the debounce window.
        let token = PendingToken(self.next_token);
        self.next_token += 1;
        self.pending = Some((status, token));
        SignalEffect::Scheduled(token)
    }

    /// Commit the pending transition if `token` is still the live one.
    pub fn fire(&mut self, token: PendingToken, now_ms: u64) -> Option<Transition> {
        match self.pending {
            Some((status, live)) if live == token => {
                self.pending = None;
                self.apply(status, now_ms)
            }
            _ => None,
        }
    }

    /// Commit `status` immediately, discarding anything pending.
    pub fn force(&mut self, status: ConnectivityStatus, now_ms: u64) -> Option<Transition> {
        self.pending = None;
        self.apply(status, now_ms)
    }

    fn apply(&mut self, status: ConnectivityStatus, now_ms: u64) -> Option<Transition> {
        if status == self.state.status {
            return None;
        }

        let transition = Transition {
            from: self.state.status,
            to: status,
            at: now_ms,
        };
        self.state.status = status;
        self.state.last_changed = now_ms;
        self.state.change_count += 1;
        Some(transition)
    }
}

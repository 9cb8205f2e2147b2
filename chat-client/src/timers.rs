//! Named timers for the session loop.
//!
//! Every timer has a [`TimerKind`] identity; arming a kind that is already
//! armed replaces it, and cancelling removes it from the queue outright
//! instead of leaving a stale entry to be ignored later.

use std::collections::HashMap;
use std::time::Duration;

use chat_types::{AckId, ConversationId, UserId};
use tokio_util::time::{delay_queue, DelayQueue};

/// Identity of a timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Next reconnect attempt.
    Reconnect,
    /// Local typing idle timeout for a conversation.
    TypingIdle(ConversationId),
    /// Local typing idle timeout in random talk, keyed by peer.
    RandomTypingIdle(UserId),
    /// Remote typing expiry guard for a conversation.
    RemoteTyping(ConversationId),
    /// Match display delay.
    MatchDisplay,
    /// Acknowledgement timeout.
    Ack(AckId),
}

/// An expired timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    /// Which timer.
    pub kind: TimerKind,
    /// Value supplied when armed.
    pub generation: u64,
}

/// Queue of named timers.
#[derive(Debug)]
pub struct Timers {
    queue: DelayQueue<Timer>,
    keys: HashMap<TimerKind, delay_queue::Key>,
}

impl Timers {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Arm `kind` to fire after `delay`, replacing any armed timer of that kind.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration, generation: u64) {
        self.cancel(&kind);
        let key = self.queue.insert(
            Timer {
                kind: kind.clone(),
                generation,
            },
            delay,
        );
        self.keys.insert(kind, key);
    }

    /// Disarm `kind`. Returns true if it was armed.
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        match self.keys.remove(kind) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer matching `predicate`.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerKind) -> bool) {
        let doomed: Vec<TimerKind> = self.keys.keys().filter(|k| predicate(k)).cloned().collect();
        for kind in doomed {
            self.cancel(&kind);
        }
    }

    /// Check whether `kind` is armed.
    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.keys.contains_key(kind)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drop every timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }

    /// Wait for the next timer to fire. Returns `None` when nothing is armed.
    pub async fn next(&mut self) -> Option<Timer> {
        let expired = std::future::poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let timer = expired.into_inner();
        self.keys.remove(&timer.kind);
        Some(timer)
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::MatchDisplay, Duration::from_secs(2), 0);
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1), 0);

        assert_eq!(timers.next().await.unwrap().kind, TimerKind::Reconnect);
        assert_eq!(timers.next().await.unwrap().kind, TimerKind::MatchDisplay);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces() {
        let start = Instant::now();
        let mut timers = Timers::new();
        let key = TimerKind::TypingIdle(ConversationId::new("c1"));
        timers.arm(key.clone(), Duration::from_secs(3), 1);
        timers.arm(key.clone(), Duration::from_secs(3), 2);
        assert_eq!(timers.len(), 1);

        let fired = timers.next().await.unwrap();
        assert_eq!(fired.generation, 2);
        assert!(timers.next().await.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_from_queue() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1), 0);

        assert!(timers.cancel(&TimerKind::Reconnect));
        assert!(!timers.cancel(&TimerKind::Reconnect));
        assert!(timers.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_where_targets_one_conversation() {
        let mut timers = Timers::new();
        let c1 = ConversationId::new("c1");
        let c2 = ConversationId::new("c2");
        timers.arm(TimerKind::TypingIdle(c1.clone()), Duration::from_secs(3), 0);
        timers.arm(TimerKind::RemoteTyping(c1.clone()), Duration::from_secs(6), 0);
        timers.arm(TimerKind::TypingIdle(c2.clone()), Duration::from_secs(3), 0);

        timers.cancel_where(|k| {
            matches!(k, TimerKind::TypingIdle(c) | TimerKind::RemoteTyping(c) if *c == c1)
        });

        assert_eq!(timers.len(), 1);
        assert!(timers.is_armed(&TimerKind::TypingIdle(c2)));
    }
}

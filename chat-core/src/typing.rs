//! Typing signals.
//!
//! [`TypingDebouncer`] turns a stream of local keystrokes into at most one
//! start and one stop signal per burst. It owns no clock: each keystroke
//! returns an [`TypingAction::ArmIdle`] the caller schedules, and the caller
//! reports the timer back through [`TypingDebouncer::on_idle`]. Timers carry
//! a generation number so a superseded timer that still fires is ignored.
//!
//! [`RemoteTyping`] tracks who else is typing, with an expiry guard in case
//! a stop signal is lost.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use chat_types::{ConversationId, UserId};

/// Idle time after the last keystroke before typing stops.
pub const TYPING_IDLE: Duration = Duration::from_secs(3);

/// How long a remote typing indicator survives without a stop signal.
pub const REMOTE_TYPING_EXPIRY: Duration = Duration::from_secs(6);

/// Side effects requested by the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingAction<K> {
    /// Emit the start-typing signal.
    Start(K),
    /// Emit the stop-typing signal.
    Stop(K),
    /// (Re)arm the idle timer, replacing any armed one for `key`.
    ArmIdle {
        /// Which burst.
        key: K,
        /// Delay until the timer fires.
        delay: Duration,
        /// Pass back to [`TypingDebouncer::on_idle`].
        generation: u64,
    },
    /// Disarm the idle timer.
    CancelIdle(K),
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    emitted: bool,
    generation: u64,
}

/// Debounces local typing per key (conversation or random-talk peer).
#[derive(Debug, Clone)]
pub struct TypingDebouncer<K> {
    idle_after: Duration,
    bursts: HashMap<K, Burst>,
    next_generation: u64,
}

impl<K: Clone + Eq + Hash> TypingDebouncer<K> {
    /// Create a debouncer with the default idle time.
    pub fn new() -> Self {
        Self::with_idle(TYPING_IDLE)
    }

    /// Create a debouncer with a custom idle time.
    pub fn with_idle(idle_after: Duration) -> Self {
        Self {
            idle_after,
            bursts: HashMap::new(),
            next_generation: 0,
        }
    }

    /// A keystroke happened.
    pub fn on_input(&mut self, key: K) -> Vec<TypingAction<K>> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let burst = self.bursts.entry(key.clone()).or_insert(Burst {
            emitted: false,
            generation,
        });
        burst.generation = generation;

        let mut actions = Vec::with_capacity(2);
        if !burst.emitted {
            burst.emitted = true;
            actions.push(TypingAction::Start(key.clone()));
        }
        actions.push(TypingAction::ArmIdle {
            key,
            delay: self.idle_after,
            generation,
        });
        actions
    }

    /// The idle timer fired.
    pub fn on_idle(&mut self, key: &K, generation: u64) -> Vec<TypingAction<K>> {
        match self.bursts.get(key) {
            Some(burst) if burst.generation == generation => {
                self.bursts.remove(key);
                vec![TypingAction::Stop(key.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// A message was sent; the burst is over.
    pub fn on_sent(&mut self, key: &K) -> Vec<TypingAction<K>> {
        self.finish(key)
    }

    /// The user left this conversation; drop its timer.
    pub fn cancel(&mut self, key: &K) -> Vec<TypingAction<K>> {
        self.finish(key)
    }

    /// Check whether a start signal is outstanding for `key`.
    pub fn is_typing(&self, key: &K) -> bool {
        self.bursts.get(key).is_some_and(|b| b.emitted)
    }

    fn finish(&mut self, key: &K) -> Vec<TypingAction<K>> {
        match self.bursts.remove(key) {
            Some(burst) => {
                let mut actions = vec![TypingAction::CancelIdle(key.clone())];
                if burst.emitted {
                    actions.push(TypingAction::Stop(key.clone()));
                }
                actions
            }
            None => Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> Default for TypingDebouncer<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Someone typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Typist {
    /// A known user.
    User(UserId),
    /// The server did not say who.
    Anonymous,
}

impl From<Option<UserId>> for Typist {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Self::Anonymous, Self::User)
    }
}

/// Remote typing indicators per conversation.
#[derive(Debug, Clone)]
pub struct RemoteTyping {
    expiry: Duration,
    typing: HashMap<ConversationId, HashSet<Typist>>,
}

impl RemoteTyping {
    /// Create a tracker with the default expiry guard.
    pub fn new() -> Self {
        Self::with_expiry(REMOTE_TYPING_EXPIRY)
    }

    /// Create a tracker with a custom expiry guard.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry,
            typing: HashMap::new(),
        }
    }

    /// Someone started typing. Returns the guard delay to (re)arm.
    pub fn on_typing(&mut self, conversation: ConversationId, typist: Typist) -> Duration {
        self.typing.entry(conversation).or_default().insert(typist);
        self.expiry
    }

    /// Someone stopped typing. Returns true if nobody is typing any more.
    pub fn on_stop(&mut self, conversation: &ConversationId, typist: &Typist) -> bool {
        let Some(set) = self.typing.get_mut(conversation) else {
            return true;
        };
        // Anonymous stop signals cannot be attributed; treat them as "all stopped".
        if *typist == Typist::Anonymous {
            set.clear();
        } else {
            set.remove(typist);
        }
        if set.is_empty() {
            self.typing.remove(conversation);
            return true;
        }
        false
    }

    /// The expiry guard fired. Returns true if an indicator was dropped.
    pub fn expire(&mut self, conversation: &ConversationId) -> bool {
        self.typing.remove(conversation).is_some()
    }

    /// Forget a conversation (it is no longer active).
    pub fn clear(&mut self, conversation: &ConversationId) {
        self.typing.remove(conversation);
    }

    /// Check whether anyone is typing in `conversation`.
    pub fn is_typing(&self, conversation: &ConversationId) -> bool {
        self.typing.get(conversation).is_some_and(|s| !s.is_empty())
    }
}

impl Default for RemoteTyping {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    fn armed(actions: &[TypingAction<ConversationId>]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            TypingAction::ArmIdle { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    // ===========================================
    // Local debounce
    // ===========================================

    #[test]
    fn burst_emits_one_start_and_one_stop_three_seconds_after_last_key() {
        let mut debouncer = TypingDebouncer::new();
        let mut sent: Vec<(u64, TypingAction<ConversationId>)> = Vec::new();
        let mut deadline = None;

        for t in [0u64, 1, 2] {
            for action in debouncer.on_input(c("c1")) {
                match action {
                    TypingAction::ArmIdle {
                        delay, generation, ..
                    } => deadline = Some((t + delay.as_secs(), generation)),
                    other => sent.push((t, other)),
                }
            }
        }

        let (fire_at, generation) = deadline.unwrap();
        assert_eq!(fire_at, 5);
        for action in debouncer.on_idle(&c("c1"), generation) {
            sent.push((fire_at, action));
        }

        assert_eq!(
            sent,
            vec![
                (0, TypingAction::Start(c("c1"))),
                (5, TypingAction::Stop(c("c1"))),
            ]
        );
    }

    #[test]
    fn later_burst_emits_again() {
        let mut debouncer = TypingDebouncer::new();
        let generation = armed(&debouncer.on_input(c("c1"))).unwrap();
        debouncer.on_idle(&c("c1"), generation);

        let actions = debouncer.on_input(c("c1"));
        assert_eq!(actions[0], TypingAction::Start(c("c1")));
    }

    #[test]
    fn superseded_timer_is_ignored() {
        let mut debouncer = TypingDebouncer::new();
        let first = armed(&debouncer.on_input(c("c1"))).unwrap();
        debouncer.on_input(c("c1"));

        assert!(debouncer.on_idle(&c("c1"), first).is_empty());
        assert!(debouncer.is_typing(&c("c1")));
    }

    #[test]
    fn sending_stops_open_burst_once() {
        let mut debouncer = TypingDebouncer::new();
        let generation = armed(&debouncer.on_input(c("c1"))).unwrap();

        let actions = debouncer.on_sent(&c("c1"));
        assert_eq!(
            actions,
            vec![TypingAction::CancelIdle(c("c1")), TypingAction::Stop(c("c1"))]
        );
        assert!(debouncer.on_idle(&c("c1"), generation).is_empty());
        assert!(debouncer.on_sent(&c("c1")).is_empty());
    }

    #[test]
    fn cancel_without_burst_is_silent() {
        let mut debouncer: TypingDebouncer<ConversationId> = TypingDebouncer::new();
        assert!(debouncer.cancel(&c("c1")).is_empty());
    }

    #[test]
    fn keys_are_independent() {
        let mut debouncer = TypingDebouncer::new();
        debouncer.on_input(c("c1"));
        let actions = debouncer.on_input(c("c2"));
        assert_eq!(actions[0], TypingAction::Start(c("c2")));

        debouncer.cancel(&c("c1"));
        assert!(debouncer.is_typing(&c("c2")));
    }

    // ===========================================
    // Remote typing
    // ===========================================

    #[test]
    fn remote_typing_toggles() {
        let mut remote = RemoteTyping::new();
        let delay = remote.on_typing(c("c1"), Typist::Anonymous);
        assert_eq!(delay, REMOTE_TYPING_EXPIRY);
        assert!(remote.is_typing(&c("c1")));

        assert!(remote.on_stop(&c("c1"), &Typist::Anonymous));
        assert!(!remote.is_typing(&c("c1")));
    }

    #[test]
    fn group_typing_waits_for_everyone() {
        let mut remote = RemoteTyping::new();
        let bob = Typist::User(UserId::new("u2"));
        let carol = Typist::User(UserId::new("u3"));
        remote.on_typing(c("g1"), bob.clone());
        remote.on_typing(c("g1"), carol.clone());

        assert!(!remote.on_stop(&c("g1"), &bob));
        assert!(remote.is_typing(&c("g1")));
        assert!(remote.on_stop(&c("g1"), &carol));
    }

    #[test]
    fn expiry_guard_drops_indicator() {
        let mut remote = RemoteTyping::new();
        remote.on_typing(c("c1"), Typist::Anonymous);

        assert!(remote.expire(&c("c1")));
        assert!(!remote.is_typing(&c("c1")));
        assert!(!remote.expire(&c("c1")));
    }
}

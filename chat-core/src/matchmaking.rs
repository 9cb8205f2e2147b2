//! Random-talk matchmaking state machine.
//!
//! The flow is strict:
//!
//! ```text
//! Idle -> Searching -> Matched -> Chatting -> Ended -> Idle
//!           |             |                    |
//!           |             +-> Ended            +-> Searching (new match)
//!           +-> Idle (cancel)
//! ```
//!
//! A match can end before chatting starts; it never reaches `Chatting`
//! once the peer has gone.
//!
//! Legal moves live in [`TRANSITIONS`]. Anything not listed is rejected
//! with [`MatchError::IllegalTransition`] and leaves the session untouched,
//! which is also how late events (a match answering a cancelled search) are
//! discarded.

use std::fmt;
use std::time::Duration;

use chat_types::{TransientMessage, User, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// How long the "matched" screen shows before chatting starts.
pub const MATCH_DISPLAY_DELAY: Duration = Duration::from_secs(2);

/// Matchmaking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchStatus {
    /// Not taking part.
    #[default]
    Idle,
    /// In the server's matching pool.
    Searching,
    /// Paired; showing the match before chatting.
    Matched,
    /// Talking to the peer.
    Chatting,
    /// Session over; messages still visible until exit.
    Ended,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Matched => "matched",
            Self::Chatting => "chatting",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTrigger {
    /// User asked for a match.
    RequestMatch,
    /// User cancelled the search.
    Cancel,
    /// Server found a peer.
    PeerFound,
    /// The match display delay elapsed.
    DisplayElapsed,
    /// User ended the session.
    LocalEnd,
    /// Peer or server ended the session.
    RemoteEnd,
    /// The connection dropped mid-session.
    ConnectionLost,
    /// User left the ended session.
    Exit,
}

/// Every legal `(from, trigger, to)` move.
pub const TRANSITIONS: &[(MatchStatus, MatchTrigger, MatchStatus)] = &[
    (MatchStatus::Idle, MatchTrigger::RequestMatch, MatchStatus::Searching),
    (MatchStatus::Searching, MatchTrigger::Cancel, MatchStatus::Idle),
    (MatchStatus::Searching, MatchTrigger::PeerFound, MatchStatus::Matched),
    (MatchStatus::Matched, MatchTrigger::DisplayElapsed, MatchStatus::Chatting),
    (MatchStatus::Matched, MatchTrigger::LocalEnd, MatchStatus::Ended),
    (MatchStatus::Matched, MatchTrigger::RemoteEnd, MatchStatus::Ended),
    (MatchStatus::Matched, MatchTrigger::ConnectionLost, MatchStatus::Ended),
    (MatchStatus::Chatting, MatchTrigger::LocalEnd, MatchStatus::Ended),
    (MatchStatus::Chatting, MatchTrigger::RemoteEnd, MatchStatus::Ended),
    (MatchStatus::Chatting, MatchTrigger::ConnectionLost, MatchStatus::Ended),
    (MatchStatus::Ended, MatchTrigger::Exit, MatchStatus::Idle),
    (MatchStatus::Ended, MatchTrigger::RequestMatch, MatchStatus::Searching),
];

/// Look up the target of a move, if it is legal.
pub fn next_status(from: MatchStatus, trigger: MatchTrigger) -> Option<MatchStatus> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|(_, _, to)| *to)
}

/// Errors from the matchmaking state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The trigger is not legal in the current status.
    #[error("illegal transition: {trigger:?} while {from}")]
    IllegalTransition {
        /// Status at the time.
        from: MatchStatus,
        /// Rejected trigger.
        trigger: MatchTrigger,
    },
}

/// Input to [`MatchSession::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// User asked for a match.
    RequestMatch,
    /// User cancelled the search.
    Cancel,
    /// Server paired us (`randomTalkMatched`).
    PeerFound(User),
    /// The display timer fired.
    DisplayElapsed,
    /// User ended the session.
    LocalEnd,
    /// Server reported the end (`randomTalkEnded`).
    RemoteEnd {
        /// Who ended it.
        ended_by: Option<UserId>,
        /// Why.
        reason: Option<String>,
    },
    /// The connection dropped.
    ConnectionLost,
    /// User left the ended session.
    Exit,
}

impl MatchEvent {
    /// The table trigger for this event.
    pub fn trigger(&self) -> MatchTrigger {
        match self {
            Self::RequestMatch => MatchTrigger::RequestMatch,
            Self::Cancel => MatchTrigger::Cancel,
            Self::PeerFound(_) => MatchTrigger::PeerFound,
            Self::DisplayElapsed => MatchTrigger::DisplayElapsed,
            Self::LocalEnd => MatchTrigger::LocalEnd,
            Self::RemoteEnd { .. } => MatchTrigger::RemoteEnd,
            Self::ConnectionLost => MatchTrigger::ConnectionLost,
            Self::Exit => MatchTrigger::Exit,
        }
    }
}

/// Side effects of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchAction {
    /// Emit `findRandomTalk`.
    FindMatch,
    /// Emit `cancelRandomTalk`.
    CancelSearch,
    /// Emit `endRandomTalk` naming the partner.
    EndSession {
        /// The matched peer.
        partner: UserId,
    },
    /// Arm the display timer.
    ArmDisplayTimer {
        /// Delay before chatting starts.
        delay: Duration,
    },
}

/// Who ended a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndedBy {
    /// The local user.
    Me,
    /// The peer or the server.
    Peer(Option<UserId>),
    /// The connection dropped.
    Connection,
}

/// How the last session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndInfo {
    /// Who ended it.
    pub ended_by: EndedBy,
    /// Reason given by the server.
    pub reason: Option<String>,
}

/// The random-talk session. Never persisted; `Exit` discards everything.
#[derive(Debug, Clone)]
pub struct MatchSession {
    status: MatchStatus,
    matched_user: Option<User>,
    transient_messages: Vec<TransientMessage>,
    peer_typing: bool,
    ended: Option<EndInfo>,
    display_delay: Duration,
}

impl MatchSession {
    /// Create an idle session.
    pub fn new() -> Self {
        Self::with_display_delay(MATCH_DISPLAY_DELAY)
    }

    /// Create an idle session with a custom match display delay.
    pub fn with_display_delay(display_delay: Duration) -> Self {
        Self {
            status: MatchStatus::Idle,
            matched_user: None,
            transient_messages: Vec::new(),
            peer_typing: false,
            ended: None,
            display_delay,
        }
    }

    /// Current status.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// The matched peer, from `Matched` until exit or a new search.
    pub fn matched_user(&self) -> Option<&User> {
        self.matched_user.as_ref()
    }

    /// Messages of the current session.
    pub fn transient_messages(&self) -> &[TransientMessage] {
        &self.transient_messages
    }

    /// Whether the peer is typing.
    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    /// How the last session ended.
    pub fn ended(&self) -> Option<&EndInfo> {
        self.ended.as_ref()
    }

    /// Apply a transition event.
    ///
    /// On error the session is unchanged.
    pub fn apply(&mut self, event: MatchEvent) -> Result<Vec<MatchAction>, MatchError> {
        let trigger = event.trigger();
        let to = next_status(self.status, trigger).ok_or(MatchError::IllegalTransition {
            from: self.status,
            trigger,
        })?;

        let actions = match event {
            MatchEvent::RequestMatch => {
                self.matched_user = None;
                self.ended = None;
                self.peer_typing = false;
                vec![MatchAction::FindMatch]
            }
            MatchEvent::Cancel => vec![MatchAction::CancelSearch],
            MatchEvent::PeerFound(user) => {
                self.matched_user = Some(user);
                vec![MatchAction::ArmDisplayTimer {
                    delay: self.display_delay,
                }]
            }
            MatchEvent::DisplayElapsed => {
                self.transient_messages.clear();
                Vec::new()
            }
            MatchEvent::LocalEnd => {
                self.end(EndedBy::Me, None);
                self.matched_user
                    .as_ref()
                    .map(|peer| MatchAction::EndSession {
                        partner: peer.id.clone(),
                    })
                    .into_iter()
                    .collect()
            }
            MatchEvent::RemoteEnd { ended_by, reason } => {
                self.end(EndedBy::Peer(ended_by), reason);
                Vec::new()
            }
            MatchEvent::ConnectionLost => {
                self.end(EndedBy::Connection, None);
                Vec::new()
            }
            MatchEvent::Exit => {
                *self = Self::with_display_delay(self.display_delay);
                Vec::new()
            }
        };
        self.status = to;
        Ok(actions)
    }

    /// Record a message from the peer. Ignored unless chatting.
    pub fn on_peer_message(&mut self, sender: User, body: String, at: DateTime<Utc>) -> bool {
        if self.status != MatchStatus::Chatting {
            return false;
        }
        self.peer_typing = false;
        self.transient_messages.push(TransientMessage { sender, body, at });
        true
    }

    /// Record the peer's typing state. Ignored unless chatting.
    pub fn on_peer_typing(&mut self, is_typing: bool) -> bool {
        if self.status != MatchStatus::Chatting {
            return false;
        }
        self.peer_typing = is_typing;
        true
    }

    /// Append a local message and return the peer to send it to.
    ///
    /// Returns `None` unless chatting.
    pub fn send(&mut self, me: &User, body: String, at: DateTime<Utc>) -> Option<UserId> {
        if self.status != MatchStatus::Chatting {
            return None;
        }
        let peer = self.matched_user.as_ref()?.id.clone();
        self.transient_messages.push(TransientMessage {
            sender: me.clone(),
            body,
            at,
        });
        Some(peer)
    }

    /// Actions to repeat after a reconnect.
    ///
    /// The server drops its matching pool entry with the connection, so a
    /// search still in progress is requested again. Not a transition.
    pub fn on_reconnected(&self) -> Vec<MatchAction> {
        match self.status {
            MatchStatus::Searching => vec![MatchAction::FindMatch],
            _ => Vec::new(),
        }
    }

    /// Whether a dropped connection ends the current session.
    pub fn ends_on_connection_loss(&self) -> bool {
        next_status(self.status, MatchTrigger::ConnectionLost).is_some()
    }

    /// The peer to address typing signals to, while chatting.
    pub fn chat_peer(&self) -> Option<&UserId> {
        match self.status {
            MatchStatus::Chatting => self.matched_user.as_ref().map(|u| &u.id),
            _ => None,
        }
    }

    fn end(&mut self, ended_by: EndedBy, reason: Option<String>) {
        self.peer_typing = false;
        self.ended = Some(EndInfo { ended_by, reason });
    }
}

impl Default for MatchSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [MatchStatus; 5] = [
        MatchStatus::Idle,
        MatchStatus::Searching,
        MatchStatus::Matched,
        MatchStatus::Chatting,
        MatchStatus::Ended,
    ];

    fn peer() -> User {
        User::new("u9", "Stranger")
    }

    fn me() -> User {
        User::new("u1", "Alice")
    }

    fn all_events() -> Vec<MatchEvent> {
        vec![
            MatchEvent::RequestMatch,
            MatchEvent::Cancel,
            MatchEvent::PeerFound(peer()),
            MatchEvent::DisplayElapsed,
            MatchEvent::LocalEnd,
            MatchEvent::RemoteEnd {
                ended_by: None,
                reason: None,
            },
            MatchEvent::ConnectionLost,
            MatchEvent::Exit,
        ]
    }

    /// Drive a fresh session into `status` through legal moves.
    fn session_in(status: MatchStatus) -> MatchSession {
        let mut session = MatchSession::new();
        let path = match status {
            MatchStatus::Idle => vec![],
            MatchStatus::Searching => vec![MatchEvent::RequestMatch],
            MatchStatus::Matched => vec![MatchEvent::RequestMatch, MatchEvent::PeerFound(peer())],
            MatchStatus::Chatting => vec![
                MatchEvent::RequestMatch,
                MatchEvent::PeerFound(peer()),
                MatchEvent::DisplayElapsed,
            ],
            MatchStatus::Ended => vec![
                MatchEvent::RequestMatch,
                MatchEvent::PeerFound(peer()),
                MatchEvent::DisplayElapsed,
                MatchEvent::LocalEnd,
            ],
        };
        for event in path {
            session.apply(event).unwrap();
        }
        assert_eq!(session.status(), status);
        session
    }

    #[test]
    fn events_outside_the_table_leave_status_unchanged() {
        for from in ALL_STATUSES {
            for event in all_events() {
                let mut session = session_in(from);
                let legal = next_status(from, event.trigger());
                let result = session.apply(event.clone());

                match legal {
                    Some(to) => {
                        assert!(result.is_ok(), "{from} + {event:?}");
                        assert_eq!(session.status(), to);
                    }
                    None => {
                        assert!(
                            matches!(result, Err(MatchError::IllegalTransition { .. })),
                            "{from} + {event:?}"
                        );
                        assert_eq!(session.status(), from);
                    }
                }
            }
        }
    }

    #[test]
    fn idle_cannot_jump_to_chatting() {
        let mut session = MatchSession::new();
        assert!(session.apply(MatchEvent::DisplayElapsed).is_err());
        assert_eq!(session.status(), MatchStatus::Idle);
    }

    #[test]
    fn scenario_c_match_then_chatting_after_delay() {
        let mut session = MatchSession::new();

        let actions = session.apply(MatchEvent::RequestMatch).unwrap();
        assert_eq!(actions, vec![MatchAction::FindMatch]);
        assert_eq!(session.status(), MatchStatus::Searching);

        let actions = session.apply(MatchEvent::PeerFound(peer())).unwrap();
        assert_eq!(session.status(), MatchStatus::Matched);
        assert_eq!(session.matched_user().unwrap().id, UserId::new("u9"));
        assert_eq!(
            actions,
            vec![MatchAction::ArmDisplayTimer {
                delay: MATCH_DISPLAY_DELAY
            }]
        );

        session.apply(MatchEvent::DisplayElapsed).unwrap();
        assert_eq!(session.status(), MatchStatus::Chatting);
    }

    #[test]
    fn scenario_d_cancel_then_stale_match_is_ignored() {
        let mut session = session_in(MatchStatus::Searching);

        let actions = session.apply(MatchEvent::Cancel).unwrap();
        assert_eq!(actions, vec![MatchAction::CancelSearch]);
        assert_eq!(session.status(), MatchStatus::Idle);

        assert!(session.apply(MatchEvent::PeerFound(peer())).is_err());
        assert_eq!(session.status(), MatchStatus::Idle);
        assert!(session.matched_user().is_none());
    }

    #[test]
    fn entering_chatting_clears_leftovers() {
        let mut session = session_in(MatchStatus::Chatting);
        session.send(&me(), "first".into(), Utc::now());
        session.apply(MatchEvent::LocalEnd).unwrap();
        assert_eq!(session.transient_messages().len(), 1);

        session.apply(MatchEvent::RequestMatch).unwrap();
        session.apply(MatchEvent::PeerFound(peer())).unwrap();
        session.apply(MatchEvent::DisplayElapsed).unwrap();
        assert!(session.transient_messages().is_empty());
    }

    #[test]
    fn local_end_names_partner() {
        let mut session = session_in(MatchStatus::Chatting);
        let actions = session.apply(MatchEvent::LocalEnd).unwrap();

        assert_eq!(
            actions,
            vec![MatchAction::EndSession {
                partner: UserId::new("u9")
            }]
        );
        assert_eq!(session.ended().unwrap().ended_by, EndedBy::Me);
    }

    #[test]
    fn remote_end_after_local_end_is_rejected() {
        let mut session = session_in(MatchStatus::Chatting);
        session.apply(MatchEvent::LocalEnd).unwrap();

        let late = session.apply(MatchEvent::RemoteEnd {
            ended_by: Some(UserId::new("u9")),
            reason: None,
        });
        assert!(late.is_err());
        assert_eq!(session.ended().unwrap().ended_by, EndedBy::Me);
    }

    #[test]
    fn messages_only_accepted_while_chatting() {
        let mut session = session_in(MatchStatus::Matched);
        assert!(!session.on_peer_message(peer(), "early".into(), Utc::now()));
        assert!(session.send(&me(), "early".into(), Utc::now()).is_none());
        assert!(!session.on_peer_typing(true));

        session.apply(MatchEvent::DisplayElapsed).unwrap();
        assert!(session.on_peer_typing(true));
        assert!(session.peer_typing());
        assert!(session.on_peer_message(peer(), "hello".into(), Utc::now()));
        assert!(!session.peer_typing());
        assert_eq!(
            session.send(&me(), "hi".into(), Utc::now()),
            Some(UserId::new("u9"))
        );
        assert_eq!(session.transient_messages().len(), 2);
    }

    #[test]
    fn exit_discards_session() {
        let mut session = session_in(MatchStatus::Ended);
        session.apply(MatchEvent::Exit).unwrap();

        assert_eq!(session.status(), MatchStatus::Idle);
        assert!(session.matched_user().is_none());
        assert!(session.ended().is_none());
        assert!(session.transient_messages().is_empty());
    }

    #[test]
    fn connection_loss_ends_chat() {
        let mut session = session_in(MatchStatus::Chatting);
        session.apply(MatchEvent::ConnectionLost).unwrap();
        assert_eq!(session.status(), MatchStatus::Ended);
        assert_eq!(session.ended().unwrap().ended_by, EndedBy::Connection);
    }

    #[test]
    fn peer_leaving_during_display_ends_match() {
        let mut session = session_in(MatchStatus::Matched);
        let actions = session
            .apply(MatchEvent::RemoteEnd {
                ended_by: Some(UserId::new("u9")),
                reason: Some("left".into()),
            })
            .unwrap();

        assert!(actions.is_empty());
        assert_eq!(session.status(), MatchStatus::Ended);
        assert!(session.apply(MatchEvent::DisplayElapsed).is_err());
        assert_eq!(session.status(), MatchStatus::Ended);
    }

    #[test]
    fn local_end_during_display_names_partner() {
        let mut session = session_in(MatchStatus::Matched);
        let actions = session.apply(MatchEvent::LocalEnd).unwrap();
        assert_eq!(
            actions,
            vec![MatchAction::EndSession {
                partner: UserId::new("u9")
            }]
        );
    }

    #[test]
    fn reconnect_repeats_search_only() {
        assert_eq!(
            session_in(MatchStatus::Searching).on_reconnected(),
            vec![MatchAction::FindMatch]
        );
        for status in [
            MatchStatus::Idle,
            MatchStatus::Matched,
            MatchStatus::Chatting,
            MatchStatus::Ended,
        ] {
            assert!(session_in(status).on_reconnected().is_empty(), "{status}");
        }
    }

    #[test]
    fn connection_loss_ends_matched_and_chatting() {
        assert!(!session_in(MatchStatus::Searching).ends_on_connection_loss());
        assert!(session_in(MatchStatus::Matched).ends_on_connection_loss());
        assert!(session_in(MatchStatus::Chatting).ends_on_connection_loss());
        assert!(!session_in(MatchStatus::Ended).ends_on_connection_loss());
    }
}

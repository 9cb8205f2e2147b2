//! Identity types for Parley.
//!
//! Server-assigned identifiers are opaque strings (the relay uses document
//! ids); client-side correlation ids are UUID v4.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! server_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a server-assigned identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

server_id!(
    /// Identifier of a registered user.
    UserId
);

server_id!(
    /// Identifier of a conversation (one-to-one or group chat).
    ConversationId
);

server_id!(
    /// Server-assigned identifier of a persisted message.
    MessageId
);

/// Client-generated identifier for an optimistic message.
///
/// Never sent on the wire; it only ties an acknowledgement back to the
/// pending entry it answers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(uuid::Uuid);

impl LocalId {
    /// Create a new random LocalId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", &self.0.to_string()[..8])
    }
}

/// Correlates an acknowledgement reply with the frame that requested it.
///
/// Allocated by the connection, monotonically increasing per process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AckId(u64);

impl AckId {
    /// Create an AckId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_ids_serialize_as_plain_strings() {
        let id = ConversationId::new("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");

        let back: ConversationId = serde_json::from_str("\"c1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn server_id_debug_names_the_kind() {
        assert_eq!(format!("{:?}", UserId::new("u9")), "UserId(u9)");
        assert_eq!(MessageId::from("m1").to_string(), "m1");
    }

    #[test]
    fn local_id_is_uuid_v4() {
        let id = LocalId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn local_ids_are_unique() {
        assert_ne!(LocalId::new(), LocalId::new());
    }

    #[test]
    fn ack_id_next() {
        assert_eq!(AckId::new(7).next().value(), 8);
        assert!(AckId::new(1) < AckId::new(2));
    }
}

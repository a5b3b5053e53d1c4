use std::fmt;

use uuid::Uuid;

macro_rules! define_chat_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

define_chat_id!(ConversationId);
define_chat_id!(MessageId);

/// Sequence number of one submit within a session.
///
/// Chunks carry no turn id of their own; the controller drops its stream on
/// every turn end, so a stale chunk can never reach the next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v7_ids_are_unique_and_render_as_uuids() {
        let first = MessageId::new_v7();
        let second = MessageId::new_v7();

        assert_ne!(first, second);
        let parsed = Uuid::parse_str(&first.to_string()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! sortable_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Ulid::new().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

sortable_id!(ConversationId, "Identity of a conversation.");
sortable_id!(MessageId, "Identity of a persisted message.");
sortable_id!(UserId, "Identity of the owning/calling user.");
sortable_id!(RunId, "Identity of one workflow execution (a run).");
sortable_id!(AuditId, "Identity of a security audit log entry.");
sortable_id!(AgentProfileId, "Identity of an agent profile.");

#[cfg(test)]
mod tests {
    use super::*;

    const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

    #[test]
    fn ids_are_26_chars_and_sortable_by_time() {
        let a = ConversationId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ConversationId::new();
        assert_eq!(a.as_str().len(), 26);
        assert_eq!(b.as_str().len(), 26);
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn ids_use_crockford_alphabet_only() {
        let id = MessageId::new();
        assert!(id
            .as_str()
            .bytes()
            .all(|b| CROCKFORD.contains(&b.to_ascii_uppercase())));
    }
}

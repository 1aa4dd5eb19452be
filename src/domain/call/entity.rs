//! Call entities

use crate::domain::call::value_object::CallRole;
use crate::domain::shared::value_objects::UserId;
use serde::{Deserialize, Serialize};

/// The two parties of one call attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    caller: UserId,
    callee: UserId,
}

impl Participants {
    pub fn new(caller: UserId, callee: UserId) -> Self {
        Self { caller, callee }
    }

    pub fn caller(&self) -> &UserId {
        &self.caller
    }

    pub fn callee(&self) -> &UserId {
        &self.callee
    }

    pub fn role_of(&self, uid: &UserId) -> Option<CallRole> {
        if uid == &self.caller {
            Some(CallRole::Caller)
        } else if uid == &self.callee {
            Some(CallRole::Callee)
        } else {
            None
        }
    }

    /// The party on the other end from `role`
    pub fn peer_of(&self, role: CallRole) -> &UserId {
        match role {
            CallRole::Caller => &self.callee,
            CallRole::Callee => &self.caller,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        let parties = Participants::new("u1".into(), "u2".into());

        assert_eq!(parties.role_of(&"u1".into()), Some(CallRole::Caller));
        assert_eq!(parties.role_of(&"u2".into()), Some(CallRole::Callee));
        assert_eq!(parties.role_of(&"u3".into()), None);
        assert_eq!(parties.peer_of(CallRole::Caller).as_str(), "u2");
    }
}

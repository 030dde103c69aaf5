//! Many-to-many group channel (spec 3, 4.5).
//!
//! Groups have no direct teacher analogue (the teacher is 1:1-only), so this
//! module is grounded in the pack's multi-party precedent instead:
//! `q`-style membership state machines (`tari-project-tari`'s
//! `comms-dht` group membership bookkeeping) and the spec's own explicit
//! state machine in 4.5.

use crate::types::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    Invited,
    Member,
    FormerMember,
    Owner,
}

/// Group Symmetric Key: the active 32-byte key shared among current members,
/// plus the id used to name it in per-member DHT capsules (spec 4.3, 4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSymmetricKey {
    pub gsk_id: Uuid,
    pub key: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub creator: Fingerprint,
    pub members: Vec<Fingerprint>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub active_gsk: GroupSymmetricKey,
    /// Expires 7 days after the creator's last liveness proof (spec 3).
    pub ownership_expires_at: chrono::DateTime<chrono::Utc>,
}

impl Group {
    pub const OWNERSHIP_TOKEN_LIFETIME_SECS: i64 = 7 * 86_400;

    pub fn is_member(&self, fingerprint: &Fingerprint) -> bool {
        self.members.iter().any(|m| m == fingerprint)
    }

    pub fn ownership_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.ownership_expires_at
    }

    pub fn refresh_ownership(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.ownership_expires_at =
            now + chrono::Duration::seconds(Self::OWNERSHIP_TOKEN_LIFETIME_SECS);
    }
}

/// The local identity's membership record for one group: which state it is
/// in, independent of the `Group` record itself (spec 4.5 membership state
/// machine: `invited -> member -> former-member`, `member/owner ->
/// former-member`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: Uuid,
    pub state: MembershipState,
}

impl GroupMembership {
    /// `Invited -> Member` on local accept.
    pub fn accept(&mut self) -> Result<(), &'static str> {
        if self.state != MembershipState::Invited {
            return Err("can only accept from Invited");
        }
        self.state = MembershipState::Member;
        Ok(())
    }

    /// `Member`/`Owner -> FormerMember` on local leave or a signed removal
    /// from the current owner.
    pub fn leave_or_remove(&mut self) -> Result<(), &'static str> {
        match self.state {
            MembershipState::Member | MembershipState::Owner => {
                self.state = MembershipState::FormerMember;
                Ok(())
            }
            _ => Err("not currently a member or owner"),
        }
    }

    /// Ownership transfer: requires a signed proof from the outgoing owner
    /// and a fresh liveness proof, both verified by the caller before this
    /// state transition is applied.
    pub fn accept_ownership_transfer(&mut self) -> Result<(), &'static str> {
        if self.state != MembershipState::Member {
            return Err("only a current member can become owner");
        }
        self.state = MembershipState::Owner;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(state: MembershipState) -> GroupMembership {
        GroupMembership {
            group_id: Uuid::nil(),
            state,
        }
    }

    #[test]
    fn invited_to_member_on_accept() {
        let mut m = membership(MembershipState::Invited);
        m.accept().unwrap();
        assert_eq!(m.state, MembershipState::Member);
    }

    #[test]
    fn cannot_accept_twice() {
        let mut m = membership(MembershipState::Member);
        assert!(m.accept().is_err());
    }

    #[test]
    fn member_to_former_member_on_leave() {
        let mut m = membership(MembershipState::Member);
        m.leave_or_remove().unwrap();
        assert_eq!(m.state, MembershipState::FormerMember);
    }

    #[test]
    fn owner_to_former_member_on_remove() {
        let mut m = membership(MembershipState::Owner);
        m.leave_or_remove().unwrap();
        assert_eq!(m.state, MembershipState::FormerMember);
    }
}

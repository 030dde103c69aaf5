//! Local group roster and membership-state persistence (spec 3, 4.5).
//!
//! Same flat file shape as [`super::contacts_store`]; kept as its own file
//! under `<fingerprint>/cache/groups.db` since group state (unlike
//! messages/contacts) is itself a cache of what the DHT's `GroupMetaRecord`
//! says, re-synchronized on each poll rather than being this identity's own
//! authoritative record.

use super::error::{StorageError, StorageResult};
use crate::types::{Group, GroupMembership, MembershipState};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct GroupsFile {
    groups: Vec<Group>,
    memberships: Vec<GroupMembership>,
}

pub struct GroupStore {
    path: PathBuf,
    inner: Mutex<GroupsFile>,
}

impl GroupStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let inner = if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.is_empty() {
                GroupsFile::default()
            } else {
                bincode::deserialize(&bytes).map_err(|e| StorageError::Parse(e.to_string()))?
            }
        } else {
            GroupsFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    fn persist(&self, guard: &GroupsFile) -> StorageResult<()> {
        let serialized = bincode::serialize(guard).map_err(|e| StorageError::Parse(e.to_string()))?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    pub fn upsert_group(&self, group: Group) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(existing) = guard.groups.iter_mut().find(|g| g.id == group.id) {
            *existing = group;
        } else {
            guard.groups.push(group);
        }
        self.persist(&guard)
    }

    pub fn get_group(&self, id: &Uuid) -> Option<Group> {
        self.inner.lock().unwrap().groups.iter().find(|g| &g.id == id).cloned()
    }

    pub fn set_membership(&self, membership: GroupMembership) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(existing) = guard
            .memberships
            .iter_mut()
            .find(|m| m.group_id == membership.group_id)
        {
            *existing = membership;
        } else {
            guard.memberships.push(membership);
        }
        self.persist(&guard)
    }

    /// Drop a membership row entirely, used when rejecting an invitation
    /// (spec 6's `reject_invitation`, which has no corresponding persisted
    /// state since the identity never joined).
    pub fn remove_membership(&self, group_id: &Uuid) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let before = guard.memberships.len();
        guard.memberships.retain(|m| &m.group_id != group_id);
        if guard.memberships.len() == before {
            return Err(StorageError::NotFound);
        }
        self.persist(&guard)
    }

    pub fn get_membership(&self, group_id: &Uuid) -> Option<GroupMembership> {
        self.inner
            .lock()
            .unwrap()
            .memberships
            .iter()
            .find(|m| &m.group_id == group_id)
            .cloned()
    }

    /// Every group for which this identity currently holds any membership
    /// state at or above `Invited` (spec 4.5's membership state machine).
    pub fn memberships_in_state(&self, state: MembershipState) -> Vec<GroupMembership> {
        self.inner
            .lock()
            .unwrap()
            .memberships
            .iter()
            .filter(|m| m.state == state)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupSymmetricKey;

    fn sample_group(id: Uuid) -> Group {
        Group {
            id,
            name: "friends".into(),
            creator: crate::types::Fingerprint::parse(&hex::encode([1u8; 64])).unwrap(),
            members: vec![],
            created_at: chrono::Utc::now(),
            active_gsk: GroupSymmetricKey {
                gsk_id: Uuid::nil(),
                key: [0u8; 32],
            },
            ownership_expires_at: chrono::Utc::now() + chrono::Duration::days(7),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::open(&dir.path().join("groups.db")).unwrap();
        let id = Uuid::nil();
        store.upsert_group(sample_group(id)).unwrap();
        assert!(store.get_group(&id).is_some());
    }

    #[test]
    fn membership_state_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::open(&dir.path().join("groups.db")).unwrap();
        let id = Uuid::nil();
        store
            .set_membership(GroupMembership {
                group_id: id,
                state: MembershipState::Invited,
            })
            .unwrap();
        assert_eq!(store.memberships_in_state(MembershipState::Invited).len(), 1);
        assert_eq!(store.memberships_in_state(MembershipState::Member).len(), 0);
    }

    #[test]
    fn remove_membership_drops_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::open(&dir.path().join("groups.db")).unwrap();
        let id = Uuid::nil();
        store
            .set_membership(GroupMembership {
                group_id: id,
                state: MembershipState::Invited,
            })
            .unwrap();
        store.remove_membership(&id).unwrap();
        assert!(store.get_membership(&id).is_none());
        assert!(store.remove_membership(&id).is_err());
    }
}

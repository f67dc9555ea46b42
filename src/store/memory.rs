//! In-memory stores: a credential store for tests and embedding, and the
//! contact roster kept for the lifetime of a login.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::store::{CredentialStore, PersistedSession, StoreError, StoreResult};
use crate::types::Contact;

/// In-memory implementation of [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    snapshot: RwLock<Option<PersistedSession>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a snapshot.
    pub fn with_snapshot(snapshot: PersistedSession) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
        }
    }

    /// The stored snapshot, valid or not.
    pub fn raw(&self) -> Option<PersistedSession> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, snapshot: &PersistedSession) -> StoreResult<()> {
        let mut slot = self.snapshot.write().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Option<PersistedSession> {
        self.raw().filter(|s| s.validate().is_ok())
    }

    fn invalidate(&self) -> StoreResult<()> {
        let mut slot = self.snapshot.write().map_err(|_| StoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}

/// Contacts and group member lists known for the current login.
#[derive(Debug, Default)]
pub struct Roster {
    contacts: RwLock<HashMap<String, Contact>>,
    groups: RwLock<HashMap<String, Contact>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole contact table. Group chats in the list are moved to the group table.
    pub fn replace_contacts(&self, contacts: Vec<Contact>) {
        let (groups, people): (Vec<_>, Vec<_>) = contacts.into_iter().partition(Contact::is_group);
        *write(&self.contacts) = people
            .into_iter()
            .map(|c| (c.user_name.clone(), c))
            .collect();
        for group in groups {
            self.put_group(group);
        }
    }

    /// Insert or replace a single contact.
    pub fn upsert_contact(&self, contact: Contact) {
        if contact.is_group() {
            self.put_group(contact);
        } else {
            write(&self.contacts).insert(contact.user_name.clone(), contact);
        }
    }

    /// Forget a contact or group.
    pub fn remove_contact(&self, user_name: &str) -> Option<Contact> {
        write(&self.contacts)
            .remove(user_name)
            .or_else(|| write(&self.groups).remove(user_name))
    }

    /// Store a group record. An empty member list never overwrites a known one.
    pub fn put_group(&self, mut group: Contact) {
        let mut groups = write(&self.groups);
        if group.member_list.is_empty() {
            if let Some(known) = groups.get(&group.user_name) {
                group.member_list = known.member_list.clone();
            }
        }
        groups.insert(group.user_name.clone(), group);
    }

    /// Returns true if the group's member list has been fetched.
    pub fn has_group_members(&self, group: &str) -> bool {
        read(&self.groups)
            .get(group)
            .map(|g| !g.member_list.is_empty())
            .unwrap_or(false)
    }

    /// Members of a known group.
    pub fn group_members(&self, group: &str) -> Option<Vec<Contact>> {
        read(&self.groups).get(group).map(|g| g.member_list.clone())
    }

    /// Look up a contact by user name: contacts first, then groups, then group members.
    pub fn contact(&self, user_name: &str) -> Option<Contact> {
        if let Some(contact) = read(&self.contacts).get(user_name) {
            return Some(contact.clone());
        }
        let groups = read(&self.groups);
        if let Some(group) = groups.get(user_name) {
            return Some(group.clone());
        }
        groups
            .values()
            .flat_map(|g| g.member_list.iter())
            .find(|m| m.user_name == user_name)
            .cloned()
    }

    /// Number of known contacts and groups.
    pub fn len(&self) -> usize {
        read(&self.contacts).len() + read(&self.groups).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything.
    pub fn clear(&self) {
        write(&self.contacts).clear();
        write(&self.groups).clear();
    }
}

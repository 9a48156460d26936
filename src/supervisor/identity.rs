//! Agent identity map.
//!
//! Each live unit has exactly one lookup key: its initial handle until it is
//! re-keyed, then its final handle. Both names keep resolving to the unit
//! through [`IdentityMap::find_unit`].

use botfleet_agent::UnitId;
use botfleet_core::AgentHandle;
use std::collections::HashMap;

#[derive(Debug)]
pub struct Entry<L> {
    pub id: UnitId,
    pub initial: AgentHandle,
    pub final_handle: Option<AgentHandle>,
    pub auth_flow: bool,
    /// Spawn order among all entries ever registered.
    pub seq: u64,
    pub status: String,
    pub link: L,
}

impl<L> Entry<L> {
    /// Final handle when known, otherwise the initial one.
    pub fn display_name(&self) -> &AgentHandle {
        self.final_handle.as_ref().unwrap_or(&self.initial)
    }

    fn answers_to(&self, name: &str) -> bool {
        self.initial.as_str() == name
            || self.final_handle.as_ref().is_some_and(|f| f.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("{0} already has a live unit")]
    KeyTaken(AgentHandle),
    #[error("{0} is not registered")]
    UnknownUnit(UnitId),
}

#[derive(Debug)]
pub struct IdentityMap<L> {
    keys: HashMap<AgentHandle, UnitId>,
    entries: HashMap<UnitId, Entry<L>>,
    next_seq: u64,
}

impl<L> Default for IdentityMap<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> IdentityMap<L> {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// True if `handle` is a current key or the initial handle of a live
    /// unit that has since been re-keyed.
    pub fn is_live(&self, handle: &str) -> bool {
        self.contains_key(handle) || self.entries.values().any(|e| e.initial.as_str() == handle)
    }

    pub fn register(
        &mut self,
        key: AgentHandle,
        id: UnitId,
        auth_flow: bool,
        link: L,
    ) -> Result<(), IdentityError> {
        if self.keys.contains_key(&key) {
            return Err(IdentityError::KeyTaken(key));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.keys.insert(key.clone(), id);
        self.entries.insert(
            id,
            Entry {
                id,
                initial: key,
                final_handle: None,
                auth_flow,
                seq,
                status: "Connecting".into(),
                link,
            },
        );
        Ok(())
    }

    pub fn set_final(&mut self, id: UnitId, final_handle: AgentHandle) -> Result<(), IdentityError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(IdentityError::UnknownUnit(id))?;
        entry.final_handle = Some(final_handle);
        Ok(())
    }

    /// Move `id` to `new_key`. Either both the insert and the removal happen
    /// or neither does.
    pub fn rekey(&mut self, id: UnitId, new_key: AgentHandle) -> Result<(), IdentityError> {
        let old_key = self.key_of(id).cloned().ok_or(IdentityError::UnknownUnit(id))?;
        if old_key == new_key {
            return Ok(());
        }
        if self.keys.contains_key(&new_key) {
            return Err(IdentityError::KeyTaken(new_key));
        }
        self.keys.insert(new_key, id);
        self.keys.remove(&old_key);
        Ok(())
    }

    pub fn remove(&mut self, id: UnitId) -> Option<Entry<L>> {
        let entry = self.entries.remove(&id)?;
        self.keys.retain(|_, v| *v != id);
        Some(entry)
    }

    /// Strict lookup by current key.
    pub fn lookup(&self, key: &str) -> Option<&Entry<L>> {
        self.keys.get(key).and_then(|id| self.entries.get(id))
    }

    /// Resolve by current key, then by either name the unit has had.
    pub fn find_unit(&self, name: &str) -> Option<&Entry<L>> {
        self.lookup(name)
            .or_else(|| self.entries.values().find(|e| e.answers_to(name)))
    }

    pub fn key_of(&self, id: UnitId) -> Option<&AgentHandle> {
        self.keys.iter().find(|(_, v)| **v == id).map(|(k, _)| k)
    }

    pub fn get(&self, id: UnitId) -> Option<&Entry<L>> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Entry<L>> {
        self.entries.get_mut(&id)
    }

    /// Live entries in spawn order.
    pub fn in_order(&self) -> Vec<&Entry<L>> {
        let mut out: Vec<_> = self.entries.values().collect();
        out.sort_by_key(|e| e.seq);
        out
    }

    pub fn drain(&mut self) -> Vec<Entry<L>> {
        self.keys.clear();
        let mut out: Vec<_> = self.entries.drain().map(|(_, e)| e).collect();
        out.sort_by_key(|e| e.seq);
        out
    }
}

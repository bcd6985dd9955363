use crate::error::ChatError;
use crate::protocol::NAME_CAPACITY;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Name stored for a `Register` whose requested name is blank.
pub const ANONYMOUS_NAME: &str = "Anon";

/// Stable identity of one accepted connection, generated by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnKey(u64);

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Maps live connections to their transport handle and optional display name.
///
/// Display names are not unique: two connections may carry the same name.
/// Only the [`ConnKey`] identifies a connection.
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    next_key: u64,
    handles: BTreeMap<ConnKey, H>,
    names: HashMap<ConnKey, String>,
}

impl<H: Copy> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            next_key: 1,
            handles: BTreeMap::new(),
            names: HashMap::new(),
        }
    }

    /// Allocates a key for a freshly accepted connection. Keys are never reused.
    pub fn accept(&mut self, handle: H) -> ConnKey {
        let key = ConnKey(self.next_key);
        self.next_key += 1;
        self.handles.insert(key, handle);
        key
    }

    /// Records the requested name, replacing any earlier one. Always succeeds.
    ///
    /// A blank request is stored as [`ANONYMOUS_NAME`]. Returns the effective
    /// name; for a key that is not live nothing is stored.
    pub fn register(&mut self, key: ConnKey, requested: &str) -> String {
        let trimmed = requested.trim();
        let effective = if trimmed.is_empty() {
            ANONYMOUS_NAME.to_string()
        } else {
            trimmed.to_string()
        };
        if self.handles.contains_key(&key) {
            self.names.insert(key, effective.clone());
        } else {
            warn!("Ignoring register for {}, which is not live", key);
        }
        effective
    }

    /// Replaces the name for `key`, returning the previous name (if any) and the new one.
    ///
    /// An empty or oversized name, or a key that is not live, is rejected and
    /// the registry is left untouched.
    pub fn rename(
        &mut self,
        key: ConnKey,
        new_name: &str,
    ) -> Result<(Option<String>, String), ChatError> {
        if !self.handles.contains_key(&key) {
            return Err(ChatError::UnknownKey(key));
        }
        validate_name(new_name)?;
        let old = self.names.insert(key, new_name.to_string());
        Ok((old, new_name.to_string()))
    }

    /// Forgets `key`. Removing an unknown key is a no-op returning `None`.
    pub fn remove(&mut self, key: ConnKey) -> Option<String> {
        self.handles.remove(&key);
        self.names.remove(&key)
    }

    pub fn name_of(&self, key: ConnKey) -> Option<&str> {
        self.names.get(&key).map(String::as_str)
    }

    pub fn handle_of(&self, key: ConnKey) -> Option<H> {
        self.handles.get(&key).copied()
    }

    /// Names of every registered connection, in key (acceptance) order.
    pub fn all_names(&self) -> Vec<String> {
        self.handles
            .keys()
            .filter_map(|key| self.names.get(key).cloned())
            .collect()
    }

    /// Every accepted connection with its transport handle, in key order.
    pub fn all_connections(&self) -> Vec<(ConnKey, H)> {
        self.handles.iter().map(|(k, h)| (*k, *h)).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<H: Copy> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_name(name: &str) -> Result<(), ChatError> {
    if name.is_empty() {
        return Err(ChatError::InvalidName("name is empty".to_string()));
    }
    if name.len() > NAME_CAPACITY {
        return Err(ChatError::InvalidName(format!(
            "name is {} bytes, at most {} allowed",
            name.len(),
            NAME_CAPACITY
        )));
    }
    Ok(())
}

/// Ordered slots of accepted connections.
///
/// Removing a connection leaves a tombstone in its slot so indices held
/// during iteration stay valid; [`ConnectionSet::compact`] reclaims them
/// once nobody is iterating.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    slots: Vec<Option<ConnKey>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: ConnKey) {
        self.slots.push(Some(key));
    }

    /// Tombstones the slot holding `key`. Returns whether it was live.
    pub fn tombstone(&mut self, key: ConnKey) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(key)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Number of slots, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The live key at `index`, or `None` for tombstones and out-of-range indices.
    pub fn get(&self, index: usize) -> Option<ConnKey> {
        self.slots.get(index).copied().flatten()
    }

    pub fn live(&self) -> impl Iterator<Item = ConnKey> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn compact(&mut self) {
        self.slots.retain(Option::is_some);
    }
}

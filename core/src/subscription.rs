//! Subscription registry: path-scoped and wildcard listeners per provider.
//!
//! Path-scoped listeners are keyed by the canonical form of the path they
//! subscribed to, so `/a/b` and `/A / b?` share one slot. Within a slot,
//! and among wildcard listeners, callbacks run in registration order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::binding::SourceValue;
use crate::store::StoreState;


/// Unique id of one registration. Ids are never reused within a store.
pub type SubscriptionId = u64;

/// Path-scoped listener: `(value, subscribed_path, changed_path)`.
pub type PathCallback = Rc<dyn Fn(Option<SourceValue>, &str, &str)>;

/// Wildcard listener: `(value, changed_path)`.
pub type AllCallback = Rc<dyn Fn(Option<SourceValue>, &str)>;


#[derive(Default)]
struct SubscriberTable {
    paths: IndexMap<String, Vec<(SubscriptionId, PathCallback)>>,
    all: Vec<(SubscriptionId, AllCallback)>,
}


/// All listeners of a store, grouped by provider name.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    tables: HashMap<String, SubscriberTable>,
    next_id: SubscriptionId,
}

impl SubscriberRegistry {
    pub(crate) fn add_path(
        &mut self,
        provider: &str,
        path_key: String,
        callback: PathCallback,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.tables
            .entry(provider.to_string())
            .or_default()
            .paths
            .entry(path_key)
            .or_default()
            .push((id, callback));
        id
    }

    pub(crate) fn add_all(&mut self, provider: &str, callback: AllCallback) -> SubscriptionId {
        let id = self.allocate_id();
        self.tables
            .entry(provider.to_string())
            .or_default()
            .all
            .push((id, callback));
        id
    }

    /// Remove exactly one registration. Returns `false` if it was already gone.
    pub(crate) fn remove(&mut self, provider: &str, id: SubscriptionId) -> bool {
        let Some(table) = self.tables.get_mut(provider) else {
            return false;
        };

        let before = table.all.len();
        table.all.retain(|(existing, _)| *existing != id);
        if table.all.len() != before {
            return true;
        }

        let mut emptied = None;
        let mut removed = false;
        for (path, listeners) in table.paths.iter_mut() {
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            if listeners.len() != before {
                removed = true;
                if listeners.is_empty() {
                    emptied = Some(path.clone());
                }
                break;
            }
        }
        if let Some(path) = emptied {
            table.paths.shift_remove(&path);
        }
        removed
    }

    /// Listeners registered at exactly `path_key`.
    pub(crate) fn listeners_at(&self, provider: &str, path_key: &str) -> Vec<PathCallback> {
        self.tables
            .get(provider)
            .and_then(|table| table.paths.get(path_key))
            .map(|listeners| listeners.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    /// Every path-scoped listener of a provider with its subscribed path.
    pub(crate) fn path_listeners(&self, provider: &str) -> Vec<(String, PathCallback)> {
        let Some(table) = self.tables.get(provider) else {
            return Vec::new();
        };
        table
            .paths
            .iter()
            .flat_map(|(path, listeners)| {
                listeners.iter().map(move |(_, cb)| (path.clone(), cb.clone()))
            })
            .collect()
    }

    pub(crate) fn all_listeners(&self, provider: &str) -> Vec<AllCallback> {
        self.tables
            .get(provider)
            .map(|table| table.all.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live registrations (path-scoped and wildcard) for a provider.
    pub(crate) fn count(&self, provider: &str) -> usize {
        self.tables
            .get(provider)
            .map(|table| {
                table.all.len() + table.paths.values().map(Vec::len).sum::<usize>()
            })
            .unwrap_or(0)
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}


/// Handle returned by `subscribe` / `subscribe_all`.
///
/// Dropping the handle does not unsubscribe; call [`unsubscribe`].
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    provider: String,
    path: Option<String>,
    store: Weak<RefCell<StoreState>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        provider: &str,
        path: Option<String>,
        store: Weak<RefCell<StoreState>>,
    ) -> Self {
        Subscription {
            id,
            provider: provider.to_string(),
            path,
            store,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    /// Canonical subscribed path, or `None` for a wildcard subscription.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Deregister this subscription. Takes effect before the next
    /// notification; calls already on the stack still complete.
    ///
    /// Returns `false` if it was already removed or the store is gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        let removed = store.borrow_mut().subscribers.remove(&self.provider, self.id);
        removed
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

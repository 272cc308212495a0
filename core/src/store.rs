//! Source store: per-provider state and the four provider-driven events.
//!
//! Providers push batches into the store (`sources_changed`,
//! `sources_removed`, `clear_sources`, `remove_sources`). Each batch entry
//! is placed in the provider's raw tree, the affected bindings are rewired,
//! and listeners are notified before the call returns. Readers get
//! [`SourceValue`]s and [`Subscription`]s back; they never see the
//! internal tables.
//!
//! The store is single-threaded. Listeners and write-backs run with no
//! internal borrow held, so they may read from or push new batches into
//! the store re-entrantly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::binding::{Binding, SourceValue, WriteBack};
use crate::key::NormalizedPath;
use crate::provider::ProviderLookup;
use crate::subscription::{AllCallback, PathCallback, SubscriberRegistry, Subscription};
use crate::tree::RawSourceNode;
use crate::view::SourceView;


/// Runtime bundle for one provider that currently has sources.
pub(crate) struct ProviderState {
    tree: RawSourceNode,
    /// Current value per path: a leaf value or the path's binding.
    values: IndexMap<NormalizedPath, SourceValue>,
    write_backs: HashMap<NormalizedPath, WriteBack>,
    /// Paths currently supplied by the provider, in order of first supply.
    supplied: IndexSet<NormalizedPath>,
}

impl ProviderState {
    fn new() -> Self {
        ProviderState {
            tree: RawSourceNode::root(),
            values: IndexMap::new(),
            write_backs: HashMap::new(),
            supplied: IndexSet::new(),
        }
    }

    fn forget(&mut self, path: &NormalizedPath) {
        self.values.shift_remove(path);
        self.write_backs.remove(path);
        self.supplied.shift_remove(path);
    }
}


/// Shared state behind a [`SourceStore`] handle.
#[derive(Default)]
pub(crate) struct StoreState {
    providers: HashMap<String, ProviderState>,
    /// Binding cache per provider. Outlives clear/remove so that a binding
    /// held by a caller is reused when its path reappears.
    bindings: HashMap<String, HashMap<NormalizedPath, Binding>>,
    pub(crate) subscribers: SubscriberRegistry,
    lookup: Option<Weak<dyn ProviderLookup>>,
}

impl StoreState {
    pub(crate) fn value_at(&self, provider: &str, path: &NormalizedPath) -> Option<SourceValue> {
        self.providers.get(provider)?.values.get(path).cloned()
    }

    pub(crate) fn write_back_at(&self, provider: &str, path: &NormalizedPath) -> Option<WriteBack> {
        self.providers.get(provider)?.write_backs.get(path).cloned()
    }
}


/// Path-addressed store of provider values.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct SourceStore {
    state: Rc<RefCell<StoreState>>,
}

impl SourceStore {
    /// Create an empty store. Writes through bindings are dropped until a
    /// provider lookup is set.
    pub fn new() -> Self {
        SourceStore::default()
    }

    /// Create a store whose write-backs resolve providers through `lookup`.
    pub fn with_lookup(lookup: Weak<dyn ProviderLookup>) -> Self {
        let store = SourceStore::new();
        store.set_provider_lookup(lookup);
        store
    }

    /// Set the lookup used by write-backs. Existing write-backs pick it up
    /// on their next call.
    pub fn set_provider_lookup(&self, lookup: Weak<dyn ProviderLookup>) {
        self.state.borrow_mut().lookup = Some(lookup);
    }

    // -------------------------------------------------------------------
    // Provider events
    // -------------------------------------------------------------------

    /// Apply a batch of changed values from `provider`.
    ///
    /// Entries are applied in iteration order; each entry is fully placed
    /// and notified before the next one starts.
    pub fn sources_changed<I, K>(&self, provider: &str, changes: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.state
            .borrow_mut()
            .providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);

        let mut entries = 0usize;
        for (key, value) in changes {
            let key = key.as_ref();
            let path = NormalizedPath::parse(key);
            self.place(provider, key, &path, value);
            entries += 1;
            self.notify_changed(provider, &path);
        }
        debug!(provider = %provider, entries, "sources changed");
    }

    /// Withdraw values from `provider`. Unknown keys are ignored.
    pub fn sources_removed<I, K>(&self, provider: &str, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut removed: Vec<NormalizedPath> = Vec::new();
        let mut touched = false;
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(provider_state) = state.providers.get_mut(provider) else {
                return;
            };
            let bindings = state.bindings.entry(provider.to_string()).or_default();

            for key in keys {
                let path = NormalizedPath::parse(key.as_ref());
                let Some(withdrawal) = provider_state.tree.withdraw(&path) else {
                    continue;
                };
                touched |= withdrawal.had_value || !withdrawal.pruned.is_empty();

                provider_state.write_backs.remove(&path);
                provider_state.supplied.shift_remove(&path);
                for pruned in &withdrawal.pruned {
                    provider_state.forget(pruned);
                    if let Some(binding) = bindings.get(pruned) {
                        binding.detach_all();
                    }
                }
                for ancestor in path.ancestors() {
                    if !withdrawal.pruned.contains(&ancestor) {
                        resync(provider_state, bindings, provider, &ancestor, &self.state);
                    }
                }

                if withdrawal.had_value && !removed.contains(&path) {
                    removed.push(path);
                }
                if !withdrawal.pruned.is_empty() {
                    debug!(
                        provider = %provider,
                        pruned = withdrawal.pruned.len(),
                        "pruned dead nodes"
                    );
                }
            }
        }

        if touched {
            debug!(provider = %provider, removed = removed.len(), "sources removed");
            self.notify_removed(provider, &removed);
        }
    }

    /// Reset `provider` to an empty tree. The provider stays known.
    pub fn clear_sources(&self, provider: &str) {
        let removed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(provider_state) = state.providers.get_mut(provider) else {
                return;
            };
            let removed: Vec<NormalizedPath> = provider_state.supplied.iter().cloned().collect();
            detach_bindings(&state.bindings, provider);
            *provider_state = ProviderState::new();
            removed
        };
        debug!(provider = %provider, removed = removed.len(), "sources cleared");
        self.notify_removed(provider, &removed);
    }

    /// Drop all state of `provider`.
    pub fn remove_sources(&self, provider: &str) {
        let removed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(provider_state) = state.providers.remove(provider) else {
                return;
            };
            detach_bindings(&state.bindings, provider);
            provider_state.supplied.into_iter().collect::<Vec<_>>()
        };
        debug!(provider = %provider, removed = removed.len(), "provider sources removed");
        self.notify_removed(provider, &removed);
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Names of providers that currently have state.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_sources(&self, provider: &str) -> bool {
        self.state.borrow().providers.contains_key(provider)
    }

    /// Copy of the provider's raw tree root.
    pub fn get_raw_sources(&self, provider: &str) -> Option<RawSourceNode> {
        self.with_raw_sources(provider, RawSourceNode::clone)
    }

    /// Copy of the raw node at `key`.
    pub fn get_raw_source(&self, provider: &str, key: &str) -> Option<RawSourceNode> {
        let path = NormalizedPath::parse(key);
        self.with_raw_sources(provider, |root| root.get(&path).cloned())
            .flatten()
    }

    /// Run `f` against the provider's raw tree root without copying it.
    pub fn with_raw_sources<R>(
        &self,
        provider: &str,
        f: impl FnOnce(&RawSourceNode) -> R,
    ) -> Option<R> {
        let state = self.state.borrow();
        state.providers.get(provider).map(|p| f(&p.tree))
    }

    /// Every known path of the provider with its current value, keyed by
    /// canonical path.
    pub fn get_sources(&self, provider: &str) -> Option<IndexMap<String, SourceValue>> {
        let state = self.state.borrow();
        let provider_state = state.providers.get(provider)?;
        Some(
            provider_state
                .values
                .iter()
                .map(|(path, value)| (path.as_key(), value.clone()))
                .collect(),
        )
    }

    /// Current value at `key`: a leaf value, a composite binding, or `None`.
    pub fn get_source(&self, provider: &str, key: &str) -> Option<SourceValue> {
        self.state
            .borrow()
            .value_at(provider, &NormalizedPath::parse(key))
    }

    /// Canonical paths currently supplied by the provider, in order of
    /// first supply.
    pub fn supplied_paths(&self, provider: &str) -> Vec<String> {
        self.state
            .borrow()
            .providers
            .get(provider)
            .map(|p| p.supplied.iter().map(NormalizedPath::as_key).collect())
            .unwrap_or_default()
    }

    /// Display model of the provider's tree.
    pub fn view(&self, provider: &str) -> Option<Vec<SourceView>> {
        self.with_raw_sources(provider, SourceView::build)
    }

    /// Number of live subscriptions for a provider.
    pub fn subscription_count(&self, provider: &str) -> usize {
        self.state.borrow().subscribers.count(provider)
    }

    // -------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------

    /// Listen for changes at `path` and below.
    ///
    /// The callback receives `(value, subscribed_path, changed_path)`, both
    /// paths in canonical form. With `call_immediately`, it is called once
    /// before returning if a value currently exists at `path`.
    pub fn subscribe<F>(
        &self,
        provider: &str,
        path: &str,
        callback: F,
        call_immediately: bool,
    ) -> Subscription
    where
        F: Fn(Option<SourceValue>, &str, &str) + 'static,
    {
        let path = NormalizedPath::parse(path);
        let key = path.as_key();
        let callback: PathCallback = Rc::new(callback);
        let id = self
            .state
            .borrow_mut()
            .subscribers
            .add_path(provider, key.clone(), callback.clone());

        if call_immediately {
            if let Some(value) = self.value_at(provider, &path) {
                callback(Some(value), &key, &key);
            }
        }

        Subscription::new(id, provider, Some(key), Rc::downgrade(&self.state))
    }

    /// Listen for every change and removal of `provider`.
    ///
    /// The callback receives `(value, changed_path)`. With
    /// `call_immediately`, it is called once per supplied path before
    /// returning.
    pub fn subscribe_all<F>(&self, provider: &str, callback: F, call_immediately: bool) -> Subscription
    where
        F: Fn(Option<SourceValue>, &str) + 'static,
    {
        let callback: AllCallback = Rc::new(callback);
        let id = self
            .state
            .borrow_mut()
            .subscribers
            .add_all(provider, callback.clone());

        if call_immediately {
            let supplied: Vec<NormalizedPath> = self
                .state
                .borrow()
                .providers
                .get(provider)
                .map(|p| p.supplied.iter().cloned().collect())
                .unwrap_or_default();
            for path in supplied {
                if let Some(value) = self.value_at(provider, &path) {
                    callback(Some(value), &path.as_key());
                }
            }
        }

        Subscription::new(id, provider, None, Rc::downgrade(&self.state))
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    fn value_at(&self, provider: &str, path: &NormalizedPath) -> Option<SourceValue> {
        self.state.borrow().value_at(provider, path)
    }

    fn place(&self, provider: &str, key: &str, path: &NormalizedPath, value: Value) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let provider_state = state
            .providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);
        let bindings = state.bindings.entry(provider.to_string()).or_default();

        let created = provider_state.tree.place(key, path, value);
        if !created.is_empty() {
            trace!(provider = %provider, created = created.len(), "created nodes");
        }
        provider_state.supplied.insert(path.clone());
        provider_state
            .write_backs
            .insert(path.clone(), forward_to_provider(&self.state, provider, key));

        for ancestor in path.ancestors() {
            resync(provider_state, bindings, provider, &ancestor, &self.state);
        }
    }

    fn notify_changed(&self, provider: &str, path: &NormalizedPath) {
        let changed = path.as_key();
        for ancestor in path.ancestors() {
            let subscribed = ancestor.as_key();
            let listeners = self.state.borrow().subscribers.listeners_at(provider, &subscribed);
            for listener in listeners {
                trace!(provider = %provider, subscribed = %subscribed, changed = %changed, "notify");
                listener(self.value_at(provider, &ancestor), &subscribed, &changed);
            }
        }

        let listeners = self.state.borrow().subscribers.all_listeners(provider);
        for listener in listeners {
            listener(self.value_at(provider, path), &changed);
        }
    }

    fn notify_removed(&self, provider: &str, removed: &[NormalizedPath]) {
        let listeners = self.state.borrow().subscribers.path_listeners(provider);
        for (subscribed, listener) in listeners {
            trace!(provider = %provider, subscribed = %subscribed, "notify removal");
            listener(None, &subscribed, &subscribed);
        }

        let listeners = self.state.borrow().subscribers.all_listeners(provider);
        for listener in listeners {
            for path in removed {
                listener(None, &path.as_key());
            }
        }
    }
}


/// Bring the value table and binding of one path in line with the tree.
fn resync(
    provider_state: &mut ProviderState,
    bindings: &mut HashMap<NormalizedPath, Binding>,
    provider: &str,
    path: &NormalizedPath,
    store: &Rc<RefCell<StoreState>>,
) {
    let Some(node) = provider_state.tree.get(path) else {
        provider_state.forget(path);
        if let Some(binding) = bindings.get(path) {
            binding.detach_all();
        }
        return;
    };

    if node.has_children() {
        let binding = bindings
            .entry(path.clone())
            .or_insert_with(|| Binding::new(provider, path.clone(), Rc::downgrade(store)));
        binding.sync_children(node.children());
        provider_state
            .values
            .insert(path.clone(), SourceValue::Composite(binding.clone()));
        return;
    }

    if let Some(binding) = bindings.get(path) {
        binding.detach_all();
    }
    match node.value() {
        Some(value) => {
            provider_state
                .values
                .insert(path.clone(), SourceValue::Leaf(value.clone()));
        }
        None => {
            provider_state.values.shift_remove(path);
        }
    }
}

fn detach_bindings(bindings: &HashMap<String, HashMap<NormalizedPath, Binding>>, provider: &str) {
    if let Some(bindings) = bindings.get(provider) {
        for binding in bindings.values() {
            binding.detach_all();
        }
    }
}

/// Write-back for a supplied path: hands `(key, value)` to the provider.
fn forward_to_provider(store: &Rc<RefCell<StoreState>>, provider: &str, key: &str) -> WriteBack {
    let store = Rc::downgrade(store);
    let provider = provider.to_string();
    let key = key.to_string();
    Rc::new(move |value: Value| {
        let lookup = match store.upgrade() {
            Some(state) => {
                let lookup = state.borrow().lookup.clone();
                lookup.and_then(|lookup| lookup.upgrade())
            }
            None => None,
        };
        match lookup.and_then(|lookup| lookup.lookup(&provider)) {
            Some(target) => {
                debug!(provider = %provider, key = %key, "forwarding user write");
                target.write_from_user(&key, value);
            }
            None => warn!(provider = %provider, key = %key, "no provider for user write"),
        }
    })
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

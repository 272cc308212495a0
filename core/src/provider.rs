use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::store::SourceStore;

// ---------------------------------------------------------------------------
// Provider contract
// ---------------------------------------------------------------------------

/// An external data source that feeds a [`SourceStore`].
///
/// Providers push `sources_changed` / `sources_removed` batches into the
/// store on their own. The store only calls back for user writes.
pub trait SourceProvider {
    /// A caller set `key` to `value` through a binding. The value becomes
    /// current only once the provider reports it in a batch.
    fn write_from_user(&self, key: &str, value: Value);

    /// Called when the provider is removed from its registry.
    fn disconnect(&self) {}
}

/// Resolves a provider name to the provider that should receive writes.
pub trait ProviderLookup {
    fn lookup(&self, provider_name: &str) -> Option<Rc<dyn SourceProvider>>;
}


// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Free-form provider settings: a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderSettings(Map<String, Value>);

impl ProviderSettings {
    pub fn new() -> Self {
        ProviderSettings(Map::new())
    }

    /// `defaults` overlaid with `overrides`, key by key.
    pub fn merged(defaults: &ProviderSettings, overrides: &ProviderSettings) -> Self {
        let mut out = defaults.0.clone();
        for (key, value) in &overrides.0 {
            out.insert(key.clone(), value.clone());
        }
        ProviderSettings(out)
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Decode one setting. Missing keys are `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|error| StoreError::InvalidSetting {
                    key: key.to_string(),
                    error,
                }),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ProviderSettings {
    fn from(map: Map<String, Value>) -> Self {
        ProviderSettings(map)
    }
}


// ---------------------------------------------------------------------------
// Provider types
// ---------------------------------------------------------------------------

/// Everything a factory needs to build a provider instance.
#[derive(Clone)]
pub struct ProviderContext {
    pub name: String,
    pub settings: ProviderSettings,
    pub store: SourceStore,
}

/// Builds a provider instance. Fails when the settings are unusable.
pub type ProviderFactory =
    Rc<dyn Fn(ProviderContext) -> Result<Rc<dyn SourceProvider>, StoreError>>;

/// A named kind of provider with default settings and a constructor.
#[derive(Clone)]
pub struct ProviderType {
    type_name: String,
    settings_defaults: ProviderSettings,
    factory: ProviderFactory,
}

impl ProviderType {
    pub fn new<F>(type_name: &str, factory: F) -> Self
    where
        F: Fn(ProviderContext) -> Result<Rc<dyn SourceProvider>, StoreError> + 'static,
    {
        ProviderType {
            type_name: type_name.to_string(),
            settings_defaults: ProviderSettings::new(),
            factory: Rc::new(factory),
        }
    }

    pub fn with_defaults(mut self, defaults: ProviderSettings) -> Self {
        self.settings_defaults = defaults;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn settings_defaults(&self) -> &ProviderSettings {
        &self.settings_defaults
    }
}

impl fmt::Debug for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderType")
            .field("type_name", &self.type_name)
            .field("settings_defaults", &self.settings_defaults)
            .finish_non_exhaustive()
    }
}


// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type NameListener = Rc<dyn Fn(&str)>;

/// Provider types, named provider instances and the default provider.
///
/// The registry is the store's [`ProviderLookup`]: creating one wires the
/// store's write-backs to the registry's instances.
pub struct ProviderRegistry {
    store: SourceStore,
    types: RefCell<IndexMap<String, ProviderType>>,
    providers: RefCell<IndexMap<String, Rc<dyn SourceProvider>>>,
    default_provider: RefCell<Option<String>>,
    added_listeners: RefCell<Vec<NameListener>>,
    removed_listeners: RefCell<Vec<NameListener>>,
    default_listeners: RefCell<Vec<NameListener>>,
}

impl ProviderRegistry {
    /// Create a registry and make it the lookup of `store`.
    pub fn new(store: SourceStore) -> Rc<Self> {
        let registry = Rc::new(ProviderRegistry {
            store: store.clone(),
            types: RefCell::new(IndexMap::new()),
            providers: RefCell::new(IndexMap::new()),
            default_provider: RefCell::new(None),
            added_listeners: RefCell::new(Vec::new()),
            removed_listeners: RefCell::new(Vec::new()),
            default_listeners: RefCell::new(Vec::new()),
        });
        let lookup: Rc<dyn ProviderLookup> = registry.clone();
        store.set_provider_lookup(Rc::downgrade(&lookup));
        registry
    }

    pub fn store(&self) -> &SourceStore {
        &self.store
    }

    /// Register a provider type. Returns `false` if the name is taken.
    pub fn add_provider_type(&self, provider_type: ProviderType) -> bool {
        let mut types = self.types.borrow_mut();
        if types.contains_key(provider_type.type_name()) {
            return false;
        }
        debug!(type_name = %provider_type.type_name(), "provider type added");
        types.insert(provider_type.type_name().to_string(), provider_type);
        true
    }

    pub fn has_provider_type(&self, type_name: &str) -> bool {
        self.types.borrow().contains_key(type_name)
    }

    pub fn provider_type_names(&self) -> Vec<String> {
        self.types.borrow().keys().cloned().collect()
    }

    /// Instantiate a provider of `type_name`.
    ///
    /// The instance is named `name`, or the type name when `None`. Its
    /// settings are the type's defaults overlaid with `settings`.
    pub fn add_provider(
        &self,
        type_name: &str,
        name: Option<&str>,
        settings: ProviderSettings,
    ) -> Result<Rc<dyn SourceProvider>, StoreError> {
        let name = name.unwrap_or(type_name).to_string();
        let (factory, defaults) = {
            let types = self.types.borrow();
            let provider_type = types
                .get(type_name)
                .ok_or_else(|| StoreError::UnknownProviderType(type_name.to_string()))?;
            (
                provider_type.factory.clone(),
                provider_type.settings_defaults.clone(),
            )
        };
        if self.has_provider(&name) {
            return Err(StoreError::ProviderExists(name));
        }

        let provider = factory(ProviderContext {
            name: name.clone(),
            settings: ProviderSettings::merged(&defaults, &settings),
            store: self.store.clone(),
        })?;
        self.providers
            .borrow_mut()
            .insert(name.clone(), provider.clone());
        debug!(provider = %name, type_name = %type_name, "provider added");

        let listeners = self.added_listeners.borrow().clone();
        for listener in listeners {
            listener(&name);
        }
        Ok(provider)
    }

    /// Disconnect and forget a provider, dropping all of its sources.
    pub fn remove_provider(&self, name: &str) -> Result<(), StoreError> {
        let provider = self
            .providers
            .borrow_mut()
            .shift_remove(name)
            .ok_or_else(|| StoreError::UnknownProvider(name.to_string()))?;
        provider.disconnect();
        self.store.remove_sources(name);
        debug!(provider = %name, "provider removed");

        let listeners = self.removed_listeners.borrow().clone();
        for listener in listeners {
            listener(name);
        }
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<Rc<dyn SourceProvider>> {
        self.providers.borrow().get(name).cloned()
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.borrow().contains_key(name)
    }

    /// Provider names in creation order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.borrow().keys().cloned().collect()
    }

    pub fn set_default_provider(&self, name: &str) {
        *self.default_provider.borrow_mut() = Some(name.to_string());
        let listeners = self.default_listeners.borrow().clone();
        for listener in listeners {
            listener(name);
        }
    }

    pub fn default_provider(&self) -> Option<String> {
        self.default_provider.borrow().clone()
    }

    pub fn on_provider_added(&self, listener: impl Fn(&str) + 'static) {
        self.added_listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn on_provider_removed(&self, listener: impl Fn(&str) + 'static) {
        self.removed_listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn on_default_provider_set(&self, listener: impl Fn(&str) + 'static) {
        self.default_listeners.borrow_mut().push(Rc::new(listener));
    }
}

impl ProviderLookup for ProviderRegistry {
    fn lookup(&self, provider_name: &str) -> Option<Rc<dyn SourceProvider>> {
        self.get_provider(provider_name)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.provider_type_names())
            .field("providers", &self.provider_names())
            .field("default_provider", &self.default_provider())
            .finish_non_exhaustive()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

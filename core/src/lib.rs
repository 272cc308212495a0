//! Source tree engine: path-addressed provider state with live bindings.
//!
//! Providers push flat batches of `(key, value)` pairs; the store mirrors
//! them into a per-provider tree, hands readers identity-stable bindings
//! over interior paths, notifies hierarchical subscriptions, and routes
//! writes made through a binding back to the provider that owns the path.

pub mod error;
pub mod key;
pub mod tree;
pub mod binding;
pub mod subscription;
pub mod store;
pub mod provider;
pub mod view;
pub mod scenario;

pub use error::StoreError;
pub use key::{normalize_key, normalize_segment, NormalizedPath};
pub use tree::RawSourceNode;
pub use binding::{Binding, SourceValue, WriteBack};
pub use subscription::{Subscription, SubscriptionId};
pub use store::SourceStore;
pub use provider::{
    ProviderContext, ProviderLookup, ProviderRegistry, ProviderSettings, ProviderType,
    SourceProvider,
};
pub use view::{render_text, DisplayValue, SourceView};
pub use scenario::{Scenario, ScenarioRun, Step, TranscriptEntry};

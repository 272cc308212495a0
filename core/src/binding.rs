//! Projected bindings: the live objects handed to readers and writers.
//!
//! Every interior node of a provider's raw tree has one [`Binding`]. A
//! binding reads like a nested record (`binding.get("c")`) and writes like
//! a field (`binding.set("c", value)`): reads go to the provider's current
//! value table, writes go to the child's write-back, which forwards the
//! value to the provider. Bindings are identity-stable, so a caller holding
//! one keeps observing its path across later batches.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::key::{normalize_segment, NormalizedPath, SEPARATOR};
use crate::store::StoreState;
use crate::tree::RawSourceNode;


/// Forwards a user-initiated value to the provider that owns a path.
pub type WriteBack = Rc<dyn Fn(Value)>;


/// Current value at a path: a scalar leaf or a composite binding.
#[derive(Debug, Clone)]
pub enum SourceValue {
    /// Provider value of a node without children.
    Leaf(Value),
    /// Live view over a node with children.
    Composite(Binding),
}

impl SourceValue {
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            SourceValue::Leaf(value) => Some(value),
            SourceValue::Composite(_) => None,
        }
    }

    pub fn as_binding(&self) -> Option<&Binding> {
        match self {
            SourceValue::Leaf(_) => None,
            SourceValue::Composite(binding) => Some(binding),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, SourceValue::Composite(_))
    }

    /// Read a child of a composite value. Leaves have no children.
    pub fn get(&self, segment: &str) -> Option<SourceValue> {
        self.as_binding().and_then(|binding| binding.get(segment))
    }

    /// Snapshot as plain JSON. Composites become objects keyed by segment.
    pub fn to_json(&self) -> Value {
        match self {
            SourceValue::Leaf(value) => value.clone(),
            SourceValue::Composite(binding) => binding.to_json(),
        }
    }
}

impl PartialEq for SourceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SourceValue::Leaf(a), SourceValue::Leaf(b)) => a == b,
            (SourceValue::Composite(a), SourceValue::Composite(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Value> for SourceValue {
    fn from(value: Value) -> Self {
        SourceValue::Leaf(value)
    }
}


/// Live view over one interior path of one provider.
///
/// Cloning yields another handle to the same binding.
#[derive(Clone)]
pub struct Binding {
    inner: Rc<BindingInner>,
}

struct BindingInner {
    provider: String,
    path: NormalizedPath,
    /// Child segment -> child path, in the order children first appeared.
    props: RefCell<IndexMap<String, NormalizedPath>>,
    store: Weak<RefCell<StoreState>>,
}

impl Binding {
    pub(crate) fn new(
        provider: &str,
        path: NormalizedPath,
        store: Weak<RefCell<StoreState>>,
    ) -> Self {
        Binding {
            inner: Rc::new(BindingInner {
                provider: provider.to_string(),
                path,
                props: RefCell::new(IndexMap::new()),
                store,
            }),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.inner.provider
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.inner.path
    }

    /// Child segments currently attached.
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.borrow().keys().cloned().collect()
    }

    pub fn has_children(&self) -> bool {
        !self.inner.props.borrow().is_empty()
    }

    pub fn contains(&self, segment: &str) -> bool {
        self.child_path(segment).is_some()
    }

    /// True if both handles refer to the same binding.
    pub fn ptr_eq(&self, other: &Binding) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current value of a child. `segment` is normalized before lookup.
    pub fn get(&self, segment: &str) -> Option<SourceValue> {
        let child = self.child_path(segment)?;
        let store = self.inner.store.upgrade()?;
        let state = store.borrow();
        state.value_at(&self.inner.provider, &child)
    }

    /// Follow a `/`-separated chain of child segments.
    pub fn get_path(&self, path: &str) -> Option<SourceValue> {
        let mut segments = path.split(SEPARATOR).filter(|s| !s.is_empty());
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Forward a write for a child to its provider.
    ///
    /// Returns `false` without doing anything when the child does not exist
    /// or is not supplied directly by the provider.
    pub fn set(&self, segment: &str, value: Value) -> bool {
        let Some(child) = self.child_path(segment) else {
            return false;
        };
        let Some(store) = self.inner.store.upgrade() else {
            return false;
        };
        // Release the store before calling out: the provider may answer
        // with a new batch from inside the write-back.
        let write_back = store.borrow().write_back_at(&self.inner.provider, &child);
        match write_back {
            Some(write_back) => {
                write_back(value);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the whole subtree as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                out.insert(key, value.to_json());
            }
        }
        Value::Object(out)
    }

    /// Attach properties for new children and detach vanished ones.
    pub(crate) fn sync_children(&self, children: &IndexMap<String, RawSourceNode>) {
        let mut props = self.inner.props.borrow_mut();
        props.retain(|segment, _| children.contains_key(segment));
        for (segment, child) in children {
            if !props.contains_key(segment) {
                props.insert(segment.clone(), child.normalized_key().clone());
            }
        }
    }

    pub(crate) fn detach_all(&self) {
        self.inner.props.borrow_mut().clear();
    }

    fn child_path(&self, segment: &str) -> Option<NormalizedPath> {
        self.inner
            .props
            .borrow()
            .get(&normalize_segment(segment))
            .cloned()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("provider", &self.inner.provider)
            .field("path", &self.inner.path.as_key())
            .field("keys", &self.keys())
            .finish()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

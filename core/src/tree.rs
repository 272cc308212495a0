//! Raw source tree: the bookkeeping tree kept per provider.
//!
//! Nodes are keyed by normalized segment. Each node remembers the literal
//! key text that first created it, the key text of the batch entry that
//! last supplied it, its current value, and whether the provider currently
//! supplies it. A node that is neither supplied nor has children is dead
//! and is pruned after every removal.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::key::{raw_prefix, NormalizedPath};


/// One node of a provider's raw tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSourceNode {
    /// Literal key prefix that first created this node. Never overwritten.
    original_key: String,
    normalized_key: NormalizedPath,
    value: Option<Value>,
    /// Full literal key of the latest batch entry that supplied this node.
    supplied_key: Option<String>,
    from_provider: bool,
    children: IndexMap<String, RawSourceNode>,
}


/// Outcome of withdrawing a provider value from the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    /// Path whose value was withdrawn.
    pub path: NormalizedPath,
    /// True if the node was supplied by the provider before the withdrawal.
    pub had_value: bool,
    /// Paths deleted by pruning, deepest first. Includes `path` when the
    /// node itself had no children.
    pub pruned: Vec<NormalizedPath>,
}


impl RawSourceNode {
    /// An empty tree root.
    pub fn root() -> Self {
        RawSourceNode::new(String::new(), NormalizedPath::root())
    }

    fn new(original_key: String, normalized_key: NormalizedPath) -> Self {
        RawSourceNode {
            original_key,
            normalized_key,
            value: None,
            supplied_key: None,
            from_provider: false,
            children: IndexMap::new(),
        }
    }

    pub fn original_key(&self) -> &str {
        &self.original_key
    }

    pub fn normalized_key(&self) -> &NormalizedPath {
        &self.normalized_key
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn supplied_key(&self) -> Option<&str> {
        self.supplied_key.as_deref()
    }

    /// True while the provider supplies this node directly.
    pub fn is_from_provider(&self) -> bool {
        self.from_provider
    }

    pub fn children(&self) -> &IndexMap<String, RawSourceNode> {
        &self.children
    }

    pub fn child(&self, segment: &str) -> Option<&RawSourceNode> {
        self.children.get(segment)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && !self.from_provider
    }

    /// Find the node at `path` below this one.
    pub fn get(&self, path: &NormalizedPath) -> Option<&RawSourceNode> {
        let mut node = self;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn get_mut(&mut self, path: &NormalizedPath) -> Option<&mut RawSourceNode> {
        let mut node = self;
        for segment in path.segments() {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    /// All nodes below this one in pre-order (parents before children,
    /// siblings in insertion order).
    pub fn descendants(&self) -> Vec<&RawSourceNode> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// True if no node below this one is dead (unsupplied and childless).
    pub fn satisfies_pruning_invariant(&self) -> bool {
        self.descendants()
            .iter()
            .all(|node| node.from_provider || node.has_children())
    }

    /// Place a provider value at `path`, creating missing nodes on the way.
    ///
    /// `raw_key` must be the literal key `path` was parsed from. Returns the
    /// paths of newly created nodes, root-to-leaf.
    pub(crate) fn place(
        &mut self,
        raw_key: &str,
        path: &NormalizedPath,
        value: Value,
    ) -> Vec<NormalizedPath> {
        let mut created = Vec::new();
        if path.is_root() {
            return created;
        }

        let mut node = self;
        for (index, segment) in path.segments().iter().enumerate() {
            let depth = index + 1;
            node = node.children.entry(segment.clone()).or_insert_with(|| {
                created.push(path.prefix(depth));
                RawSourceNode::new(raw_prefix(raw_key, depth), path.prefix(depth))
            });
        }

        node.value = Some(value);
        node.from_provider = true;
        node.supplied_key = Some(raw_key.to_string());
        created
    }

    /// Withdraw the provider value at `path` and prune the ancestor chain.
    ///
    /// A node with living children stays as a structural placeholder.
    /// Returns `None` if no node exists at `path`.
    pub(crate) fn withdraw(&mut self, path: &NormalizedPath) -> Option<Withdrawal> {
        if path.is_root() {
            return None;
        }

        let target = self.get_mut(path)?;
        let had_value = target.from_provider;
        target.value = None;
        target.from_provider = false;
        target.supplied_key = None;

        let mut pruned = Vec::new();
        prune_chain(&mut self.children, path.segments(), path, 1, &mut pruned);

        Some(Withdrawal {
            path: path.clone(),
            had_value,
            pruned,
        })
    }
}


// ---------------------------------------------------------------------------
// Internal
// ---------------------------------------------------------------------------

fn collect_descendants<'a>(node: &'a RawSourceNode, out: &mut Vec<&'a RawSourceNode>) {
    for child in node.children.values() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn prune_chain(
    children: &mut IndexMap<String, RawSourceNode>,
    segments: &[String],
    full: &NormalizedPath,
    depth: usize,
    pruned: &mut Vec<NormalizedPath>,
) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    let Some(node) = children.get_mut(segment) else {
        return;
    };

    prune_chain(&mut node.children, rest, full, depth + 1, pruned);

    let dead = node.is_empty();
    if dead {
        children.shift_remove(segment);
        pruned.push(full.prefix(depth));
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn place(tree: &mut RawSourceNode, key: &str, value: Value) -> Vec<NormalizedPath> {
        tree.place(key, &NormalizedPath::parse(key), value)
    }

    fn keys(paths: &[NormalizedPath]) -> Vec<String> {
        paths.iter().map(|p| p.as_key()).collect()
    }

    #[test]
    fn place_creates_intermediate_nodes() {
        let mut tree = RawSourceNode::root();
        let created = place(&mut tree, "/a/ b /c", json!(true));
        assert_eq!(keys(&created), vec!["", "/a", "/a/b", "/a/b/c"]);

        let b = tree.get(&NormalizedPath::parse("/a/b")).unwrap();
        assert_eq!(b.original_key(), "/a/ b ");
        assert_eq!(b.value(), None);
        assert!(!b.is_from_provider());

        let c = tree.get(&NormalizedPath::parse("/a/b/c")).unwrap();
        assert_eq!(c.value(), Some(&json!(true)));
        assert_eq!(c.supplied_key(), Some("/a/ b /c"));
        assert!(c.is_from_provider());
    }

    #[test]
    fn first_seen_key_is_kept() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, " ??/ .A", json!(1));
        let created = place(&mut tree, "/a", json!(2));
        assert!(created.is_empty());

        let a = tree.get(&NormalizedPath::parse("/a")).unwrap();
        assert_eq!(a.original_key(), " ??/ .A");
        assert_eq!(a.supplied_key(), Some("/a"));
        assert_eq!(a.value(), Some(&json!(2)));
        assert_eq!(tree.children().len(), 1);
    }

    #[test]
    fn get_missing_path() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "/a/b", json!(1));
        assert!(tree.get(&NormalizedPath::parse("/a/b/e")).is_none());
        assert!(tree.get(&NormalizedPath::parse("/x")).is_none());
        assert_eq!(tree.get(&NormalizedPath::root()), Some(&tree));
    }

    #[test]
    fn withdraw_prunes_dead_ancestors() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "/a", json!(2));
        place(&mut tree, "/a/b/c", json!(false));

        let w = tree.withdraw(&NormalizedPath::parse("/a/b/c")).unwrap();
        assert!(w.had_value);
        assert_eq!(keys(&w.pruned), vec!["/a/b/c", "/a/b"]);

        let a = tree.get(&NormalizedPath::parse("/a")).unwrap();
        assert!(!a.has_children());
        assert_eq!(a.value(), Some(&json!(2)));
        assert!(tree.satisfies_pruning_invariant());
    }

    #[test]
    fn withdraw_keeps_node_with_children() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "/x", json!(1));
        place(&mut tree, "/x/y", json!(true));

        let w = tree.withdraw(&NormalizedPath::parse("/x")).unwrap();
        assert!(w.had_value);
        assert!(w.pruned.is_empty());

        let x = tree.get(&NormalizedPath::parse("/x")).unwrap();
        assert!(!x.is_from_provider());
        assert_eq!(x.value(), None);
        assert_eq!(x.supplied_key(), None);
        assert!(x.has_children());
        assert!(tree.satisfies_pruning_invariant());
    }

    #[test]
    fn withdraw_unknown_path_is_noop() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "/a/b", json!(1));
        let before = tree.clone();
        assert!(tree.withdraw(&NormalizedPath::parse("/a/c")).is_none());
        assert!(tree.withdraw(&NormalizedPath::root()).is_none());
        assert_eq!(tree, before);
    }

    #[test]
    fn withdraw_structural_node_reports_no_value() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "/a/b", json!(1));
        let w = tree.withdraw(&NormalizedPath::parse("/a")).unwrap();
        assert!(!w.had_value);
        assert!(w.pruned.is_empty());
    }

    #[test]
    fn removing_last_leaf_empties_tree() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "foo/bar", json!({ "bar": "foo" }));
        let w = tree.withdraw(&NormalizedPath::parse("foo/bar")).unwrap();
        assert_eq!(keys(&w.pruned), vec!["foo/bar", "foo"]);
        assert!(!tree.has_children());
    }

    #[test]
    fn descendants_are_preorder() {
        let mut tree = RawSourceNode::root();
        place(&mut tree, "a/b", json!(1));
        place(&mut tree, "c", json!(2));
        place(&mut tree, "a/d", json!(3));
        let order: Vec<String> = tree
            .descendants()
            .iter()
            .map(|n| n.normalized_key().as_key())
            .collect();
        assert_eq!(order, vec!["a", "a/b", "a/d", "c"]);
    }
}

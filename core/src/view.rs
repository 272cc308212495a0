//! Display model of a provider's raw tree.
//!
//! A [`SourceView`] mirrors one raw node with what a tree widget needs: a
//! label, a displayable value, an indent level and an initial expansion
//! state. [`render_text`] draws a list of views as an indented text tree.

use std::fmt;

use serde::Serialize;
use serde_json::{Number, Value};

use crate::tree::RawSourceNode;


/// Value kinds a tree row can show. Objects and null have no display form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayValue {
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
}

impl DisplayValue {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(DisplayValue::Bool(*b)),
            Value::Number(n) => Some(DisplayValue::Number(n.clone())),
            Value::String(s) => Some(DisplayValue::String(s.clone())),
            Value::Array(items) => Some(DisplayValue::Array(items.clone())),
            Value::Null | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::Bool(true) => write!(f, "[x] true"),
            DisplayValue::Bool(false) => write!(f, "[ ] false"),
            DisplayValue::Number(n) => write!(f, "{}", n),
            DisplayValue::String(s) => write!(f, "\"{}\"", s),
            DisplayValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(array_item).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

fn array_item(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(array_item).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}


/// One row of the tree display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceView {
    /// Last segment of the node's original key, as the provider spelled it.
    pub label: String,
    /// Canonical path of the node.
    pub path: String,
    pub value: Option<DisplayValue>,
    pub level: usize,
    /// Rows start expanded when they are the only child of their parent.
    pub expanded: bool,
    pub children: Vec<SourceView>,
}

impl SourceView {
    /// Views for the children of `root`, which is itself not shown.
    pub fn build(root: &RawSourceNode) -> Vec<SourceView> {
        build_children(root, 0)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn toggle(&mut self) {
        self.expanded = !self.expanded;
    }

    /// Find a row by canonical path.
    pub fn find(&self, path: &str) -> Option<&SourceView> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }
}

fn build_children(node: &RawSourceNode, level: usize) -> Vec<SourceView> {
    let only_child = node.children().len() == 1;
    node.children()
        .values()
        .map(|child| SourceView {
            label: label_of(child.original_key()),
            path: child.normalized_key().as_key(),
            value: child.value().and_then(DisplayValue::from_value),
            level,
            expanded: only_child,
            children: build_children(child, level + 1),
        })
        .collect()
}

fn label_of(original_key: &str) -> String {
    original_key.rsplit('/').next().unwrap_or_default().to_string()
}


/// Draw rows as an indented tree, two spaces per level.
///
/// Collapsed rows hide their children unless `expand_all` is set.
pub fn render_text(views: &[SourceView], expand_all: bool) -> String {
    let mut out = String::new();
    for view in views {
        render_row(view, expand_all, &mut out);
    }
    out
}

fn render_row(view: &SourceView, expand_all: bool, out: &mut String) {
    let open = expand_all || view.expanded;
    let marker = match (view.has_children(), open) {
        (false, _) => " ",
        (true, true) => "v",
        (true, false) => ">",
    };
    out.push_str(&"  ".repeat(view.level));
    out.push_str(marker);
    out.push(' ');
    out.push_str(&view.label);
    if let Some(value) = &view.value {
        out.push_str(" = ");
        out.push_str(&value.to_string());
    }
    out.push('\n');

    if open {
        for child in &view.children {
            render_row(child, expand_all, out);
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Key normalization and canonical paths.
//!
//! Providers address values with `/`-delimited keys such as `/a/b/c`.
//! Keys that differ only cosmetically (surrounding whitespace, stray
//! punctuation, letter case) denote the same node, so every key is mapped
//! to a [`NormalizedPath`] before it touches the tree or the subscription
//! table. Normalization never merges or splits segments: the raw key and
//! its normalized path always have the same number of segments, which lets
//! the tree rebuild the literal key text for any depth.

use std::fmt;

use serde::{Deserialize, Serialize};


/// Segment delimiter for both raw and normalized keys.
pub const SEPARATOR: char = '/';


/// Canonical form of a key: an ordered sequence of normalized segments.
///
/// The empty path is the tree root and is never produced by [`parse`];
/// the key `""` parses to a single empty segment.
///
/// [`parse`]: NormalizedPath::parse
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPath {
    segments: Vec<String>,
}

impl NormalizedPath {
    /// The root path (zero segments).
    pub fn root() -> Self {
        NormalizedPath { segments: Vec::new() }
    }

    /// Normalize a raw key.
    pub fn parse(key: &str) -> Self {
        NormalizedPath {
            segments: key.split(SEPARATOR).map(normalize_segment).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `depth` segments. Saturates at the full path.
    pub fn prefix(&self, depth: usize) -> NormalizedPath {
        let depth = depth.min(self.segments.len());
        NormalizedPath {
            segments: self.segments[..depth].to_vec(),
        }
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.is_root() {
            None
        } else {
            Some(self.prefix(self.segments.len() - 1))
        }
    }

    /// Extend by one already-normalized segment.
    pub fn child(&self, segment: &str) -> NormalizedPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        NormalizedPath { segments }
    }

    /// Every non-root prefix of this path, root-to-leaf, ending with the
    /// path itself.
    pub fn ancestors(&self) -> impl Iterator<Item = NormalizedPath> + '_ {
        (1..=self.segments.len()).map(move |depth| self.prefix(depth))
    }

    /// True if `other` is a prefix of (or equal to) this path.
    pub fn starts_with(&self, other: &NormalizedPath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Canonical key string: segments joined by `/`.
    pub fn as_key(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<&str> for NormalizedPath {
    fn from(key: &str) -> Self {
        NormalizedPath::parse(key)
    }
}


/// Normalize one segment: trim, lowercase, keep alphanumerics, `_` and `-`.
pub fn normalize_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Normalize a raw key into its canonical key string.
pub fn normalize_key(key: &str) -> String {
    NormalizedPath::parse(key).as_key()
}

/// Split a raw key into its literal segments.
pub fn raw_segments(key: &str) -> Vec<&str> {
    key.split(SEPARATOR).collect()
}

/// Literal key text of the first `depth` segments of `key`.
pub fn raw_prefix(key: &str, depth: usize) -> String {
    key.split(SEPARATOR)
        .take(depth)
        .collect::<Vec<_>>()
        .join("/")
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

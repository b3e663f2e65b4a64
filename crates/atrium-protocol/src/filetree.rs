//! The flat file tree: relative path -> textual contents.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// A virtual project's file tree.
///
/// Paths are flat keys unique within the tree; a path string encodes
/// hierarchy via separators if present. No node carries identity beyond its
/// path. Backed by a `BTreeMap`, so iteration order (and therefore "the
/// first path of a tree") is deterministic and lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree(BTreeMap<String, String>);

impl FileTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files in the tree.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tree holds no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Contents of `path`, if present.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// Whether `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Create or overwrite a single file.
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.0.insert(path.into(), contents.into());
    }

    /// Key-wise union with `other`, incoming values winning on collision.
    pub fn merge(&mut self, other: FileTree) {
        self.0.extend(other.0);
    }

    /// Lexicographically-first path, if any.
    pub fn first_path(&self) -> Option<&str> {
        self.0.keys().next().map(String::as_str)
    }

    /// Iterate over `(path, contents)` pairs in path order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Iterate over paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for FileTree {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for FileTree {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for FileTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// On the wire a node is either bare contents (`"a.js": "x"`) or the legacy
/// nested shape (`"a.js": {"file": {"contents": "x"}}`) produced by older
/// clients. Both decode to plain contents.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum NodeRepr {
    Contents(String),
    Legacy { file: LegacyFile },
}

#[derive(serde::Deserialize)]
struct LegacyFile {
    contents: String,
}

impl<'de> Deserialize<'de> for FileTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, NodeRepr>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(path, node)| {
                    let contents = match node {
                        NodeRepr::Contents(c) => c,
                        NodeRepr::Legacy { file } => file.contents,
                    };
                    (path, contents)
                })
                .collect(),
        ))
    }
}

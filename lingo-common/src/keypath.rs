//! Dotted key path model over nested JSON documents
//!
//! A key path is the dot-joined sequence of object keys leading to a leaf.
//! Only plain objects are traversed; arrays and scalars end a path no
//! matter how deeply they nest.
//!
//! None of these functions touch storage and none of them mutate their
//! input. [`set`] returns a new document that shares every untouched
//! subtree with the original.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::{Document, Object};
use crate::{Error, Result};

/// Separator between path segments
pub const SEPARATOR: char = '.';

/// One node of the key tree rebuilt from dotted paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNode {
    /// Last path segment
    pub name: String,
    /// Full dotted path including `name`
    pub path: String,
    pub is_leaf: bool,
    pub children: Vec<KeyNode>,
}

impl KeyNode {
    /// Find a descendant (or self) by full path
    pub fn find(&self, path: &str) -> Option<&KeyNode> {
        if self.path == path {
            return Some(self);
        }
        let prefix = format!("{}{}", self.path, SEPARATOR);
        if !path.starts_with(&prefix) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    /// Number of leaves at or below this node
    pub fn leaf_count(&self) -> usize {
        if self.is_leaf {
            1
        } else {
            self.children.iter().map(KeyNode::leaf_count).sum()
        }
    }
}

/// Flatten a document into its leaf key paths, depth first, in key order
///
/// Fails with [`Error::InvalidDocument`] when the root is not an object.
pub fn flatten(doc: &Document) -> Result<Vec<String>> {
    let root = doc.as_object().ok_or_else(|| {
        Error::InvalidDocument(format!(
            "cannot flatten a {}, expected an object",
            doc.type_name()
        ))
    })?;

    let mut paths = Vec::new();
    flatten_into(root, "", &mut paths);
    Ok(paths)
}

fn flatten_into(object: &Object, prefix: &str, paths: &mut Vec<String>) {
    for (key, value) in object.iter() {
        let path = join(prefix, key);
        match value {
            Document::Object(child) => flatten_into(child, &path, paths),
            _ => paths.push(path),
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", prefix, SEPARATOR, key)
    }
}

/// Rebuild the nesting implied by a list of dotted paths
///
/// Siblings keep first-occurrence order and duplicate paths collapse into
/// one node. A node that is both a leaf and a prefix of a longer path is
/// demoted to a non-leaf.
pub fn build_tree<S: AsRef<str>>(paths: &[S]) -> Vec<KeyNode> {
    let mut roots: IndexMap<String, Branch> = IndexMap::new();

    for path in paths {
        let segments: Vec<&str> = path.as_ref().split(SEPARATOR).collect();
        let mut level = &mut roots;
        let mut current_path = String::new();

        for (depth, segment) in segments.iter().enumerate() {
            current_path = join(&current_path, segment);
            let is_last = depth + 1 == segments.len();

            let branch = level
                .entry((*segment).to_string())
                .or_insert_with(|| Branch::new(current_path.clone(), is_last));
            if !is_last {
                branch.is_leaf = false;
            }
            level = &mut branch.children;
        }
    }

    roots.into_iter().map(Branch::into_node).collect()
}

/// Tree under construction; siblings are indexed by name
struct Branch {
    path: String,
    is_leaf: bool,
    children: IndexMap<String, Branch>,
}

impl Branch {
    fn new(path: String, is_leaf: bool) -> Self {
        Self {
            path,
            is_leaf,
            children: IndexMap::new(),
        }
    }

    fn into_node((name, branch): (String, Branch)) -> KeyNode {
        KeyNode {
            name,
            path: branch.path,
            is_leaf: branch.is_leaf,
            children: branch.children.into_iter().map(Branch::into_node).collect(),
        }
    }
}

/// Leaf paths of a built tree, depth first
pub fn leaf_paths(nodes: &[KeyNode]) -> Vec<String> {
    let mut paths = Vec::new();
    collect_leaves(nodes, &mut paths);
    paths
}

fn collect_leaves(nodes: &[KeyNode], paths: &mut Vec<String>) {
    for node in nodes {
        if node.is_leaf {
            paths.push(node.path.clone());
        } else {
            collect_leaves(&node.children, paths);
        }
    }
}

/// Read the value at a dotted path
///
/// Returns `None` when any segment is missing or an intermediate value is
/// not an object. Never fails.
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Document> {
    let mut current = doc;
    for segment in path.split(SEPARATOR) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Return a new document with `value` installed at `path`
///
/// Missing intermediates are created as empty objects; an intermediate
/// that exists but is not an object is replaced by one. The input is left
/// untouched and shares all unchanged subtrees with the result.
pub fn set(doc: &Document, path: &str, value: Document) -> Document {
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    set_segments(doc, &segments, value)
}

fn set_segments(doc: &Document, segments: &[&str], value: Document) -> Document {
    let Some((head, rest)) = segments.split_first() else {
        return value;
    };

    let mut object = match doc {
        Document::Object(existing) => Object::clone(existing),
        _ => Object::new(),
    };

    let child = if rest.is_empty() {
        value
    } else {
        let existing = object.get(head).cloned().unwrap_or_default();
        set_segments(&existing, rest, value)
    };
    object.insert(*head, child);

    Document::Object(Arc::new(object))
}

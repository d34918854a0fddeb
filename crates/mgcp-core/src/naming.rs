//! Endpoint name resolution
//!
//! Names are slash-delimited paths (`rvoip/ivr/3`), optionally followed by
//! `@domain`, which is ignored. The last segment may be a wildcard:
//!
//! * `*` matches every endpoint registered below the prefix
//! * `$` matches one free endpoint below the prefix
//!
//! The tree is an immutable snapshot swapped on every registration, so
//! lookups never take a lock and cost O(depth) for exact names.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Something the naming tree can index
pub trait Resolvable: Send + Sync {
    /// Whether a `$` lookup may select this entry
    fn is_free(&self) -> bool;
}

/// Naming errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// Nothing is registered under the name or prefix
    #[error("Endpoint unknown: {name}")]
    UnknownEndpoint { name: String },

    /// The prefix is known but every endpoint under it is busy
    #[error("No endpoint available for {name}")]
    Unavailable { name: String },

    #[error("Endpoint already registered: {name}")]
    Duplicate { name: String },

    #[error("Invalid endpoint name: {name}")]
    InvalidName { name: String },
}

impl NamingError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownEndpoint { name: name.into() }
    }
}

struct Node<T> {
    children: BTreeMap<String, Arc<Node<T>>>,
    value: Option<Arc<T>>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self { children: BTreeMap::new(), value: None }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    // Shallow copy: children are shared with the previous snapshot
    fn copy(&self) -> Self {
        Self {
            children: self.children.clone(),
            value: self.value.clone(),
        }
    }

    /// Write entries into `out[*written..]` in name order, stopping once
    /// `out` is full
    fn fill(&self, out: &mut [Option<Arc<T>>], written: &mut usize) {
        if let Some(value) = &self.value {
            match out.get_mut(*written) {
                Some(slot) => {
                    *slot = Some(value.clone());
                    *written += 1;
                }
                None => return,
            }
        }
        for child in self.children.values() {
            if *written == out.len() {
                return;
            }
            child.fill(out, written);
        }
    }

    fn count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(|child| child.count()).sum::<usize>()
    }
}

impl<T: Resolvable> Node<T> {
    fn first_free(&self) -> Option<&Arc<T>> {
        if let Some(value) = &self.value {
            if value.is_free() {
                return Some(value);
            }
        }
        self.children.values().find_map(|child| child.first_free())
    }
}

/// Copy-on-write prefix tree of endpoints
pub struct NamingTree<T> {
    root: ArcSwap<Node<T>>,
    writer: Mutex<()>,
}

impl<T> fmt::Debug for NamingTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingTree").finish_non_exhaustive()
    }
}

impl<T: Resolvable> Default for NamingTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn local_part(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

fn segments(name: &str) -> Result<Vec<&str>, NamingError> {
    let local = local_part(name);
    let parts: Vec<&str> = local.split('/').collect();
    if local.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Err(NamingError::InvalidName { name: name.to_string() });
    }
    Ok(parts)
}

impl<T: Resolvable> NamingTree<T> {
    pub fn new() -> Self {
        Self {
            root: ArcSwap::from_pointee(Node::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Register `value` under an exact name
    pub fn register(&self, name: &str, value: Arc<T>) -> Result<(), NamingError> {
        let parts = segments(name)?;
        if parts.iter().any(|part| part.contains(&['*', '$'][..])) {
            return Err(NamingError::InvalidName { name: name.to_string() });
        }

        let _writer = self.writer.lock();
        let root = self.root.load_full();
        let updated = Self::insert(&root, &parts, value)
            .map_err(|_| NamingError::Duplicate { name: name.to_string() })?;
        self.root.store(Arc::new(updated));
        debug!(endpoint = name, "endpoint registered");
        Ok(())
    }

    fn insert(node: &Node<T>, parts: &[&str], value: Arc<T>) -> Result<Node<T>, ()> {
        let mut copy = node.copy();
        match parts.split_first() {
            None => {
                if copy.value.is_some() {
                    return Err(());
                }
                copy.value = Some(value);
            }
            Some((head, rest)) => {
                let child = match copy.children.get(*head) {
                    Some(child) => Self::insert(child, rest, value)?,
                    None => Self::insert(&Node::empty(), rest, value)?,
                };
                copy.children.insert((*head).to_string(), Arc::new(child));
            }
        }
        Ok(copy)
    }

    /// Remove an exact name, returning what was registered there
    pub fn unregister(&self, name: &str) -> Option<Arc<T>> {
        let parts = segments(name).ok()?;
        let _writer = self.writer.lock();
        let root = self.root.load_full();
        let (updated, removed) = Self::remove(&root, &parts)?;
        self.root.store(Arc::new(updated));
        debug!(endpoint = name, "endpoint unregistered");
        Some(removed)
    }

    fn remove(node: &Node<T>, parts: &[&str]) -> Option<(Node<T>, Arc<T>)> {
        let mut copy = node.copy();
        match parts.split_first() {
            None => {
                let removed = copy.value.take()?;
                Some((copy, removed))
            }
            Some((head, rest)) => {
                let (child, removed) = Self::remove(copy.children.get(*head)?, rest)?;
                if child.is_empty() {
                    copy.children.remove(*head);
                } else {
                    copy.children.insert((*head).to_string(), Arc::new(child));
                }
                Some((copy, removed))
            }
        }
    }

    /// Resolve `name` into `out`, returning the number of entries written.
    ///
    /// Never writes more than `out.len()` entries.
    pub fn find(&self, name: &str, out: &mut [Option<Arc<T>>]) -> Result<usize, NamingError> {
        let parts = segments(name)?;
        let root = self.root.load();
        let mut node: &Node<T> = &root;

        for (index, part) in parts.iter().enumerate() {
            let last = index + 1 == parts.len();
            match *part {
                "*" if last => {
                    // Empty nodes are pruned, so only an empty root has nothing below it
                    if node.is_empty() {
                        return Err(NamingError::unknown(name));
                    }
                    let mut written = 0;
                    node.fill(out, &mut written);
                    return Ok(written);
                }
                "$" if last => {
                    if node.children.is_empty() {
                        return Err(NamingError::unknown(name));
                    }
                    let free = node
                        .children
                        .values()
                        .find_map(|child| child.first_free())
                        .ok_or_else(|| NamingError::Unavailable { name: name.to_string() })?;
                    return Ok(match out.first_mut() {
                        Some(slot) => {
                            *slot = Some(free.clone());
                            1
                        }
                        None => 0,
                    });
                }
                _ => {
                    node = node
                        .children
                        .get(*part)
                        .ok_or_else(|| NamingError::unknown(name))?;
                }
            }
        }

        let value = node.value.as_ref().ok_or_else(|| NamingError::unknown(name))?;
        Ok(match out.first_mut() {
            Some(slot) => {
                *slot = Some(value.clone());
                1
            }
            None => 0,
        })
    }

    /// Resolve a name expected to match a single entry
    pub fn find_one(&self, name: &str) -> Result<Arc<T>, NamingError> {
        let mut out = [None];
        self.find(name, &mut out)?;
        out[0].take().ok_or_else(|| NamingError::unknown(name))
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.root.load().count()
    }
}

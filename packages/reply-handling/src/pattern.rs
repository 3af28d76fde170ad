//! Wildcard sequence patterns and the registry that matches them.
//!
//! A pattern is a sequence of content items. Two reserved items, the
//! [`Sentinels`], are not matched literally:
//!
//! - `instance` matches exactly one arbitrary item
//! - `series` matches any run of items, including an empty one
//!
//! With `'?'` and `'*'` as sentinels over `char` content, `"*world?"` matches
//! `"Hello, world!"` and `"**"` matches everything.
//!
//! [`PatternRegistry`] is the contract the correlation engine consumes: it is
//! not thread-safe on its own and is always wrapped in a
//! [`RegistryGuard`](crate::RegistryGuard). [`PatternDictionary`] is the trie
//! implementation used by the waiters.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::Content;

/// The two content values reserved for wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels<T> {
    /// Matches exactly one item.
    pub instance: T,
    /// Matches zero or more items.
    pub series: T,
}

impl<T: Content> Sentinels<T> {
    /// Create the sentinel pair.
    pub fn new(instance: T, series: T) -> Self {
        Self { instance, series }
    }
}

/// Mapping from wildcard patterns to payload values.
///
/// Multiple entries may share a pattern, and the same value may be
/// registered under several patterns.
pub trait PatternRegistry<T, V> {
    /// Register `value` under `pattern`.
    fn add(&mut self, pattern: &[T], value: V);

    /// Remove one entry whose pattern is `pattern` and whose value equals
    /// `value`. Returns false if no such entry exists.
    fn remove(&mut self, pattern: &[T], value: &V) -> bool;

    /// Every value whose pattern matches the concrete `message`.
    fn collect(&self, message: &[T]) -> Vec<V>;

    /// Number of registered entries.
    fn len(&self) -> usize;

    /// Returns true if nothing is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Trie
// =============================================================================

struct Node<T, V> {
    literal: BTreeMap<T, Node<T, V>>,
    any_one: Option<Box<Node<T, V>>>,
    any_run: Option<Box<Node<T, V>>>,
    values: Vec<V>,
}

impl<T: Ord, V> Node<T, V> {
    fn new() -> Self {
        Self {
            literal: BTreeMap::new(),
            any_one: None,
            any_run: None,
            values: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.literal.is_empty()
            && self.any_one.is_none()
            && self.any_run.is_none()
    }
}

/// Which outgoing edge a pattern item follows.
enum Edge<'a, T> {
    Literal(&'a T),
    AnyOne,
    AnyRun,
}

/// Trie-backed [`PatternRegistry`].
///
/// Literal items are keyed by their total order; each sentinel has a
/// dedicated edge. Matching walks every edge that can consume the next item
/// and visits each (node, position) pair at most once, so a value is reported
/// once per registration no matter how many wildcard paths reach it.
pub struct PatternDictionary<T, V> {
    sentinels: Sentinels<T>,
    root: Node<T, V>,
    len: usize,
}

impl<T: Content, V: Clone + PartialEq> PatternDictionary<T, V> {
    /// Create an empty dictionary using `sentinels` as wildcards.
    pub fn new(sentinels: Sentinels<T>) -> Self {
        Self {
            sentinels,
            root: Node::new(),
            len: 0,
        }
    }

    /// The wildcard values this dictionary recognises.
    pub fn sentinels(&self) -> &Sentinels<T> {
        &self.sentinels
    }

    /// Returns true if `message` matches at least one registered pattern.
    pub fn matches(&self, message: &[T]) -> bool {
        !self.collect(message).is_empty()
    }

    fn edge<'a>(&self, item: &'a T) -> Edge<'a, T> {
        if *item == self.sentinels.series {
            Edge::AnyRun
        } else if *item == self.sentinels.instance {
            Edge::AnyOne
        } else {
            Edge::Literal(item)
        }
    }

    /// Depth-first match of `message`. Also returns how many states were
    /// pushed, which stays linear in the message length.
    fn search(&self, message: &[T]) -> (Vec<V>, usize) {
        let mut found = Vec::new();
        // (node, position, entered through a run edge)
        let mut visited: HashSet<(*const Node<T, V>, usize, bool)> = HashSet::new();
        let mut stack: Vec<(&Node<T, V>, usize, bool)> = vec![(&self.root, 0, false)];
        let mut pushed = 1;

        while let Some((node, pos, in_run)) = stack.pop() {
            if !visited.insert((node as *const Node<T, V>, pos, in_run)) {
                continue;
            }
            let before = stack.len();

            // A run node loops on itself: swallow one more item, or stop here
            if in_run && pos < message.len() {
                stack.push((node, pos + 1, true));
            }

            if pos == message.len() {
                found.extend(node.values.iter().cloned());
            }

            if let Some(run) = node.any_run.as_deref() {
                stack.push((run, pos, true));
            }

            if let Some(item) = message.get(pos) {
                if let Some(one) = node.any_one.as_deref() {
                    stack.push((one, pos + 1, false));
                }
                if let Some(child) = node.literal.get(item) {
                    stack.push((child, pos + 1, false));
                }
            }
            pushed += stack.len() - before;
        }

        (found, pushed)
    }

    fn remove_at(node: &mut Node<T, V>, edges: &[Edge<'_, T>], value: &V) -> bool {
        let Some((first, rest)) = edges.split_first() else {
            return match node.values.iter().position(|v| v == value) {
                Some(index) => {
                    node.values.remove(index);
                    true
                }
                None => false,
            };
        };

        match first {
            Edge::Literal(item) => {
                let Some(child) = node.literal.get_mut(*item) else {
                    return false;
                };
                let removed = Self::remove_at(child, rest, value);
                if removed && child.is_empty() {
                    node.literal.remove(*item);
                }
                removed
            }
            Edge::AnyOne => Self::remove_boxed(&mut node.any_one, rest, value),
            Edge::AnyRun => Self::remove_boxed(&mut node.any_run, rest, value),
        }
    }

    fn remove_boxed(
        slot: &mut Option<Box<Node<T, V>>>,
        rest: &[Edge<'_, T>],
        value: &V,
    ) -> bool {
        let Some(child) = slot.as_deref_mut() else {
            return false;
        };
        let removed = Self::remove_at(child, rest, value);
        if removed && child.is_empty() {
            *slot = None;
        }
        removed
    }
}

impl<T: Content, V: Clone + PartialEq> PatternRegistry<T, V> for PatternDictionary<T, V> {
    fn add(&mut self, pattern: &[T], value: V) {
        let mut node = &mut self.root;
        for item in pattern {
            node = if *item == self.sentinels.series {
                &mut **node.any_run.get_or_insert_with(|| Box::new(Node::new()))
            } else if *item == self.sentinels.instance {
                &mut **node.any_one.get_or_insert_with(|| Box::new(Node::new()))
            } else {
                node.literal.entry(item.clone()).or_insert_with(Node::new)
            };
        }
        node.values.push(value);
        self.len += 1;
    }

    fn remove(&mut self, pattern: &[T], value: &V) -> bool {
        let edges: Vec<Edge<'_, T>> = pattern.iter().map(|item| self.edge(item)).collect();
        let removed = Self::remove_at(&mut self.root, &edges, value);
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn collect(&self, message: &[T]) -> Vec<V> {
        self.search(message).0
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl<T: fmt::Debug, V> fmt::Debug for PatternDictionary<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternDictionary")
            .field("sentinels", &self.sentinels)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

//! Persistent (immutable) AVL tree with dual addressing modes.
//!
//! This module provides [`PersistentAvlTree`], an immutable self-balancing
//! binary tree that serves simultaneously as an index-addressable sequence
//! and as a comparator-sorted collection, using structural sharing for
//! efficient operations.
//!
//! # Overview
//!
//! Every node caches the size and height of its subtree, which makes both
//! addressing modes cheap over the same structure:
//!
//! - O(log N) insert/remove/replace by position
//! - O(log N) insert/remove/search by comparator
//! - O(log N) get by position
//! - O(log N + k) ranged enumeration of k elements
//! - O(1) len and `is_empty`
//!
//! All operations return new trees without modifying the original, and
//! structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use arbora::PersistentAvlTree;
//!
//! // Index mode: a balanced-tree-backed list.
//! let sequence = PersistentAvlTree::new()
//!     .insert_at(0, "b").unwrap()
//!     .insert_at(0, "a").unwrap()
//!     .insert_at(2, "c").unwrap();
//! assert_eq!(sequence.get(1), Some(&"b"));
//!
//! // Comparator mode: a sorted collection.
//! let sorted = PersistentAvlTree::new()
//!     .insert_by(3, i32::cmp)
//!     .insert_by(1, i32::cmp)
//!     .insert_by(2, i32::cmp);
//! let ascending: Vec<i32> = sorted.iter().copied().collect();
//! assert_eq!(ascending, vec![1, 2, 3]);
//! ```
//!
//! # Internal Structure
//!
//! The AVL tree maintains the following invariants at every node:
//! 1. The heights of the two child subtrees differ by at most one
//! 2. The cached `size` equals the number of reachable nodes
//! 3. The cached `height` equals `1 + max(left.height, right.height)`
//! 4. In comparator mode, the left subtree holds smaller values and the
//!    right subtree holds greater values under the active comparator
//! 5. In index mode, a node's position within its subtree is `left.size`,
//!    so index addressing and in-order position are the same sequence
//!
//! These invariants bound the tree height by `1.44 * log2(N + 2)`.

use crate::ReferenceCounter;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

// =============================================================================
// Node Definition
// =============================================================================

/// Inline capacity of traversal stacks. Seeks and iteration hold at most
/// one node per tree level, and an AVL tree deeper than 32 levels would
/// need hundreds of millions of elements, so iteration never allocates
/// in practice.
const STACK_CAPACITY: usize = 32;

/// An owned, shared reference to a subtree. `None` is the empty tree: it
/// costs nothing per leaf, can never be mutated, and is the same "instance"
/// everywhere by construction.
type Link<T> = Option<ReferenceCounter<Node<T>>>;

/// Internal node structure for the AVL tree.
///
/// Nodes are immutable: every update builds new nodes along the touched
/// path and shares the rest.
#[derive(Clone)]
struct Node<T> {
    value: T,
    left: Link<T>,
    right: Link<T>,
    /// Count of nodes in the subtree rooted here.
    size: usize,
    /// `1 + max(left.height, right.height)`; a leaf has height 1.
    height: usize,
}

/// Size of a possibly-empty subtree.
fn link_size<T>(link: &Link<T>) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

/// Height of a possibly-empty subtree.
fn link_height<T>(link: &Link<T>) -> usize {
    link.as_ref().map_or(0, |node| node.height)
}

impl<T> Node<T> {
    /// Creates a node with no children.
    fn leaf(value: T) -> Self {
        Self {
            value,
            left: None,
            right: None,
            size: 1,
            height: 1,
        }
    }

    /// Combines a value with two subtrees, computing the cached size and
    /// height from the children in O(1).
    fn new(value: T, left: Link<T>, right: Link<T>) -> Self {
        let size = 1 + link_size(&left) + link_size(&right);
        let height = 1 + link_height(&left).max(link_height(&right));
        Self {
            value,
            left,
            right,
            size,
            height,
        }
    }

    /// Creates a copy of this node with new children.
    fn with_children(&self, left: Link<T>, right: Link<T>) -> Self
    where
        T: Clone,
    {
        Self::new(self.value.clone(), left, right)
    }

    /// Left height minus right height. Bounded to `{-1, 0, 1}` by the AVL
    /// invariant; `2` or `-2` appears transiently while rebalancing.
    #[allow(clippy::cast_possible_wrap)]
    fn balance_factor(&self) -> isize {
        // Heights are bounded by 1.44 * log2(N + 2), far below isize::MAX.
        link_height(&self.left) as isize - link_height(&self.right) as isize
    }
}

// =============================================================================
// PersistentAvlTree Definition
// =============================================================================

/// A persistent (immutable) AVL tree addressable both by position and by
/// comparator order.
///
/// `PersistentAvlTree` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns. The same
/// tree can be used as a sequence (index mode) or as a sorted collection
/// (comparator mode); the two method families share the node representation
/// and the rebalancing engine.
///
/// The tree imposes no ordering of its own. Comparator-mode methods take the
/// comparator per call, and callers are responsible for passing a consistent
/// total order across calls that should observe each other's elements.
///
/// # Time Complexity
///
/// | Operation                | Complexity    |
/// |--------------------------|---------------|
/// | `new`                    | O(1)          |
/// | `get`                    | O(log N)      |
/// | `insert_at`/`remove_at`  | O(log N)      |
/// | `update_at`              | O(log N)      |
/// | `insert_by`/`remove_by`  | O(log N)      |
/// | `find_by`                | O(log N)      |
/// | `first`/`last`           | O(log N)      |
/// | `iter_range` (k results) | O(log N + k)  |
/// | `len`/`is_empty`         | O(1)          |
///
/// # Examples
///
/// ```rust
/// use arbora::PersistentAvlTree;
///
/// let tree = PersistentAvlTree::singleton(42);
/// assert_eq!(tree.get(0), Some(&42));
///
/// // Mutations never disturb existing versions.
/// let longer = tree.insert_at(1, 43).unwrap();
/// assert_eq!(tree.len(), 1);
/// assert_eq!(longer.len(), 2);
/// ```
#[derive(Clone)]
pub struct PersistentAvlTree<T> {
    /// Root node of the tree; `None` is the empty tree.
    root: Link<T>,
}

impl<T> PersistentAvlTree<T> {
    /// Creates a new empty tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = PersistentAvlTree::new();
    /// assert!(tree.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Returns the number of elements in the tree.
    ///
    /// # Complexity
    ///
    /// O(1) — the root caches its subtree size.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (0..5).collect();
    /// assert_eq!(tree.len(), 5);
    /// ```
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    /// Returns `true` if the tree contains no elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let empty: PersistentAvlTree<i32> = PersistentAvlTree::new();
    /// assert!(empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the height of the tree (0 for an empty tree, 1 for a single
    /// node).
    ///
    /// The AVL invariant bounds the height by `1.44 * log2(N + 2)`, so this
    /// is primarily useful as a balance diagnostic.
    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        link_height(&self.root)
    }

    /// Returns a reference to the element at the given position.
    ///
    /// Returns `None` if `index` is out of range; positions are never
    /// clamped.
    ///
    /// # Complexity
    ///
    /// O(log N) — an iterative descent steered by cached subtree sizes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (10..15).collect();
    /// assert_eq!(tree.get(2), Some(&12));
    /// assert_eq!(tree.get(5), None);
    /// ```
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        let mut cursor = self.root.as_deref()?;
        let mut index = index;
        if index >= cursor.size {
            return None;
        }
        loop {
            let left_size = link_size(&cursor.left);
            match index.cmp(&left_size) {
                Ordering::Less => cursor = cursor.left.as_deref()?,
                Ordering::Greater => {
                    index -= left_size + 1;
                    cursor = cursor.right.as_deref()?;
                }
                Ordering::Equal => return Some(&cursor.value),
            }
        }
    }

    /// Returns a reference to the element at position 0.
    ///
    /// In comparator mode this is the minimum under the active comparator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (3..8).collect();
    /// assert_eq!(tree.first(), Some(&3));
    /// ```
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        let mut cursor = self.root.as_deref()?;
        while let Some(left) = cursor.left.as_deref() {
            cursor = left;
        }
        Some(&cursor.value)
    }

    /// Returns a reference to the element at position `len - 1`.
    ///
    /// In comparator mode this is the maximum under the active comparator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (3..8).collect();
    /// assert_eq!(tree.last(), Some(&7));
    /// ```
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        let mut cursor = self.root.as_deref()?;
        while let Some(right) = cursor.right.as_deref() {
            cursor = right;
        }
        Some(&cursor.value)
    }

    /// Searches for an element with a comparator probe, as in
    /// [`slice::binary_search_by`].
    ///
    /// The probe receives a stored element and returns its ordering relative
    /// to the sought value: `Less` sends the search right, `Greater` sends it
    /// left, and `Equal` is a match. The tree must have been built with a
    /// comparator consistent with the probe.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::new()
    ///     .insert_by(30, i32::cmp)
    ///     .insert_by(10, i32::cmp)
    ///     .insert_by(20, i32::cmp);
    ///
    /// assert_eq!(tree.find_by(|element| element.cmp(&20)), Some(&20));
    /// assert_eq!(tree.find_by(|element| element.cmp(&25)), None);
    /// ```
    #[must_use]
    pub fn find_by<F>(&self, mut probe: F) -> Option<&T>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut cursor = self.root.as_deref();
        while let Some(node) = cursor {
            match probe(&node.value) {
                Ordering::Less => cursor = node.right.as_deref(),
                Ordering::Greater => cursor = node.left.as_deref(),
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    /// Returns `true` if a comparator probe finds a match.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::new().insert_by(7, i32::cmp);
    /// assert!(tree.contains_by(|element| element.cmp(&7)));
    /// assert!(!tree.contains_by(|element| element.cmp(&8)));
    /// ```
    #[must_use]
    pub fn contains_by<F>(&self, probe: F) -> bool
    where
        F: FnMut(&T) -> Ordering,
    {
        self.find_by(probe).is_some()
    }

    /// Returns an iterator over elements in ascending position order.
    ///
    /// Iteration uses an explicit stack rather than recursion, so deep
    /// trees cannot overflow the call stack.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (1..=3).collect();
    /// let elements: Vec<i32> = tree.iter().copied().collect();
    /// assert_eq!(elements, vec![1, 2, 3]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentAvlTreeIterator<'_, T> {
        PersistentAvlTreeIterator::new(&self.root, 0, self.len(), false)
    }

    /// Returns an iterator over elements in descending position order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (1..=3).collect();
    /// let elements: Vec<i32> = tree.iter_descending().copied().collect();
    /// assert_eq!(elements, vec![3, 2, 1]);
    /// ```
    #[must_use]
    pub fn iter_descending(&self) -> PersistentAvlTreeIterator<'_, T> {
        let length = self.len();
        PersistentAvlTreeIterator::new(&self.root, length.saturating_sub(1), length, true)
    }

    /// Returns an iterator over the elements at positions
    /// `[start, start + count)`, ascending.
    ///
    /// The window is clipped to the valid range; a window entirely out of
    /// range yields nothing. The iterator seeks directly to `start` using
    /// cached subtree sizes and stops as soon as the window closes, so it
    /// never visits the rest of the tree.
    ///
    /// # Complexity
    ///
    /// O(log N + k) for k yielded elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = [10, 20, 30, 40, 50, 60].into_iter().collect();
    /// let window: Vec<i32> = tree.iter_range(2, 3).copied().collect();
    /// assert_eq!(window, vec![30, 40, 50]);
    /// ```
    #[must_use]
    pub fn iter_range(&self, start: usize, count: usize) -> PersistentAvlTreeIterator<'_, T> {
        let end = start.saturating_add(count).min(self.len());
        let remaining = end.saturating_sub(start);
        PersistentAvlTreeIterator::new(&self.root, start, remaining, false)
    }

    /// Returns an iterator over the mirrored window: the elements at
    /// positions `start, start - 1, ..., start - count + 1`, descending.
    ///
    /// The window is clipped to the valid range on both sides.
    ///
    /// # Complexity
    ///
    /// O(log N + k) for k yielded elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = [10, 20, 30, 40, 50, 60].into_iter().collect();
    /// let window: Vec<i32> = tree.iter_range_descending(3, 2).copied().collect();
    /// assert_eq!(window, vec![40, 30]);
    /// ```
    #[must_use]
    pub fn iter_range_descending(
        &self,
        start: usize,
        count: usize,
    ) -> PersistentAvlTreeIterator<'_, T> {
        let length = self.len();
        let highest = start.min(length.saturating_sub(1));
        let lowest = start.saturating_sub(count.saturating_sub(1));
        let remaining = if count == 0 || length == 0 || lowest > highest {
            0
        } else {
            highest - lowest + 1
        };
        PersistentAvlTreeIterator::new(&self.root, highest, remaining, true)
    }
}

// =============================================================================
// Mutations
// =============================================================================

impl<T: Clone> PersistentAvlTree<T> {
    /// Creates a tree containing a single element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::singleton(42);
    /// assert_eq!(tree.len(), 1);
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(value: T) -> Self {
        Self {
            root: Some(ReferenceCounter::new(Node::leaf(value))),
        }
    }

    /// Inserts an element at the given position, shifting every element at
    /// an equal or greater position up by one.
    ///
    /// This is list insertion, not an upsert: the tree grows by one element
    /// for every accepted call. Valid positions are `0..=len`; `len` appends.
    /// Returns `None` if `index > len`, leaving nothing allocated.
    ///
    /// # Complexity
    ///
    /// O(log N) time and O(log N) newly allocated nodes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<&str> = ["a", "c"].into_iter().collect();
    /// let tree = tree.insert_at(1, "b").unwrap();
    ///
    /// let elements: Vec<&str> = tree.iter().copied().collect();
    /// assert_eq!(elements, vec!["a", "b", "c"]);
    /// assert_eq!(tree.insert_at(9, "x"), None);
    /// ```
    #[must_use]
    pub fn insert_at(&self, index: usize, value: T) -> Option<Self> {
        if index > self.len() {
            return None;
        }
        Some(Self {
            root: Some(Self::insert_at_node(&self.root, index, value)),
        })
    }

    /// Inserts an element at position 0.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::new().push_front(2).push_front(1);
    /// assert_eq!(tree.first(), Some(&1));
    /// ```
    #[must_use]
    pub fn push_front(&self, value: T) -> Self {
        Self {
            root: Some(Self::insert_at_node(&self.root, 0, value)),
        }
    }

    /// Inserts an element at position `len`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::new().push_back(1).push_back(2);
    /// assert_eq!(tree.last(), Some(&2));
    /// ```
    #[must_use]
    pub fn push_back(&self, value: T) -> Self {
        Self {
            root: Some(Self::insert_at_node(&self.root, self.len(), value)),
        }
    }

    /// Recursive helper for positional insert. The caller has validated
    /// `index <= link_size(link)`.
    fn insert_at_node(link: &Link<T>, index: usize, value: T) -> ReferenceCounter<Node<T>> {
        match link {
            None => ReferenceCounter::new(Node::leaf(value)),
            Some(node) => {
                let left_size = link_size(&node.left);
                let rebuilt = if index <= left_size {
                    let new_left = Self::insert_at_node(&node.left, index, value);
                    node.with_children(Some(new_left), node.right.clone())
                } else {
                    let new_right =
                        Self::insert_at_node(&node.right, index - left_size - 1, value);
                    node.with_children(node.left.clone(), Some(new_right))
                };
                ReferenceCounter::new(Self::rebalance(rebuilt))
            }
        }
    }

    /// Inserts an element under a comparator order.
    ///
    /// If an element compares equal to `value`, it is replaced and the
    /// length does not change (an upsert keyed by comparator equality);
    /// otherwise the tree grows by one element.
    ///
    /// The comparator receives `(&value, &stored)` and must be a total order
    /// consistent with previous comparator-mode calls on this tree.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let by_first = |a: &(i32, &str), b: &(i32, &str)| a.0.cmp(&b.0);
    /// let tree = PersistentAvlTree::new()
    ///     .insert_by((1, "one"), by_first)
    ///     .insert_by((1, "ONE"), by_first);
    ///
    /// assert_eq!(tree.len(), 1); // Upsert, not a duplicate
    /// assert_eq!(tree.get(0), Some(&(1, "ONE")));
    /// ```
    #[must_use]
    pub fn insert_by<F>(&self, value: T, mut compare: F) -> Self
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let (root, _) = Self::insert_by_node(&self.root, value, &mut compare);
        Self { root: Some(root) }
    }

    /// Recursive helper for sorted insert.
    /// Returns (`new_node`, `was_added`) where `was_added` is false on an
    /// upsert of an existing element.
    fn insert_by_node<F>(
        link: &Link<T>,
        value: T,
        compare: &mut F,
    ) -> (ReferenceCounter<Node<T>>, bool)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        match link {
            None => (ReferenceCounter::new(Node::leaf(value)), true),
            Some(node) => match compare(&value, &node.value) {
                Ordering::Less => {
                    let (new_left, added) = Self::insert_by_node(&node.left, value, compare);
                    let rebuilt = node.with_children(Some(new_left), node.right.clone());
                    (ReferenceCounter::new(Self::rebalance(rebuilt)), added)
                }
                Ordering::Greater => {
                    let (new_right, added) = Self::insert_by_node(&node.right, value, compare);
                    let rebuilt = node.with_children(node.left.clone(), Some(new_right));
                    (ReferenceCounter::new(Self::rebalance(rebuilt)), added)
                }
                Ordering::Equal => {
                    // Replace the stored value; the shape is unchanged, so
                    // no rebalance is needed.
                    let replaced = Node::new(value, node.left.clone(), node.right.clone());
                    (ReferenceCounter::new(replaced), false)
                }
            },
        }
    }

    /// Removes the element at the given position, shifting every element at
    /// a greater position down by one.
    ///
    /// Returns the new tree together with the removed value, or `None` if
    /// `index >= len` — an out-of-range removal fails explicitly and builds
    /// nothing.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (10..14).collect();
    /// let (rest, removed) = tree.remove_at(1).unwrap();
    ///
    /// assert_eq!(removed, 11);
    /// assert_eq!(rest.len(), 3);
    /// assert_eq!(tree.len(), 4); // Original unchanged
    /// assert_eq!(tree.remove_at(4), None);
    /// ```
    #[must_use]
    pub fn remove_at(&self, index: usize) -> Option<(Self, T)> {
        let (root, removed) = Self::remove_at_node(&self.root, index)?;
        Some((Self { root }, removed))
    }

    /// Recursive helper for positional remove. Returns `None` when the
    /// index falls outside the subtree.
    fn remove_at_node(link: &Link<T>, index: usize) -> Option<(Link<T>, T)> {
        let node = link.as_ref()?;
        if index >= node.size {
            return None;
        }
        let left_size = link_size(&node.left);
        match index.cmp(&left_size) {
            Ordering::Less => {
                let (new_left, removed) = Self::remove_at_node(&node.left, index)?;
                let rebuilt = node.with_children(new_left, node.right.clone());
                Some((
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    removed,
                ))
            }
            Ordering::Greater => {
                let (new_right, removed) =
                    Self::remove_at_node(&node.right, index - left_size - 1)?;
                let rebuilt = node.with_children(node.left.clone(), new_right);
                Some((
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    removed,
                ))
            }
            Ordering::Equal => Some((Self::remove_root(node), node.value.clone())),
        }
    }

    /// Removes the element matching `probe` under a comparator order.
    ///
    /// Returns the new tree together with the removed value. A miss returns
    /// `None` without building anything, so the caller keeps the original
    /// tree and can distinguish "removed" from "not found".
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree = PersistentAvlTree::new()
    ///     .insert_by(1, i32::cmp)
    ///     .insert_by(2, i32::cmp);
    ///
    /// let (rest, removed) = tree.remove_by(&1, i32::cmp).unwrap();
    /// assert_eq!(removed, 1);
    /// assert_eq!(rest.len(), 1);
    /// assert_eq!(tree.remove_by(&9, i32::cmp), None); // Not found
    /// ```
    #[must_use]
    pub fn remove_by<F>(&self, probe: &T, mut compare: F) -> Option<(Self, T)>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let (root, removed) = Self::remove_by_node(&self.root, probe, &mut compare)?;
        Some((Self { root }, removed))
    }

    /// Recursive helper for sorted remove. Returns `None` on a miss before
    /// rebuilding any ancestor.
    fn remove_by_node<F>(link: &Link<T>, probe: &T, compare: &mut F) -> Option<(Link<T>, T)>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let node = link.as_ref()?;
        match compare(probe, &node.value) {
            Ordering::Less => {
                let (new_left, removed) = Self::remove_by_node(&node.left, probe, compare)?;
                let rebuilt = node.with_children(new_left, node.right.clone());
                Some((
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    removed,
                ))
            }
            Ordering::Greater => {
                let (new_right, removed) = Self::remove_by_node(&node.right, probe, compare)?;
                let rebuilt = node.with_children(node.left.clone(), new_right);
                Some((
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    removed,
                ))
            }
            Ordering::Equal => Some((Self::remove_root(node), node.value.clone())),
        }
    }

    /// Replaces the element at the given position without changing the
    /// tree's shape.
    ///
    /// Returns `None` if `index >= len`.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbora::PersistentAvlTree;
    ///
    /// let tree: PersistentAvlTree<i32> = (0..3).collect();
    /// let updated = tree.update_at(1, 99).unwrap();
    ///
    /// assert_eq!(updated.get(1), Some(&99));
    /// assert_eq!(tree.get(1), Some(&1)); // Original unchanged
    /// ```
    #[must_use]
    pub fn update_at(&self, index: usize, value: T) -> Option<Self> {
        let root = Self::update_at_node(&self.root, index, value)?;
        Some(Self { root: Some(root) })
    }

    /// Recursive helper for positional replace. No rebalancing: the shape
    /// is untouched.
    fn update_at_node(link: &Link<T>, index: usize, value: T) -> Option<ReferenceCounter<Node<T>>> {
        let node = link.as_ref()?;
        if index >= node.size {
            return None;
        }
        let left_size = link_size(&node.left);
        match index.cmp(&left_size) {
            Ordering::Less => {
                let new_left = Self::update_at_node(&node.left, index, value)?;
                Some(ReferenceCounter::new(
                    node.with_children(Some(new_left), node.right.clone()),
                ))
            }
            Ordering::Greater => {
                let new_right = Self::update_at_node(&node.right, index - left_size - 1, value)?;
                Some(ReferenceCounter::new(
                    node.with_children(node.left.clone(), Some(new_right)),
                ))
            }
            Ordering::Equal => Some(ReferenceCounter::new(Node::new(
                value,
                node.left.clone(),
                node.right.clone(),
            ))),
        }
    }

    // =========================================================================
    // Root Removal
    // =========================================================================

    /// Removes the value at `node`, preserving both the balance and the
    /// order invariants.
    ///
    /// With two children, the replacement is promoted from the larger side:
    /// the minimum of the right subtree when the left has fewer nodes,
    /// otherwise the maximum of the left subtree. Shrinking the larger side
    /// keeps the tree shallow.
    fn remove_root(node: &Node<T>) -> Link<T> {
        match (&node.left, &node.right) {
            (None, None) => None,
            (Some(left), None) => Some(left.clone()),
            (None, Some(right)) => Some(right.clone()),
            (Some(left), Some(right)) => {
                let rebuilt = if left.size < right.size {
                    let (new_right, successor) = Self::detach_min(right);
                    Node::new(successor, node.left.clone(), new_right)
                } else {
                    let (new_left, predecessor) = Self::detach_max(left);
                    Node::new(predecessor, new_left, node.right.clone())
                };
                Some(ReferenceCounter::new(Self::rebalance(rebuilt)))
            }
        }
    }

    /// Detaches the minimum of a subtree, returning the subtree without it
    /// and the detached value.
    fn detach_min(node: &Node<T>) -> (Link<T>, T) {
        match node.left.as_deref() {
            None => (node.right.clone(), node.value.clone()),
            Some(left) => {
                let (new_left, detached) = Self::detach_min(left);
                let rebuilt = node.with_children(new_left, node.right.clone());
                (
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    detached,
                )
            }
        }
    }

    /// Detaches the maximum of a subtree, returning the subtree without it
    /// and the detached value.
    fn detach_max(node: &Node<T>) -> (Link<T>, T) {
        match node.right.as_deref() {
            None => (node.left.clone(), node.value.clone()),
            Some(right) => {
                let (new_right, detached) = Self::detach_max(right);
                let rebuilt = node.with_children(node.left.clone(), new_right);
                (
                    Some(ReferenceCounter::new(Self::rebalance(rebuilt))),
                    detached,
                )
            }
        }
    }

    // =========================================================================
    // Rebalancing Engine
    // =========================================================================

    /// Restores the AVL balance invariant at a freshly rebuilt node.
    ///
    /// A structural change moves the balance factor by at most one, so the
    /// only reachable out-of-balance factors here are 2 and -2, and the
    /// heavy child's own factor is in `{-1, 0, 1}`. Anything else is a bug
    /// in the maintenance logic and aborts loudly rather than returning a
    /// corrupt tree.
    fn rebalance(node: Node<T>) -> Node<T> {
        let factor = node.balance_factor();
        if factor.abs() <= 1 {
            return node;
        }
        match factor {
            2 => {
                let Some(left) = node.left.clone() else {
                    unreachable!("left-heavy node without a left subtree");
                };
                match left.balance_factor() {
                    0 | 1 => Self::rotate_right(node),
                    -1 => {
                        // Double rotation: rotate the left child left, then
                        // the whole node right.
                        let new_left = Self::rotate_left((*left).clone());
                        let shifted = node.with_children(
                            Some(ReferenceCounter::new(new_left)),
                            node.right.clone(),
                        );
                        Self::rotate_right(shifted)
                    }
                    other => unreachable!("left subtree balance factor {other} outside -1..=1"),
                }
            }
            -2 => {
                let Some(right) = node.right.clone() else {
                    unreachable!("right-heavy node without a right subtree");
                };
                match right.balance_factor() {
                    -1 | 0 => Self::rotate_left(node),
                    1 => {
                        // Mirror image: rotate the right child right, then
                        // the whole node left.
                        let new_right = Self::rotate_right((*right).clone());
                        let shifted = node.with_children(
                            node.left.clone(),
                            Some(ReferenceCounter::new(new_right)),
                        );
                        Self::rotate_left(shifted)
                    }
                    other => unreachable!("right subtree balance factor {other} outside -1..=1"),
                }
            }
            _ => unreachable!("balance factor {factor} outside the AVL range"),
        }
    }

    /// Single right rotation: promotes the left child, demoting this node
    /// into its right subtree. Order is preserved because only parent/child
    /// relationships move, never the relative position of values.
    fn rotate_right(node: Node<T>) -> Node<T> {
        if let Some(left) = node.left {
            let demoted = Node::new(node.value, left.right.clone(), node.right);
            Node::new(
                left.value.clone(),
                left.left.clone(),
                Some(ReferenceCounter::new(demoted)),
            )
        } else {
            node
        }
    }

    /// Single left rotation: promotes the right child, demoting this node
    /// into its left subtree.
    fn rotate_left(node: Node<T>) -> Node<T> {
        if let Some(right) = node.right {
            let demoted = Node::new(node.value, node.left, right.left.clone());
            Node::new(
                right.value.clone(),
                Some(ReferenceCounter::new(demoted)),
                right.right.clone(),
            )
        } else {
            node
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Default for PersistentAvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentAvlTree<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

impl<T: fmt::Display> fmt::Display for PersistentAvlTree<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[")?;
        for (index, element) in self.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{element}")?;
        }
        write!(formatter, "]")
    }
}

impl<T: PartialEq> PartialEq for PersistentAvlTree<T> {
    /// Trees are equal when their in-order sequences are equal; the internal
    /// shape is not observable.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for PersistentAvlTree<T> {}

impl<T: Hash> Hash for PersistentAvlTree<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for element in self {
            element.hash(state);
        }
    }
}

impl<T: Clone> FromIterator<T> for PersistentAvlTree<T> {
    /// Builds a tree in position order: each element is appended at the
    /// back, so iteration order equals input order.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |tree, value| tree.push_back(value))
    }
}

impl<'a, T> IntoIterator for &'a PersistentAvlTree<T> {
    type Item = &'a T;
    type IntoIter = PersistentAvlTreeIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone> IntoIterator for PersistentAvlTree<T> {
    type Item = T;
    type IntoIter = PersistentAvlTreeIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentAvlTreeIntoIterator::new(self.root)
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// A borrowing iterator over a [`PersistentAvlTree`].
///
/// Traversal is iterative: an explicit stack of pending nodes replaces
/// recursion, so arbitrarily deep trees cannot overflow the call stack. The
/// stack holds at most one node per level and lives inline (no heap
/// allocation) for any practically sized tree.
///
/// The iterator is lazy, finite, and non-restartable; ranged variants stop
/// as soon as their window closes.
pub struct PersistentAvlTreeIterator<'a, T> {
    /// Pending nodes; the top is the next element in iteration order.
    stack: SmallVec<[&'a Node<T>; STACK_CAPACITY]>,
    /// Number of elements still to be yielded.
    remaining: usize,
    /// Direction: `false` ascends, `true` descends.
    descending: bool,
}

impl<'a, T> PersistentAvlTreeIterator<'a, T> {
    /// Seeks to `position` and prepares to yield `remaining` elements in the
    /// given direction. `position` must be a valid position when
    /// `remaining > 0`.
    fn new(link: &'a Link<T>, position: usize, remaining: usize, descending: bool) -> Self {
        let mut stack = SmallVec::new();
        if remaining > 0 {
            // Descend towards the target position, keeping exactly the
            // nodes that come at or after it (in iteration order) on the
            // stack.
            let mut position = position;
            let mut cursor = link.as_deref();
            while let Some(node) = cursor {
                let left_size = link_size(&node.left);
                match (position.cmp(&left_size), descending) {
                    (Ordering::Equal, _) => {
                        stack.push(node);
                        break;
                    }
                    (Ordering::Less, false) => {
                        stack.push(node);
                        cursor = node.left.as_deref();
                    }
                    (Ordering::Less, true) => cursor = node.left.as_deref(),
                    (Ordering::Greater, false) => {
                        position -= left_size + 1;
                        cursor = node.right.as_deref();
                    }
                    (Ordering::Greater, true) => {
                        stack.push(node);
                        position -= left_size + 1;
                        cursor = node.right.as_deref();
                    }
                }
            }
        }
        Self {
            stack,
            remaining,
            descending,
        }
    }
}

impl<'a, T> Iterator for PersistentAvlTreeIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.stack.pop()?;
        self.remaining -= 1;
        // The popped node's far child holds the following elements: stage
        // its near-side spine.
        let mut cursor = if self.descending {
            node.left.as_deref()
        } else {
            node.right.as_deref()
        };
        while let Some(pending) = cursor {
            self.stack.push(pending);
            cursor = if self.descending {
                pending.right.as_deref()
            } else {
                pending.left.as_deref()
            };
        }
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for PersistentAvlTreeIterator<'_, T> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// An owning iterator over a [`PersistentAvlTree`].
///
/// Elements are cloned out of the (possibly shared) nodes as they are
/// yielded. The traversal stack holds reference-counted nodes directly, so
/// it has no lifetime tie to the consumed tree.
pub struct PersistentAvlTreeIntoIterator<T> {
    stack: SmallVec<[ReferenceCounter<Node<T>>; STACK_CAPACITY]>,
    remaining: usize,
}

impl<T> PersistentAvlTreeIntoIterator<T> {
    fn new(root: Link<T>) -> Self {
        let remaining = link_size(&root);
        let mut stack = SmallVec::new();
        let mut cursor = root;
        while let Some(node) = cursor {
            cursor = node.left.clone();
            stack.push(node);
        }
        Self { stack, remaining }
    }
}

impl<T: Clone> Iterator for PersistentAvlTreeIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.remaining = self.remaining.saturating_sub(1);
        let mut cursor = node.right.clone();
        while let Some(pending) = cursor {
            cursor = pending.left.clone();
            self.stack.push(pending);
        }
        Some(node.value.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Clone> ExactSizeIterator for PersistentAvlTreeIntoIterator<T> {
    fn len(&self) -> usize {
        self.remaining
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for PersistentAvlTree<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for element in self {
            seq.serialize_element(element)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentAvlTreeVisitor<T> {
    marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<T> PersistentAvlTreeVisitor<T> {
    const fn new() -> Self {
        Self {
            marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for PersistentAvlTreeVisitor<T>
where
    T: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentAvlTree<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut tree = PersistentAvlTree::new();
        while let Some(element) = seq.next_element()? {
            tree = tree.push_back(element);
        }
        Ok(tree)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for PersistentAvlTree<T>
where
    T: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentAvlTreeVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

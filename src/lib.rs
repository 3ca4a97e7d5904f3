//! # arbora
//!
//! A persistent (immutable) AVL tree that is simultaneously an ordered,
//! comparator-sorted collection and an index-addressable sequence.
//!
//! ## Overview
//!
//! [`PersistentAvlTree`] supports two addressing modes over the same
//! structure:
//!
//! - **Index mode**: insert, remove, replace, and read elements by zero-based
//!   position, like a balanced-tree-backed list.
//! - **Comparator mode**: insert, remove, and search elements by an
//!   externally supplied total order, like a sorted collection.
//!
//! Every mutating operation returns a new tree and leaves the original
//! untouched. Unmodified subtrees are shared between versions, so each
//! mutation costs O(log N) time and O(log N) additional space.
//!
//! ## Structural Sharing
//!
//! Because nodes are never mutated after construction, any number of tree
//! versions may share arbitrary subtrees, and readers holding an older root
//! are never affected by writers producing newer roots.
//!
//! ```rust
//! use arbora::PersistentAvlTree;
//!
//! let tree: PersistentAvlTree<i32> = (1..=5).collect();
//! let shorter = tree.remove_at(2).map(|(rest, _)| rest);
//!
//! assert_eq!(tree.len(), 5); // Original unchanged
//! assert_eq!(shorter.map(|tree| tree.len()), Some(4));
//! ```
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for node references, making trees
//!   shareable across threads.
//! - `serde`: `Serialize`/`Deserialize` support (as a sequence).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod avl_tree;

pub use avl_tree::PersistentAvlTree;
pub use avl_tree::PersistentAvlTreeIntoIterator;
pub use avl_tree::PersistentAvlTreeIterator;

// =============================================================================
// Tests
// =============================================================================

//! treegc — deterministic destruction of cyclic object graphs without a
//! garbage collector.
//!
//! A reference-tracking heap for values arranged in an arbitrary graph,
//! cycles included. Every value keeps an ordered list of the handles
//! referencing it; the first entry is the *primary* (tree) edge that owns
//! the value, the rest are back edges. The primary edges form an implicit
//! spanning tree over the reference graph, and whenever an edge is removed
//! the tree is repaired locally: either some back edge still anchored to a
//! root is promoted to primary, or the orphaned component is destroyed on
//! the spot.
//!
//! # Architecture
//!
//! - [`arena`] — generational slot storage. Values and handle records are
//!   named by index/generation pairs, so identifiers into torn-down slots
//!   go stale instead of dangling.
//! - [`gc`] — the [`Heap`](gc::Heap): handle registration, assignment and
//!   release, the reachability walk, and the cycle-breaking unloop search.
//!
//! Single mutator assumed; every operation takes `&mut Heap` and runs to
//! completion, so referrer sequences are never observed mid-mutation.
//!
//! # Example
//!
//! ```
//! use treegc::Heap;
//!
//! let mut heap = Heap::new();
//! let a = heap.alloc("a");
//! let b = heap.alloc("b");
//!
//! // A second handle onto a's value: a back edge.
//! let r = heap.handle();
//! heap.assign(r, heap.target(a).unwrap());
//!
//! heap.free(a); // r still anchors the value
//! assert_eq!(heap.get(r), Some(&"a"));
//!
//! heap.free(r);
//! heap.free(b);
//! assert_eq!(heap.live_nodes(), 0);
//! ```

pub mod arena;
pub mod gc;

pub use arena::{Arena, RawId};
pub use gc::{HandleId, Heap, HeapStats, NodeId, Scope};

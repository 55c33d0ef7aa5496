//! Reference tracking with ownership-tree repair.
//!
//! Every managed value lives in a heap slot and carries an ordered list of
//! the handles currently referencing it. The referrer at position 0 is the
//! *primary* (tree) edge — the handle that owns the value; every later
//! referrer is a secondary back edge. Taken together the primary edges
//! form a spanning tree of the reference graph, rooted at handles held
//! outside any managed value.
//!
//! Removing a primary edge triggers local tree repair:
//! 1. If no referrer remains, the value is destroyed on the spot.
//! 2. If the next referrer's containment chain reaches a root, it simply
//!    becomes the new primary edge.
//! 3. Otherwise the unloop search walks the primary chain looking for a
//!    secondary referrer anchored outside the detached region and swaps
//!    it into primary position. If none exists the component is a closed
//!    loop with no external holder and every value in it is destroyed.
//!
//! Destruction work is paid exactly once per collected value. There is no
//! scanning phase and no collection trigger — unreachable cycles die at
//! the operation that orphaned them.

use crate::arena::{Arena, RawId};

/// Identity of a managed value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(RawId);

/// Identity of a tracked handle.
///
/// Handles come in two flavors: *root* handles held by application code
/// (no owner), and *field* handles living inside a managed value (owner
/// set at construction time, see [`Scope::field`]). Field handles are
/// released automatically when their owner is destroyed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HandleId(RawId);

/// A managed value slot: the value plus its referrer bookkeeping.
struct Node<T> {
    /// `None` only while the node is under construction or being dropped.
    value: Option<T>,
    /// Handles referencing this node, in registration order.
    /// Position 0 is the primary (tree) edge; a handle appears at most once.
    referrers: Vec<HandleId>,
    /// Handles that live inside this value, reset when the node dies.
    fields: Vec<HandleId>,
}

struct HandleRecord {
    target: Option<NodeId>,
    /// The node this handle is a field of. `None` for root handles.
    owner: Option<NodeId>,
}

/// Lifetime counters, in the spirit of the usual collector statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Values ever constructed.
    pub allocated: usize,
    /// Values ever destroyed. Equal to `allocated - live` at all times.
    pub destroyed: usize,
    /// Secondary referrers promoted to primary during tree repair.
    pub reroots: usize,
    /// Unreachable components collected by the unloop search.
    pub loops_collected: usize,
}

/// The heap of managed values and the handles that track them.
///
/// All mutation of referrer sequences goes through the methods here; the
/// sequences are never exposed mutably. Single-threaded by design: every
/// operation takes `&mut self` and runs to completion.
pub struct Heap<T> {
    nodes: Arena<Node<T>>,
    handles: Arena<HandleRecord>,
    pub stats: HeapStats,
}

/// Construction scope for a value, handed to the [`Heap::alloc_with`]
/// closure. Mints field handles owned by the node under construction, the
/// equivalent of wiring up back-references in a constructor body.
pub struct Scope<'a, T> {
    heap: &'a mut Heap<T>,
    node: NodeId,
}

impl<T> Scope<'_, T> {
    /// Create an empty handle whose owner is the value being built.
    pub fn field(&mut self) -> HandleId {
        let h = HandleId(self.heap.handles.insert(HandleRecord {
            target: None,
            owner: Some(self.node),
        }));
        self.heap
            .nodes
            .get_mut(self.node.0)
            .expect("node vanished during construction")
            .fields
            .push(h);
        h
    }
}

impl<T> Heap<T> {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            handles: Arena::new(),
            stats: HeapStats::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create an empty root handle (no target, no owner).
    pub fn handle(&mut self) -> HandleId {
        HandleId(self.handles.insert(HandleRecord {
            target: None,
            owner: None,
        }))
    }

    /// Construct a value and wrap it in a fresh root handle in one step.
    ///
    /// The returned handle is the value's initial primary edge.
    pub fn alloc(&mut self, value: T) -> HandleId {
        self.alloc_with(|_| value)
    }

    /// Construct a value that contains handle fields.
    ///
    /// The closure receives a [`Scope`] that can mint field handles owned
    /// by the node under construction; the finished value is then wrapped
    /// in a fresh root handle, which becomes its primary edge. No other
    /// handle can reference the value before this returns.
    pub fn alloc_with<F>(&mut self, build: F) -> HandleId
    where
        F: FnOnce(&mut Scope<'_, T>) -> T,
    {
        let node = NodeId(self.nodes.insert(Node {
            value: None,
            referrers: Vec::new(),
            fields: Vec::new(),
        }));
        let value = build(&mut Scope { heap: self, node });
        self.nodes
            .get_mut(node.0)
            .expect("node vanished during construction")
            .value = Some(value);
        self.stats.allocated += 1;

        let h = HandleId(self.handles.insert(HandleRecord {
            target: Some(node),
            owner: None,
        }));
        self.nodes
            .get_mut(node.0)
            .expect("node vanished during construction")
            .referrers
            .push(h);
        h
    }

    /// Release a root handle: reset it and free its slot.
    ///
    /// The scope-exit of a handle variable. Field handles must not be
    /// freed directly; they die with the value that owns them.
    pub fn free(&mut self, h: HandleId) {
        let record = self.handles.get(h.0).expect("double free of a handle");
        assert!(
            record.owner.is_none(),
            "field handles are freed when their owner is destroyed"
        );
        self.reset(h);
        self.handles.remove(h.0);
    }

    // -----------------------------------------------------------------------
    // Assignment and release
    // -----------------------------------------------------------------------

    /// Point `h` at `target`, releasing whatever it referenced before.
    ///
    /// The handle is registered with the new target *before* the old one
    /// is released, so a collection triggered by the release cannot take
    /// the new target down with it when both sit in the same cycle.
    /// Assigning the current target is a no-op.
    pub fn assign(&mut self, h: HandleId, target: NodeId) {
        let old = {
            let record = self.handles.get(h.0).expect("assign through a freed handle");
            if record.target == Some(target) {
                return;
            }
            record.target
        };
        {
            let node = self
                .nodes
                .get_mut(target.0)
                .expect("assign to a destroyed value");
            debug_assert!(
                !node.referrers.contains(&h),
                "handle already registered with its target"
            );
            node.referrers.push(h);
        }
        self.handles
            .get_mut(h.0)
            .expect("handle vanished during assign")
            .target = Some(target);
        // Release last. If the release cascade reaches the handle's own
        // owner, the handle is torn down holding its new target and
        // deregisters from it cleanly.
        if let Some(old_target) = old {
            self.detach(h, old_target);
        }
    }

    /// Release `h`'s target without assigning a replacement. No-op when
    /// the handle is already empty.
    pub fn reset(&mut self, h: HandleId) {
        let old = self
            .handles
            .get_mut(h.0)
            .expect("reset through a freed handle")
            .target
            .take();
        if let Some(target) = old {
            self.detach(h, target);
        }
    }

    /// Deregister `h` from `target` and repair or collect.
    ///
    /// `h`'s target field has already been cleared (or is being
    /// redirected); `target` names the node it used to reference.
    fn detach(&mut self, h: HandleId, target: NodeId) {
        let Some(node) = self.nodes.get_mut(target.0) else {
            // Target already went down in the cascade this release is part of.
            return;
        };
        let pos = node
            .referrers
            .iter()
            .position(|&r| r == h)
            .expect("handle missing from its target's referrer list");
        node.referrers.remove(pos);
        if pos != 0 {
            // Secondary back edge: the tree is untouched.
            return;
        }
        let next = node.referrers.first().copied();
        match next {
            None => self.destroy(target),
            Some(next) => {
                // The value lost its tree edge. If the next referrer's
                // containment chain reaches a root it becomes the new
                // primary as-is; otherwise search the component for an
                // anchor, collecting it when none exists.
                if self.loops_to(next, target) && self.unloop(target, target) {
                    self.stats.loops_collected += 1;
                    self.destroy(target);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reachability and unloop
    // -----------------------------------------------------------------------

    /// Walk the containment chain above `h` — its owner, the owner's
    /// primary referrer's owner, and so on — and report whether
    /// `candidate` appears on it. Ends with `false` at a root handle
    /// (no owner).
    ///
    /// A chain that dead-ends, on an owner slot already vacated by an
    /// in-progress cascade or on an owner with no referrers, cannot reach
    /// a root and counts as looping.
    fn loops_to(&self, h: HandleId, candidate: NodeId) -> bool {
        let mut current = h;
        let mut fuel = self.handles.len() + 1;
        loop {
            let record = self
                .handles
                .get(current.0)
                .expect("referrer list names a freed handle");
            let owner = match record.owner {
                None => return false,
                Some(owner) => owner,
            };
            if owner == candidate {
                return true;
            }
            let Some(node) = self.nodes.get(owner.0) else {
                return true;
            };
            let Some(&primary) = node.referrers.first() else {
                return true;
            };
            current = primary;

            fuel -= 1;
            assert!(fuel > 0, "referrer chain does not terminate: graph corrupted");
        }
    }

    /// Search the component around `target` for a new anchor after its
    /// primary edge was removed and the tentative replacement looped back
    /// to `stop`.
    ///
    /// Walks the primary chain upward from `target`; at each node the
    /// secondary referrers are tested and the first one whose chain does
    /// not lead back to `stop` is swapped into primary position, repairing
    /// the tree (returns `false`, value stays alive). The walk returning
    /// to `stop` without finding an anchor means the component is a closed
    /// loop with no external holder: returns `true` and the caller
    /// destroys it.
    fn unloop(&mut self, target: NodeId, stop: NodeId) -> bool {
        let mut current = target;
        let mut fuel = self.nodes.len() + 1;
        loop {
            let referrers = match self.nodes.get(current.0) {
                Some(node) => node.referrers.clone(),
                // Already vacated by the cascade in progress.
                None => return true,
            };
            for (i, &referrer) in referrers.iter().enumerate().skip(1) {
                if !self.loops_to(referrer, stop) {
                    self.nodes
                        .get_mut(current.0)
                        .expect("node vanished during unloop")
                        .referrers
                        .swap(0, i);
                    self.stats.reroots += 1;
                    return false;
                }
            }
            let Some(&primary) = referrers.first() else {
                return true;
            };
            let record = self
                .handles
                .get(primary.0)
                .expect("referrer list names a freed handle");
            match record.owner {
                None => return false,
                Some(owner) if owner == stop => return true,
                Some(owner) => current = owner,
            }

            fuel -= 1;
            assert!(fuel > 0, "unloop walk does not terminate: graph corrupted");
        }
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    /// Tear down a value: vacate its slot, cascade through its field
    /// handles, then drop it. Vacating first means any path reaching back
    /// into this node during the cascade sees it as already gone — the
    /// re-entrancy guard that keeps mutual cycles from double-destroying.
    fn destroy(&mut self, id: NodeId) {
        let node = self
            .nodes
            .remove(id.0)
            .expect("double destruction of a value");
        self.stats.destroyed += 1;
        for &field in &node.fields {
            self.reset(field);
            self.handles.remove(field.0);
        }
        drop(node.value);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The node `h` currently references, if any.
    pub fn target(&self, h: HandleId) -> Option<NodeId> {
        self.record(h).target
    }

    /// The node `h` is a field of, if any.
    pub fn owner(&self, h: HandleId) -> Option<NodeId> {
        self.record(h).owner
    }

    /// Dereference through a handle. `None` when the handle is empty or
    /// its target has been collected out from under it.
    pub fn get(&self, h: HandleId) -> Option<&T> {
        let target = self.record(h).target?;
        self.nodes.get(target.0)?.value.as_ref()
    }

    pub fn get_mut(&mut self, h: HandleId) -> Option<&mut T> {
        let target = self.record(h).target?;
        self.nodes.get_mut(target.0)?.value.as_mut()
    }

    /// Access a value by node identity.
    pub fn node(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id.0)?.value.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id.0)?.value.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id.0)
    }

    /// Whether `h` occupies primary position in its target's referrer
    /// sequence, i.e. is the tree edge that owns the value.
    pub fn is_primary(&self, h: HandleId) -> bool {
        match self.record(h).target {
            Some(target) => self
                .nodes
                .get(target.0)
                .is_some_and(|node| node.referrers.first() == Some(&h)),
            None => false,
        }
    }

    pub fn referrer_count(&self, id: NodeId) -> usize {
        self.nodes.get(id.0).map_or(0, |node| node.referrers.len())
    }

    pub fn referrer_at(&self, id: NodeId, i: usize) -> Option<HandleId> {
        self.nodes.get(id.0)?.referrers.get(i).copied()
    }

    /// Number of live values.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live handles, root and field alike.
    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    fn record(&self, h: HandleId) -> &HandleRecord {
        self.handles.get(h.0).expect("operation on a freed handle")
    }
}

impl<T> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

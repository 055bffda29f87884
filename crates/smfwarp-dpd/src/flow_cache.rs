//! Flow-keyed state with least-recently-used ordering.
//!
//! Entries live in an arena (`slots`) and are threaded onto an index-based
//! doubly linked list ordered by last update: the head is the most recently
//! touched flow, the tail the stalest. Since entries are only ever inserted or
//! refreshed at the head and the tick never goes backwards, list order is also
//! timestamp order, so pruning walks from the tail and stops at the first
//! entry that is still young.

use std::collections::HashMap;

use smfwarp_core::Tick;

use crate::bits::FlowKey;

#[derive(Debug)]
struct Node<S> {
    key: FlowKey,
    state: S,
    updated: Tick,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU-ordered map from flow keys to per-flow state.
#[derive(Debug)]
pub struct FlowCache<S> {
    index: HashMap<FlowKey, usize>,
    slots: Vec<Option<Node<S>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    max_entries: usize,
}

impl<S> Default for FlowCache<S> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<S> FlowCache<S> {
    /// Creates a cache holding at most `max_entries` flows (0 = unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            max_entries,
        }
    }

    /// Number of flows held.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no flows are held.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Looks up a flow without refreshing it.
    pub fn get(&self, key: &FlowKey) -> Option<&S> {
        self.index.get(key).map(|&idx| &self.node(idx).state)
    }

    /// Tick of the last update of a flow.
    pub fn last_update(&self, key: &FlowKey) -> Option<Tick> {
        self.index.get(key).map(|&idx| self.node(idx).updated)
    }

    /// Looks up a flow and, if present, refreshes it.
    pub fn get_mut(&mut self, key: &FlowKey, now: Tick) -> Option<&mut S> {
        let idx = *self.index.get(key)?;
        self.touch_index(idx, now);
        Some(&mut self.node_mut(idx).state)
    }

    /// Refreshes a flow. Returns false if it is not present.
    pub fn touch(&mut self, key: &FlowKey, now: Tick) -> bool {
        match self.index.get(key) {
            Some(&idx) => {
                self.touch_index(idx, now);
                true
            }
            None => false,
        }
    }

    /// Returns the state for `key`, creating it with `init` if absent.
    ///
    /// The boolean is true when the entry was created by this call.
    pub fn find_or_create<F>(&mut self, key: &FlowKey, now: Tick, init: F) -> (&mut S, bool)
    where
        F: FnOnce() -> S,
    {
        match self.try_find_or_create::<_, std::convert::Infallible>(key, now, || Ok(init())) {
            Ok(found) => found,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`find_or_create`](Self::find_or_create); nothing is
    /// inserted when `init` fails.
    pub fn try_find_or_create<F, E>(
        &mut self,
        key: &FlowKey,
        now: Tick,
        init: F,
    ) -> Result<(&mut S, bool), E>
    where
        F: FnOnce() -> Result<S, E>,
    {
        if let Some(&idx) = self.index.get(key) {
            self.touch_index(idx, now);
            return Ok((&mut self.node_mut(idx).state, false));
        }

        let state = init()?;
        if self.max_entries > 0 && self.index.len() >= self.max_entries {
            if let Some(tail) = self.tail {
                tracing::trace!(
                    "Flow cache full ({} entries), evicting {}",
                    self.max_entries,
                    self.node(tail).key
                );
                self.remove_index(tail);
            }
        }

        let node = Node { key: key.clone(), state, updated: now, prev: None, next: None };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key.clone(), idx);
        self.push_front(idx);
        Ok((&mut self.node_mut(idx).state, true))
    }

    /// Removes a flow, returning its state.
    pub fn remove(&mut self, key: &FlowKey) -> Option<S> {
        let idx = *self.index.get(key)?;
        Some(self.remove_index(idx))
    }

    /// Removes every flow untouched for more than `max_age` ticks.
    ///
    /// Returns the number of flows removed. Only stale entries are visited.
    pub fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        let mut removed = 0;
        while let Some(tail) = self.tail {
            if now.since(self.node(tail).updated) <= max_age {
                break;
            }
            self.remove_index(tail);
            removed += 1;
        }
        removed
    }

    /// Drops every flow.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Flow keys from most to least recently updated.
    pub fn keys_by_recency(&self) -> Vec<&FlowKey> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            keys.push(&node.key);
            cursor = node.next;
        }
        keys
    }

    fn node(&self, idx: usize) -> &Node<S> {
        match &self.slots[idx] {
            Some(node) => node,
            None => unreachable!("flow index {} points at a free slot", idx),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<S> {
        match &mut self.slots[idx] {
            Some(node) => node,
            None => unreachable!("flow index {} points at a free slot", idx),
        }
    }

    fn touch_index(&mut self, idx: usize, now: Tick) {
        self.node_mut(idx).updated = now;
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn remove_index(&mut self, idx: usize) -> S {
        self.unlink(idx);
        let node = match self.slots[idx].take() {
            Some(node) => node,
            None => unreachable!("flow index {} points at a free slot", idx),
        };
        self.index.remove(&node.key);
        self.free.push(idx);
        node.state
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

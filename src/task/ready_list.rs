//! Circular ready list with an in-place cursor.
//!
//! Records live in an index arena and are linked through `next` indices.
//! Nothing is unlinked before `clear_from_current`, so an index handed out
//! by `insert_after_current` stays valid for the whole run.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::mem;
use core::ops::{Index, IndexMut};

struct Node<T> {
    value: T,
    next: usize,
}

pub struct ReadyList<T> {
    nodes: Vec<Node<T>>,
    current: Option<usize>,
}

impl<T> ReadyList<T> {
    pub const fn new() -> Self {
        ReadyList {
            nodes: Vec::new(),
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        assert!(index < self.nodes.len(), "ready list index {} out of range", index);
        self.current = Some(index);
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        let index = self.current?;
        Some(&mut self.nodes[index].value)
    }

    /// Makes room for one more record, so the following insert cannot fail.
    pub fn try_reserve(&mut self) -> Result<(), TryReserveError> {
        self.nodes.try_reserve(1)
    }

    /// Links `value` directly after the cursor, or as the only, self-linked,
    /// record. The cursor does not move.
    pub fn insert_after_current(&mut self, value: T) -> usize {
        let index = self.nodes.len();
        match self.current {
            None => {
                self.nodes.push(Node { value, next: index });
                self.current = Some(index);
            }
            Some(current) => {
                let next = self.nodes[current].next;
                self.nodes.push(Node { value, next });
                self.nodes[current].next = index;
            }
        }
        index
    }

    /// Round robin: the first record after the cursor accepted by
    /// `runnable`, falling back to the cursor itself.
    pub fn select_next(&self, runnable: impl Fn(&T) -> bool) -> Option<usize> {
        let current = self.current?;
        let mut index = self.nodes[current].next;
        while index != current {
            if runnable(&self.nodes[index].value) {
                return Some(index);
            }
            index = self.nodes[index].next;
        }
        runnable(&self.nodes[current].value).then_some(current)
    }

    /// Indices in link order, starting after the cursor and ending with it.
    pub fn rotation(&self) -> Vec<usize> {
        let Some(current) = self.current else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut index = self.nodes[current].next;
        while index != current {
            order.push(index);
            index = self.nodes[index].next;
        }
        order.push(current);
        order
    }

    /// Hands every record to `release`, the cursor's own record last, and
    /// leaves the list empty.
    pub fn clear_from_current(&mut self, mut release: impl FnMut(T)) {
        let order = self.rotation();
        let mut slots: Vec<Option<T>> = mem::take(&mut self.nodes)
            .into_iter()
            .map(|node| Some(node.value))
            .collect();
        for index in order {
            if let Some(value) = slots[index].take() {
                release(value);
            }
        }
        self.current = None;
    }
}

impl<T> Default for ReadyList<T> {
    fn default() -> Self {
        ReadyList::new()
    }
}

impl<T> Index<usize> for ReadyList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.nodes[index].value
    }
}

impl<T> IndexMut<usize> for ReadyList<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.nodes[index].value
    }
}

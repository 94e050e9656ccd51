//! Doubly-linked sequence backed by a generational arena
//!
//! Nodes live in a slot vector and link to each other through [`Handle`]s
//! rather than pointers. A handle records the generation of its slot; once the
//! node is removed the slot's generation moves on, so a stale handle resolves to
//! nothing instead of to whatever row reuses the slot.

/// Stable reference to a node of an [`ArenaList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    node: Option<Node<T>>,
}

#[derive(Debug)]
pub(crate) struct ArenaList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

impl<T> Default for ArenaList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArenaList<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn front(&self) -> Option<Handle> {
        self.head
    }

    pub(crate) fn back(&self) -> Option<Handle> {
        self.tail
    }

    pub(crate) fn push_back(&mut self, value: T) -> Handle {
        let node = Node {
            value,
            prev: self.tail,
            next: None,
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                Handle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                Handle {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };

        match self.tail.and_then(|tail| self.node_mut(tail)) {
            Some(tail) => tail.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.len += 1;
        handle
    }

    pub(crate) fn pop_front(&mut self) -> Option<(Handle, T)> {
        let head = self.head?;
        self.remove(head).map(|value| (head, value))
    }

    /// Unlink and return the node behind `handle`. Stale handles are a no-op.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation += 1;
        self.free.push(handle.index);

        match node.prev.and_then(|prev| self.node_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.node_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;
        Some(node.value)
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&T> {
        self.node(handle).map(|node| &node.value)
    }

    pub(crate) fn next(&self, handle: Handle) -> Option<Handle> {
        self.node(handle).and_then(|node| node.next)
    }

    pub(crate) fn prev(&self, handle: Handle) -> Option<Handle> {
        self.node(handle).and_then(|node| node.prev)
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn node(&self, handle: Handle) -> Option<&Node<T>> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, handle: Handle) -> Option<&mut Node<T>> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_mut()
    }
}

pub(crate) struct Iter<'a, T> {
    list: &'a ArenaList<T>,
    cursor: Option<Handle>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.node(self.cursor?)?;
        self.cursor = node.next;
        Some(&node.value)
    }
}

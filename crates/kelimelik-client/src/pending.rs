//! The pending-request table.
//!
//! The protocol has no request IDs: a reply is recognised only by its
//! header. Every outstanding `expect` is therefore an entry here, and every
//! dispatched packet scans the whole table, removing each entry whose header
//! set contains the packet's header.
//!
//! Entries live in a slab (`Vec` of slots plus a free list) and are threaded
//! in insertion order by a doubly linked list of slot indices. That gives
//! O(1) insertion, O(1) removal by key (a caller giving up on a reply), and
//! O(1) unlinking while a scan walks forward over the list.

/// Handle to an entry in a [`PendingTable`].
///
/// Keys carry the slot's generation, so a key whose entry was already
/// removed can never remove a newer entry that reused the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    node: Option<Node<T>>,
}

/// Insertion-ordered slab with O(1) removal.
#[derive(Debug)]
pub struct PendingTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an entry after the current last one.
    pub fn insert(&mut self, value: T) -> PendingKey {
        let node = Node {
            value,
            prev: self.tail,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        PendingKey {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Removes the entry behind `key`, if it is still present.
    pub fn remove(&mut self, key: PendingKey) -> Option<T> {
        let slot = self.slots.get(key.index)?;
        if slot.generation != key.generation || slot.node.is_none() {
            return None;
        }
        Some(self.unlink(key.index))
    }

    /// Whether `key` still refers to a live entry.
    pub fn contains(&self, key: PendingKey) -> bool {
        self.slots
            .get(key.index)
            .is_some_and(|slot| slot.generation == key.generation && slot.node.is_some())
    }

    /// Walks the entries in insertion order, removing and returning every
    /// entry for which `matches` is `true`. Each removal is O(1); the scan
    /// continues past it.
    pub fn drain_matching<F>(&mut self, mut matches: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut drained = Vec::new();
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = self.node(index);
            cursor = node.next;
            if matches(&node.value) {
                drained.push(self.unlink(index));
            }
        }
        drained
    }

    /// Removes every entry, in insertion order.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.drain_matching(|_| true)
    }

    /// Iterates over live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?);
            cursor = node.next;
            Some(&node.value)
        })
    }

    fn node(&self, index: usize) -> &Node<T> {
        self.slots[index]
            .node
            .as_ref()
            .expect("linked index points at a live slot")
    }

    fn node_mut(&mut self, index: usize) -> &mut Node<T> {
        self.slots[index]
            .node
            .as_mut()
            .expect("linked index points at a live slot")
    }

    /// Unlinks a live slot, bumps its generation and frees it.
    fn unlink(&mut self, index: usize) -> T {
        let slot = &mut self.slots[index];
        let node = slot.node.take().expect("unlink of a live slot");
        slot.generation += 1;

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        self.free.push(index);
        self.len -= 1;
        node.value
    }
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

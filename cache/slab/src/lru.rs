//! Global recency list threaded through the entry arena.

use crate::entry::{EntryTable, NIL};

/// Doubly linked LRU list. Head is most recently used, tail is the next
/// eviction candidate.
#[derive(Debug)]
pub(crate) struct Lru {
    head: u32,
    tail: u32,
    len: usize,
}

impl Lru {
    pub fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn tail(&self) -> Option<u32> {
        (self.tail != NIL).then_some(self.tail)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_head(&mut self, entries: &mut EntryTable, id: u32) {
        entries[id].lru_prev = NIL;
        entries[id].lru_next = self.head;
        if self.head != NIL {
            entries[self.head].lru_prev = id;
        } else {
            self.tail = id;
        }
        self.head = id;
        self.len += 1;
    }

    pub fn unlink(&mut self, entries: &mut EntryTable, id: u32) {
        let prev = entries[id].lru_prev;
        let next = entries[id].lru_next;

        if prev != NIL {
            entries[prev].lru_next = next;
        } else {
            self.head = next;
        }

        if next != NIL {
            entries[next].lru_prev = prev;
        } else {
            self.tail = prev;
        }

        entries[id].lru_prev = NIL;
        entries[id].lru_next = NIL;
        self.len -= 1;
    }

    /// Move an entry to the head.
    pub fn touch(&mut self, entries: &mut EntryTable, id: u32) {
        if self.head != id {
            self.unlink(entries, id);
            self.push_head(entries, id);
        }
    }

    /// The entry that will be evicted after `id`.
    #[inline]
    pub fn prev(&self, entries: &EntryTable, id: u32) -> Option<u32> {
        let prev = entries[id].lru_prev;
        (prev != NIL).then_some(prev)
    }
}

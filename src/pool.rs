//! Slab-indexed connection pool with an explicit FIFO free list (§4.6).
//!
//! Generalizes the teacher's `runtime::connection::ConnectionRegistry`,
//! which wraps `slab::Slab` (LIFO reuse on `remove`/`insert`) into the
//! FIFO-ordered free list §4.6 and testable property 6 require: entries
//! never move, and released handles are queued rather than reused
//! most-recently-first.

/// Sentinel meaning "not currently in the free list".
const NOT_FREE: isize = -1;

struct Entry<T> {
    value: T,
    next_free: isize,
    is_free: bool,
}

/// A handle into a [`Pool`]. Stable for the pool's lifetime; using one
/// after its entry has been released and reused in a different generation
/// is the caller's bug, not the pool's (§7 fatal-class: "using a stale pool
/// handle").
pub type Handle = usize;

/// Handle-based slab pool with O(1) `get_new`/`release`, FIFO reuse order
/// (§4.6, testable property 6).
pub struct Pool<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<usize>,
    free_tail: Option<usize>,
}

impl<T: Default> Pool<T> {
    pub fn new() -> Self {
        Pool {
            entries: Vec::new(),
            free_head: None,
            free_tail: None,
        }
    }

    /// Allocate a handle: reuse the oldest released entry if any (O(1)),
    /// otherwise append a fresh zero entry.
    pub fn get_new(&mut self) -> (Handle, &mut T) {
        let handle = if let Some(head) = self.free_head {
            let next = self.entries[head].next_free;
            self.free_head = if next == NOT_FREE {
                self.free_tail = None;
                None
            } else {
                Some(next as usize)
            };
            self.entries[head].next_free = NOT_FREE;
            self.entries[head].is_free = false;
            self.entries[head].value = T::default();
            head
        } else {
            self.entries.push(Entry {
                value: T::default(),
                next_free: NOT_FREE,
                is_free: false,
            });
            self.entries.len() - 1
        };
        (handle, &mut self.entries[handle].value)
    }

    /// Release a handle back to the pool, appending it to the tail of the
    /// FIFO free list. Panics if the handle is already free — releasing
    /// twice is a programmer error.
    pub fn release(&mut self, handle: Handle) {
        let entry = &mut self.entries[handle];
        if entry.is_free {
            panic!("pool handle {handle} released twice");
        }
        entry.is_free = true;
        entry.next_free = NOT_FREE;

        match self.free_tail {
            Some(tail) => {
                self.entries[tail].next_free = handle as isize;
                self.free_tail = Some(handle);
            }
            None => {
                self.free_head = Some(handle);
                self.free_tail = Some(handle);
            }
        }
    }

    /// Borrow an entry by handle. Panics on a stale (released) handle —
    /// a fatal-class programmer error per §7.
    pub fn get(&self, handle: Handle) -> &T {
        let entry = &self.entries[handle];
        if entry.is_free {
            panic!("use of a stale pool handle {handle}");
        }
        &entry.value
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut T {
        let entry = &mut self.entries[handle];
        if entry.is_free {
            panic!("use of a stale pool handle {handle}");
        }
        &mut entry.value
    }

    pub fn try_get(&self, handle: Handle) -> Option<&T> {
        self.entries.get(handle).filter(|e| !e.is_free).map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_free).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_new_appends_when_free_list_empty() {
        let mut pool: Pool<u32> = Pool::new();
        let (h1, v1) = pool.get_new();
        *v1 = 10;
        let (h2, v2) = pool.get_new();
        *v2 = 20;
        assert_eq!(h1, 0);
        assert_eq!(h2, 1);
        assert_eq!(*pool.get(h1), 10);
        assert_eq!(*pool.get(h2), 20);
    }

    #[test]
    fn release_then_get_new_reuses_in_fifo_order() {
        let mut pool: Pool<u32> = Pool::new();
        let (h0, _) = pool.get_new();
        let (h1, _) = pool.get_new();
        let (h2, _) = pool.get_new();
        pool.release(h0);
        pool.release(h1);
        // FIFO: h0 was released first, so it is reused first.
        let (reused, _) = pool.get_new();
        assert_eq!(reused, h0);
        let (reused2, _) = pool.get_new();
        assert_eq!(reused2, h1);
        assert_eq!(pool.capacity(), 3);
        let _ = h2;
    }

    #[test]
    fn no_handle_appears_twice_in_free_list() {
        let mut pool: Pool<u32> = Pool::new();
        let (h0, _) = pool.get_new();
        let (h1, _) = pool.get_new();
        pool.release(h0);
        pool.release(h1);
        let (a, _) = pool.get_new();
        let (b, _) = pool.get_new();
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let mut pool: Pool<u32> = Pool::new();
        let (h, _) = pool.get_new();
        pool.release(h);
        pool.release(h);
    }

    #[test]
    #[should_panic(expected = "stale pool handle")]
    fn stale_handle_access_panics() {
        let mut pool: Pool<u32> = Pool::new();
        let (h, _) = pool.get_new();
        pool.release(h);
        let _ = pool.get(h);
    }

    #[test]
    fn len_tracks_live_entries() {
        let mut pool: Pool<u32> = Pool::new();
        let (h0, _) = pool.get_new();
        let (_h1, _) = pool.get_new();
        assert_eq!(pool.len(), 2);
        pool.release(h0);
        assert_eq!(pool.len(), 1);
    }
}

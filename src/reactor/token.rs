//! Op-token allocator correlating kernel completions back to pending
//! reactor operations.
//!
//! Generalizes the teacher's `runtime::token::TokenAllocator`/`OpType`
//! from three memcached-specific operation shapes (`Accept`, `Read{conn_id}`,
//! `Write{conn_id,buf_idx}`) to the full completion-kind set in
//! [`crate::reactor::OpKind`], still backed by `slab::Slab` exactly as the
//! teacher does.

use slab::Slab;

use crate::reactor::OpKind;

pub type Token = usize;

/// Slab-backed allocator handing out tokens for in-flight operations,
/// tagged with their [`OpKind`] for logging and completion dispatch.
pub struct TokenAllocator {
    slots: Slab<OpKind>,
}

impl TokenAllocator {
    pub fn new() -> Self {
        TokenAllocator { slots: Slab::new() }
    }

    pub fn alloc(&mut self, kind: OpKind) -> Token {
        self.slots.insert(kind)
    }

    pub fn get(&self, token: Token) -> Option<OpKind> {
        self.slots.get(token).copied()
    }

    pub fn free(&mut self, token: Token) -> Option<OpKind> {
        if self.slots.contains(token) {
            Some(self.slots.remove(token))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let mut alloc = TokenAllocator::new();
        let t = alloc.alloc(OpKind::Read);
        assert_eq!(alloc.get(t), Some(OpKind::Read));
        assert_eq!(alloc.free(t), Some(OpKind::Read));
        assert_eq!(alloc.get(t), None);
    }

    #[test]
    fn tokens_are_reused_after_free() {
        let mut alloc = TokenAllocator::new();
        let t1 = alloc.alloc(OpKind::Accept);
        alloc.free(t1);
        let t2 = alloc.alloc(OpKind::Connect);
        assert_eq!(t1, t2);
        assert_eq!(alloc.get(t2), Some(OpKind::Connect));
    }

    #[test]
    fn len_tracks_outstanding_tokens() {
        let mut alloc = TokenAllocator::new();
        let t1 = alloc.alloc(OpKind::Send);
        let _t2 = alloc.alloc(OpKind::Recv);
        assert_eq!(alloc.len(), 2);
        alloc.free(t1);
        assert_eq!(alloc.len(), 1);
    }
}

//! Allocation arenas
//!
//! Two arenas back the pipeline:
//!
//! - [`RecordArena`] owns the bytes of one decoded record. Entity, user,
//!   format and argument strings are [`Bytes`] views carved from it, so a
//!   record costs one buffer no matter how many arguments it carries.
//! - [`NodeArena`] owns every flow-tree node. Nodes refer to each other
//!   through [`NodeIdx`] handles, and the whole tree is released at once
//!   when the arena is dropped.
//!
//! ```text
//!   RecordArena  [ entity | user | fmt | arg0 | arg1 | ... ]
//!                   ^^^^^^   ^^^^   ^^^   ^^^^   ^^^^
//!                   Bytes views (refcounted, no copies)
//! ```

use std::ops::Range;

use bytes::Bytes;

/// Backing buffer of a single record
#[derive(Debug, Clone, Default)]
pub struct RecordArena {
    buf: Bytes,
}

impl RecordArena {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf: Bytes::from(buf) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Carves a view of `range` out of the arena
    ///
    /// Panics if the range is out of bounds; callers go through
    /// [`ArenaCursor`] which checks lengths first.
    pub fn carve(&self, range: Range<usize>) -> Bytes {
        self.buf.slice(range)
    }

    pub fn cursor(&self) -> ArenaCursor<'_> {
        ArenaCursor { arena: self, pos: 0 }
    }
}

/// Sequential reader over a [`RecordArena`]
#[derive(Debug)]
pub struct ArenaCursor<'a> {
    arena: &'a RecordArena,
    pos: usize,
}

impl<'a> ArenaCursor<'a> {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.arena.len() - self.pos
    }

    pub fn take_u8(&mut self) -> Option<u8> {
        let byte = *self.arena.as_bytes().get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Takes the next `len` bytes as a carved view
    pub fn take(&mut self, len: usize) -> Option<Bytes> {
        if len > self.remaining() {
            return None;
        }
        let view = self.arena.carve(self.pos..self.pos + len);
        self.pos += len;
        Some(view)
    }
}

/// Handle of a node stored in a [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(usize);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Append-only store with bulk release
#[derive(Debug)]
pub struct NodeArena<T> {
    slots: Vec<T>,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> NodeArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: T) -> NodeIdx {
        self.slots.push(value);
        NodeIdx(self.slots.len() - 1)
    }

    pub fn get(&self, idx: NodeIdx) -> &T {
        &self.slots[idx.0]
    }

    pub fn get_mut(&mut self, idx: NodeIdx) -> &mut T {
        &mut self.slots[idx.0]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &T)> {
        self.slots.iter().enumerate().map(|(i, v)| (NodeIdx(i), v))
    }

    /// Drops every node at once
    pub fn release_all(&mut self) {
        self.slots.clear();
    }
}

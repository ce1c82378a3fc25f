//! # Page Arena
//!
//! Slot store for in-memory pages under construction. References carry
//! `PageHandle`s into the arena instead of owning pages, which breaks the
//! page → reference → page ownership cycle.
//!
//! Commit consumes pages bottom-up with `take`, leaving a tombstoned slot
//! behind; handles are never reused within one arena, so a stale handle
//! reads as an error rather than as somebody else's page.

use eyre::Result;

use super::reference::PageHandle;
use super::Page;
use crate::error::StorageError;
use crate::records::RecordSerializer;

#[derive(Debug, Default)]
pub struct PageArena<S: RecordSerializer> {
    slots: Vec<Option<Page<S>>>,
}

impl<S: RecordSerializer> PageArena<S> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn alloc(&mut self, page: Page<S>) -> PageHandle {
        let handle = PageHandle(self.slots.len() as u32);
        self.slots.push(Some(page));
        handle
    }

    pub fn get(&self, handle: PageHandle) -> Result<&Page<S>> {
        self.slots
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| StorageError::illegal(format!("stale arena handle {}", handle.0)).into())
    }

    pub fn get_mut(&mut self, handle: PageHandle) -> Result<&mut Page<S>> {
        self.slots
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| StorageError::illegal(format!("stale arena handle {}", handle.0)).into())
    }

    /// Removes and returns the page; the handle is dead afterwards.
    pub fn take(&mut self, handle: PageHandle) -> Result<Page<S>> {
        self.slots
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| StorageError::illegal(format!("stale arena handle {}", handle.0)).into())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

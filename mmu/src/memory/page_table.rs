//! Page Directory
//!
//! This module maps `(process, page)` pairs to physical frames. It is a
//! single flat table shared by every process. There are no multi-level
//! tables, protection bits or TLB.
//!
//! # Features
//!
//! - On-demand mapping backed by the [`FrameAllocator`]
//! - Address translation with page fault reporting
//! - Page release and reclamation of pages no variable overlaps
//!
//! # Invariants
//!
//! No two live keys map to the same frame, and every held frame of the
//! allocator is mapped by exactly one key.

#![deny(missing_docs)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::memory::{
    FrameAllocator, FrameNumber, PageNumber, PhysicalAddress, RegionTable, VirtualAddress,
};
use crate::process::ProcessId;
use crate::{MmuError, MmuResult};

/// Lookup key of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageKey {
    /// Owning process
    pub pid: ProcessId,
    /// Virtual page of that process
    pub page: PageNumber,
}

impl PageKey {
    /// Create a new key
    pub const fn new(pid: ProcessId, page: PageNumber) -> Self {
        Self { pid, page }
    }
}

/// Flat page table shared by all processes
#[derive(Debug, Clone)]
pub struct PageDirectory {
    /// Bytes per page and per frame
    page_size: u32,
    /// Live mappings, ordered by process then page
    entries: BTreeMap<PageKey, FrameNumber>,
    /// Physical frame pool
    frames: FrameAllocator,
}

impl PageDirectory {
    /// Create an empty directory over `frame_count` frames
    pub fn new(page_size: u32, frame_count: u32) -> Self {
        Self {
            page_size,
            entries: BTreeMap::new(),
            frames: FrameAllocator::new(frame_count),
        }
    }

    /// Bytes per page
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Underlying frame pool
    pub const fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// Number of live mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no page is mapped
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frame backing `page` of `pid`
    pub fn frame_of(&self, pid: ProcessId, page: PageNumber) -> Option<FrameNumber> {
        self.entries.get(&PageKey::new(pid, page)).copied()
    }

    /// All mappings in `(pid, page)` order
    pub fn entries(&self) -> impl Iterator<Item = (PageKey, FrameNumber)> + '_ {
        self.entries.iter().map(|(key, frame)| (*key, *frame))
    }

    /// Pages mapped for `pid`, ascending
    pub fn pages_of(&self, pid: ProcessId) -> impl Iterator<Item = PageNumber> + '_ {
        self.entries
            .range(PageKey::new(pid, PageNumber::new(0))..=PageKey::new(pid, PageNumber::new(u32::MAX)))
            .map(|(key, _)| key.page)
    }

    /// Map `page` of `pid` to a fresh frame unless it is already mapped
    ///
    /// Returns `true` when a new mapping was created.
    pub fn ensure_mapped(&mut self, pid: ProcessId, page: PageNumber) -> MmuResult<bool> {
        let key = PageKey::new(pid, page);
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        let frame = self.frames.assign()?;
        self.entries.insert(key, frame);
        debug_print!(DEBUG, "process {} page {} -> frame {}", pid, page, frame);
        Ok(true)
    }

    /// Translate a virtual address of `pid`
    pub fn translate(&self, pid: ProcessId, address: VirtualAddress) -> MmuResult<PhysicalAddress> {
        let page = address.page(self.page_size);
        let offset = address.page_offset(self.page_size);
        self.frame_of(pid, page)
            .map(|frame| frame.address(self.page_size, offset))
            .ok_or(MmuError::PageFault { pid, address })
    }

    /// Drop the mapping of `page` and return its frame to the pool
    ///
    /// Returns the frame that backed the page, `None` if it was not mapped.
    pub fn release_page(&mut self, pid: ProcessId, page: PageNumber) -> MmuResult<Option<FrameNumber>> {
        let Some(frame) = self.entries.remove(&PageKey::new(pid, page)) else {
            return Ok(None);
        };
        self.frames.release(frame)?;
        debug_print!(DEBUG, "process {} page {} released frame {}", pid, page, frame);
        Ok(Some(frame))
    }

    /// Release every mapped page of `pid` that no variable overlaps
    ///
    /// Eligibility is decided from region addresses, so a variable that
    /// straddles a page boundary keeps both pages mapped.
    pub fn reclaim(&mut self, pid: ProcessId, regions: &RegionTable) -> MmuResult<Vec<PageNumber>> {
        let idle: Vec<PageNumber> = self
            .pages_of(pid)
            .filter(|&page| !regions.page_in_use(page, self.page_size))
            .collect();
        for &page in &idle {
            self.release_page(pid, page)?;
        }
        Ok(idle)
    }

    /// Drop every mapping of `pid`
    pub fn release_process(&mut self, pid: ProcessId) -> MmuResult<usize> {
        let pages: Vec<PageNumber> = self.pages_of(pid).collect();
        for &page in &pages {
            self.release_page(pid, page)?;
        }
        Ok(pages.len())
    }

    /// Check that mappings and the frame pool agree
    pub fn validate(&self) -> MmuResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for frame in self.entries.values() {
            if !seen.insert(*frame) {
                return Err(MmuError::InvariantViolation("frame mapped twice"));
            }
            if !self.frames.is_assigned(*frame) {
                return Err(MmuError::InvariantViolation("mapped frame not held by the allocator"));
            }
        }
        if seen.len() != self.frames.stats().frames_in_use as usize {
            return Err(MmuError::InvariantViolation("held frame without a mapping"));
        }
        Ok(())
    }
}

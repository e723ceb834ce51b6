//! Simulator Configuration
//!
//! Geometry of the simulated machine: page size, size of the shared physical
//! memory and size of every process's initial virtual address space.
//!
//! # Defaults
//!
//! ```text
//! page size          : 4 KiB
//! physical memory    : 64 MiB (16384 frames)
//! virtual space      : 64 MiB per process
//! ```
//!
//! All three sizes must be page multiples so that a process's address space
//! always ends on a page boundary.

#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::{MmuError, MmuResult};

/// Default page size (4KB)
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default size of the simulated physical memory (64MB)
pub const DEFAULT_PHYSICAL_MEMORY_SIZE: u32 = 64 * 1024 * 1024;

/// Default size of a freshly created process's virtual address space (64MB)
pub const DEFAULT_MAX_VIRTUAL_SIZE: u32 = 64 * 1024 * 1024;

const_assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
const_assert!(DEFAULT_PHYSICAL_MEMORY_SIZE % DEFAULT_PAGE_SIZE == 0);
const_assert!(DEFAULT_MAX_VIRTUAL_SIZE % DEFAULT_PAGE_SIZE == 0);

/// Simulated machine geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmuConfig {
    /// Bytes per page and per frame
    pub page_size: u32,
    /// Bytes of simulated physical memory
    pub physical_memory_size: u32,
    /// Bytes of virtual space a new process starts with
    pub max_virtual_size: u32,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            physical_memory_size: DEFAULT_PHYSICAL_MEMORY_SIZE,
            max_virtual_size: DEFAULT_MAX_VIRTUAL_SIZE,
        }
    }
}

impl MmuConfig {
    /// Default geometry with a different page size
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Same geometry with a different physical memory size
    #[must_use]
    pub const fn with_physical_memory_size(mut self, bytes: u32) -> Self {
        self.physical_memory_size = bytes;
        self
    }

    /// Same geometry with a different per-process virtual space size
    #[must_use]
    pub const fn with_max_virtual_size(mut self, bytes: u32) -> Self {
        self.max_virtual_size = bytes;
        self
    }

    /// Number of physical frames
    pub const fn frame_count(&self) -> u32 {
        self.physical_memory_size / self.page_size
    }

    /// Check the geometry is usable
    pub fn validate(&self) -> MmuResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(MmuError::InvalidConfig("page size must be a non-zero power of two"));
        }
        if self.physical_memory_size == 0 || self.physical_memory_size % self.page_size != 0 {
            return Err(MmuError::InvalidConfig(
                "physical memory size must be a non-zero multiple of the page size",
            ));
        }
        if self.max_virtual_size == 0 || self.max_virtual_size % self.page_size != 0 {
            return Err(MmuError::InvalidConfig(
                "virtual space size must be a non-zero multiple of the page size",
            ));
        }
        Ok(())
    }
}

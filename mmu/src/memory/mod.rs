//! Memory Management Subsystem
//!
//! This module provides the memory bookkeeping of the simulator.
//! It is made of three cooperating components:
//!
//! - Region tables (per-process virtual layout, first-fit allocation, coalescing)
//! - Frame allocator (lowest-free-first assignment of physical frames)
//! - Page directory (`(process, page)` to frame mapping and address translation)
//!
//! # Address Arithmetic
//!
//! ```text
//! page_number = virtual_address / page_size
//! offset      = virtual_address % page_size
//! physical    = frame_number * page_size + offset
//! ```
//!
//! Addresses are 32 bits wide. Page sizes are powers of two.

#![deny(missing_docs)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod frame_allocator;
pub mod page_table;
pub mod region;

pub use frame_allocator::{AllocationStats, FrameAllocator};
pub use page_table::{PageDirectory, PageKey};
pub use region::{Region, RegionTable, RegionTag, MAX_NAME_LEN};

/// Virtual address inside one process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    /// Create a new virtual address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Page containing this address
    pub const fn page(self, page_size: u32) -> PageNumber {
        PageNumber(self.0 / page_size)
    }

    /// Offset of this address within its page
    pub const fn page_offset(self, page_size: u32) -> u32 {
        self.0 % page_size
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Address into the simulated physical memory buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    /// Create a new physical address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Address as a buffer index
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Virtual page number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageNumber(u32);

impl PageNumber {
    /// Create a new page number
    pub const fn new(page: u32) -> Self {
        Self(page)
    }

    /// Get the raw page number
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// First address of the page
    pub const fn start(self, page_size: u32) -> u32 {
        self.0 * page_size
    }

    /// One past the last address of the page, widened so the top page does not overflow
    pub const fn end(self, page_size: u32) -> u64 {
        (self.0 as u64 + 1) * page_size as u64
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Create a new frame number
    pub const fn new(frame: u32) -> Self {
        Self(frame)
    }

    /// Get the raw frame number
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Physical address of `offset` within this frame
    pub const fn address(self, page_size: u32, offset: u32) -> PhysicalAddress {
        PhysicalAddress(self.0 * page_size + offset)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Pages overlapped by the byte range `[start, start + size)`
///
/// Empty when `size` is zero.
pub fn pages_spanned(start: u32, size: u32, page_size: u32) -> impl Iterator<Item = PageNumber> {
    let page_size = u64::from(page_size);
    let first = u64::from(start) / page_size;
    let last = if size == 0 {
        first
    } else {
        (u64::from(start) + u64::from(size) - 1) / page_size + 1
    };
    (first..last).map(|page| PageNumber(page as u32))
}

/// Element type of a variable
///
/// `FreeSpace` is the zero-width marker used for untyped free space and is
/// never a legal allocation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Untyped free space
    FreeSpace = 0,
    /// 1-byte character
    Char = 1,
    /// 2-byte integer
    Short = 2,
    /// 4-byte integer
    Int = 3,
    /// 4-byte float
    Float = 4,
    /// 8-byte integer
    Long = 5,
    /// 8-byte float
    Double = 6,
}

impl DataType {
    /// Size of one element in bytes
    pub const fn byte_width(self) -> u32 {
        match self {
            Self::FreeSpace => 0,
            Self::Char => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Whether variables may be allocated with this type
    pub const fn is_allocatable(self) -> bool {
        !matches!(self, Self::FreeSpace)
    }

    /// Lower-case name as used on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Self::FreeSpace => "freespace",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Float => "float",
            Self::Long => "long",
            Self::Double => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown type name or discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDataType;

impl fmt::Display for UnknownDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown data type")
    }
}

impl TryFrom<u8> for DataType {
    type Error = UnknownDataType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FreeSpace),
            1 => Ok(Self::Char),
            2 => Ok(Self::Short),
            3 => Ok(Self::Int),
            4 => Ok(Self::Float),
            5 => Ok(Self::Long),
            6 => Ok(Self::Double),
            _ => Err(UnknownDataType),
        }
    }
}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::FreeSpace,
            Self::Char,
            Self::Short,
            Self::Int,
            Self::Float,
            Self::Long,
            Self::Double,
        ]
        .into_iter()
        .find(|ty| ty.name().eq_ignore_ascii_case(s))
        .ok_or(UnknownDataType)
    }
}

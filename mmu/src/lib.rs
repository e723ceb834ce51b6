//! MMU Simulator Core
//!
//! Simulates, inside a single host process, the virtual memory management of
//! many independent simulated processes that share one simulated physical
//! memory. This library provides the bookkeeping at the heart of the
//! simulator:
//!
//! - A per-process region allocator (named variables and free holes, first-fit
//!   placement, page-local coalescing on release)
//! - A page directory mapping `(process, page)` pairs to physical frames
//! - A frame allocator handing out the lowest free frame on demand
//! - A process registry with never-reused process ids
//!
//! # Architecture
//!
//! ```text
//!            Mmu (facade)
//!           /            \
//!  ProcessRegistry     PageDirectory
//!        |                   |
//!   RegionTable         FrameAllocator
//! ```
//!
//! The raw physical byte buffer, command parsing and value printing live in
//! the embedding front end. The core only computes addresses into memory.
//!
//! # Consistency
//!
//! Every byte of virtual space a process believes it owns is either backed by
//! a mapped frame or explicitly free, and every mapped frame is traceable back
//! to a region of its process. Failed operations leave all state unchanged.

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![warn(clippy::panic)]
#![warn(clippy::unwrap_used)]

#[macro_use]
pub mod macros;

pub mod config;
pub mod memory;
pub mod mmu;
pub mod process;
pub mod report;

#[doc(hidden)]
pub use log as __log;

pub use config::MmuConfig;
pub use memory::{DataType, FrameNumber, PageNumber, PhysicalAddress, VirtualAddress};
pub use mmu::Mmu;
pub use process::ProcessId;

use thiserror_no_std::Error;

/// Core simulator error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmuError {
    /// No live process has this id
    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),
    /// The process has no allocated variable with this name
    #[error("variable '{name}' not found in process {pid}")]
    VariableNotFound {
        /// Process that was searched
        pid: ProcessId,
        /// Name that was looked up
        name: String,
    },
    /// The process already owns a variable with this name
    #[error("variable '{name}' already exists in process {pid}")]
    VariableExists {
        /// Process that owns the variable
        pid: ProcessId,
        /// Conflicting name
        name: String,
    },
    /// The type cannot back an allocation
    #[error("illegal type {0:?}")]
    IllegalType(DataType),
    /// Zero element count, or a byte size that does not fit the address space
    #[error("invalid allocation size")]
    InvalidSize,
    /// Variable name exceeds the supported length
    #[error("variable name longer than {max} bytes")]
    NameTooLong {
        /// Maximum accepted length in bytes
        max: usize,
    },
    /// Physical memory has no free frame left
    #[error("out of physical frames")]
    OutOfFrames,
    /// Translation of an unmapped virtual address
    #[error("page fault: process {pid} address {address}")]
    PageFault {
        /// Faulting process
        pid: ProcessId,
        /// Faulting virtual address
        address: VirtualAddress,
    },
    /// Element index past the end of a variable
    #[error("index {index} out of bounds for variable of {len} elements")]
    IndexOutOfBounds {
        /// Requested element index
        index: u32,
        /// Number of elements in the variable
        len: u32,
    },
    /// Rejected simulator configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Internal consistency failure in the allocator itself
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

impl MmuError {
    /// Whether the error reports a bug in the simulator rather than bad input
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Result type for simulator operations
pub type MmuResult<T> = Result<T, MmuError>;

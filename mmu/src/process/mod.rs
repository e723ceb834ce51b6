//! Process Registry
//!
//! This module owns the set of live simulated processes. Each process is
//! nothing more than an id and the [`RegionTable`] describing its virtual
//! address space.
//!
//! # Process Lifecycle
//!
//! ```text
//! create() -> Live -> remove() -> Gone (id never reused)
//! ```
//!
//! Ids are handed out from [`ProcessId::FIRST`] upward by a counter owned by
//! the registry. A removed id resolves to nothing for the rest of the run.

#![deny(missing_docs)]

use core::fmt;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::memory::{Region, RegionTable};
use crate::{MmuError, MmuResult};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new process ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// First id handed out by a fresh registry
    pub const FIRST: ProcessId = ProcessId(1024);
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A simulated process
#[derive(Debug, Clone, Serialize)]
pub struct Process {
    /// Process identifier
    pub id: ProcessId,
    /// Virtual address space layout
    pub regions: RegionTable,
}

impl Process {
    /// Create a process whose whole address space `[0, span)` is free
    pub fn new(id: ProcessId, span: u32) -> Self {
        Self {
            id,
            regions: RegionTable::new(span),
        }
    }

    /// Allocated variable called `name`
    pub fn variable(&self, name: &str) -> MmuResult<&Region> {
        self.regions
            .variable(name)
            .ok_or_else(|| MmuError::VariableNotFound {
                pid: self.id,
                name: name.into(),
            })
    }
}

/// Live processes and the id counter
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    /// Next id to hand out
    next_id: u32,
    /// Virtual space size of new processes
    span: u32,
    /// Live processes by id
    processes: BTreeMap<ProcessId, Process>,
}

impl ProcessRegistry {
    /// Create an empty registry whose processes start with `span` bytes of virtual space
    pub const fn new(span: u32) -> Self {
        Self {
            next_id: ProcessId::FIRST.as_u32(),
            span,
            processes: BTreeMap::new(),
        }
    }

    /// Register a new process and return its id
    pub fn create(&mut self) -> ProcessId {
        let id = ProcessId::new(self.next_id);
        self.next_id += 1;
        self.processes.insert(id, Process::new(id, self.span));
        debug_print!(INFO, "created process {}", id);
        id
    }

    /// Live process `pid`
    pub fn get(&self, pid: ProcessId) -> MmuResult<&Process> {
        self.processes.get(&pid).ok_or(MmuError::ProcessNotFound(pid))
    }

    /// Live process `pid`, mutably
    pub fn get_mut(&mut self, pid: ProcessId) -> MmuResult<&mut Process> {
        self.processes
            .get_mut(&pid)
            .ok_or(MmuError::ProcessNotFound(pid))
    }

    /// Variable `name` of process `pid`
    pub fn variable(&self, pid: ProcessId, name: &str) -> MmuResult<&Region> {
        self.get(pid)?.variable(name)
    }

    /// Whether `pid` names a live process
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Unregister `pid`, handing back its final state
    pub fn remove(&mut self, pid: ProcessId) -> MmuResult<Process> {
        let process = self
            .processes
            .remove(&pid)
            .ok_or(MmuError::ProcessNotFound(pid))?;
        debug_print!(INFO, "removed process {}", pid);
        Ok(process)
    }

    /// Live process ids, ascending
    pub fn ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.keys().copied()
    }

    /// Live processes in id order
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Number of live processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no process is live
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

//! Memory Management Unit Facade
//!
//! [`Mmu`] is the single entry point used by a front end. It owns the process
//! registry and the page directory and keeps them consistent:
//!
//! - `allocate` places a variable, backs every page it touches with a frame,
//!   then carves the region
//! - `free` releases a variable, coalesces, then reclaims idle pages
//! - `terminate` frees every variable, then drops the process and its pages
//! - `translate` turns `(pid, virtual address)` into a physical address
//!
//! # Failure Model
//!
//! User errors abandon the operation with all state unchanged. Frames mapped
//! for an allocation that later fails are unmapped again before returning.
//! `InvariantViolation` means the simulator itself is broken.

#![deny(missing_docs)]

use crate::config::MmuConfig;
use crate::memory::page_table::PageDirectory;
use crate::memory::region::{Region, VariableName, MAX_NAME_LEN};
use crate::memory::{pages_spanned, DataType, PageNumber, PhysicalAddress, VirtualAddress};
use crate::process::{Process, ProcessId, ProcessRegistry};
use crate::report::{MmuTable, PageEntry, PageTable, ProcessList, RegionEntry};
use crate::{MmuError, MmuResult};

/// Name of the code segment created by [`Mmu::launch`]
pub const TEXT_SEGMENT: &str = "<TEXT>";

/// Name of the globals segment created by [`Mmu::launch`]
pub const GLOBALS_SEGMENT: &str = "<GLOBALS>";

/// Name of the stack segment created by [`Mmu::launch`]
pub const STACK_SEGMENT: &str = "<STACK>";

/// Stack size given to launched processes (64KB)
pub const DEFAULT_STACK_SIZE: u32 = 65536;

/// Simulated memory management unit
#[derive(Debug, Clone)]
pub struct Mmu {
    /// Machine geometry
    config: MmuConfig,
    /// Live processes and their region tables
    processes: ProcessRegistry,
    /// Shared page table and frame pool
    pages: PageDirectory,
}

impl Mmu {
    /// Create a simulator with the given geometry
    pub fn new(config: MmuConfig) -> MmuResult<Self> {
        config.validate()?;
        debug_print!(
            INFO,
            "MMU initialized: page size {} bytes, {} frames, {} bytes of virtual space per process",
            config.page_size,
            config.frame_count(),
            config.max_virtual_size
        );
        Ok(Self {
            config,
            processes: ProcessRegistry::new(config.max_virtual_size),
            pages: PageDirectory::new(config.page_size, config.frame_count()),
        })
    }

    /// Machine geometry
    pub const fn config(&self) -> &MmuConfig {
        &self.config
    }

    /// Bytes per page
    pub const fn page_size(&self) -> u32 {
        self.config.page_size
    }

    /// Live processes
    pub const fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Shared page table
    pub const fn page_directory(&self) -> &PageDirectory {
        &self.pages
    }

    /// Create an empty process
    pub fn create_process(&mut self) -> ProcessId {
        self.processes.create()
    }

    /// Create a process with text, globals and stack segments
    ///
    /// Segments are allocated as `Char` arrays in that order; zero-sized
    /// segments are skipped. A failure tears the new process down again.
    pub fn launch(&mut self, text_size: u32, data_size: u32) -> MmuResult<ProcessId> {
        let pid = self.create_process();
        let segments = [
            (TEXT_SEGMENT, text_size),
            (GLOBALS_SEGMENT, data_size),
            (STACK_SEGMENT, DEFAULT_STACK_SIZE),
        ];
        for (name, size) in segments.into_iter().filter(|&(_, size)| size > 0) {
            if let Err(err) = self.allocate(pid, name, DataType::Char, size) {
                debug_print!(WARN, "launch of process {} failed at {}: {}", pid, name, err);
                self.terminate(pid)?;
                return Err(err);
            }
        }
        Ok(pid)
    }

    /// Allocate `count` elements of `data_type` as variable `name` of `pid`
    pub fn allocate(
        &mut self,
        pid: ProcessId,
        name: &str,
        data_type: DataType,
        count: u32,
    ) -> MmuResult<VirtualAddress> {
        let page_size = self.config.page_size;
        let process = self.processes.get_mut(pid)?;
        if !data_type.is_allocatable() {
            return Err(MmuError::IllegalType(data_type));
        }
        let required = data_type
            .byte_width()
            .checked_mul(count)
            .filter(|&bytes| bytes > 0)
            .ok_or(MmuError::InvalidSize)?;
        let name = variable_name(name)?;
        if process.regions.variable(&name).is_some() {
            return Err(MmuError::VariableExists {
                pid,
                name: name.as_str().into(),
            });
        }

        let placement = process.regions.place(required, page_size)?;

        let mut mapped = Vec::new();
        for page in pages_spanned(placement.address.as_u32(), required, page_size) {
            match self.pages.ensure_mapped(pid, page) {
                Ok(true) => mapped.push(page),
                Ok(false) => {}
                Err(err) => {
                    unmap(&mut self.pages, pid, &mapped)?;
                    return Err(err);
                }
            }
        }

        match process.regions.commit(placement, name, data_type) {
            Ok(address) => {
                debug_print!(
                    DEBUG,
                    "process {} allocated {} bytes at {} ({} new pages)",
                    pid,
                    required,
                    address,
                    mapped.len()
                );
                Ok(address)
            }
            Err(err) => {
                unmap(&mut self.pages, pid, &mapped)?;
                Err(err)
            }
        }
    }

    /// Release variable `name` of `pid` and reclaim pages left without variables
    pub fn free(&mut self, pid: ProcessId, name: &str) -> MmuResult<()> {
        let page_size = self.config.page_size;
        let process = self.processes.get_mut(pid)?;
        let released = process
            .regions
            .release(name, page_size)
            .ok_or_else(|| MmuError::VariableNotFound {
                pid,
                name: name.into(),
            })??;
        let reclaimed = self.pages.reclaim(pid, &process.regions)?;
        debug_print!(
            DEBUG,
            "process {} freed '{}' ({} bytes at {}), {} pages reclaimed",
            pid,
            name,
            released.size,
            released.address,
            reclaimed.len()
        );
        Ok(())
    }

    /// Translate a virtual address of `pid` to a physical address
    pub fn translate(&self, pid: ProcessId, address: VirtualAddress) -> MmuResult<PhysicalAddress> {
        self.processes.get(pid)?;
        self.pages.translate(pid, address)
    }

    /// Physical address of element `index` of variable `name`
    pub fn element_address(&self, pid: ProcessId, name: &str, index: u32) -> MmuResult<PhysicalAddress> {
        let region = self.processes.variable(pid, name)?;
        let len = region.element_count();
        if index >= len {
            return Err(MmuError::IndexOutOfBounds { index, len });
        }
        let offset = index * region.data_type().byte_width();
        self.pages
            .translate(pid, VirtualAddress::new(region.address.as_u32() + offset))
    }

    /// Free every variable of `pid`, then remove it and any remaining pages
    pub fn terminate(&mut self, pid: ProcessId) -> MmuResult<()> {
        while let Some(name) = self.first_variable(pid)? {
            self.free(pid, &name)?;
        }
        self.processes.remove(pid)?;
        let dropped = self.pages.release_process(pid)?;
        debug_print!(INFO, "terminated process {} ({} leftover pages)", pid, dropped);
        Ok(())
    }

    fn first_variable(&self, pid: ProcessId) -> MmuResult<Option<String>> {
        Ok(self
            .processes
            .get(pid)?
            .regions
            .variables()
            .next()
            .and_then(Region::name)
            .map(String::from))
    }

    /// Live process `pid`
    pub fn process(&self, pid: ProcessId) -> MmuResult<&Process> {
        self.processes.get(pid)
    }

    /// Variable `name` of `pid`
    pub fn variable(&self, pid: ProcessId, name: &str) -> MmuResult<&Region> {
        self.processes.variable(pid, name)
    }

    /// Live process ids, ascending
    pub fn process_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.ids()
    }

    /// Ordered region list of `pid`
    pub fn region_listing(&self, pid: ProcessId) -> MmuResult<Vec<RegionEntry>> {
        let process = self.processes.get(pid)?;
        Ok(process
            .regions
            .regions()
            .iter()
            .map(|region| RegionEntry::new(pid, region))
            .collect())
    }

    /// Every mapping in `(pid, page)` order
    pub fn page_listing(&self) -> Vec<PageEntry> {
        self.pages.entries().map(PageEntry::from).collect()
    }

    /// Printable table of every region of every process
    pub const fn mmu_table(&self) -> MmuTable<'_> {
        MmuTable::new(&self.processes)
    }

    /// Printable page table
    pub const fn page_table(&self) -> PageTable<'_> {
        PageTable::new(&self.pages)
    }

    /// Printable list of live process ids
    pub const fn process_list(&self) -> ProcessList<'_> {
        ProcessList::new(&self.processes)
    }

    /// Check every cross-structure invariant
    ///
    /// Region tables tile their spaces, every page touched by a variable is
    /// mapped, every mapping belongs to a live process and overlaps one of
    /// its variables, and no frame is shared.
    pub fn validate(&self) -> MmuResult<()> {
        let page_size = self.config.page_size;
        for process in self.processes.iter() {
            process.regions.validate()?;
            let unbacked = process.regions.variables().any(|region| {
                pages_spanned(region.address.as_u32(), region.size, page_size)
                    .any(|page| self.pages.frame_of(process.id, page).is_none())
            });
            if unbacked {
                return Err(MmuError::InvariantViolation("variable on an unmapped page"));
            }
        }
        for (key, _) in self.pages.entries() {
            let process = self
                .processes
                .get(key.pid)
                .map_err(|_| MmuError::InvariantViolation("mapping owned by a dead process"))?;
            if !process.regions.page_in_use(key.page, page_size) {
                return Err(MmuError::InvariantViolation("mapped page holds no variable"));
            }
        }
        self.pages.validate()
    }
}

fn variable_name(name: &str) -> MmuResult<VariableName> {
    let mut stored = VariableName::new();
    stored
        .push_str(name)
        .map_err(|()| MmuError::NameTooLong { max: MAX_NAME_LEN })?;
    Ok(stored)
}

fn unmap(pages: &mut PageDirectory, pid: ProcessId, mapped: &[PageNumber]) -> MmuResult<()> {
    for &page in mapped {
        pages.release_page(pid, page)?;
    }
    if !mapped.is_empty() {
        debug_print!(WARN, "rolled back {} pages of process {}", mapped.len(), pid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu(page_size: u32) -> Mmu {
        Mmu::new(MmuConfig::default().with_page_size(page_size)).unwrap()
    }

    #[test]
    fn rejects_invalid_geometry() {
        assert!(matches!(
            Mmu::new(MmuConfig::default().with_page_size(1000)),
            Err(MmuError::InvalidConfig(_))
        ));
    }

    #[test]
    fn allocation_maps_spanned_pages() {
        let mut mmu = mmu(1024);
        let pid = mmu.create_process();
        assert_eq!(pid, ProcessId::new(1024));

        assert_eq!(mmu.allocate(pid, "x", DataType::Int, 10), Ok(VirtualAddress::new(0)));
        assert_eq!(mmu.page_directory().len(), 1);

        assert_eq!(mmu.allocate(pid, "y", DataType::Char, 2000), Ok(VirtualAddress::new(40)));
        let pages: Vec<_> = mmu.page_directory().pages_of(pid).collect();
        assert_eq!(pages, [PageNumber::new(0), PageNumber::new(1)]);
        assert_eq!(mmu.validate(), Ok(()));
    }

    #[test]
    fn allocation_errors() {
        let mut mmu = mmu(1024);
        let pid = mmu.create_process();

        assert_eq!(
            mmu.allocate(pid, "x", DataType::FreeSpace, 4),
            Err(MmuError::IllegalType(DataType::FreeSpace))
        );
        assert_eq!(mmu.allocate(pid, "x", DataType::Int, 0), Err(MmuError::InvalidSize));
        assert_eq!(mmu.allocate(pid, "x", DataType::Long, u32::MAX), Err(MmuError::InvalidSize));
        assert_eq!(
            mmu.allocate(pid, &"n".repeat(MAX_NAME_LEN + 1), DataType::Int, 1),
            Err(MmuError::NameTooLong { max: MAX_NAME_LEN })
        );
        assert_eq!(
            mmu.allocate(ProcessId::new(9), "x", DataType::Int, 1),
            Err(MmuError::ProcessNotFound(ProcessId::new(9)))
        );

        mmu.allocate(pid, "x", DataType::Int, 1).unwrap();
        assert!(matches!(
            mmu.allocate(pid, "x", DataType::Int, 1),
            Err(MmuError::VariableExists { .. })
        ));
    }

    #[test]
    fn out_of_frames_rolls_back() {
        let config = MmuConfig::default()
            .with_page_size(1024)
            .with_physical_memory_size(2 * 1024);
        let mut mmu = Mmu::new(config).unwrap();
        let pid = mmu.create_process();
        mmu.allocate(pid, "a", DataType::Char, 1000).unwrap();
        let before = mmu.region_listing(pid).unwrap();

        // Needs pages 0..=2, only one more frame exists
        assert_eq!(mmu.allocate(pid, "b", DataType::Char, 2000), Err(MmuError::OutOfFrames));
        assert_eq!(mmu.region_listing(pid).unwrap(), before);
        assert_eq!(mmu.page_directory().len(), 1);
        assert_eq!(mmu.page_directory().frames().free_frames(), 1);
        assert_eq!(mmu.validate(), Ok(()));
    }

    #[test]
    fn free_reclaims_idle_pages() {
        let mut mmu = mmu(1024);
        let pid = mmu.create_process();
        mmu.allocate(pid, "a", DataType::Char, 1024).unwrap();
        mmu.allocate(pid, "b", DataType::Char, 1024).unwrap();
        assert_eq!(mmu.page_directory().len(), 2);

        mmu.free(pid, "a").unwrap();
        let pages: Vec<_> = mmu.page_directory().pages_of(pid).collect();
        assert_eq!(pages, [PageNumber::new(1)]);
        assert_eq!(mmu.validate(), Ok(()));
    }

    #[test]
    fn free_of_unknown_name_changes_nothing() {
        let mut mmu = mmu(1024);
        let pid = mmu.create_process();
        mmu.allocate(pid, "a", DataType::Short, 10).unwrap();
        let regions = mmu.region_listing(pid).unwrap();
        let pages = mmu.page_listing();

        assert!(matches!(mmu.free(pid, "b"), Err(MmuError::VariableNotFound { .. })));
        assert_eq!(mmu.region_listing(pid).unwrap(), regions);
        assert_eq!(mmu.page_listing(), pages);
    }

    #[test]
    fn translate_requires_live_process() {
        let mut mmu = mmu(1024);
        let pid = mmu.create_process();
        mmu.allocate(pid, "a", DataType::Int, 1).unwrap();
        assert_eq!(mmu.translate(pid, VirtualAddress::new(3)), Ok(PhysicalAddress::new(3)));
        assert!(matches!(
            mmu.translate(pid, VirtualAddress::new(5000)),
            Err(MmuError::PageFault { .. })
        ));

        mmu.terminate(pid).unwrap();
        assert_eq!(
            mmu.translate(pid, VirtualAddress::new(3)),
            Err(MmuError::ProcessNotFound(pid))
        );
    }

    #[test]
    fn element_addresses_step_by_type_width() {
        let mut mmu = mmu(1024);
        let first = mmu.create_process();
        mmu.allocate(first, "pad", DataType::Char, 1).unwrap();
        let pid = mmu.create_process();
        mmu.allocate(pid, "pad", DataType::Char, 1000).unwrap();
        mmu.allocate(pid, "d", DataType::Double, 10).unwrap();

        // d covers 1000..1080: page 0 on frame 1, page 1 on frame 2
        assert_eq!(mmu.element_address(pid, "d", 0), Ok(PhysicalAddress::new(1024 + 1000)));
        assert_eq!(mmu.element_address(pid, "d", 3), Ok(PhysicalAddress::new(2 * 1024)));
        assert_eq!(
            mmu.element_address(pid, "d", 10),
            Err(MmuError::IndexOutOfBounds { index: 10, len: 10 })
        );
    }

    #[test]
    fn launch_creates_segments() {
        let mut mmu = mmu(4096);
        let pid = mmu.launch(5992, 564).unwrap();
        let layout: Vec<_> = mmu
            .region_listing(pid)
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.address, entry.size))
            .collect();
        assert_eq!(
            layout[..3],
            [
                (Some(TEXT_SEGMENT.to_string()), 0, 5992),
                (Some(GLOBALS_SEGMENT.to_string()), 5992, 564),
                (Some(STACK_SEGMENT.to_string()), 6556, DEFAULT_STACK_SIZE),
            ]
        );
        assert_eq!(mmu.page_directory().len(), 18);
    }

    #[test]
    fn failed_launch_leaves_no_process_behind() {
        let config = MmuConfig::default()
            .with_page_size(4096)
            .with_physical_memory_size(8 * 4096);
        let mut mmu = Mmu::new(config).unwrap();
        assert_eq!(mmu.launch(100, 100), Err(MmuError::OutOfFrames));
        assert_eq!(mmu.process_ids().count(), 0);
        assert!(mmu.page_directory().is_empty());

        // The failed id stays burned
        assert_eq!(mmu.create_process(), ProcessId::new(1025));
    }
}

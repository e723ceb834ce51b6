//! Diagnostic Listings
//!
//! Structured and printable views of simulator state:
//!
//! - [`RegionEntry`] / [`MmuTable`]: region layout of processes
//! - [`PageEntry`] / [`PageTable`]: `(pid, page) -> frame` mappings
//! - [`ProcessList`]: live process ids
//!
//! The printable forms use a fixed column layout so two runs of the same
//! command sequence print identical tables:
//!
//! ```text
//!  PID  | Variable Name | Virtual Addr | Size
//! ------+---------------+--------------+------------
//!  1024 |        <TEXT> |            0 | 5992
//! ```

#![deny(missing_docs)]

use core::fmt;

use serde::Serialize;

use crate::memory::{FrameNumber, PageDirectory, PageKey, Region};
use crate::process::{ProcessId, ProcessRegistry};

/// Label printed for free regions
pub const FREE_SPACE_LABEL: &str = "<FREE_SPACE>";

/// One region of a process's layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionEntry {
    /// Owning process
    pub pid: ProcessId,
    /// Variable name, `None` for free space
    pub name: Option<String>,
    /// First byte
    pub address: u32,
    /// Length in bytes
    pub size: u32,
}

impl RegionEntry {
    /// Describe `region` of process `pid`
    pub fn new(pid: ProcessId, region: &Region) -> Self {
        Self {
            pid,
            name: region.name().map(String::from),
            address: region.address.as_u32(),
            size: region.size,
        }
    }
}

impl fmt::Display for RegionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5} | {:>13} | {:>12} | {}",
            self.pid,
            self.name.as_deref().unwrap_or(FREE_SPACE_LABEL),
            self.address,
            self.size
        )
    }
}

/// One page mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageEntry {
    /// Owning process
    pub pid: ProcessId,
    /// Virtual page number
    pub page: u32,
    /// Backing frame number
    pub frame: u32,
}

impl From<(PageKey, FrameNumber)> for PageEntry {
    fn from((key, frame): (PageKey, FrameNumber)) -> Self {
        Self {
            pid: key.pid,
            page: key.page.as_u32(),
            frame: frame.as_u32(),
        }
    }
}

impl fmt::Display for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5} | {:>11} | {:>12}", self.pid, self.page, self.frame)
    }
}

/// Printable region table of every live process
#[derive(Debug, Clone, Copy)]
pub struct MmuTable<'a> {
    processes: &'a ProcessRegistry,
}

impl<'a> MmuTable<'a> {
    /// View over `processes`
    pub const fn new(processes: &'a ProcessRegistry) -> Self {
        Self { processes }
    }
}

impl fmt::Display for MmuTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " PID  | Variable Name | Virtual Addr | Size")?;
        writeln!(f, "------+---------------+--------------+------------")?;
        for process in self.processes.iter() {
            for region in process.regions.regions() {
                writeln!(f, "{}", RegionEntry::new(process.id, region))?;
            }
        }
        Ok(())
    }
}

/// Printable page table
#[derive(Debug, Clone, Copy)]
pub struct PageTable<'a> {
    pages: &'a PageDirectory,
}

impl<'a> PageTable<'a> {
    /// View over `pages`
    pub const fn new(pages: &'a PageDirectory) -> Self {
        Self { pages }
    }
}

impl fmt::Display for PageTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " PID  | Page Number | Frame Number")?;
        writeln!(f, "------+-------------+--------------")?;
        for entry in self.pages.entries() {
            writeln!(f, "{}", PageEntry::from(entry))?;
        }
        Ok(())
    }
}

/// Printable list of live process ids, one per line
#[derive(Debug, Clone, Copy)]
pub struct ProcessList<'a> {
    processes: &'a ProcessRegistry,
}

impl<'a> ProcessList<'a> {
    /// View over `processes`
    pub const fn new(processes: &'a ProcessRegistry) -> Self {
        Self { processes }
    }
}

impl fmt::Display for ProcessList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pid in self.processes.ids() {
            writeln!(f, "{pid}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataType, Mmu, MmuConfig};

    #[test]
    fn tables_use_fixed_columns() {
        let mut mmu = Mmu::new(MmuConfig::default().with_page_size(1024).with_max_virtual_size(4096)).unwrap();
        let pid = mmu.create_process();
        mmu.allocate(pid, "x", DataType::Int, 10).unwrap();

        let expected = concat!(
            " PID  | Variable Name | Virtual Addr | Size\n",
            "------+---------------+--------------+------------\n",
            " 1024 |             x |            0 | 40\n",
            " 1024 |  <FREE_SPACE> |           40 | 4056\n",
        );
        assert_eq!(mmu.mmu_table().to_string(), expected);

        let expected = concat!(
            " PID  | Page Number | Frame Number\n",
            "------+-------------+--------------\n",
            " 1024 |           0 |            0\n",
        );
        assert_eq!(mmu.page_table().to_string(), expected);
        assert_eq!(mmu.process_list().to_string(), "1024\n");
    }

    #[test]
    fn pages_list_in_pid_then_page_order() {
        let mut mmu = Mmu::new(MmuConfig::default().with_page_size(1024)).unwrap();
        let first = mmu.create_process();
        let second = mmu.create_process();
        mmu.allocate(second, "a", DataType::Char, 10).unwrap();
        mmu.allocate(first, "a", DataType::Char, 2000).unwrap();

        let listing: Vec<_> = mmu
            .page_listing()
            .into_iter()
            .map(|entry| (entry.pid.as_u32(), entry.page, entry.frame))
            .collect();
        assert_eq!(listing, [(1024, 0, 1), (1024, 1, 2), (1025, 0, 0)]);
    }
}

//! Region Table and Region Allocator
//!
//! Every process owns one [`RegionTable`]: an ordered list of regions tiling
//! its virtual address space `[0, extent)` with no gaps and no overlaps. A
//! region is either a named, typed variable or free space.
//!
//! # Allocation
//!
//! Placement is first-fit over free regions in address order, accepting an
//! exact fit. The variable is carved from the start of the chosen hole. When
//! no hole is large enough, the table grows by whole pages at `extent`.
//!
//! Placement is split in two steps. [`RegionTable::place`] decides where the
//! variable goes without touching the table, so the caller can back the pages
//! with frames first. [`RegionTable::commit`] then performs the carve.
//!
//! # Coalescing
//!
//! A freed region absorbs its free neighbours only within its own page
//! window:
//!
//! ```text
//!  page window of the freed region
//! |<------------------------------>|
//! [ A: free ][ B: freed ][ C: free ]      -> [ A+B+C: free ]
//! [ A: free ][ B: freed ][ C: free ........|.... ]  -> [ A+B: free ][ C: free ]
//! ```
//!
//! The trailing free region (the untouched remainder of the address space up
//! to `extent`) is always absorbed.
//!
//! Regions are plain values in a `Vec`. Indices are re-resolved after every
//! structural change and never held across operations.

use serde::Serialize;

use crate::memory::{DataType, PageNumber, VirtualAddress};
use crate::{MmuError, MmuResult};

/// Maximum length of a variable name in bytes
pub const MAX_NAME_LEN: usize = 32;

/// Variable name storage
pub type VariableName = heapless::String<MAX_NAME_LEN>;

/// What a region holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegionTag {
    /// A named variable
    Allocated {
        /// Variable name, unique within the process
        name: VariableName,
        /// Element type
        data_type: DataType,
    },
    /// Unused space
    Free,
}

/// Contiguous byte range of a virtual address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    /// Contents
    pub tag: RegionTag,
    /// First byte
    pub address: VirtualAddress,
    /// Length in bytes
    pub size: u32,
}

impl Region {
    /// Create a free region
    pub const fn free(address: VirtualAddress, size: u32) -> Self {
        Self {
            tag: RegionTag::Free,
            address,
            size,
        }
    }

    /// Whether the region is free space
    pub const fn is_free(&self) -> bool {
        matches!(self.tag, RegionTag::Free)
    }

    /// Variable name, `None` for free space
    pub fn name(&self) -> Option<&str> {
        match &self.tag {
            RegionTag::Allocated { name, .. } => Some(name.as_str()),
            RegionTag::Free => None,
        }
    }

    /// Element type; free space reports [`DataType::FreeSpace`]
    pub const fn data_type(&self) -> DataType {
        match &self.tag {
            RegionTag::Allocated { data_type, .. } => *data_type,
            RegionTag::Free => DataType::FreeSpace,
        }
    }

    /// Number of elements; zero for free space
    pub const fn element_count(&self) -> u32 {
        match self.data_type().byte_width() {
            0 => 0,
            width => self.size / width,
        }
    }

    /// One past the last byte
    pub const fn end(&self) -> u64 {
        self.address.as_u32() as u64 + self.size as u64
    }

    /// Whether the region overlaps `[start, end)`
    pub const fn overlaps(&self, start: u64, end: u64) -> bool {
        (self.address.as_u32() as u64) < end && self.end() > start
    }
}

/// Where [`RegionTable::commit`] will put a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Address the variable will receive
    pub address: VirtualAddress,
    /// Bytes the variable occupies
    pub size: u32,
    target: PlacementTarget,
}

impl Placement {
    /// Whether the table has to grow to hold the variable
    pub const fn grows(&self) -> bool {
        matches!(self.target, PlacementTarget::Grow { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlacementTarget {
    /// Carve from the free region at this index
    Existing(usize),
    /// Append a free region of this many bytes at `extent`, then carve from it
    Grow(u32),
}

/// Ordered regions of one virtual address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    /// Create a table holding a single free region `[0, span)`
    pub fn new(span: u32) -> Self {
        Self {
            regions: vec![Region::free(VirtualAddress::new(0), span)],
        }
    }

    /// Regions in address order
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the table has no regions
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// End of the address space covered by the table
    pub fn extent(&self) -> u32 {
        self.regions
            .last()
            .map_or(0, |region| region.address.as_u32() + region.size)
    }

    /// Index of the variable called `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.regions
            .iter()
            .position(|region| region.name() == Some(name))
    }

    /// Variable called `name`
    pub fn variable(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|region| region.name() == Some(name))
    }

    /// Allocated regions in address order
    pub fn variables(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|region| !region.is_free())
    }

    /// Decide where a variable of `required` bytes goes
    ///
    /// First-fit over free regions, exact fit accepted. Falls back to growing
    /// the table by enough whole pages to hold the request.
    pub fn place(&self, required: u32, page_size: u32) -> MmuResult<Placement> {
        if required == 0 {
            return Err(MmuError::InvalidSize);
        }

        if let Some((index, region)) = self
            .regions
            .iter()
            .enumerate()
            .find(|(_, region)| region.is_free() && region.size >= required)
        {
            return Ok(Placement {
                address: region.address,
                size: required,
                target: PlacementTarget::Existing(index),
            });
        }

        let extent = self.extent();
        if extent % page_size != 0 {
            return Err(invariant("table extent is not page aligned"));
        }
        let pages = required.div_ceil(page_size);
        let grow_by = pages.checked_mul(page_size).ok_or(MmuError::InvalidSize)?;
        extent.checked_add(grow_by).ok_or(MmuError::InvalidSize)?;

        Ok(Placement {
            address: VirtualAddress::new(extent),
            size: required,
            target: PlacementTarget::Grow(grow_by),
        })
    }

    /// Carve the variable decided by [`place`](Self::place)
    ///
    /// The placement must come from this table with no mutation in between.
    pub fn commit(
        &mut self,
        placement: Placement,
        name: VariableName,
        data_type: DataType,
    ) -> MmuResult<VirtualAddress> {
        let index = match placement.target {
            PlacementTarget::Existing(index) => index,
            PlacementTarget::Grow(grow_by) => {
                let extent = self.extent();
                if extent != placement.address.as_u32() {
                    return Err(invariant("stale placement: extent moved"));
                }
                self.regions
                    .push(Region::free(VirtualAddress::new(extent), grow_by));
                debug_print!(TRACE, "grew address space by {} bytes at {}", grow_by, extent);
                self.regions.len() - 1
            }
        };

        let hole = self
            .regions
            .get_mut(index)
            .ok_or_else(|| invariant("stale placement: index out of range"))?;
        if !hole.is_free() || hole.address != placement.address || hole.size < placement.size {
            return Err(invariant("stale placement: target is not a fitting hole"));
        }

        hole.address = VirtualAddress::new(hole.address.as_u32() + placement.size);
        hole.size -= placement.size;
        if hole.size == 0 {
            self.regions.remove(index);
        }
        self.regions.insert(
            index,
            Region {
                tag: RegionTag::Allocated { name, data_type },
                address: placement.address,
                size: placement.size,
            },
        );

        self.check()?;
        Ok(placement.address)
    }

    /// Retag the variable called `name` as free space and coalesce it
    ///
    /// Returns the freed region as it was before release.
    pub fn release(&mut self, name: &str, page_size: u32) -> Option<MmuResult<Region>> {
        let index = self.position(name)?;
        let region = self.regions.get_mut(index)?;
        let released = region.clone();
        region.tag = RegionTag::Free;
        Some(
            self.coalesce(index, page_size)
                .and_then(|_| self.check())
                .map(|()| released),
        )
    }

    /// Merge the free region at `index` with free neighbours in its page window
    ///
    /// Returns the index of the surviving region.
    pub fn coalesce(&mut self, index: usize, page_size: u32) -> MmuResult<usize> {
        let region = self
            .regions
            .get(index)
            .ok_or_else(|| invariant("coalesce on a region no longer present"))?;
        if !region.is_free() {
            return Err(invariant("coalesce on an allocated region"));
        }

        let page = region.address.page(page_size);
        let window_start = u64::from(page.start(page_size));
        let window_end = page.end(page_size);
        let mut index = index;

        let last = self.regions.len() - 1;
        let merge_right = self.regions.get(index + 1).is_some_and(|right| {
            right.is_free() && (right.end() <= window_end || index + 1 == last)
        });
        if merge_right {
            let right = self.regions.remove(index + 1);
            if let Some(current) = self.regions.get_mut(index) {
                current.size += right.size;
            }
        }

        let merge_left = index
            .checked_sub(1)
            .and_then(|left| self.regions.get(left))
            .is_some_and(|left| left.is_free() && u64::from(left.address.as_u32()) >= window_start);
        if merge_left {
            let current = self.regions.remove(index);
            index -= 1;
            if let Some(left) = self.regions.get_mut(index) {
                left.size += current.size;
            }
        }

        Ok(index)
    }

    /// Whether any variable overlaps `page`
    pub fn page_in_use(&self, page: PageNumber, page_size: u32) -> bool {
        let start = u64::from(page.start(page_size));
        let end = page.end(page_size);
        self.variables().any(|region| region.overlaps(start, end))
    }

    /// Verify the tiling invariants
    ///
    /// Regions start at zero, are contiguous and non-empty, and variable
    /// names are unique.
    pub fn validate(&self) -> MmuResult<()> {
        let mut expected = 0u64;
        for (index, region) in self.regions.iter().enumerate() {
            if u64::from(region.address.as_u32()) != expected {
                return Err(invariant("regions are not contiguous"));
            }
            if region.size == 0 {
                return Err(invariant("zero-sized region"));
            }
            if let Some(name) = region.name() {
                let duplicate = self
                    .regions
                    .iter()
                    .skip(index + 1)
                    .any(|other| other.name() == Some(name));
                if duplicate {
                    return Err(invariant("duplicate variable name"));
                }
            }
            expected = region.end();
        }
        if expected > u64::from(u32::MAX) {
            return Err(invariant("regions extend past the address space"));
        }
        Ok(())
    }

    #[cfg(any(debug_assertions, feature = "strict-invariants"))]
    fn check(&self) -> MmuResult<()> {
        self.validate()
    }

    #[cfg(not(any(debug_assertions, feature = "strict-invariants")))]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps)]
    const fn check(&self) -> MmuResult<()> {
        Ok(())
    }
}

fn invariant(what: &'static str) -> MmuError {
    debug_print!(ERROR, "region table invariant violated: {}", what);
    MmuError::InvariantViolation(what)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u32 = 1024;

    fn name(s: &str) -> VariableName {
        let mut name = VariableName::new();
        name.push_str(s).unwrap();
        name
    }

    fn alloc(table: &mut RegionTable, var: &str, ty: DataType, count: u32) -> u32 {
        let placement = table.place(ty.byte_width() * count, PAGE).unwrap();
        table.commit(placement, name(var), ty).unwrap().as_u32()
    }

    fn layout(table: &RegionTable) -> Vec<(Option<&str>, u32, u32)> {
        table
            .regions()
            .iter()
            .map(|r| (r.name(), r.address.as_u32(), r.size))
            .collect()
    }

    #[test]
    fn first_fit_carves_from_hole_start() {
        let mut table = RegionTable::new(4 * PAGE);
        assert_eq!(alloc(&mut table, "x", DataType::Int, 10), 0);
        assert_eq!(alloc(&mut table, "y", DataType::Char, 2000), 40);
        assert_eq!(
            layout(&table),
            [(Some("x"), 0, 40), (Some("y"), 40, 2000), (None, 2040, 4 * PAGE - 2040)]
        );
    }

    #[test]
    fn exact_fit_consumes_hole() {
        let mut table = RegionTable::new(PAGE);
        alloc(&mut table, "a", DataType::Char, 100);
        alloc(&mut table, "b", DataType::Char, 100);
        alloc(&mut table, "c", DataType::Char, PAGE - 200);
        table.release("a", PAGE).unwrap().unwrap();

        assert_eq!(alloc(&mut table, "d", DataType::Short, 50), 0);
        assert_eq!(table.len(), 3);
        assert!(table.regions().iter().all(|r| !r.is_free()));
    }

    #[test]
    fn first_hole_wins_over_better_fit() {
        let mut table = RegionTable::new(PAGE);
        for var in ["a", "b", "c", "d"] {
            alloc(&mut table, var, DataType::Char, 100);
        }
        table.release("a", PAGE).unwrap().unwrap();
        table.release("c", PAGE).unwrap().unwrap();

        assert_eq!(alloc(&mut table, "e", DataType::Char, 60), 0);
        assert_eq!(alloc(&mut table, "f", DataType::Char, 100), 200);
    }

    #[test]
    fn grows_by_whole_pages_when_full() {
        let mut table = RegionTable::new(PAGE);
        alloc(&mut table, "a", DataType::Char, PAGE - 8);

        let placement = table.place(3000, PAGE).unwrap();
        assert!(placement.grows());
        assert_eq!(placement.address.as_u32(), PAGE);

        table.commit(placement, name("big"), DataType::Char).unwrap();
        assert_eq!(table.extent(), 4 * PAGE);
        assert_eq!(
            layout(&table),
            [
                (Some("a"), 0, PAGE - 8),
                (None, PAGE - 8, 8),
                (Some("big"), PAGE, 3000),
                (None, PAGE + 3000, 3 * PAGE - 3000),
            ]
        );
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        let table = RegionTable::new(PAGE);
        assert_eq!(table.place(0, PAGE), Err(MmuError::InvalidSize));
    }

    #[test]
    fn stale_placement_is_an_invariant_violation() {
        let mut table = RegionTable::new(PAGE);
        let placement = table.place(16, PAGE).unwrap();
        table.commit(placement, name("a"), DataType::Long).unwrap();

        let err = table.commit(placement, name("b"), DataType::Long).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn freeing_middle_merges_both_neighbours() {
        let mut table = RegionTable::new(2 * PAGE);
        alloc(&mut table, "a", DataType::Char, 100);
        alloc(&mut table, "b", DataType::Char, 100);
        alloc(&mut table, "c", DataType::Char, 100);
        alloc(&mut table, "d", DataType::Char, PAGE - 300);
        table.release("a", PAGE).unwrap().unwrap();
        table.release("c", PAGE).unwrap().unwrap();
        assert_eq!(table.len(), 5);

        table.release("b", PAGE).unwrap().unwrap();
        assert_eq!(
            layout(&table),
            [(None, 0, 300), (Some("d"), 300, PAGE - 300), (None, PAGE, PAGE)]
        );
    }

    #[test]
    fn neighbour_across_page_boundary_is_kept_apart() {
        let mut table = RegionTable::new(4 * PAGE);
        alloc(&mut table, "a", DataType::Char, 1000);
        alloc(&mut table, "b", DataType::Char, 1000);
        alloc(&mut table, "c", DataType::Char, 100);
        alloc(&mut table, "tail", DataType::Char, 100);

        // b starts in page 0 and ends in page 1
        table.release("c", PAGE).unwrap().unwrap();
        table.release("b", PAGE).unwrap().unwrap();
        assert_eq!(
            layout(&table),
            [
                (Some("a"), 0, 1000),
                (None, 1000, 1000),
                (None, 2000, 100),
                (Some("tail"), 2100, 100),
                (None, 2200, 4 * PAGE - 2200),
            ]
        );
    }

    #[test]
    fn left_neighbour_on_previous_page_is_kept_apart() {
        let mut table = RegionTable::new(4 * PAGE);
        alloc(&mut table, "a", DataType::Char, 1000);
        alloc(&mut table, "b", DataType::Char, 100);
        alloc(&mut table, "c", DataType::Char, 100);
        alloc(&mut table, "d", DataType::Char, 100);

        table.release("b", PAGE).unwrap().unwrap();
        table.release("c", PAGE).unwrap().unwrap();
        assert_eq!(
            layout(&table)[1..3],
            [(None, 1000, 100), (None, 1100, 100)]
        );
    }

    #[test]
    fn round_trip_restores_single_free_region() {
        let mut table = RegionTable::new(8 * PAGE);
        let before = table.clone();
        alloc(&mut table, "x", DataType::Double, 3);
        table.release("x", PAGE).unwrap().unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn release_unknown_name() {
        let mut table = RegionTable::new(PAGE);
        assert!(table.release("ghost", PAGE).is_none());
    }

    #[test]
    fn coalesce_rejects_bad_indices() {
        let mut table = RegionTable::new(PAGE);
        alloc(&mut table, "a", DataType::Char, 10);
        assert!(table.coalesce(7, PAGE).unwrap_err().is_internal());
        assert!(table.coalesce(0, PAGE).unwrap_err().is_internal());
    }

    #[test]
    fn page_usage_follows_region_addresses() {
        let mut table = RegionTable::new(4 * PAGE);
        alloc(&mut table, "a", DataType::Char, 1000);
        alloc(&mut table, "b", DataType::Char, 100);
        table.release("a", PAGE).unwrap().unwrap();

        // b straddles pages 0 and 1
        assert!(table.page_in_use(PageNumber::new(0), PAGE));
        assert!(table.page_in_use(PageNumber::new(1), PAGE));
        assert!(!table.page_in_use(PageNumber::new(2), PAGE));
    }
}

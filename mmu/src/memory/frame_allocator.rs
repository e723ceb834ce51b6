//! Physical Frame Allocator
//!
//! This module tracks which frames of the simulated physical memory are held
//! by some `(process, page)` mapping. Frames are handed out lowest-numbered
//! first, so a released frame is the next one reused.
//!
//! # Algorithm
//!
//! The allocator keeps one bit per frame in a word bitmap:
//! 1. Scan words from frame 0 for one that is not fully set
//! 2. Take the lowest clear bit of that word
//! 3. Fail with `OutOfFrames` once every word has been inspected
//!
//! # Time Complexity
//!
//! - Assignment: O(n / 64) where n is the number of frames
//! - Release: O(1)

#![deny(missing_docs)]

use crate::memory::FrameNumber;
use crate::{MmuError, MmuResult};

const BITS_PER_WORD: u32 = u64::BITS;

/// Allocation statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStats {
    /// Total frame assignments
    pub total_assignments: u64,
    /// Total frame releases
    pub total_releases: u64,
    /// Frames currently held
    pub frames_in_use: u32,
    /// Highest number of frames held at once
    pub peak_in_use: u32,
    /// Assignments refused because memory was exhausted
    pub failed_assignments: u64,
}

/// Lowest-free-first physical frame allocator
#[derive(Debug, Clone)]
pub struct FrameAllocator {
    /// One bit per frame, set when held
    bitmap: Vec<u64>,
    /// Total frames managed
    frame_count: u32,
    /// Allocation statistics
    stats: AllocationStats,
}

impl FrameAllocator {
    /// Create an allocator managing `frame_count` frames, all free
    pub fn new(frame_count: u32) -> Self {
        let words = frame_count.div_ceil(BITS_PER_WORD) as usize;
        Self {
            bitmap: vec![0; words],
            frame_count,
            stats: AllocationStats::default(),
        }
    }

    /// Total frames managed
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Frames not currently held
    pub const fn free_frames(&self) -> u32 {
        self.frame_count - self.stats.frames_in_use
    }

    /// Allocation statistics
    pub const fn stats(&self) -> AllocationStats {
        self.stats
    }

    /// Whether `frame` is currently held
    pub fn is_assigned(&self, frame: FrameNumber) -> bool {
        let (word, bit) = Self::locate(frame);
        self.bitmap
            .get(word)
            .is_some_and(|bits| bits & (1 << bit) != 0)
    }

    /// Take the lowest-numbered free frame
    pub fn assign(&mut self) -> MmuResult<FrameNumber> {
        let found = self
            .bitmap
            .iter()
            .enumerate()
            .find(|(_, bits)| **bits != u64::MAX)
            .map(|(word, bits)| word as u32 * BITS_PER_WORD + bits.trailing_ones())
            .filter(|&frame| frame < self.frame_count);

        let Some(frame) = found.map(FrameNumber::new) else {
            self.stats.failed_assignments += 1;
            debug_print!(WARN, "frame assignment failed: all {} frames held", self.frame_count);
            return Err(MmuError::OutOfFrames);
        };

        let (word, bit) = Self::locate(frame);
        if let Some(bits) = self.bitmap.get_mut(word) {
            *bits |= 1 << bit;
        }

        self.stats.total_assignments += 1;
        self.stats.frames_in_use += 1;
        self.stats.peak_in_use = self.stats.peak_in_use.max(self.stats.frames_in_use);

        debug_print!(TRACE, "assigned frame {}", frame);
        Ok(frame)
    }

    /// Return `frame` to the pool
    ///
    /// Releasing a frame that is not held is an invariant violation.
    pub fn release(&mut self, frame: FrameNumber) -> MmuResult<()> {
        let (word, bit) = Self::locate(frame);
        match self.bitmap.get_mut(word) {
            Some(bits) if *bits & (1 << bit) != 0 => {
                *bits &= !(1 << bit);
                self.stats.total_releases += 1;
                self.stats.frames_in_use -= 1;
                debug_print!(TRACE, "released frame {}", frame);
                Ok(())
            }
            _ => {
                debug_print!(ERROR, "release of frame {} which is not held", frame);
                Err(MmuError::InvariantViolation("release of a frame that is not held"))
            }
        }
    }

    const fn locate(frame: FrameNumber) -> (usize, u32) {
        let raw = frame.as_u32();
        ((raw / BITS_PER_WORD) as usize, raw % BITS_PER_WORD)
    }
}

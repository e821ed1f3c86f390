// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot bookkeeping shared by every backend.
//!
//! Two independent axes exist per frame: the [`FrameSlot`] (which CPU-side
//! resource set is being reused) and the [`ImageIndex`] handed back by the
//! presentation engine. They are separate types so one can never be used to
//! index the other's arrays.

use std::fmt;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// One of the `MAX_FRAMES_IN_FLIGHT` reusable resource sets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub const FIRST: FrameSlot = FrameSlot(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_FRAMES_IN_FLIGHT).then_some(Self(index))
    }

    pub fn index(self) -> usize {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self((self.0 + 1) % MAX_FRAMES_IN_FLIGHT)
    }

    pub fn all() -> impl Iterator<Item = FrameSlot> {
        (0..MAX_FRAMES_IN_FLIGHT).map(FrameSlot)
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Index of a presentable image as returned by acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageIndex(u32);

impl ImageIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {}", self.0)
    }
}

/// Which frame slot last submitted work that renders into each image.
///
/// Before recording into a freshly acquired image, the owning slot's fence
/// must be signaled; otherwise a slot that is two generations old could still
/// be writing the same image when the image count exceeds the slot count.
#[derive(Clone, Debug, Default)]
pub struct ImageSlotTable {
    owners: Vec<Option<FrameSlot>>,
}

impl ImageSlotTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image: ImageIndex) -> Option<FrameSlot> {
        self.owners.get(image.as_usize()).copied().flatten()
    }

    pub fn assign(&mut self, image: ImageIndex, slot: FrameSlot) {
        debug_assert!(image.as_usize() < self.owners.len(), "{image} out of range");
        if let Some(owner) = self.owners.get_mut(image.as_usize()) {
            *owner = Some(slot);
        }
    }
}

/// Buffer selection for data produced by compute and consumed as vertex input.
///
/// At slot `k` compute reads buffer `k % 2` and writes `(k + 1) % 2`, while
/// graphics draws from `k % 2`. What compute writes at slot `k` is therefore
/// exactly what graphics draws at `k.next()`.
pub mod ping_pong {
    use super::{FrameSlot, MAX_FRAMES_IN_FLIGHT};

    pub const BUFFER_COUNT: usize = 2;

    // write_index(k) == read_index(k.next()) only holds for an even slot count.
    const _: () = assert!(MAX_FRAMES_IN_FLIGHT % BUFFER_COUNT == 0);

    /// Buffer graphics binds as vertex input (and compute reads as previous state).
    pub fn read_index(slot: FrameSlot) -> usize {
        slot.index() % BUFFER_COUNT
    }

    /// Buffer the compute dispatch overwrites.
    pub fn write_index(slot: FrameSlot) -> usize {
        (slot.index() + 1) % BUFFER_COUNT
    }
}

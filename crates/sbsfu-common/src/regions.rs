// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Flash Region Map
//!
//! Named ROM/RAM address ranges for one build configuration. Regions are
//! static: they come from `const` presets and never change at runtime.
//!
//! # STM32WL single-image layout
//!
//! ```text
//! ┌──────────────────────────────┬───────────────────────────┐
//! │ 0x0800_0000 - 0x0800_01FF    │ Vector table              │
//! │ 0x0800_0200 - 0x0800_07FF    │ Secure engine keys        │
//! │ 0x0800_0800 - 0x0800_B7FF    │ Secure engine code        │
//! │ 0x0800_B800 - 0x0801_2FFF    │ Bootloader code           │
//! │ 0x0801_3000 - 0x0801_3FFF    │ KMS data storage (2 blks) │
//! │ 0x0801_4000 - 0x0801_5FFF    │ Swap area                 │
//! │ 0x0801_6000 - 0x0802_AFFF    │ Download slot 1           │
//! │ 0x0802_B000 - 0x0803_FFFF    │ Active slot 1             │
//! ├──────────────────────────────┼───────────────────────────┤
//! │ 0x2000_0000 - 0x2000_0FFF    │ Secure engine RAM         │
//! │ 0x2000_1000 - 0x2000_3FFF    │ Bootloader RAM            │
//! └──────────────────────────────┴───────────────────────────┘
//! ```
//!
//! Region ends are inclusive, as in the linker scripts.

use crate::config::FlashGeometry;
use crate::constants::{MAX_SLOTS, SRAM_BASE, SRAM_SIZE};
use crate::errors::{Error, Result};

/// Memory space a region lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    /// Flash
    Rom,
    /// SRAM
    Ram,
}

/// Role of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Boot vector table
    VectorTable,
    /// Secure engine code
    SeCode,
    /// Secure engine key storage
    SeKeys,
    /// Secure engine RAM
    SeRam,
    /// Bootloader code
    BootloaderCode,
    /// Bootloader RAM
    BootloaderRam,
    /// Active firmware slot (1-based index)
    SlotActive(u8),
    /// Download firmware slot (1-based index)
    SlotDownload(u8),
    /// Swap area used while installing an image
    Swap,
    /// KMS data storage, split into the two NVM blocks
    KmsDataStorage,
}

impl RegionKind {
    /// Memory space of this kind of region
    #[must_use]
    pub const fn space(self) -> MemorySpace {
        match self {
            Self::SeRam | Self::BootloaderRam => MemorySpace::Ram,
            _ => MemorySpace::Rom,
        }
    }

    /// Firmware slots and the swap area must be page aligned
    #[must_use]
    pub const fn requires_page_alignment(self) -> bool {
        matches!(
            self,
            Self::SlotActive(_) | Self::SlotDownload(_) | Self::Swap | Self::KmsDataStorage
        )
    }
}

/// A named, contiguous address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    /// Role of the region
    pub kind: RegionKind,
    /// First address
    pub start: u32,
    /// Last address (inclusive)
    pub end: u32,
}

impl FlashRegion {
    /// Define a region
    #[must_use]
    pub const fn new(kind: RegionKind, start: u32, end: u32) -> Self {
        Self { kind, start, end }
    }

    /// Region that is not present in this configuration
    #[must_use]
    pub const fn unconfigured(kind: RegionKind) -> Self {
        Self { kind, start: 0, end: 0 }
    }

    /// Check whether the region exists in this configuration
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        !(self.start == 0 && self.end == 0)
    }

    /// Size in bytes: `end - start + 1`, zero when unconfigured
    ///
    /// Saturates at `u32::MAX` for a region spanning the whole address
    /// space, which [`RegionMap::validate`] rejects.
    #[must_use]
    pub const fn size(&self) -> u32 {
        if self.is_configured() && self.end >= self.start {
            (self.end - self.start).saturating_add(1)
        } else {
            0
        }
    }

    /// Check if `address` falls in the region
    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        self.is_configured() && address >= self.start && address <= self.end
    }

    /// Check if two configured regions share at least one address
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.is_configured()
            && other.is_configured()
            && self.start <= other.end
            && other.start <= self.end
    }

    /// Bounds-checked window over the region
    #[must_use]
    pub const fn window(&self) -> MemoryWindow {
        MemoryWindow::new(self.start, self.size())
    }
}

/// Bounds-checked view over a memory range
///
/// All raw addresses handed to the flash driver are produced by a window,
/// so a bad offset is caught before any access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    base: u32,
    len: u32,
}

impl MemoryWindow {
    /// Create a window of `len` bytes at `base`
    #[must_use]
    pub const fn new(base: u32, len: u32) -> Self {
        Self { base, len }
    }

    /// First address
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Length in bytes
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Check if the window is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address
    ///
    /// Widened so a window ending at the top of the address space is
    /// representable.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.len)
    }

    /// Check that `[address, address + len)` lies inside the window
    #[must_use]
    pub const fn contains_range(&self, address: u32, len: usize) -> bool {
        if address < self.base || len > u32::MAX as usize {
            return false;
        }
        let offset = address - self.base;
        offset <= self.len && len as u32 <= self.len - offset
    }

    /// Absolute address of `[offset, offset + len)` inside the window
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the range leaves the window.
    pub fn address_of(&self, offset: u32, len: usize) -> Result<u32> {
        let address = self.base.checked_add(offset).ok_or(Error::OutOfBounds)?;
        if self.contains_range(address, len) {
            Ok(address)
        } else {
            Err(Error::OutOfBounds)
        }
    }

    /// Split into two equal halves
    ///
    /// # Errors
    /// [`Error::InvalidKmsArea`] if the length is odd or zero.
    pub fn split_halves(&self) -> Result<(MemoryWindow, MemoryWindow)> {
        if self.len == 0 || self.len % 2 != 0 {
            return Err(Error::InvalidKmsArea);
        }
        let half = self.len / 2;
        let upper = self.base.checked_add(half).ok_or(Error::InvalidKmsArea)?;
        Ok((MemoryWindow::new(self.base, half), MemoryWindow::new(upper, half)))
    }
}

/// Static memory map of one build configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMap {
    /// Boot vector table
    pub vector_table: FlashRegion,
    /// Secure engine code
    pub se_code: FlashRegion,
    /// Secure engine keys
    pub se_keys: FlashRegion,
    /// Secure engine RAM
    pub se_ram: FlashRegion,
    /// Bootloader code
    pub bootloader_code: FlashRegion,
    /// Bootloader RAM
    pub bootloader_ram: FlashRegion,
    /// Active slots 1..=MAX_SLOTS
    pub active: [FlashRegion; MAX_SLOTS],
    /// Download slots 1..=MAX_SLOTS
    pub download: [FlashRegion; MAX_SLOTS],
    /// Swap area
    pub swap: FlashRegion,
    /// KMS data storage
    pub kms: FlashRegion,
}

impl RegionMap {
    /// Map with every region unconfigured
    pub const UNCONFIGURED: Self = Self {
        vector_table: FlashRegion::unconfigured(RegionKind::VectorTable),
        se_code: FlashRegion::unconfigured(RegionKind::SeCode),
        se_keys: FlashRegion::unconfigured(RegionKind::SeKeys),
        se_ram: FlashRegion::unconfigured(RegionKind::SeRam),
        bootloader_code: FlashRegion::unconfigured(RegionKind::BootloaderCode),
        bootloader_ram: FlashRegion::unconfigured(RegionKind::BootloaderRam),
        active: [
            FlashRegion::unconfigured(RegionKind::SlotActive(1)),
            FlashRegion::unconfigured(RegionKind::SlotActive(2)),
            FlashRegion::unconfigured(RegionKind::SlotActive(3)),
        ],
        download: [
            FlashRegion::unconfigured(RegionKind::SlotDownload(1)),
            FlashRegion::unconfigured(RegionKind::SlotDownload(2)),
            FlashRegion::unconfigured(RegionKind::SlotDownload(3)),
        ],
        swap: FlashRegion::unconfigured(RegionKind::Swap),
        kms: FlashRegion::unconfigured(RegionKind::KmsDataStorage),
    };

    /// STM32WL, one active and one download slot (see module docs)
    pub const STM32WL_SINGLE_IMAGE: Self = Self {
        vector_table: FlashRegion::new(RegionKind::VectorTable, 0x0800_0000, 0x0800_01FF),
        se_keys: FlashRegion::new(RegionKind::SeKeys, 0x0800_0200, 0x0800_07FF),
        se_code: FlashRegion::new(RegionKind::SeCode, 0x0800_0800, 0x0800_B7FF),
        bootloader_code: FlashRegion::new(RegionKind::BootloaderCode, 0x0800_B800, 0x0801_2FFF),
        kms: FlashRegion::new(RegionKind::KmsDataStorage, 0x0801_3000, 0x0801_3FFF),
        swap: FlashRegion::new(RegionKind::Swap, 0x0801_4000, 0x0801_5FFF),
        download: [
            FlashRegion::new(RegionKind::SlotDownload(1), 0x0801_6000, 0x0802_AFFF),
            FlashRegion::unconfigured(RegionKind::SlotDownload(2)),
            FlashRegion::unconfigured(RegionKind::SlotDownload(3)),
        ],
        active: [
            FlashRegion::new(RegionKind::SlotActive(1), 0x0802_B000, 0x0803_FFFF),
            FlashRegion::unconfigured(RegionKind::SlotActive(2)),
            FlashRegion::unconfigured(RegionKind::SlotActive(3)),
        ],
        se_ram: FlashRegion::new(RegionKind::SeRam, 0x2000_0000, 0x2000_0FFF),
        bootloader_ram: FlashRegion::new(RegionKind::BootloaderRam, 0x2000_1000, 0x2000_3FFF),
    };

    /// Active slot `index` (1-based); `None` outside `1..=MAX_SLOTS`
    #[must_use]
    pub fn active_slot(&self, index: u8) -> Option<&FlashRegion> {
        slot_index(index).map(|i| &self.active[i])
    }

    /// Download slot `index` (1-based); `None` outside `1..=MAX_SLOTS`
    #[must_use]
    pub fn download_slot(&self, index: u8) -> Option<&FlashRegion> {
        slot_index(index).map(|i| &self.download[i])
    }

    /// Swap area
    #[must_use]
    pub const fn swap(&self) -> &FlashRegion {
        &self.swap
    }

    /// KMS data storage area
    #[must_use]
    pub const fn kms_data_storage(&self) -> &FlashRegion {
        &self.kms
    }

    /// Iterate over every region, configured or not
    pub fn regions(&self) -> impl Iterator<Item = &FlashRegion> {
        [
            &self.vector_table,
            &self.se_code,
            &self.se_keys,
            &self.se_ram,
            &self.bootloader_code,
            &self.bootloader_ram,
            &self.swap,
            &self.kms,
        ]
        .into_iter()
        .chain(self.active.iter())
        .chain(self.download.iter())
    }

    /// Check the integration constraints of the map
    ///
    /// This is meant for build-time tests and bring-up; the boot path trusts
    /// the map it was linked with.
    ///
    /// # Errors
    /// - [`Error::InvalidRegion`] when a region ends before it starts or
    ///   spans the whole address space
    /// - [`Error::OutOfBounds`] when a RAM region leaves SRAM
    /// - [`Error::RegionMisaligned`] when a slot, the swap area or the KMS
    ///   area is not page aligned
    /// - [`Error::InvalidKmsArea`] when the KMS area does not split into two
    ///   equal page-aligned blocks
    /// - [`Error::RegionOverlap`] when two regions of one memory space overlap
    pub fn validate(&self, geometry: &FlashGeometry) -> Result<()> {
        for region in self.regions().filter(|r| r.is_configured()) {
            if region.end < region.start || region.end - region.start == u32::MAX {
                return Err(Error::InvalidRegion);
            }
            if region.kind.space() == MemorySpace::Ram && !sram_contains(region) {
                return Err(Error::OutOfBounds);
            }
            if region.kind.requires_page_alignment()
                && !(geometry.is_page_aligned(region.start)
                    && geometry.is_page_aligned(region.end.wrapping_add(1)))
            {
                return Err(Error::RegionMisaligned);
            }
        }

        if self.kms.is_configured() {
            let (block0, block1) = self.kms.window().split_halves()?;
            if !geometry.is_page_aligned(block0.len()) || !geometry.is_page_aligned(block1.base()) {
                return Err(Error::InvalidKmsArea);
            }
        }

        for (i, a) in self.regions().enumerate() {
            for b in self.regions().skip(i + 1) {
                if a.kind.space() == b.kind.space() && a.overlaps(b) {
                    return Err(Error::RegionOverlap);
                }
            }
        }

        Ok(())
    }
}

impl Default for RegionMap {
    fn default() -> Self {
        Self::STM32WL_SINGLE_IMAGE
    }
}

fn sram_contains(region: &FlashRegion) -> bool {
    let sram_end = u64::from(SRAM_BASE) + u64::from(SRAM_SIZE);
    region.start >= SRAM_BASE && u64::from(region.end) < sram_end
}

fn slot_index(index: u8) -> Option<usize> {
    let index = usize::from(index);
    (1..=MAX_SLOTS).contains(&index).then(|| index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_inclusive() {
        let r = FlashRegion::new(RegionKind::SlotActive(1), 0x0802_B000, 0x0803_FFFF);
        assert_eq!(r.size(), 0x15000);
        assert!(r.contains(0x0803_FFFF));
        assert!(!r.contains(0x0804_0000));
    }

    #[test]
    fn test_unconfigured_region_has_zero_size() {
        let r = FlashRegion::unconfigured(RegionKind::Swap);
        assert!(!r.is_configured());
        assert_eq!(r.size(), 0);
        assert!(!r.contains(0));
    }

    #[test]
    fn test_window_bounds() {
        let w = MemoryWindow::new(0x1000, 0x100);
        assert_eq!(w.address_of(0, 0x100), Ok(0x1000));
        assert_eq!(w.address_of(0xFF, 1), Ok(0x10FF));
        assert_eq!(w.address_of(0xFF, 2), Err(Error::OutOfBounds));
        assert_eq!(w.address_of(u32::MAX, 1), Err(Error::OutOfBounds));
        assert!(!w.contains_range(0x0FFF, 1));
    }

    #[test]
    fn test_preset_is_valid() {
        assert_eq!(RegionMap::STM32WL_SINGLE_IMAGE.validate(&FlashGeometry::STM32WL), Ok(()));
        assert_eq!(RegionMap::UNCONFIGURED.validate(&FlashGeometry::STM32WL), Ok(()));
    }
}

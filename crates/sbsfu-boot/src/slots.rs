// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Firmware slot lookup
//!
//! Translates a logical slot into the addresses a download or install step
//! needs. Lookups are pure; an unconfigured slot yields
//! [`FirmwareSlotDescriptor::ZERO`], which callers treat as "not available".

use sbsfu_common::constants::MAX_SLOTS;
use sbsfu_common::{RegionMap, SlotConfig};

/// Logical firmware slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    /// Active (executable) slot, 1-based
    Active(u8),
    /// Download (staging) slot, 1-based
    Download(u8),
    /// Swap area used while installing
    Swap,
}

impl SlotId {
    /// Every slot identifier a map can describe
    pub const ALL: [SlotId; 2 * MAX_SLOTS + 1] = [
        SlotId::Active(1),
        SlotId::Active(2),
        SlotId::Active(3),
        SlotId::Download(1),
        SlotId::Download(2),
        SlotId::Download(3),
        SlotId::Swap,
    ];
}

/// Placement of one firmware image slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSlotDescriptor {
    /// Largest image the slot can hold, header included
    pub max_size: u32,
    /// Where the image is written
    pub download_address: u32,
    /// Offset of the executable image behind the header
    pub image_offset: u32,
    /// Slot the image runs from once installed, 0 if none
    pub execution_address: u32,
}

impl FirmwareSlotDescriptor {
    /// Descriptor of a slot that does not exist
    pub const ZERO: Self = Self {
        max_size: 0,
        download_address: 0,
        image_offset: 0,
        execution_address: 0,
    };

    /// Check whether the slot exists
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.max_size != 0 && self.download_address != 0
    }

    /// Address of the application vector table once installed
    #[must_use]
    pub const fn vector_table_address(&self) -> Option<u32> {
        if self.execution_address == 0 {
            None
        } else {
            self.execution_address.checked_add(self.image_offset)
        }
    }
}

impl Default for FirmwareSlotDescriptor {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Describe `slot` in `map`
#[must_use]
pub fn get_download_area_info(map: &RegionMap, config: &SlotConfig, slot: SlotId) -> FirmwareSlotDescriptor {
    match slot {
        SlotId::Active(n) => match map.active_slot(n).filter(|r| r.is_configured()) {
            Some(region) => FirmwareSlotDescriptor {
                max_size: region.size(),
                download_address: region.start,
                image_offset: config.image_offset,
                execution_address: region.start,
            },
            None => FirmwareSlotDescriptor::ZERO,
        },
        SlotId::Download(n) => match map.download_slot(n).filter(|r| r.is_configured()) {
            Some(region) => FirmwareSlotDescriptor {
                max_size: region.size(),
                download_address: region.start,
                image_offset: config.image_offset,
                execution_address: map
                    .active_slot(n)
                    .filter(|r| r.is_configured())
                    .map_or(0, |r| r.start),
            },
            None => FirmwareSlotDescriptor::ZERO,
        },
        SlotId::Swap => {
            let swap = map.swap();
            if swap.is_configured() {
                FirmwareSlotDescriptor {
                    max_size: swap.size(),
                    download_address: swap.start,
                    image_offset: 0,
                    execution_address: 0,
                }
            } else {
                FirmwareSlotDescriptor::ZERO
            }
        }
    }
}

/// Slot lookups over one region map
#[derive(Debug, Clone, Copy)]
pub struct SlotManager<'a> {
    map: &'a RegionMap,
    config: SlotConfig,
}

impl<'a> SlotManager<'a> {
    /// Create a manager over `map`
    #[must_use]
    pub const fn new(map: &'a RegionMap, config: SlotConfig) -> Self {
        Self { map, config }
    }

    /// Descriptor of `slot`
    #[must_use]
    pub fn descriptor(&self, slot: SlotId) -> FirmwareSlotDescriptor {
        get_download_area_info(self.map, &self.config, slot)
    }

    /// Slots present in the map
    pub fn configured_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        SlotId::ALL
            .into_iter()
            .filter(move |slot| self.descriptor(*slot).is_available())
    }

    /// Download slot that stages images for `active`
    #[must_use]
    pub fn staging_slot_for(&self, active: SlotId) -> Option<SlotId> {
        match active {
            SlotId::Active(n) if self.descriptor(active).is_available() => {
                let staging = SlotId::Download(n);
                self.descriptor(staging).is_available().then_some(staging)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_index_is_zero() {
        let map = RegionMap::STM32WL_SINGLE_IMAGE;
        let config = SlotConfig::DEFAULT;
        assert_eq!(get_download_area_info(&map, &config, SlotId::Active(0)), FirmwareSlotDescriptor::ZERO);
        assert_eq!(get_download_area_info(&map, &config, SlotId::Download(9)), FirmwareSlotDescriptor::ZERO);
    }

    #[test]
    fn test_zero_descriptor_has_no_vector_table() {
        assert!(!FirmwareSlotDescriptor::ZERO.is_available());
        assert_eq!(FirmwareSlotDescriptor::ZERO.vector_table_address(), None);
    }
}

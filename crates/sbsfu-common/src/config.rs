// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Secure boot configuration
//!
//! All configuration is compile-time. Protection checks are enabled through a
//! typed [`ProtectionSet`] instead of chains of feature flags, and flash
//! geometry is a value that the region map and the NVM store validate against.

use crate::constants;

/// Flash geometry of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Erase page size in bytes
    pub page_size: u32,
    /// Programming granularity in bytes
    pub write_granularity: usize,
    /// Value of an erased byte
    pub erased_byte: u8,
}

impl FlashGeometry {
    /// STM32WL flash: 2 KB pages, double-word programming
    pub const STM32WL: Self = Self {
        page_size: constants::FLASH_PAGE_SIZE,
        write_granularity: constants::FLASH_WRITE_GRANULARITY,
        erased_byte: constants::FLASH_ERASED_BYTE,
    };

    /// Value of an erased 32-bit word
    #[must_use]
    pub const fn erased_word(&self) -> u32 {
        u32::from_ne_bytes([self.erased_byte; 4])
    }

    /// Check that `value` sits on a page boundary
    #[must_use]
    pub const fn is_page_aligned(&self, value: u32) -> bool {
        value % self.page_size == 0
    }
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self::STM32WL
    }
}

/// Firmware slot configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    /// Offset of the executable image from the slot start (header size)
    pub image_offset: u32,
}

impl SlotConfig {
    /// Default slot configuration
    pub const DEFAULT: Self = Self {
        image_offset: constants::IMAGE_HEADER_OFFSET,
    };
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Boot configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Security protections applied and checked during boot, in order
    pub protections: ProtectionSet,
    /// Initial flow-control accumulator value
    pub flow_init: u32,
    /// Firmware slot configuration
    pub slots: SlotConfig,
}

impl BootConfig {
    /// Production configuration: every protection enabled
    pub const DEFAULT: Self = Self {
        protections: ProtectionSet::ALL,
        flow_init: constants::FLOW_CTRL_INIT_VALUE,
        slots: SlotConfig::DEFAULT,
    };

    /// Development configuration: debug port and readout stay open
    pub const DEVELOPMENT: Self = Self {
        protections: ProtectionSet::ALL
            .without(Protection::ReadoutProtection)
            .without(Protection::DebugAccessLock),
        flow_init: constants::FLOW_CTRL_INIT_VALUE,
        slots: SlotConfig::DEFAULT,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A boot-time security protection
///
/// Variants are listed in the order the boot sequence applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protection {
    /// Readout protection (RDP option byte)
    ReadoutProtection = 0,
    /// Write protection of the boot area (WRP option bytes)
    WriteProtection = 1,
    /// Proprietary code readout protection (PCROP)
    ProprietaryCodeProtection = 2,
    /// Secure user memory hiding the secure engine
    SecureUserMemory = 3,
    /// MPU isolation of the secure engine
    Mpu = 4,
    /// DMA isolation of secure RAM
    DmaProtection = 5,
    /// Independent watchdog
    Watchdog = 6,
    /// Debug access port lock
    DebugAccessLock = 7,
    /// Tamper detection
    TamperDetection = 8,
    /// Clock security monitoring
    ClockMonitor = 9,
}

impl Protection {
    /// All protections in application order
    pub const ORDER: [Protection; 10] = [
        Protection::ReadoutProtection,
        Protection::WriteProtection,
        Protection::ProprietaryCodeProtection,
        Protection::SecureUserMemory,
        Protection::Mpu,
        Protection::DmaProtection,
        Protection::Watchdog,
        Protection::DebugAccessLock,
        Protection::TamperDetection,
        Protection::ClockMonitor,
    ];

    /// Bit of this protection inside a [`ProtectionSet`]
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadoutProtection => "RDP",
            Self::WriteProtection => "WRP",
            Self::ProprietaryCodeProtection => "PCROP",
            Self::SecureUserMemory => "SEC_MEM",
            Self::Mpu => "MPU",
            Self::DmaProtection => "DMA",
            Self::Watchdog => "IWDG",
            Self::DebugAccessLock => "DAP",
            Self::TamperDetection => "TAMPER",
            Self::ClockMonitor => "CSS",
        }
    }
}

/// Typed set of enabled protections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProtectionSet(u16);

impl ProtectionSet {
    /// No protection enabled
    pub const EMPTY: Self = Self(0);

    /// Every protection enabled
    pub const ALL: Self = Self((1 << Protection::ORDER.len()) - 1);

    /// Build a set from a list of protections
    #[must_use]
    pub const fn from_slice(protections: &[Protection]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < protections.len() {
            bits |= protections[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Return a copy with `protection` enabled
    #[must_use]
    pub const fn with(self, protection: Protection) -> Self {
        Self(self.0 | protection.bit())
    }

    /// Return a copy with `protection` disabled
    #[must_use]
    pub const fn without(self, protection: Protection) -> Self {
        Self(self.0 & !protection.bit())
    }

    /// Check membership
    #[must_use]
    pub const fn contains(self, protection: Protection) -> bool {
        self.0 & protection.bit() != 0
    }

    /// Check that every protection of `other` is in this set
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of enabled protections
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Check if no protection is enabled
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bit representation
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Iterate enabled protections in application order
    pub fn iter(self) -> impl Iterator<Item = Protection> {
        Protection::ORDER.into_iter().filter(move |p| self.contains(*p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_bits_are_unique() {
        let mut seen = 0u16;
        for p in Protection::ORDER {
            assert_eq!(seen & p.bit(), 0);
            seen |= p.bit();
        }
        assert_eq!(seen, ProtectionSet::ALL.bits());
    }

    #[test]
    fn test_development_config_keeps_debug_open() {
        let set = BootConfig::DEVELOPMENT.protections;
        assert!(!set.contains(Protection::DebugAccessLock));
        assert!(!set.contains(Protection::ReadoutProtection));
        assert!(set.contains(Protection::Watchdog));
        assert_eq!(set.len(), Protection::ORDER.len() - 2);
    }

    #[test]
    fn test_iter_follows_application_order() {
        let set = ProtectionSet::from_slice(&[Protection::Watchdog, Protection::ReadoutProtection]);
        let mut it = set.iter();
        assert_eq!(it.next(), Some(Protection::ReadoutProtection));
        assert_eq!(it.next(), Some(Protection::Watchdog));
        assert_eq!(it.next(), None);
    }
}

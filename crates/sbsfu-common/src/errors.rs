// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the secure boot components
//!
//! This module defines the unified error type used by every crate of the
//! workspace. All errors are `no_std` compatible and carry no heap data.
//!
//! Flow-control integrity failures have no variant here: they never
//! surface as a value and end in the security error handler instead.

use core::fmt;

/// Result type alias for secure boot operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Storage Errors (0x03xx)
    // =========================================================================
    /// Storage write operation failed
    StorageWriteFailed,
    /// Storage erase operation failed
    StorageEraseFailed,
    /// Storage is full
    StorageFull,
    /// Requested item not found in storage
    StorageNotFound,
    /// Storage data is corrupted
    StorageCorrupted,

    // =========================================================================
    // Slot Errors (0x04xx)
    // =========================================================================
    /// Slot is not configured on this target
    SlotNotAvailable,

    // =========================================================================
    // Memory Map Errors (0x05xx)
    // =========================================================================
    /// Region end lies before its start
    InvalidRegion,
    /// Two regions of the same memory space overlap
    RegionOverlap,
    /// Region is not aligned to the flash page size
    RegionMisaligned,
    /// KMS data storage cannot be split into two equal blocks
    InvalidKmsArea,
    /// Address or length outside a memory window
    OutOfBounds,

    // =========================================================================
    // HAL Errors (0x08xx)
    // =========================================================================
    /// Hardware initialization failed
    HardwareInitFailed,
    /// Flash operation failed
    FlashError,
    /// Flash controller is locked
    FlashLocked,
    /// Security protection could not be applied
    ProtectionError,

    // =========================================================================
    // Boot Errors (0x0Axx)
    // =========================================================================
    /// Boot configuration is not supported by the target
    InvalidBootConfig,
    /// Boot stage executed out of order
    InvalidBootStage,

    // =========================================================================
    // General Errors (0xFFxx)
    // =========================================================================
    /// Buffer too small for operation
    BufferTooSmall,
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation timed out
    Timeout,
    /// Resource is busy
    Busy,
}

impl Error {
    /// Get the numeric error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            // Storage errors (0x03xx)
            Self::StorageWriteFailed => 0x0302,
            Self::StorageEraseFailed => 0x0303,
            Self::StorageFull => 0x0304,
            Self::StorageNotFound => 0x0305,
            Self::StorageCorrupted => 0x0306,

            // Slot errors (0x04xx)
            Self::SlotNotAvailable => 0x0402,

            // Memory map errors (0x05xx)
            Self::InvalidRegion => 0x0501,
            Self::RegionOverlap => 0x0502,
            Self::RegionMisaligned => 0x0503,
            Self::InvalidKmsArea => 0x0504,
            Self::OutOfBounds => 0x0505,

            // HAL errors (0x08xx)
            Self::HardwareInitFailed => 0x0801,
            Self::FlashError => 0x0802,
            Self::FlashLocked => 0x0803,
            Self::ProtectionError => 0x0804,

            // Boot errors (0x0Axx)
            Self::InvalidBootConfig => 0x0A01,
            Self::InvalidBootStage => 0x0A02,

            // General errors (0xFFxx)
            Self::BufferTooSmall => 0xFF01,
            Self::InvalidParameter => 0xFF02,
            Self::Timeout => 0xFF03,
            Self::Busy => 0xFF04,
        }
    }

    /// Check if this error stems from a flash or storage operation.
    ///
    /// These are the recoverable failures: the caller may retry or fall back
    /// to the alternate NVM block.
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::StorageWriteFailed
                | Self::StorageEraseFailed
                | Self::StorageFull
                | Self::StorageNotFound
                | Self::StorageCorrupted
                | Self::FlashError
                | Self::FlashLocked
        )
    }

    /// Check if this error describes a misconfigured memory map
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegion
                | Self::RegionOverlap
                | Self::RegionMisaligned
                | Self::InvalidKmsArea
                | Self::InvalidBootConfig
        )
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::StorageWriteFailed => "storage write failed",
            Self::StorageEraseFailed => "storage erase failed",
            Self::StorageFull => "storage full",
            Self::StorageNotFound => "storage item not found",
            Self::StorageCorrupted => "storage corrupted",
            Self::SlotNotAvailable => "slot not available",
            Self::InvalidRegion => "invalid region",
            Self::RegionOverlap => "regions overlap",
            Self::RegionMisaligned => "region not page aligned",
            Self::InvalidKmsArea => "invalid KMS data storage area",
            Self::OutOfBounds => "address out of bounds",
            Self::HardwareInitFailed => "hardware init failed",
            Self::FlashError => "flash error",
            Self::FlashLocked => "flash locked",
            Self::ProtectionError => "protection error",
            Self::InvalidBootConfig => "invalid boot config",
            Self::InvalidBootStage => "invalid boot stage",
            Self::BufferTooSmall => "buffer too small",
            Self::InvalidParameter => "invalid parameter",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Key store errors

use core::fmt;

use sbsfu_common::Error;
use sbsfu_hal::HalError;

/// Key store error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsError {
    /// Flash driver failure
    Flash(HalError),
    /// No live item with this id
    NotFound,
    /// Item failed its CRC check
    Corrupted,
    /// Live items do not fit in one block
    StoreFull,
    /// Too many distinct live ids
    TooManyItems,
    /// Reserved id
    InvalidId,
    /// Empty or oversized item
    InvalidLength,
    /// Caller buffer shorter than the item
    BufferTooSmall,
}

impl KmsError {
    /// Get error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::Flash(e) => e.code(),
            Self::NotFound => 0x0C01,
            Self::Corrupted => 0x0C02,
            Self::StoreFull => 0x0C03,
            Self::TooManyItems => 0x0C04,
            Self::InvalidId => 0x0C05,
            Self::InvalidLength => 0x0C06,
            Self::BufferTooSmall => 0x0C07,
        }
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Flash(e) => e.description(),
            Self::NotFound => "Item not found",
            Self::Corrupted => "Item CRC mismatch",
            Self::StoreFull => "Key store full",
            Self::TooManyItems => "Too many items",
            Self::InvalidId => "Reserved item id",
            Self::InvalidLength => "Invalid item length",
            Self::BufferTooSmall => "Buffer too small",
        }
    }
}

impl fmt::Display for KmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

impl From<HalError> for KmsError {
    fn from(e: HalError) -> Self {
        Self::Flash(e)
    }
}

impl From<KmsError> for Error {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::Flash(e) => Error::from(e),
            KmsError::NotFound => Error::StorageNotFound,
            KmsError::Corrupted => Error::StorageCorrupted,
            KmsError::StoreFull | KmsError::TooManyItems => Error::StorageFull,
            KmsError::InvalidId | KmsError::InvalidLength => Error::InvalidParameter,
            KmsError::BufferTooSmall => Error::BufferTooSmall,
        }
    }
}

/// Result type for key store operations
pub type KmsResult<T> = core::result::Result<T, KmsError>;

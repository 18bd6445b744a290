// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL error types

use core::fmt;

/// HAL error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Driver not initialized
    NotInitialized,
    /// Generic flash controller error
    FlashError,
    /// Program/erase requested while the flash is locked
    FlashLocked,
    /// Flash address out of bounds
    FlashOutOfBounds,
    /// Address or length not aligned to the write granularity or page
    FlashMisaligned,
    /// Flash erase failed
    FlashEraseFailed,
    /// Flash write failed
    FlashWriteFailed,
    /// Read-back after write or erase did not match
    FlashVerifyFailed,
    /// Flash operation timeout
    FlashTimeout,
    /// Protection could not be applied or is no longer active
    ProtectionFailed,
    /// Protection not implemented on this target
    ProtectionNotSupported,
    /// Invalid parameter
    InvalidParameter,
    /// Controller busy with another operation
    Busy,
}

impl HalError {
    /// Get error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::NotInitialized => 0x0801,
            Self::FlashError => 0x0810,
            Self::FlashLocked => 0x0811,
            Self::FlashOutOfBounds => 0x0812,
            Self::FlashMisaligned => 0x0817,
            Self::FlashEraseFailed => 0x0813,
            Self::FlashWriteFailed => 0x0814,
            Self::FlashVerifyFailed => 0x0815,
            Self::FlashTimeout => 0x0816,
            Self::ProtectionFailed => 0x0820,
            Self::ProtectionNotSupported => 0x0821,
            Self::InvalidParameter => 0x08F0,
            Self::Busy => 0x08F2,
        }
    }

    /// Get error description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not initialized",
            Self::FlashError => "flash error",
            Self::FlashLocked => "flash locked",
            Self::FlashOutOfBounds => "flash address out of bounds",
            Self::FlashMisaligned => "flash access misaligned",
            Self::FlashEraseFailed => "flash erase failed",
            Self::FlashWriteFailed => "flash write failed",
            Self::FlashVerifyFailed => "flash verify failed",
            Self::FlashTimeout => "flash operation timeout",
            Self::ProtectionFailed => "protection failed",
            Self::ProtectionNotSupported => "protection not supported",
            Self::InvalidParameter => "invalid parameter",
            Self::Busy => "busy",
        }
    }

    /// Check if the error came from the flash controller
    #[must_use]
    pub const fn is_flash_error(&self) -> bool {
        matches!(
            self,
            Self::FlashError
                | Self::FlashLocked
                | Self::FlashOutOfBounds
                | Self::FlashMisaligned
                | Self::FlashEraseFailed
                | Self::FlashWriteFailed
                | Self::FlashVerifyFailed
                | Self::FlashTimeout
        )
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

impl From<HalError> for sbsfu_common::Error {
    fn from(e: HalError) -> Self {
        match e {
            HalError::NotInitialized => Self::HardwareInitFailed,
            HalError::FlashLocked => Self::FlashLocked,
            HalError::FlashOutOfBounds => Self::OutOfBounds,
            HalError::FlashEraseFailed => Self::StorageEraseFailed,
            HalError::FlashWriteFailed | HalError::FlashVerifyFailed => Self::StorageWriteFailed,
            HalError::FlashError | HalError::FlashMisaligned => Self::FlashError,
            HalError::FlashTimeout => Self::Timeout,
            HalError::ProtectionFailed => Self::ProtectionError,
            HalError::ProtectionNotSupported => Self::InvalidBootConfig,
            HalError::InvalidParameter => Self::InvalidParameter,
            HalError::Busy => Self::Busy,
        }
    }
}

/// HAL Result type
pub type HalResult<T> = Result<T, HalError>;

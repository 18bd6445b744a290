// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL trait definitions
//!
//! Platform-agnostic interfaces the boot and key management crates are
//! written against. Each target provides one implementation, host tests use
//! the ones in [`crate::sim`].

use crate::error::{HalError, HalResult};
use sbsfu_common::{FlashGeometry, Protection, ProtectionSet};

/// Flash memory interface
///
/// Contract: `unlock` → program or erase → `lock`. Program and erase return
/// [`HalError::FlashLocked`] while locked, [`HalError::Busy`] when the
/// controller is still running a previous operation.
pub trait FlashInterface {
    /// Erase page size in bytes
    const PAGE_SIZE: u32;

    /// Programming granularity in bytes
    const WRITE_GRANULARITY: usize;

    /// Value of an erased byte
    const ERASED_BYTE: u8 = 0xFF;

    /// First address covered by this driver
    fn base_address(&self) -> u32;

    /// Number of bytes covered by this driver
    fn size(&self) -> u32;

    /// Initialize flash controller
    fn init(&mut self) -> HalResult<()>;

    /// Read data from flash
    ///
    /// # Arguments
    /// * `address` - Absolute flash address
    /// * `buffer` - Buffer to read into
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()>;

    /// Program data into flash
    ///
    /// # Arguments
    /// * `address` - Absolute address, aligned to [`Self::WRITE_GRANULARITY`]
    /// * `data` - Data to program, a multiple of [`Self::WRITE_GRANULARITY`] long
    ///
    /// # Notes
    /// Flash must be erased before writing.
    fn write(&mut self, address: u32, data: &[u8]) -> HalResult<()>;

    /// Erase the page containing `address`
    fn erase_page(&mut self, address: u32) -> HalResult<()>;

    /// Erase every page intersecting `[start, end)`
    fn erase_range(&mut self, start: u32, end: u32) -> HalResult<()> {
        if start % Self::PAGE_SIZE != 0 {
            return Err(HalError::FlashMisaligned);
        }
        let mut addr = start;
        while addr < end {
            self.erase_page(addr)?;
            addr += Self::PAGE_SIZE;
        }
        Ok(())
    }

    /// Verify flash contents match expected data
    fn verify(&self, address: u32, expected: &[u8]) -> HalResult<bool> {
        let mut buffer = [0u8; 64];
        let mut offset = 0;

        while offset < expected.len() {
            let chunk_size = (expected.len() - offset).min(buffer.len());
            self.read(address + offset as u32, &mut buffer[..chunk_size])?;

            if buffer[..chunk_size] != expected[offset..offset + chunk_size] {
                return Ok(false);
            }
            offset += chunk_size;
        }

        Ok(true)
    }

    /// Lock the flash controller (reject program/erase)
    fn lock(&mut self) -> HalResult<()>;

    /// Unlock the flash controller (allow program/erase)
    fn unlock(&mut self) -> HalResult<()>;

    /// Check if flash is locked
    fn is_locked(&self) -> bool;

    /// Geometry described by this driver
    fn geometry(&self) -> FlashGeometry {
        FlashGeometry {
            page_size: Self::PAGE_SIZE,
            write_granularity: Self::WRITE_GRANULARITY,
            erased_byte: Self::ERASED_BYTE,
        }
    }

    /// Run `op` with the controller unlocked, relocking afterwards even if
    /// `op` fails. The first error wins.
    fn with_unlocked<T>(&mut self, op: impl FnOnce(&mut Self) -> HalResult<T>) -> HalResult<T>
    where
        Self: Sized,
    {
        self.unlock()?;
        let result = op(self);
        let relock = self.lock();
        let value = result?;
        relock?;
        Ok(value)
    }
}

/// Boot-time security protection interface
///
/// Each call applies or re-checks one protection. The boot sequence treats
/// every error as a security failure.
pub trait ProtectionInterface {
    /// Protections this target can apply
    fn supported(&self) -> ProtectionSet;

    /// Apply `protection` (or confirm a static protection is already set)
    fn apply(&mut self, protection: Protection) -> HalResult<()>;

    /// Check that `protection` is still active
    fn verify(&self, protection: Protection) -> HalResult<()>;
}

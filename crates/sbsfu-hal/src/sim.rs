// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! RAM-backed simulation of the flash controller and boot protections
//!
//! [`SimFlash`] models NOR flash the way the STM32WL controller exposes it:
//! erase sets a whole 2 KB page to `0xFF` and programming works on aligned
//! double words. A double word that is not fully erased can only be
//! overwritten with zeros; any other value fails with
//! [`HalError::FlashWriteFailed`], as PROGERR does on the chip. Words before
//! the failing one stay programmed. It also enforces the lock protocol
//! and supports fault injection so failure paths can be exercised on the
//! host.

use core::cell::Cell;

use heapless::Vec;
use sbsfu_common::constants::{FLASH_PAGE_SIZE, FLASH_WRITE_GRANULARITY};
use sbsfu_common::{Protection, ProtectionSet};

use crate::error::{HalError, HalResult};
use crate::traits::{FlashInterface, ProtectionInterface};

/// Operation counters of a [`SimFlash`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFlashStats {
    /// Pages erased
    pub page_erases: u32,
    /// Double words programmed
    pub programmed_words: u32,
    /// Unlock calls
    pub unlocks: u32,
    /// Lock calls
    pub locks: u32,
}

/// Simulated flash of `N` bytes starting at a page-aligned base address
pub struct SimFlash<const N: usize> {
    base: u32,
    memory: [u8; N],
    locked: bool,
    busy: bool,
    stats: SimFlashStats,
    fail_next_write: bool,
    fail_next_erase: bool,
    stuck_byte: Option<u32>,
    corrupt_byte: Option<u32>,
}

impl<const N: usize> SimFlash<N> {
    /// Create an erased, locked flash at `base`
    #[must_use]
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            memory: [0xFF; N],
            locked: true,
            busy: false,
            stats: SimFlashStats {
                page_erases: 0,
                programmed_words: 0,
                unlocks: 0,
                locks: 0,
            },
            fail_next_write: false,
            fail_next_erase: false,
            stuck_byte: None,
            corrupt_byte: None,
        }
    }

    /// Operation counters
    #[must_use]
    pub const fn stats(&self) -> SimFlashStats {
        self.stats
    }

    /// Raw view of `len` bytes at `address`
    #[must_use]
    pub fn bytes(&self, address: u32, len: usize) -> Option<&[u8]> {
        let offset = self.offset_of(address, len).ok()?;
        Some(&self.memory[offset..offset + len])
    }

    /// Overwrite memory directly, bypassing NOR semantics and the lock
    pub fn poke(&mut self, address: u32, data: &[u8]) -> HalResult<()> {
        let offset = self.offset_of(address, data.len())?;
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Report the controller as busy until cleared
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Fail the next program operation with [`HalError::FlashWriteFailed`]
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Fail the next page erase with [`HalError::FlashEraseFailed`]
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Leave bit 0 of the byte at `address` cleared after every erase
    pub fn stick_bit_at(&mut self, address: u32) {
        self.stuck_byte = Some(address);
    }

    /// Flip bit 0 of the byte at `address` the next time it is programmed
    pub fn corrupt_next_program_at(&mut self, address: u32) {
        self.corrupt_byte = Some(address);
    }

    fn offset_of(&self, address: u32, len: usize) -> HalResult<usize> {
        let offset = address.checked_sub(self.base).ok_or(HalError::FlashOutOfBounds)? as usize;
        if offset.checked_add(len).map_or(true, |end| end > N) {
            return Err(HalError::FlashOutOfBounds);
        }
        Ok(offset)
    }

    fn check_ready(&self) -> HalResult<()> {
        if self.busy {
            return Err(HalError::Busy);
        }
        if self.locked {
            return Err(HalError::FlashLocked);
        }
        Ok(())
    }
}

impl<const N: usize> FlashInterface for SimFlash<N> {
    const PAGE_SIZE: u32 = FLASH_PAGE_SIZE;
    const WRITE_GRANULARITY: usize = FLASH_WRITE_GRANULARITY;

    fn base_address(&self) -> u32 {
        self.base
    }

    fn size(&self) -> u32 {
        N as u32
    }

    fn init(&mut self) -> HalResult<()> {
        if self.base % Self::PAGE_SIZE != 0 || N % Self::PAGE_SIZE as usize != 0 {
            return Err(HalError::FlashMisaligned);
        }
        Ok(())
    }

    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        let offset = self.offset_of(address, buffer.len())?;
        buffer.copy_from_slice(&self.memory[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> HalResult<()> {
        self.check_ready()?;
        if address as usize % Self::WRITE_GRANULARITY != 0 || data.len() % Self::WRITE_GRANULARITY != 0 {
            return Err(HalError::FlashMisaligned);
        }
        let offset = self.offset_of(address, data.len())?;
        if core::mem::take(&mut self.fail_next_write) {
            return Err(HalError::FlashWriteFailed);
        }

        for (i, word) in data.chunks_exact(Self::WRITE_GRANULARITY).enumerate() {
            let start = offset + i * Self::WRITE_GRANULARITY;
            let cells = &mut self.memory[start..start + Self::WRITE_GRANULARITY];
            // PROGERR: only an erased double word, or an all-zero value, may be programmed
            let erased = cells.iter().all(|b| *b == Self::ERASED_BYTE);
            if !erased && word.iter().any(|b| *b != 0) {
                return Err(HalError::FlashWriteFailed);
            }
            for (cell, byte) in cells.iter_mut().zip(word) {
                *cell &= *byte;
            }
            self.stats.programmed_words += 1;

            let word_address = address + (i * Self::WRITE_GRANULARITY) as u32;
            if let Some(addr) = self.corrupt_byte {
                if (word_address..word_address + Self::WRITE_GRANULARITY as u32).contains(&addr) {
                    self.memory[(addr - self.base) as usize] ^= 0x01;
                    self.corrupt_byte = None;
                }
            }
        }
        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> HalResult<()> {
        self.check_ready()?;
        let page_start = address - (address % Self::PAGE_SIZE);
        let offset = self.offset_of(page_start, Self::PAGE_SIZE as usize)?;
        if core::mem::take(&mut self.fail_next_erase) {
            return Err(HalError::FlashEraseFailed);
        }

        self.memory[offset..offset + Self::PAGE_SIZE as usize].fill(Self::ERASED_BYTE);
        if let Some(stuck) = self.stuck_byte {
            if (page_start..page_start + Self::PAGE_SIZE).contains(&stuck) {
                self.memory[(stuck - self.base) as usize] &= !0x01;
            }
        }
        self.stats.page_erases += 1;
        Ok(())
    }

    fn lock(&mut self) -> HalResult<()> {
        self.locked = true;
        self.stats.locks += 1;
        Ok(())
    }

    fn unlock(&mut self) -> HalResult<()> {
        if self.busy {
            return Err(HalError::Busy);
        }
        self.locked = false;
        self.stats.unlocks += 1;
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Maximum number of recorded protection applications
pub const MAX_RECORDED_CALLS: usize = 32;

/// Simulated protection unit
///
/// Records the order in which protections are applied; individual
/// protections can be made to fail on apply or on re-verification.
pub struct SimProtections {
    supported: ProtectionSet,
    active: ProtectionSet,
    failing: ProtectionSet,
    revoked: ProtectionSet,
    applied: Vec<Protection, MAX_RECORDED_CALLS>,
    verify_calls: Cell<u32>,
}

impl SimProtections {
    /// Protection unit supporting `supported`
    #[must_use]
    pub const fn new(supported: ProtectionSet) -> Self {
        Self {
            supported,
            active: ProtectionSet::EMPTY,
            failing: ProtectionSet::EMPTY,
            revoked: ProtectionSet::EMPTY,
            applied: Vec::new(),
            verify_calls: Cell::new(0),
        }
    }

    /// Make `apply(protection)` fail
    pub fn fail_apply(&mut self, protection: Protection) {
        self.failing = self.failing.with(protection);
    }

    /// Deactivate an applied protection, as a glitch or attacker would
    pub fn revoke(&mut self, protection: Protection) {
        self.revoked = self.revoked.with(protection);
    }

    /// Protections currently active
    #[must_use]
    pub const fn active(&self) -> ProtectionSet {
        self.active
    }

    /// Protections in the order `apply` was called
    #[must_use]
    pub fn applied_order(&self) -> &[Protection] {
        &self.applied
    }

    /// Number of `verify` calls
    #[must_use]
    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.get()
    }
}

impl ProtectionInterface for SimProtections {
    fn supported(&self) -> ProtectionSet {
        self.supported
    }

    fn apply(&mut self, protection: Protection) -> HalResult<()> {
        let _ = self.applied.push(protection);
        if !self.supported.contains(protection) {
            return Err(HalError::ProtectionNotSupported);
        }
        if self.failing.contains(protection) {
            return Err(HalError::ProtectionFailed);
        }
        self.active = self.active.with(protection);
        Ok(())
    }

    fn verify(&self, protection: Protection) -> HalResult<()> {
        self.verify_calls.set(self.verify_calls.get() + 1);
        if self.active.contains(protection) && !self.revoked.contains(protection) {
            Ok(())
        } else {
            Err(HalError::ProtectionFailed)
        }
    }
}

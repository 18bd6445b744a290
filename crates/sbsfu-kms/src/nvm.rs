// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! NVM block primitives
//!
//! The KMS data area is split into two equal, page-aligned blocks. This
//! module erases, programs and checks them through a [`FlashInterface`].
//!
//! # Chunked programming
//!
//! Flash is programmed in units of the write granularity (one double word on
//! STM32WL). [`NvmBlockStore::write`] accepts any destination and length:
//!
//! ```text
//!            granularity boundary
//!   |FF FF FF d0 d1 d2 d3 d4|d5 .. d12|d13 00 00 00 00 00 00 00|
//!    ^ lead    first chunk   full       last chunk, zero padded
//! ```
//!
//! The controller refuses to program a double word that is not fully
//! erased, so every chunk touched by a write must be erased beforehand,
//! including the one containing `destination`. Lead bytes of a misaligned
//! first chunk are programmed with the erased value and pad bytes of a
//! trailing partial chunk with zero; both are consumed and cannot be
//! written later. Only `[destination, destination + len)` is verified.

use sbsfu_common::{Error, FlashRegion, MemoryWindow, Result};
use sbsfu_hal::{FlashInterface, HalError, HalResult};
use zeroize::Zeroize;

/// Largest write granularity supported by [`NvmBlockStore::write`]
pub const MAX_WRITE_GRANULARITY: usize = 16;

/// Read chunk used by erase and compare checks
const READ_CHUNK: usize = 64;

/// One of the two KMS blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmBlock {
    /// Lower half of the KMS area
    Block0,
    /// Upper half of the KMS area
    Block1,
}

impl NvmBlock {
    /// The other block
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Block0 => Self::Block1,
            Self::Block1 => Self::Block0,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Block0 => 0,
            Self::Block1 => 1,
        }
    }
}

/// Erase/program/verify access to the two KMS blocks
pub struct NvmBlockStore<F: FlashInterface> {
    flash: F,
    blocks: [MemoryWindow; 2],
}

impl<F: FlashInterface> NvmBlockStore<F> {
    /// Split `kms` into two blocks on `flash`
    ///
    /// # Errors
    /// - [`Error::InvalidKmsArea`] if the area does not split into two
    ///   page-aligned halves
    /// - [`Error::OutOfBounds`] if `flash` does not cover the area
    /// - [`Error::InvalidParameter`] if the driver's write granularity is
    ///   not supported
    pub fn new(flash: F, kms: &FlashRegion) -> Result<Self> {
        let (block0, block1) = kms.window().split_halves()?;
        let geometry = flash.geometry();
        if !geometry.is_page_aligned(block0.base()) || !geometry.is_page_aligned(block0.len()) {
            return Err(Error::InvalidKmsArea);
        }

        let flash_end = u64::from(flash.base_address()) + u64::from(flash.size());
        if block0.base() < flash.base_address() || block1.end() > flash_end {
            return Err(Error::OutOfBounds);
        }

        let granularity = F::WRITE_GRANULARITY;
        if granularity == 0 || granularity > MAX_WRITE_GRANULARITY || F::PAGE_SIZE as usize % granularity != 0 {
            return Err(Error::InvalidParameter);
        }

        Ok(Self {
            flash,
            blocks: [block0, block1],
        })
    }

    /// Address range of `block`
    #[must_use]
    pub const fn window(&self, block: NvmBlock) -> MemoryWindow {
        self.blocks[block.index()]
    }

    /// Underlying flash driver
    #[must_use]
    pub const fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutable access to the flash driver
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Release the flash driver
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Check that every word of `block` reads as erased
    ///
    /// # Errors
    /// Read failures of the flash driver.
    pub fn is_block_erased(&self, block: NvmBlock) -> HalResult<bool> {
        let window = self.window(block);
        let erased = self.flash.geometry().erased_word();
        let mut buffer = [0u8; READ_CHUNK];
        let mut offset = 0;

        while offset < window.len() {
            let len = (window.len() - offset).min(READ_CHUNK as u32) as usize;
            self.flash.read(window.base() + offset, &mut buffer[..len])?;
            let all_erased = buffer[..len]
                .chunks_exact(4)
                .all(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) == erased);
            if !all_erased {
                return Ok(false);
            }
            offset += len as u32;
        }
        Ok(true)
    }

    /// Erase `block` and check the result
    ///
    /// # Errors
    /// - driver errors of the erase sequence
    /// - [`HalError::FlashVerifyFailed`] if the block does not read back erased
    pub fn block_erase(&mut self, block: NvmBlock) -> HalResult<()> {
        let window = self.window(block);
        let end = u32::try_from(window.end()).map_err(|_| HalError::FlashOutOfBounds)?;
        self.flash
            .with_unlocked(|flash| flash.erase_range(window.base(), end))?;

        if self.is_block_erased(block)? {
            Ok(())
        } else {
            Err(HalError::FlashVerifyFailed)
        }
    }

    /// Program `source` at `destination` and compare it back
    ///
    /// Every double word touched, including the one holding `destination`,
    /// must be erased. See the module docs for how unaligned starts and
    /// trailing partial chunks are handled. An empty `source` is a no-op.
    ///
    /// # Errors
    /// - [`HalError::FlashOutOfBounds`] if the padded range leaves a block
    /// - driver errors of the program sequence, such as
    ///   [`HalError::FlashWriteFailed`] for a chunk that was not erased
    /// - [`HalError::FlashVerifyFailed`] if flash differs from `source`
    pub fn write(&mut self, destination: u32, source: &[u8]) -> HalResult<()> {
        if source.is_empty() {
            return Ok(());
        }

        let granularity = F::WRITE_GRANULARITY as u32;
        let start = destination - destination % granularity;
        let end = destination
            .checked_add(source.len() as u32)
            .and_then(|end| end.checked_next_multiple_of(granularity))
            .ok_or(HalError::FlashOutOfBounds)?;
        if !self.in_one_block(start, (end - start) as usize) {
            return Err(HalError::FlashOutOfBounds);
        }

        self.flash
            .with_unlocked(|flash| program_chunks(flash, destination, source))?;

        if self.flash.verify(destination, source)? {
            Ok(())
        } else {
            Err(HalError::FlashVerifyFailed)
        }
    }

    /// Read `buffer.len()` bytes at `address`
    ///
    /// # Errors
    /// [`HalError::FlashOutOfBounds`] outside the KMS blocks, or driver
    /// read errors.
    pub fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        if !self.in_one_block(address, buffer.len()) {
            return Err(HalError::FlashOutOfBounds);
        }
        self.flash.read(address, buffer)
    }

    /// Check that `len` bytes at `address` read as erased
    ///
    /// # Errors
    /// As for [`NvmBlockStore::read`].
    pub fn is_range_erased(&self, address: u32, len: usize) -> HalResult<bool> {
        if !self.in_one_block(address, len) {
            return Err(HalError::FlashOutOfBounds);
        }

        let mut buffer = [0u8; READ_CHUNK];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(READ_CHUNK);
            self.flash.read(address + offset as u32, &mut buffer[..chunk])?;
            if buffer[..chunk].iter().any(|b| *b != F::ERASED_BYTE) {
                return Ok(false);
            }
            offset += chunk;
        }
        Ok(true)
    }

    fn in_one_block(&self, address: u32, len: usize) -> bool {
        self.blocks.iter().any(|w| w.contains_range(address, len))
    }
}

fn program_chunks<F: FlashInterface>(flash: &mut F, destination: u32, source: &[u8]) -> HalResult<()> {
    let granularity = F::WRITE_GRANULARITY;
    let mut scratch = [0u8; MAX_WRITE_GRANULARITY];
    let mut address = destination;
    let mut consumed = 0;

    let result = loop {
        if consumed == source.len() {
            break Ok(());
        }

        let lead = address as usize % granularity;
        let take = (granularity - lead).min(source.len() - consumed);
        let chunk = &mut scratch[..granularity];
        chunk[..lead].fill(F::ERASED_BYTE);
        chunk[lead..lead + take].copy_from_slice(&source[consumed..consumed + take]);
        chunk[lead + take..].fill(0);

        if let Err(e) = flash.write(address - lead as u32, chunk) {
            break Err(e);
        }
        address += take as u32;
        consumed += take;
    };

    scratch.zeroize();
    result
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Dual-block key store
//!
//! Key blobs are appended to the active NVM block as records. When a record
//! does not fit, the live records are copied into the other block, which
//! then becomes active. The previous block is left intact until the next
//! swap, so an interrupted compaction falls back to it on the next open.
//!
//! # Block layout
//!
//! ```text
//! Offset  Size  Description
//! 0x00    4     Magic (0x534D_4B42 "BKMS")
//! 0x04    4     Sequence number, incremented on every swap
//! 0x08    8     Reserved (zero)
//! 0x10    ...   Records
//! ```
//!
//! # Record layout
//!
//! ```text
//! Offset  Size  Description
//! 0x00    4     Item id
//! 0x04    4     Data length, 0 marks a removal
//! 0x08    4     CRC-32 over id, length and data
//! 0x0C    4     Reserved (zero)
//! 0x10    len   Data, zero padded to the write granularity
//! ```
//!
//! The block header is written after the records it covers and a record
//! header after its data, so a torn write leaves either an erased header or
//! a non-erased free area, both detected by [`KmsStore::open`].

use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::Vec;
use sbsfu_common::log::LogBuffer;
use sbsfu_common::{log_info, log_trace, log_warn};
use sbsfu_hal::FlashInterface;
use zeroize::Zeroize;

use crate::error::{KmsError, KmsResult};
use crate::nvm::{NvmBlock, NvmBlockStore};

// ============================================================================
// Constants
// ============================================================================

/// Block header magic
const BLOCK_MAGIC: u32 = 0x534D_4B42;

/// Block header size in bytes
const BLOCK_HEADER_SIZE: u32 = 16;

/// Record header size in bytes
const ITEM_HEADER_SIZE: u32 = 16;

/// Id value of an erased record header
const ERASED_ID: u32 = 0xFFFF_FFFF;

/// Largest item payload in bytes
pub const MAX_ITEM_SIZE: usize = 1024;

/// Maximum number of live items
pub const MAX_ITEMS: usize = 32;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const LOG_MODULE: &str = "kms";

// ============================================================================
// Records
// ============================================================================

/// Location of the latest record of one id
#[derive(Debug, Clone, Copy)]
struct Record {
    id: u32,
    len: u32,
    crc: u32,
    offset: u32,
}

/// Live records of a block
struct Scan {
    live: Vec<Record, MAX_ITEMS>,
    end: u32,
    clean: bool,
}

/// Change applied while compacting
#[derive(Clone, Copy)]
enum Pending<'a> {
    None,
    Set(u32, &'a [u8]),
    Remove(u32),
}

impl Pending<'_> {
    fn id(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Set(id, _) | Self::Remove(id) => Some(*id),
        }
    }
}

fn item_crc(id: u32, data: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&id.to_le_bytes());
    digest.update(&(data.len() as u32).to_le_bytes());
    digest.update(data);
    digest.finalize()
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Sequence `a` is newer than `b`, with wrap-around
const fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

// ============================================================================
// Store
// ============================================================================

/// Key-value store over the two KMS blocks
pub struct KmsStore<F: FlashInterface> {
    nvm: NvmBlockStore<F>,
    active: NvmBlock,
    sequence: u32,
    write_offset: u32,
    dirty: bool,
    log: LogBuffer,
    tick: u32,
}

impl<F: FlashInterface> KmsStore<F> {
    /// Open the store, formatting or recovering it as needed
    ///
    /// The block with a valid header and the newest sequence becomes active.
    /// Without any valid block, Block0 is erased and formatted. If the free
    /// area of the active block is not erased, the store is compacted into
    /// the other block.
    ///
    /// # Errors
    /// Flash failures while formatting or compacting.
    pub fn open(nvm: NvmBlockStore<F>) -> KmsResult<Self> {
        let mut store = Self {
            nvm,
            active: NvmBlock::Block0,
            sequence: 0,
            write_offset: BLOCK_HEADER_SIZE,
            dirty: false,
            log: LogBuffer::new(),
            tick: 0,
        };

        let newest = match (store.block_sequence(NvmBlock::Block0)?, store.block_sequence(NvmBlock::Block1)?) {
            (Some(s0), Some(s1)) if is_newer(s1, s0) => Some((NvmBlock::Block1, s1)),
            (Some(s0), _) => Some((NvmBlock::Block0, s0)),
            (None, Some(s1)) => Some((NvmBlock::Block1, s1)),
            (None, None) => None,
        };

        match newest {
            Some((block, sequence)) => {
                store.active = block;
                store.sequence = sequence;
                let scan = store.scan(block)?;
                store.write_offset = scan.end;
                let tick = store.next_tick();
                log_info!(store.log, tick, LOG_MODULE, "block {:?} seq {} items {}", block, sequence, scan.live.len());
                if !scan.clean {
                    let tick = store.next_tick();
                    log_warn!(store.log, tick, LOG_MODULE, "torn record at {:#06X}", scan.end);
                    store.compact(Pending::None)?;
                }
            }
            None => {
                store.format(NvmBlock::Block0, 1)?;
                let tick = store.next_tick();
                log_info!(store.log, tick, LOG_MODULE, "formatted block {:?}", NvmBlock::Block0);
            }
        }
        Ok(store)
    }

    /// Copy item `id` into `buffer`, returning its length
    ///
    /// # Errors
    /// - [`KmsError::NotFound`] if `id` has no live item
    /// - [`KmsError::BufferTooSmall`] if `buffer` is shorter than the item
    /// - [`KmsError::Corrupted`] if the item fails its CRC check
    pub fn get(&self, id: u32, buffer: &mut [u8]) -> KmsResult<usize> {
        let record = self.find(id)?.ok_or(KmsError::NotFound)?;
        let len = record.len as usize;
        let out = buffer.get_mut(..len).ok_or(KmsError::BufferTooSmall)?;
        self.read_data(self.active, &record, out)?;
        Ok(len)
    }

    /// Store `data` under `id`, replacing any previous item
    ///
    /// # Errors
    /// - [`KmsError::InvalidId`] for the reserved id
    /// - [`KmsError::InvalidLength`] for empty or oversized data
    /// - [`KmsError::TooManyItems`] if `id` is new and the store holds
    ///   [`MAX_ITEMS`] items
    /// - [`KmsError::StoreFull`] if the live items do not fit in a block
    /// - flash failures
    pub fn set(&mut self, id: u32, data: &[u8]) -> KmsResult<()> {
        if id == ERASED_ID {
            return Err(KmsError::InvalidId);
        }
        if data.is_empty() || data.len() > MAX_ITEM_SIZE {
            return Err(KmsError::InvalidLength);
        }

        let scan = self.scan(self.active)?;
        if !scan.live.iter().any(|r| r.id == id) && scan.live.len() == MAX_ITEMS {
            return Err(KmsError::TooManyItems);
        }

        self.apply(Pending::Set(id, data))?;
        let tick = self.next_tick();
        log_trace!(self.log, tick, LOG_MODULE, "set {:#010X} len {}", id, data.len());
        Ok(())
    }

    /// Remove item `id`
    ///
    /// # Errors
    /// - [`KmsError::NotFound`] if `id` has no live item
    /// - flash failures
    pub fn remove(&mut self, id: u32) -> KmsResult<()> {
        if self.find(id)?.is_none() {
            return Err(KmsError::NotFound);
        }
        self.apply(Pending::Remove(id))?;
        let tick = self.next_tick();
        log_trace!(self.log, tick, LOG_MODULE, "remove {:#010X}", id);
        Ok(())
    }

    /// Check whether `id` has a live item
    ///
    /// The item's CRC is not checked.
    ///
    /// # Errors
    /// Flash read failures.
    pub fn contains(&self, id: u32) -> KmsResult<bool> {
        Ok(self.find(id)?.is_some())
    }

    /// Block currently holding the store
    #[must_use]
    pub const fn active_block(&self) -> NvmBlock {
        self.active
    }

    /// Sequence number of the active block
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Bytes left in the active block
    #[must_use]
    pub fn free_space(&self) -> u32 {
        self.nvm.window(self.active).len() - self.write_offset
    }

    /// Store log
    #[must_use]
    pub const fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Underlying block store
    #[must_use]
    pub const fn nvm(&self) -> &NvmBlockStore<F> {
        &self.nvm
    }

    /// Mutable access to the block store
    pub fn nvm_mut(&mut self) -> &mut NvmBlockStore<F> {
        &mut self.nvm
    }

    /// Close the store and release the block store
    pub fn close(self) -> NvmBlockStore<F> {
        self.nvm
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn apply(&mut self, pending: Pending<'_>) -> KmsResult<()> {
        if self.dirty {
            self.compact(Pending::None)?;
        }

        let len = match pending {
            Pending::Set(_, data) => data.len(),
            Pending::Remove(_) | Pending::None => 0,
        };
        if Self::record_size(len) > self.free_space() {
            return self.compact(pending);
        }

        let result = match pending {
            Pending::Set(id, data) => self.append(self.active, self.write_offset, id, data),
            Pending::Remove(id) => self.append(self.active, self.write_offset, id, &[]),
            Pending::None => Ok(self.write_offset),
        };
        match result {
            Ok(end) => {
                self.write_offset = end;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                let tick = self.next_tick();
                log_warn!(self.log, tick, LOG_MODULE, "append failed: {}", e);
                Err(e)
            }
        }
    }

    /// Copy live items and `pending` into the other block and switch to it
    fn compact(&mut self, pending: Pending<'_>) -> KmsResult<()> {
        let scan = self.scan(self.active)?;
        let skip = pending.id();

        let mut needed = BLOCK_HEADER_SIZE;
        for record in scan.live.iter().filter(|r| Some(r.id) != skip) {
            needed += Self::record_size(record.len as usize);
        }
        if let Pending::Set(_, data) = pending {
            needed += Self::record_size(data.len());
        }
        let target = self.active.other();
        if needed > self.nvm.window(target).len() {
            return Err(KmsError::StoreFull);
        }

        self.nvm.block_erase(target)?;

        let mut scratch = [0u8; MAX_ITEM_SIZE];
        let mut offset = BLOCK_HEADER_SIZE;
        let mut result = Ok(());
        for record in scan.live.iter().filter(|r| Some(r.id) != skip) {
            let data = &mut scratch[..record.len as usize];
            match self.read_data(self.active, record, data) {
                Ok(()) => {}
                Err(KmsError::Corrupted) => {
                    let tick = self.next_tick();
                    log_warn!(self.log, tick, LOG_MODULE, "dropping corrupted {:#010X}", record.id);
                    continue;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            match self.append(target, offset, record.id, data) {
                Ok(end) => offset = end,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        scratch.zeroize();
        result?;

        if let Pending::Set(id, data) = pending {
            offset = self.append(target, offset, id, data)?;
        }

        let sequence = self.sequence.wrapping_add(1);
        self.write_block_header(target, sequence)?;

        let tick = self.next_tick();
        log_info!(self.log, tick, LOG_MODULE, "compacted into {:?} seq {}", target, sequence);
        self.active = target;
        self.sequence = sequence;
        self.write_offset = offset;
        self.dirty = false;
        Ok(())
    }

    fn format(&mut self, block: NvmBlock, sequence: u32) -> KmsResult<()> {
        self.nvm.block_erase(block)?;
        self.write_block_header(block, sequence)?;
        self.active = block;
        self.sequence = sequence;
        self.write_offset = BLOCK_HEADER_SIZE;
        self.dirty = false;
        Ok(())
    }

    fn write_block_header(&mut self, block: NvmBlock, sequence: u32) -> KmsResult<()> {
        let mut header = [0u8; BLOCK_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&sequence.to_le_bytes());
        let base = self.nvm.window(block).base();
        self.nvm.write(base, &header)?;
        Ok(())
    }

    fn block_sequence(&self, block: NvmBlock) -> KmsResult<Option<u32>> {
        let mut header = [0u8; BLOCK_HEADER_SIZE as usize];
        self.nvm.read(self.nvm.window(block).base(), &mut header)?;
        if le_u32(&header, 0) == BLOCK_MAGIC {
            Ok(Some(le_u32(&header, 4)))
        } else {
            Ok(None)
        }
    }

    /// Write one record at `offset` of `block`, returning the end offset
    fn append(&mut self, block: NvmBlock, offset: u32, id: u32, data: &[u8]) -> KmsResult<u32> {
        let base = self.nvm.window(block).base() + offset;
        self.nvm.write(base + ITEM_HEADER_SIZE, data)?;

        let mut header = [0u8; ITEM_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&id.to_le_bytes());
        header[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        header[8..12].copy_from_slice(&item_crc(id, data).to_le_bytes());
        self.nvm.write(base, &header)?;

        Ok(offset + Self::record_size(data.len()))
    }

    fn read_data(&self, block: NvmBlock, record: &Record, out: &mut [u8]) -> KmsResult<()> {
        let address = self.nvm.window(block).base() + record.offset + ITEM_HEADER_SIZE;
        self.nvm.read(address, out)?;
        if item_crc(record.id, out) == record.crc {
            Ok(())
        } else {
            out.zeroize();
            Err(KmsError::Corrupted)
        }
    }

    fn find(&self, id: u32) -> KmsResult<Option<Record>> {
        let scan = self.scan(self.active)?;
        Ok(scan.live.iter().find(|r| r.id == id).copied())
    }

    /// Walk the records of `block`
    fn scan(&self, block: NvmBlock) -> KmsResult<Scan> {
        let window = self.nvm.window(block);
        let mut live: Vec<Record, MAX_ITEMS> = Vec::new();
        let mut offset = BLOCK_HEADER_SIZE;
        let mut clean = true;

        while offset + ITEM_HEADER_SIZE <= window.len() {
            let mut header = [0u8; ITEM_HEADER_SIZE as usize];
            self.nvm.read(window.base() + offset, &mut header)?;
            let id = le_u32(&header, 0);
            if id == ERASED_ID {
                break;
            }

            let len = le_u32(&header, 4);
            if len as usize > MAX_ITEM_SIZE || offset + Self::record_size(len as usize) > window.len() {
                clean = false;
                break;
            }

            let record = Record {
                id,
                len,
                crc: le_u32(&header, 8),
                offset,
            };
            match live.iter().position(|r| r.id == id) {
                Some(i) if len == 0 => {
                    live.remove(i);
                }
                Some(i) => live[i] = record,
                None if len == 0 => {}
                None => live.push(record).map_err(|_| KmsError::TooManyItems)?,
            }
            offset += Self::record_size(len as usize);
        }

        if clean {
            clean = self
                .nvm
                .is_range_erased(window.base() + offset, (window.len() - offset) as usize)?;
        }
        Ok(Scan { live, end: offset, clean })
    }

    fn record_size(len: usize) -> u32 {
        let granularity = F::WRITE_GRANULARITY;
        let padded = len.div_ceil(granularity) * granularity;
        ITEM_HEADER_SIZE + padded as u32
    }

    fn next_tick(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Integration tests for sbsfu-kms
//!
//! Runs the NVM primitives and the key store against the simulated NOR
//! flash covering the STM32WL KMS area.

use sbsfu_common::RegionMap;
use sbsfu_hal::sim::SimFlash;
use sbsfu_kms::NvmBlockStore;

const BASE: u32 = 0x0801_3000;
const BLOCK_SIZE: u32 = 2048;

type Flash = SimFlash<4096>;

fn nvm() -> NvmBlockStore<Flash> {
    let map = RegionMap::STM32WL_SINGLE_IMAGE;
    NvmBlockStore::new(Flash::new(BASE), map.kms_data_storage()).unwrap()
}

/// Every unlock was matched by a lock and the controller is locked
fn assert_locked(flash: &Flash) {
    use sbsfu_hal::FlashInterface;
    assert!(flash.is_locked());
    assert_eq!(flash.stats().unlocks, flash.stats().locks);
}

mod nvm_tests {
    use super::*;
    use sbsfu_hal::HalError;
    use sbsfu_kms::NvmBlock;

    #[test]
    fn test_fresh_blocks_are_erased() {
        let nvm = nvm();
        assert_eq!(nvm.is_block_erased(NvmBlock::Block0), Ok(true));
        assert_eq!(nvm.is_block_erased(NvmBlock::Block1), Ok(true));
    }

    #[test]
    fn test_flipped_last_word_is_not_erased() {
        let mut nvm = nvm();
        let last = BASE + BLOCK_SIZE - 4;
        nvm.flash_mut().poke(last, &0xFFFF_FFFEu32.to_ne_bytes()).unwrap();
        assert_eq!(nvm.is_block_erased(NvmBlock::Block0), Ok(false));
        assert_eq!(nvm.is_block_erased(NvmBlock::Block1), Ok(true));
    }

    #[test]
    fn test_erase_then_check() {
        let mut nvm = nvm();
        nvm.flash_mut().poke(BASE + 100, &[0u8; 4]).unwrap();
        nvm.block_erase(NvmBlock::Block0).unwrap();
        assert_eq!(nvm.is_block_erased(NvmBlock::Block0), Ok(true));
        assert_eq!(nvm.flash().stats().page_erases, 1);
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_erase_with_stuck_bit_fails_verification() {
        let mut nvm = nvm();
        nvm.flash_mut().stick_bit_at(BASE + BLOCK_SIZE + 17);
        assert_eq!(nvm.block_erase(NvmBlock::Block1), Err(HalError::FlashVerifyFailed));
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_erase_failure_is_reported_without_retry() {
        let mut nvm = nvm();
        nvm.flash_mut().fail_next_erase();
        assert_eq!(nvm.block_erase(NvmBlock::Block0), Err(HalError::FlashEraseFailed));
        assert_eq!(nvm.flash().stats().page_erases, 0);
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_misaligned_first_chunk_reaches_boundary() {
        let mut nvm = nvm();
        let data: Vec<u8> = (0x00..0x0D).collect();
        nvm.write(BASE + 3, &data).unwrap();

        let flash = nvm.flash();
        assert_eq!(flash.bytes(BASE, 3).unwrap(), &[0xFF; 3]);
        assert_eq!(flash.bytes(BASE + 3, 13).unwrap(), data.as_slice());
        // 5 bytes up to the boundary, then one full double word
        assert_eq!(flash.stats().programmed_words, 2);
        assert_eq!(flash.bytes(BASE + 16, 8).unwrap(), &[0xFF; 8]);
        assert_locked(flash);
    }

    #[test]
    fn test_all_small_sizes_and_offsets() {
        let mut nvm = nvm();
        for offset in [0u32, 3, 11] {
            for len in 1..=24usize {
                nvm.block_erase(NvmBlock::Block0).unwrap();
                let data: Vec<u8> = (0..len).map(|i| 0x80 | i as u8).collect();
                let destination = BASE + offset;
                nvm.write(destination, &data).unwrap();

                let end = offset as usize + len;
                let pad_end = end.next_multiple_of(8);
                let bytes = nvm.flash().bytes(BASE, 64).unwrap();
                assert!(bytes[..offset as usize].iter().all(|b| *b == 0xFF), "lead {offset}/{len}");
                assert_eq!(&bytes[offset as usize..end], data.as_slice(), "data {offset}/{len}");
                assert!(bytes[end..pad_end].iter().all(|b| *b == 0x00), "pad {offset}/{len}");
                assert!(bytes[pad_end..pad_end + 8].iter().all(|b| *b == 0xFF), "tail {offset}/{len}");
            }
        }
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_trailing_pad_consumes_following_bytes() {
        let mut nvm = nvm();
        nvm.write(BASE, &[0xAA; 3]).unwrap();
        // Bytes 3..8 were zero padded by the first write
        assert_eq!(nvm.flash().bytes(BASE + 3, 5).unwrap(), &[0x00; 5]);

        assert_eq!(nvm.write(BASE + 3, &[0xBB; 2]), Err(HalError::FlashWriteFailed));
        assert_eq!(nvm.flash().bytes(BASE, 8).unwrap(), &[0xAA, 0xAA, 0xAA, 0, 0, 0, 0, 0]);
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_unaligned_write_into_programmed_word_is_rejected() {
        let mut nvm = nvm();
        nvm.write(BASE, &[0x12, 0x34, 0x56]).unwrap();
        let before = nvm.flash().bytes(BASE, 8).unwrap().to_vec();

        assert_eq!(nvm.write(BASE + 3, &[0x78; 5]), Err(HalError::FlashWriteFailed));
        assert_eq!(nvm.flash().bytes(BASE, 8).unwrap(), before.as_slice());
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_unaligned_write_into_poked_lead_bytes_is_rejected() {
        let mut nvm = nvm();
        nvm.flash_mut().poke(BASE, &[0x12, 0x34, 0x56]).unwrap();
        assert_eq!(nvm.write(BASE + 3, &[0x78; 5]), Err(HalError::FlashWriteFailed));
        assert_eq!(nvm.flash().bytes(BASE + 3, 5).unwrap(), &[0xFF; 5]);
        assert_eq!(nvm.flash().stats().programmed_words, 0);
    }

    #[test]
    fn test_write_over_programmed_data_is_rejected() {
        let mut nvm = nvm();
        nvm.write(BASE, &[0x0F; 8]).unwrap();
        assert_eq!(nvm.write(BASE, &[0xF0; 8]), Err(HalError::FlashWriteFailed));
        assert_eq!(nvm.flash().bytes(BASE, 8).unwrap(), &[0x0F; 8]);
    }

    #[test]
    fn test_zero_overwrite_of_programmed_word_is_accepted() {
        let mut nvm = nvm();
        nvm.write(BASE, &[0x0F; 8]).unwrap();
        nvm.write(BASE, &[0x00; 8]).unwrap();
        assert_eq!(nvm.flash().bytes(BASE, 8).unwrap(), &[0x00; 8]);
    }

    #[test]
    fn test_corrupted_program_fails_compare() {
        let mut nvm = nvm();
        nvm.flash_mut().corrupt_next_program_at(BASE + 9);
        assert_eq!(nvm.write(BASE, &[0x55; 16]), Err(HalError::FlashVerifyFailed));
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_driver_write_failure_relocks() {
        let mut nvm = nvm();
        nvm.flash_mut().fail_next_write();
        assert_eq!(nvm.write(BASE, &[0x55; 16]), Err(HalError::FlashWriteFailed));
        assert_locked(nvm.flash());
    }

    #[test]
    fn test_empty_write_is_noop() {
        let mut nvm = nvm();
        nvm.write(BASE + 5, &[]).unwrap();
        assert_eq!(nvm.flash().stats().unlocks, 0);
    }

    #[test]
    fn test_access_outside_blocks_is_rejected() {
        let mut nvm = nvm();
        let mut buf = [0u8; 8];
        assert_eq!(nvm.read(BASE - 8, &mut buf), Err(HalError::FlashOutOfBounds));
        assert_eq!(nvm.write(BASE + 2 * BLOCK_SIZE - 4, &[0; 8]), Err(HalError::FlashOutOfBounds));
        assert_eq!(nvm.is_range_erased(BASE + BLOCK_SIZE - 8, 16), Err(HalError::FlashOutOfBounds));
    }

    #[test]
    fn test_range_erased() {
        let mut nvm = nvm();
        nvm.write(BASE + 8, &[0x01]).unwrap();
        assert_eq!(nvm.is_range_erased(BASE, 8), Ok(true));
        assert_eq!(nvm.is_range_erased(BASE, 9), Ok(false));
        assert_eq!(nvm.is_range_erased(BASE + 16, 1024), Ok(true));
    }
}

mod store_tests {
    use super::*;
    use sbsfu_common::Error;
    use sbsfu_hal::HalError;
    use sbsfu_kms::{KmsError, KmsStore, NvmBlock, MAX_ITEMS, MAX_ITEM_SIZE};

    fn open() -> KmsStore<Flash> {
        KmsStore::open(nvm()).unwrap()
    }

    fn reopen(store: KmsStore<Flash>) -> KmsStore<Flash> {
        KmsStore::open(store.close()).unwrap()
    }

    fn read(store: &KmsStore<Flash>, id: u32) -> Result<Vec<u8>, KmsError> {
        let mut buf = [0u8; MAX_ITEM_SIZE];
        let len = store.get(id, &mut buf)?;
        Ok(buf[..len].to_vec())
    }

    /// Offset of the first free byte in the active block
    fn write_offset(store: &KmsStore<Flash>) -> u32 {
        BLOCK_SIZE - store.free_space()
    }

    #[test]
    fn test_open_formats_empty_area() {
        let store = open();
        assert_eq!(store.active_block(), NvmBlock::Block0);
        assert_eq!(store.sequence(), 1);
        assert_eq!(store.free_space(), BLOCK_SIZE - 16);
        assert_eq!(store.nvm().flash().bytes(BASE, 4).unwrap(), b"BKMS");
        assert_locked(store.nvm().flash());
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut store = open();
        store.set(0x10, b"device-root-key").unwrap();
        store.set(0x11, &[0xA5; 32]).unwrap();

        assert_eq!(read(&store, 0x10).unwrap(), b"device-root-key");
        assert_eq!(read(&store, 0x11).unwrap(), vec![0xA5; 32]);
        assert!(store.contains(0x10).unwrap());
        assert!(!store.contains(0x12).unwrap());
        // 16 + (16 + 16) + (16 + 32)
        assert_eq!(write_offset(&store), 96);
        assert_locked(store.nvm().flash());
    }

    #[test]
    fn test_latest_record_wins() {
        let mut store = open();
        store.set(1, b"first").unwrap();
        store.set(1, b"second value").unwrap();
        assert_eq!(read(&store, 1).unwrap(), b"second value");
    }

    #[test]
    fn test_remove_hides_item() {
        let mut store = open();
        store.set(1, b"key").unwrap();
        store.remove(1).unwrap();
        assert_eq!(read(&store, 1), Err(KmsError::NotFound));
        assert!(!store.contains(1).unwrap());
        assert_eq!(store.remove(1), Err(KmsError::NotFound));

        let store = reopen(store);
        assert_eq!(read(&store, 1), Err(KmsError::NotFound));
    }

    #[test]
    fn test_invalid_arguments() {
        let mut store = open();
        assert_eq!(store.set(0xFFFF_FFFF, b"x"), Err(KmsError::InvalidId));
        assert_eq!(store.set(1, &[]), Err(KmsError::InvalidLength));
        assert_eq!(store.set(1, &[0; MAX_ITEM_SIZE + 1]), Err(KmsError::InvalidLength));

        store.set(1, &[7; 40]).unwrap();
        let mut small = [0u8; 39];
        assert_eq!(store.get(1, &mut small), Err(KmsError::BufferTooSmall));
    }

    #[test]
    fn test_items_survive_reopen() {
        let mut store = open();
        store.set(3, b"persistent").unwrap();
        let offset = write_offset(&store);

        let store = reopen(store);
        assert_eq!(store.active_block(), NvmBlock::Block0);
        assert_eq!(read(&store, 3).unwrap(), b"persistent");
        assert_eq!(write_offset(&store), offset);
    }

    #[test]
    fn test_compaction_swaps_blocks_and_keeps_live_items() {
        let mut store = open();
        store.set(7, b"long-lived").unwrap();
        store.set(8, b"doomed").unwrap();
        store.remove(8).unwrap();

        let mut rounds = 0u8;
        while store.active_block() == NvmBlock::Block0 {
            store.set(1, &[rounds; 200]).unwrap();
            rounds += 1;
        }

        assert_eq!(store.sequence(), 2);
        assert_eq!(read(&store, 1).unwrap(), vec![rounds - 1; 200]);
        assert_eq!(read(&store, 7).unwrap(), b"long-lived");
        assert_eq!(read(&store, 8), Err(KmsError::NotFound));
        // header + id 7 + id 1
        assert_eq!(write_offset(&store), 16 + 32 + 216);
        assert!(store.log().iter().any(|e| e.message.starts_with("compacted")));

        let store = reopen(store);
        assert_eq!(store.active_block(), NvmBlock::Block1);
        assert_eq!(read(&store, 1).unwrap(), vec![rounds - 1; 200]);
    }

    #[test]
    fn test_missing_header_falls_back_to_previous_block() {
        let mut store = open();
        store.set(7, b"long-lived").unwrap();

        let mut rounds = 0u8;
        while store.active_block() == NvmBlock::Block0 {
            store.set(1, &[rounds; 200]).unwrap();
            rounds += 1;
        }

        // Power lost before the new block header was programmed
        store.nvm_mut().flash_mut().poke(BASE + BLOCK_SIZE, &[0xFF; 16]).unwrap();

        let mut store = reopen(store);
        assert_eq!(store.active_block(), NvmBlock::Block0);
        assert_eq!(store.sequence(), 1);
        assert_eq!(read(&store, 1).unwrap(), vec![rounds - 2; 200]);
        assert_eq!(read(&store, 7).unwrap(), b"long-lived");

        store.set(1, &[0xEE; 200]).unwrap();
        assert_eq!(store.active_block(), NvmBlock::Block1);
        assert_eq!(read(&store, 1).unwrap(), vec![0xEE; 200]);
    }

    #[test]
    fn test_torn_append_is_compacted_on_open() {
        let mut store = open();
        store.set(1, b"secret-key-0001").unwrap();
        let offset = write_offset(&store);

        // Data programmed, header never written
        store
            .nvm_mut()
            .flash_mut()
            .poke(BASE + offset + 16, &[0x5A; 8])
            .unwrap();

        let store = reopen(store);
        assert_eq!(store.active_block(), NvmBlock::Block1);
        assert_eq!(store.sequence(), 2);
        assert_eq!(read(&store, 1).unwrap(), b"secret-key-0001");
        assert_eq!(write_offset(&store), offset);
        assert_locked(store.nvm().flash());
    }

    #[test]
    fn test_failed_append_recovers_on_next_write() {
        let mut store = open();
        store.set(1, b"committed").unwrap();
        let data_address = BASE + write_offset(&store) + 16;
        store.nvm_mut().flash_mut().corrupt_next_program_at(data_address);

        assert_eq!(
            store.set(2, b"never-committed"),
            Err(KmsError::Flash(HalError::FlashVerifyFailed))
        );
        assert_locked(store.nvm().flash());

        store.set(3, b"after").unwrap();
        assert_eq!(store.active_block(), NvmBlock::Block1);
        assert_eq!(read(&store, 1).unwrap(), b"committed");
        assert_eq!(read(&store, 2), Err(KmsError::NotFound));
        assert_eq!(read(&store, 3).unwrap(), b"after");
    }

    #[test]
    fn test_crc_mismatch_is_reported() {
        let mut store = open();
        store.set(1, b"key-material").unwrap();
        // Flip a data bit behind the driver's back
        store.nvm_mut().flash_mut().poke(BASE + 32, &[b'k' ^ 0x01]).unwrap();

        let mut buf = [0xCCu8; 32];
        assert_eq!(store.get(1, &mut buf), Err(KmsError::Corrupted));
        assert!(buf[..12].iter().all(|b| *b == 0));

        store.set(1, b"key-material").unwrap();
        assert_eq!(read(&store, 1).unwrap(), b"key-material");
    }

    #[test]
    fn test_item_count_limit() {
        let mut store = open();
        for id in 0..MAX_ITEMS as u32 {
            store.set(id, &id.to_le_bytes()).unwrap();
        }
        assert_eq!(store.set(MAX_ITEMS as u32, b"one more"), Err(KmsError::TooManyItems));
        store.set(0, b"replace").unwrap();
        assert_eq!(read(&store, 0).unwrap(), b"replace");
    }

    #[test]
    fn test_store_full_keeps_existing_items() {
        let mut store = open();
        store.set(1, &[0x11; MAX_ITEM_SIZE]).unwrap();
        assert_eq!(store.set(2, &[0x22; MAX_ITEM_SIZE]), Err(KmsError::StoreFull));
        assert_eq!(store.active_block(), NvmBlock::Block0);
        assert_eq!(read(&store, 1).unwrap(), vec![0x11; MAX_ITEM_SIZE]);
        assert_eq!(Error::from(KmsError::StoreFull), Error::StorageFull);
    }
}

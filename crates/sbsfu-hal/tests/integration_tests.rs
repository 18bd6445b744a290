// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Integration tests for sbsfu-hal
//!
//! The register-level drivers cannot run on the host; these exercise the
//! trait layer against the simulated flash and protection unit.

mod flash_tests {
    use sbsfu_hal::sim::SimFlash;
    use sbsfu_hal::{FlashInterface, HalError};

    const BASE: u32 = 0x0801_3000;
    type Flash = SimFlash<4096>;

    #[test]
    fn test_init_checks_page_alignment() {
        let mut flash = Flash::new(BASE);
        assert!(flash.init().is_ok());
        let mut skewed = Flash::new(BASE + 8);
        assert_eq!(skewed.init(), Err(HalError::FlashMisaligned));
    }

    #[test]
    fn test_geometry_matches_stm32wl() {
        let flash = Flash::new(BASE);
        assert_eq!(flash.geometry(), sbsfu_common::FlashGeometry::STM32WL);
    }

    #[test]
    fn test_erase_range_covers_every_page() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        flash.write(BASE, &[0; 8]).unwrap();
        flash.write(BASE + 2048, &[0; 8]).unwrap();
        flash.erase_range(BASE, BASE + 4096).unwrap();
        assert_eq!(flash.stats().page_erases, 2);
        assert!(flash.bytes(BASE, 4096).unwrap().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn test_erase_range_rejects_unaligned_start() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        assert_eq!(flash.erase_range(BASE + 8, BASE + 2048), Err(HalError::FlashMisaligned));
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        let data: Vec<u8> = (0u8..128).collect();
        flash.write(BASE, &data).unwrap();
        assert_eq!(flash.verify(BASE, &data), Ok(true));

        let mut other = data.clone();
        other[100] ^= 0xFF;
        assert_eq!(flash.verify(BASE, &other), Ok(false));
    }

    #[test]
    fn test_with_unlocked_relocks_on_error() {
        let mut flash = Flash::new(BASE);
        flash.fail_next_write();
        let result = flash.with_unlocked(|f| f.write(BASE, &[0; 8]));
        assert_eq!(result, Err(HalError::FlashWriteFailed));
        assert!(flash.is_locked());
        assert_eq!(flash.stats().locks, 1);
    }

    #[test]
    fn test_busy_controller_cannot_be_unlocked() {
        let mut flash = Flash::new(BASE);
        flash.set_busy(true);
        assert_eq!(flash.with_unlocked(|_| Ok(())), Err(HalError::Busy));
    }

    #[test]
    fn test_out_of_bounds_read() {
        let flash = Flash::new(BASE);
        let mut buf = [0u8; 8];
        assert_eq!(flash.read(BASE + 4092, &mut buf), Err(HalError::FlashOutOfBounds));
        assert_eq!(flash.read(BASE - 8, &mut buf), Err(HalError::FlashOutOfBounds));
    }

    #[test]
    fn test_program_requires_erased_double_word() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        flash.write(BASE, &[0x12, 0x34, 0x56, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();

        let result = flash.write(BASE, &[0xFF, 0xFF, 0xFF, 0x78, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(result, Err(HalError::FlashWriteFailed));
        assert_eq!(flash.bytes(BASE, 4).unwrap(), &[0x12, 0x34, 0x56, 0xFF]);
        assert_eq!(flash.stats().programmed_words, 1);
    }

    #[test]
    fn test_zeros_may_overwrite_programmed_word() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        flash.write(BASE, &[0xA5; 8]).unwrap();
        flash.write(BASE, &[0x00; 8]).unwrap();
        assert_eq!(flash.bytes(BASE, 8).unwrap(), &[0x00; 8]);
    }

    #[test]
    fn test_rejected_word_stops_multi_word_program() {
        let mut flash = Flash::new(BASE);
        flash.unlock().unwrap();
        flash.write(BASE + 8, &[0x00; 8]).unwrap();

        assert_eq!(flash.write(BASE, &[0x11; 24]), Err(HalError::FlashWriteFailed));
        assert_eq!(flash.bytes(BASE, 8).unwrap(), &[0x11; 8]);
        assert_eq!(flash.bytes(BASE + 16, 8).unwrap(), &[0xFF; 8]);
    }

    #[test]
    fn test_stuck_bit_survives_erase() {
        let mut flash = Flash::new(BASE);
        flash.stick_bit_at(BASE + 2047);
        flash.unlock().unwrap();
        flash.erase_page(BASE).unwrap();
        assert_eq!(flash.bytes(BASE + 2047, 1).unwrap(), &[0xFE]);
    }
}

mod protection_tests {
    use sbsfu_common::{Protection, ProtectionSet};
    use sbsfu_hal::sim::SimProtections;
    use sbsfu_hal::{HalError, ProtectionInterface};

    #[test]
    fn test_apply_then_verify() {
        let mut unit = SimProtections::new(ProtectionSet::ALL);
        unit.apply(Protection::Watchdog).unwrap();
        assert!(unit.verify(Protection::Watchdog).is_ok());
        assert_eq!(unit.verify(Protection::Mpu), Err(HalError::ProtectionFailed));
    }

    #[test]
    fn test_unsupported_protection() {
        let mut unit = SimProtections::new(ProtectionSet::EMPTY.with(Protection::Mpu));
        assert_eq!(unit.apply(Protection::Watchdog), Err(HalError::ProtectionNotSupported));
        assert_eq!(unit.applied_order(), &[Protection::Watchdog]);
    }

    #[test]
    fn test_revoked_protection_fails_verify() {
        let mut unit = SimProtections::new(ProtectionSet::ALL);
        unit.apply(Protection::DebugAccessLock).unwrap();
        unit.revoke(Protection::DebugAccessLock);
        assert_eq!(unit.verify(Protection::DebugAccessLock), Err(HalError::ProtectionFailed));
        assert_eq!(unit.verify_calls(), 1);
    }
}

mod error_conversion_tests {
    use sbsfu_common::Error;
    use sbsfu_hal::HalError;

    #[test]
    fn test_hal_errors_map_to_common_errors() {
        assert_eq!(Error::from(HalError::FlashEraseFailed), Error::StorageEraseFailed);
        assert_eq!(Error::from(HalError::FlashVerifyFailed), Error::StorageWriteFailed);
        assert_eq!(Error::from(HalError::FlashOutOfBounds), Error::OutOfBounds);
        assert_eq!(Error::from(HalError::ProtectionFailed), Error::ProtectionError);
    }

    #[test]
    fn test_flash_error_classification() {
        assert!(HalError::FlashTimeout.is_flash_error());
        assert!(!HalError::ProtectionFailed.is_flash_error());
    }
}

#[cfg(feature = "stm32wl")]
mod stm32wl_tests {
    use sbsfu_common::constants::FLASH_BASE;
    use sbsfu_common::{BootConfig, Protection, ProtectionSet};
    use sbsfu_hal::stm32wl::{Stm32wlFlash, Stm32wlProtections};
    use sbsfu_hal::{FlashInterface, HalError, ProtectionInterface};

    #[test]
    fn test_shipped_boot_configs_are_supported() {
        let driver = Stm32wlProtections::new();
        assert_eq!(driver.supported(), ProtectionSet::ALL);
        for config in [BootConfig::DEFAULT, BootConfig::DEVELOPMENT] {
            assert!(driver.supported().contains_all(config.protections));
        }
    }

    #[cfg(not(target_arch = "arm"))]
    #[test]
    fn test_flash_driver_refuses_host_access() {
        let mut flash = Stm32wlFlash::new();
        assert_eq!(flash.init(), Err(HalError::NotInitialized));
        assert!(flash.is_locked());

        let mut buf = [0u8; 8];
        assert_eq!(flash.read(FLASH_BASE, &mut buf), Err(HalError::NotInitialized));
        assert_eq!(flash.write(FLASH_BASE, &[0; 8]), Err(HalError::NotInitialized));
        assert_eq!(flash.erase_page(FLASH_BASE), Err(HalError::NotInitialized));
        assert_eq!(flash.unlock(), Err(HalError::NotInitialized));
        assert_eq!(
            flash.with_unlocked(|f| f.erase_range(FLASH_BASE, FLASH_BASE + 2048)),
            Err(HalError::NotInitialized)
        );
    }

    #[cfg(not(target_arch = "arm"))]
    #[test]
    fn test_protection_driver_refuses_host_access() {
        let mut unit = Stm32wlProtections::new();
        for p in Protection::ORDER {
            assert_eq!(unit.apply(p), Err(HalError::ProtectionNotSupported));
            assert_eq!(unit.verify(p), Err(HalError::ProtectionNotSupported));
        }
    }
}

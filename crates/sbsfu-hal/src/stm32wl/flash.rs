// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL Flash Driver
//!
//! - 256 KB single bank at `0x0800_0000`
//! - 2 KB pages (128 pages)
//! - 64-bit (double word) programming
//!
//! Off target the driver never initializes: [`FlashInterface::init`] and
//! every access report [`HalError::NotInitialized`] and the controller
//! reads as locked.

#[cfg(target_arch = "arm")]
use super::flash_regs as regs;
use crate::error::{HalError, HalResult};
use crate::traits::FlashInterface;
use sbsfu_common::constants::{FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SIZE, FLASH_WRITE_GRANULARITY};

/// Maximum busy-wait iterations before reporting a timeout
#[cfg(target_arch = "arm")]
const BUSY_WAIT_LIMIT: u32 = 1_000_000;

/// STM32WL flash driver
pub struct Stm32wlFlash {
    initialized: bool,
}

impl Stm32wlFlash {
    /// Create a new flash driver instance
    #[must_use]
    pub const fn new() -> Self {
        Self { initialized: false }
    }

    fn check_range(address: u32, len: usize) -> HalResult<()> {
        let end = address.checked_add(len as u32).ok_or(HalError::FlashOutOfBounds)?;
        if address < FLASH_BASE || end > FLASH_BASE + FLASH_SIZE {
            return Err(HalError::FlashOutOfBounds);
        }
        Ok(())
    }

    #[cfg(target_arch = "arm")]
    fn wait_ready() -> HalResult<()> {
        use core::ptr::read_volatile;

        let mut spins = 0;
        // SAFETY: FLASH_SR is an architecturally defined, always-readable
        // register of the STM32WL flash interface.
        while unsafe { read_volatile(regs::SR as *const u32) } & (regs::SR_BSY | regs::SR_CFGBSY) != 0 {
            spins += 1;
            if spins > BUSY_WAIT_LIMIT {
                return Err(HalError::FlashTimeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Read, clear and translate the status register error flags
    #[cfg(target_arch = "arm")]
    fn take_status(error: HalError) -> HalResult<()> {
        use core::ptr::{read_volatile, write_volatile};

        // SAFETY: FLASH_SR flags are cleared by writing 1; writing back the
        // value read clears exactly the flags that were set.
        unsafe {
            let sr = read_volatile(regs::SR as *const u32);
            write_volatile(regs::SR as *mut u32, sr & (regs::SR_ERRORS | regs::SR_EOP));
            if sr & regs::SR_WRPERR != 0 {
                return Err(HalError::FlashLocked);
            }
            if sr & (regs::SR_PGAERR | regs::SR_SIZERR) != 0 {
                return Err(HalError::FlashMisaligned);
            }
            if sr & regs::SR_ERRORS != 0 {
                return Err(error);
            }
        }
        Ok(())
    }
}

impl FlashInterface for Stm32wlFlash {
    const PAGE_SIZE: u32 = FLASH_PAGE_SIZE;
    const WRITE_GRANULARITY: usize = FLASH_WRITE_GRANULARITY;

    fn base_address(&self) -> u32 {
        FLASH_BASE
    }

    fn size(&self) -> u32 {
        FLASH_SIZE
    }

    fn init(&mut self) -> HalResult<()> {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "arm")] {
                self.initialized = true;
                Ok(())
            } else {
                Err(HalError::NotInitialized)
            }
        }
    }

    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        if !self.initialized {
            return Err(HalError::NotInitialized);
        }
        Self::check_range(address, buffer.len())?;

        cfg_if::cfg_if! {
            if #[cfg(target_arch = "arm")] {
                // SAFETY: The range is validated above to lie inside the
                // memory-mapped flash array, which is always readable from the
                // boot core.
                unsafe {
                    core::ptr::copy_nonoverlapping(address as *const u8, buffer.as_mut_ptr(), buffer.len());
                }
                Ok(())
            } else {
                Err(HalError::NotInitialized)
            }
        }
    }

    fn write(&mut self, address: u32, data: &[u8]) -> HalResult<()> {
        if !self.initialized {
            return Err(HalError::NotInitialized);
        }
        if address as usize % Self::WRITE_GRANULARITY != 0 || data.len() % Self::WRITE_GRANULARITY != 0 {
            return Err(HalError::FlashMisaligned);
        }
        Self::check_range(address, data.len())?;
        if self.is_locked() {
            return Err(HalError::FlashLocked);
        }

        #[cfg(target_arch = "arm")]
        {
            use core::ptr::{read_volatile, write_volatile};

            Self::wait_ready()?;
            // SAFETY: Flash is unlocked and idle; the programming sequence
            // (PG, two consecutive word writes, wait, clear PG) follows RM0453.
            unsafe {
                let cr = read_volatile(regs::CR as *const u32);
                write_volatile(regs::CR as *mut u32, cr | regs::CR_PG);

                for (i, chunk) in data.chunks_exact(Self::WRITE_GRANULARITY).enumerate() {
                    let dest = (address + (i * Self::WRITE_GRANULARITY) as u32) as *mut u32;
                    let lo = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let hi = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    write_volatile(dest, lo);
                    write_volatile(dest.add(1), hi);

                    let status = Self::wait_ready().and_then(|()| Self::take_status(HalError::FlashWriteFailed));
                    if status.is_err() {
                        let cr = read_volatile(regs::CR as *const u32);
                        write_volatile(regs::CR as *mut u32, cr & !regs::CR_PG);
                        return status;
                    }
                }

                let cr = read_volatile(regs::CR as *const u32);
                write_volatile(regs::CR as *mut u32, cr & !regs::CR_PG);
            }
        }

        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> HalResult<()> {
        if !self.initialized {
            return Err(HalError::NotInitialized);
        }
        Self::check_range(address, 1)?;
        if self.is_locked() {
            return Err(HalError::FlashLocked);
        }

        #[cfg(target_arch = "arm")]
        {
            use core::ptr::{read_volatile, write_volatile};

            let page_number = (address - FLASH_BASE) / FLASH_PAGE_SIZE;

            Self::wait_ready()?;
            // SAFETY: Flash is unlocked and idle; PER + PNB + STRT is the page
            // erase sequence from RM0453.
            unsafe {
                let cr = read_volatile(regs::CR as *const u32);
                let cr = (cr & !regs::CR_PNB_MASK)
                    | regs::CR_PER
                    | ((page_number << regs::CR_PNB_SHIFT) & regs::CR_PNB_MASK);
                write_volatile(regs::CR as *mut u32, cr);
                write_volatile(regs::CR as *mut u32, cr | regs::CR_STRT);

                let status = Self::wait_ready().and_then(|()| Self::take_status(HalError::FlashEraseFailed));

                let cr = read_volatile(regs::CR as *const u32);
                write_volatile(regs::CR as *mut u32, cr & !regs::CR_PER);
                status?;
            }
        }

        Ok(())
    }

    fn lock(&mut self) -> HalResult<()> {
        #[cfg(target_arch = "arm")]
        {
            use core::ptr::{read_volatile, write_volatile};
            // SAFETY: Setting CR.LOCK is always permitted.
            unsafe {
                let cr = read_volatile(regs::CR as *const u32);
                write_volatile(regs::CR as *mut u32, cr | regs::CR_LOCK);
            }
        }
        Ok(())
    }

    fn unlock(&mut self) -> HalResult<()> {
        if !self.initialized {
            return Err(HalError::NotInitialized);
        }
        if !self.is_locked() {
            return Ok(());
        }

        #[cfg(target_arch = "arm")]
        {
            use core::ptr::write_volatile;
            // SAFETY: Writing KEY1 then KEY2 to FLASH_KEYR is the documented
            // unlock sequence; a wrong sequence locks the controller until reset.
            unsafe {
                write_volatile(regs::KEYR as *mut u32, regs::KEY1);
                write_volatile(regs::KEYR as *mut u32, regs::KEY2);
            }
        }

        if self.is_locked() {
            Err(HalError::FlashLocked)
        } else {
            Ok(())
        }
    }

    fn is_locked(&self) -> bool {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "arm")] {
                // SAFETY: FLASH_CR is always readable.
                let cr = unsafe { core::ptr::read_volatile(regs::CR as *const u32) };
                cr & regs::CR_LOCK != 0
            } else {
                true
            }
        }
    }
}

impl Default for Stm32wlFlash {
    fn default() -> Self {
        Self::new()
    }
}

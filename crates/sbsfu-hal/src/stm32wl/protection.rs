// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL boot protections
//!
//! Static protections (RDP, WRP, PCROP, secure user memory) live in option
//! bytes that are provisioned at the factory; applying them here means
//! confirming they are set. The remaining protections are switched on by the
//! bootloader:
//!
//! | Protection | Mechanism |
//! |------------|-----------|
//! | MPU        | region 0 marks SRAM execute-never, background map for privileged code |
//! | DMA        | DMA1, DMA2 and DMAMUX1 clocks gated off |
//! | IWDG       | started with a /256 prescaler |
//! | DAP        | SWDIO/SWCLK switched to analog mode |
//! | TAMPER     | TAMP1 input enabled |
//! | CSS        | HSE clock security system on |

use crate::error::{HalError, HalResult};
use crate::traits::ProtectionInterface;
use sbsfu_common::{Protection, ProtectionSet};

#[cfg(target_arch = "arm")]
use super::flash_regs as regs;

#[cfg(target_arch = "arm")]
mod periph {
    pub const IWDG_KR: u32 = 0x4000_3000;
    pub const IWDG_PR: u32 = 0x4000_3004;
    pub const IWDG_RLR: u32 = 0x4000_3008;
    pub const IWDG_SR: u32 = 0x4000_300C;
    pub const IWDG_KEY_RELOAD: u32 = 0xAAAA;
    pub const IWDG_KEY_ENABLE: u32 = 0xCCCC;
    pub const IWDG_KEY_ACCESS: u32 = 0x5555;
    /// Prescaler /256, reload 0xFFF: about 32 s on the 32 kHz LSI
    pub const IWDG_PR_DIV256: u32 = 0x6;
    pub const IWDG_RLR_MAX: u32 = 0xFFF;

    pub const RCC_CR: u32 = 0x5800_0000;
    pub const RCC_CR_CSSON: u32 = 1 << 19;
    pub const RCC_AHB2ENR: u32 = 0x5800_004C;
    pub const RCC_AHB2ENR_GPIOAEN: u32 = 1 << 0;

    pub const RCC_AHB1ENR: u32 = 0x5800_0048;
    /// DMA1EN, DMA2EN and DMAMUX1EN
    pub const RCC_AHB1ENR_DMA_MASK: u32 = 0b111;
    pub const RCC_APB1ENR1: u32 = 0x5800_0058;
    pub const RCC_APB1ENR1_RTCAPBEN: u32 = 1 << 10;

    pub const PWR_CR1: u32 = 0x5800_0400;
    pub const PWR_CR1_DBP: u32 = 1 << 8;

    pub const TAMP_CR1: u32 = 0x4000_B000;
    pub const TAMP_CR1_TAMP1E: u32 = 1 << 0;

    pub const GPIOA_MODER: u32 = 0x4800_0000;
    /// PA13 (SWDIO) and PA14 (SWCLK) in analog mode
    pub const SWD_ANALOG_MASK: u32 = (0b11 << 26) | (0b11 << 28);
}

/// Cortex-M4 memory protection unit (PMSAv7)
#[cfg(target_arch = "arm")]
mod mpu {
    use sbsfu_common::constants::{SRAM_BASE, SRAM_SIZE};

    pub const CTRL: u32 = 0xE000_ED94;
    pub const RNR: u32 = 0xE000_ED98;
    pub const RBAR: u32 = 0xE000_ED9C;
    pub const RASR: u32 = 0xE000_EDA0;

    pub const CTRL_ENABLE: u32 = 1 << 0;
    pub const CTRL_PRIVDEFENA: u32 = 1 << 2;

    const RASR_ENABLE: u32 = 1 << 0;
    const RASR_XN: u32 = 1 << 28;
    /// Full read/write access
    const RASR_AP_RW: u32 = 0b011 << 24;
    /// Normal memory, shareable, write-through
    const RASR_SRAM_ATTRS: u32 = (1 << 18) | (1 << 17);
    const RASR_SIZE_SHIFT: u32 = 1;

    pub const SRAM_RBAR: u32 = SRAM_BASE;
    pub const SRAM_RASR: u32 = RASR_XN
        | RASR_AP_RW
        | RASR_SRAM_ATTRS
        | ((SRAM_SIZE.trailing_zeros() - 1) << RASR_SIZE_SHIFT)
        | RASR_ENABLE;
}

/// STM32WL protection driver
pub struct Stm32wlProtections {
    watchdog_started: bool,
}

impl Stm32wlProtections {
    /// Protections this driver implements
    pub const SUPPORTED: ProtectionSet = ProtectionSet::ALL;

    /// Create the driver
    #[must_use]
    pub const fn new() -> Self {
        Self { watchdog_started: false }
    }

    /// Reload the independent watchdog
    pub fn kick_watchdog(&self) {
        #[cfg(target_arch = "arm")]
        if self.watchdog_started {
            // SAFETY: IWDG_KR is a write-only key register; the reload key
            // has no effect other than refreshing the counter.
            unsafe { core::ptr::write_volatile(periph::IWDG_KR as *mut u32, periph::IWDG_KEY_RELOAD) };
        }
    }

    #[cfg(target_arch = "arm")]
    fn read(addr: u32) -> u32 {
        // SAFETY: Only called with the fixed, always-mapped peripheral
        // register addresses defined in this module.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    #[cfg(target_arch = "arm")]
    fn modify(addr: u32, f: impl FnOnce(u32) -> u32) {
        // SAFETY: See `read`; the read-modify-write runs before interrupts
        // are enabled, so nothing else touches these registers.
        unsafe {
            let value = core::ptr::read_volatile(addr as *const u32);
            core::ptr::write_volatile(addr as *mut u32, f(value));
        }
    }

    #[cfg(target_arch = "arm")]
    fn enable_mpu() {
        use core::ptr::write_volatile;

        // SAFETY: MPU registers of the Cortex-M4 system control space. The
        // region is programmed while the MPU is off, and the barriers make the
        // new map visible before the next instruction fetch.
        unsafe {
            write_volatile(mpu::CTRL as *mut u32, 0);
            write_volatile(mpu::RNR as *mut u32, 0);
            write_volatile(mpu::RBAR as *mut u32, mpu::SRAM_RBAR);
            write_volatile(mpu::RASR as *mut u32, mpu::SRAM_RASR);
            write_volatile(mpu::CTRL as *mut u32, mpu::CTRL_ENABLE | mpu::CTRL_PRIVDEFENA);
            core::arch::asm!("dsb sy", "isb sy", options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "arm")]
    fn enable_tamper() {
        Self::modify(periph::RCC_APB1ENR1, |v| v | periph::RCC_APB1ENR1_RTCAPBEN);
        Self::modify(periph::PWR_CR1, |v| v | periph::PWR_CR1_DBP);
        Self::modify(periph::TAMP_CR1, |v| v | periph::TAMP_CR1_TAMP1E);
        Self::modify(periph::PWR_CR1, |v| v & !periph::PWR_CR1_DBP);
    }

    #[cfg(target_arch = "arm")]
    fn start_watchdog(&mut self) -> HalResult<()> {
        use core::ptr::write_volatile;

        // SAFETY: IWDG key/prescaler/reload registers; the access key
        // unlocks PR and RLR, the enable key starts the counter for good.
        unsafe {
            write_volatile(periph::IWDG_KR as *mut u32, periph::IWDG_KEY_ENABLE);
            write_volatile(periph::IWDG_KR as *mut u32, periph::IWDG_KEY_ACCESS);
            write_volatile(periph::IWDG_PR as *mut u32, periph::IWDG_PR_DIV256);
            write_volatile(periph::IWDG_RLR as *mut u32, periph::IWDG_RLR_MAX);
        }

        let mut spins = 0u32;
        while Self::read(periph::IWDG_SR) != 0 {
            spins += 1;
            if spins > 100_000 {
                return Err(HalError::ProtectionFailed);
            }
            core::hint::spin_loop();
        }
        self.watchdog_started = true;
        self.kick_watchdog();
        Ok(())
    }

    #[cfg(target_arch = "arm")]
    fn check(&self, protection: Protection) -> HalResult<()> {
        let active = match protection {
            Protection::ReadoutProtection => {
                Self::read(regs::OPTR) & regs::OPTR_RDP_MASK != regs::RDP_LEVEL_0
            }
            Protection::WriteProtection => {
                let wrp = Self::read(regs::WRP1AR);
                let start = wrp & 0x7F;
                let end = (wrp >> 16) & 0x7F;
                start <= end
            }
            Protection::ProprietaryCodeProtection => {
                let start = Self::read(regs::PCROP1ASR) & regs::PCROP_OFFSET_MASK;
                let end = Self::read(regs::PCROP1AER) & regs::PCROP_OFFSET_MASK;
                start <= end
            }
            Protection::SecureUserMemory => Self::read(regs::SFR) & regs::SFR_FSD == 0,
            Protection::Mpu => {
                let ctrl = Self::read(mpu::CTRL);
                Self::modify(mpu::RNR, |_| 0);
                ctrl & mpu::CTRL_ENABLE != 0 && Self::read(mpu::RASR) == mpu::SRAM_RASR
            }
            Protection::DmaProtection => Self::read(periph::RCC_AHB1ENR) & periph::RCC_AHB1ENR_DMA_MASK == 0,
            Protection::Watchdog => self.watchdog_started,
            Protection::DebugAccessLock => {
                Self::read(periph::GPIOA_MODER) & periph::SWD_ANALOG_MASK == periph::SWD_ANALOG_MASK
            }
            Protection::TamperDetection => Self::read(periph::TAMP_CR1) & periph::TAMP_CR1_TAMP1E != 0,
            Protection::ClockMonitor => Self::read(periph::RCC_CR) & periph::RCC_CR_CSSON != 0,
        };
        if active {
            Ok(())
        } else {
            Err(HalError::ProtectionFailed)
        }
    }
}

impl ProtectionInterface for Stm32wlProtections {
    fn supported(&self) -> ProtectionSet {
        Self::SUPPORTED
    }

    fn apply(&mut self, protection: Protection) -> HalResult<()> {
        #[cfg(target_arch = "arm")]
        {
            match protection {
                Protection::Mpu => Self::enable_mpu(),
                Protection::DmaProtection => {
                    Self::modify(periph::RCC_AHB1ENR, |v| v & !periph::RCC_AHB1ENR_DMA_MASK);
                }
                Protection::Watchdog => self.start_watchdog()?,
                Protection::TamperDetection => Self::enable_tamper(),
                Protection::DebugAccessLock => {
                    Self::modify(periph::RCC_AHB2ENR, |v| v | periph::RCC_AHB2ENR_GPIOAEN);
                    Self::modify(periph::GPIOA_MODER, |v| v | periph::SWD_ANALOG_MASK);
                }
                Protection::ClockMonitor => {
                    Self::modify(periph::RCC_CR, |v| v | periph::RCC_CR_CSSON);
                }
                _ => {}
            }
            self.check(protection)
        }

        #[cfg(not(target_arch = "arm"))]
        {
            let _ = protection;
            Err(HalError::ProtectionNotSupported)
        }
    }

    fn verify(&self, protection: Protection) -> HalResult<()> {
        #[cfg(target_arch = "arm")]
        {
            self.check(protection)
        }

        #[cfg(not(target_arch = "arm"))]
        {
            let _ = protection;
            Err(HalError::ProtectionNotSupported)
        }
    }
}

impl Default for Stm32wlProtections {
    fn default() -> Self {
        Self::new()
    }
}

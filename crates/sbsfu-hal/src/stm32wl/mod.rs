// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL drivers
//!
//! Register-level flash and protection drivers for the STM32WL5x/WLEx
//! Cortex-M4 core. Register accesses are compiled only for `target_arch =
//! "arm"`; on other targets the drivers report [`crate::HalError::ProtectionNotSupported`]
//! or [`crate::HalError::NotInitialized`].

pub mod flash;
pub mod protection;

pub use flash::Stm32wlFlash;
pub use protection::Stm32wlProtections;

/// FLASH controller register block
#[allow(dead_code)]
pub(crate) mod flash_regs {
    pub const BASE: u32 = 0x5800_4000;
    pub const KEYR: u32 = BASE + 0x08;
    pub const SR: u32 = BASE + 0x10;
    pub const CR: u32 = BASE + 0x14;
    pub const OPTR: u32 = BASE + 0x20;
    pub const PCROP1ASR: u32 = BASE + 0x24;
    pub const PCROP1AER: u32 = BASE + 0x28;
    pub const WRP1AR: u32 = BASE + 0x2C;
    pub const SFR: u32 = BASE + 0x80;

    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;

    pub const CR_PG: u32 = 1 << 0;
    pub const CR_PER: u32 = 1 << 1;
    pub const CR_PNB_SHIFT: u32 = 3;
    pub const CR_PNB_MASK: u32 = 0x7F << CR_PNB_SHIFT;
    pub const CR_STRT: u32 = 1 << 16;
    pub const CR_LOCK: u32 = 1 << 31;

    pub const SR_EOP: u32 = 1 << 0;
    pub const SR_OPERR: u32 = 1 << 1;
    pub const SR_PROGERR: u32 = 1 << 3;
    pub const SR_WRPERR: u32 = 1 << 4;
    pub const SR_PGAERR: u32 = 1 << 5;
    pub const SR_SIZERR: u32 = 1 << 6;
    pub const SR_PGSERR: u32 = 1 << 7;
    pub const SR_MISSERR: u32 = 1 << 8;
    pub const SR_FASTERR: u32 = 1 << 9;
    pub const SR_BSY: u32 = 1 << 16;
    pub const SR_CFGBSY: u32 = 1 << 18;

    pub const SR_ERRORS: u32 = SR_OPERR | SR_PROGERR | SR_WRPERR | SR_PGAERR
        | SR_SIZERR | SR_PGSERR | SR_MISSERR | SR_FASTERR;

    pub const OPTR_RDP_MASK: u32 = 0xFF;
    pub const RDP_LEVEL_0: u32 = 0xAA;
    pub const SFR_FSD: u32 = 1 << 7;
    /// PCROP start/end offsets in 2 KB units
    pub const PCROP_OFFSET_MASK: u32 = 0xFF;
}

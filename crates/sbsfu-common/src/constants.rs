// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Target constants for the STM32WL family
//!
//! Values that the vendor headers spread over linker scripts and
//! `#define`s live here as typed constants.

// =============================================================================
// Flash
// =============================================================================

/// Flash base address
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Flash size on STM32WLx5xC (256 KB)
pub const FLASH_SIZE: u32 = 256 * 1024;

/// Flash erase page size
pub const FLASH_PAGE_SIZE: u32 = 2048;

/// Flash programming granularity (one double word)
pub const FLASH_WRITE_GRANULARITY: usize = 8;

/// Value of an erased flash byte
pub const FLASH_ERASED_BYTE: u8 = 0xFF;

/// Value of an erased flash word
pub const FLASH_ERASED_WORD: u32 = 0xFFFF_FFFF;

// =============================================================================
// RAM
// =============================================================================

/// SRAM base address
pub const SRAM_BASE: u32 = 0x2000_0000;

/// SRAM size (SRAM1 + SRAM2, 64 KB)
pub const SRAM_SIZE: u32 = 64 * 1024;

// =============================================================================
// Firmware Slots
// =============================================================================

/// Maximum number of active and of download slots
pub const MAX_SLOTS: usize = 3;

/// Offset of the executable image behind the firmware header
pub const IMAGE_HEADER_OFFSET: u32 = 0x200;

// =============================================================================
// Flow Control
// =============================================================================

/// Initial value of the flow-control accumulator
pub const FLOW_CTRL_INIT_VALUE: u32 = 0x0000_5776;

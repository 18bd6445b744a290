// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL Secure Boot Library
//!
//! This crate provides the boot-time integrity machinery:
//!
//! - **Flow control**: XOR-chained checkpoints that detect skipped or
//!   reordered protection steps
//! - **Session**: the ordered apply → check → select → hand-off sequence
//! - **Slots**: firmware slot lookup against the flash region map

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod flow_control;
pub mod session;
pub mod slots;

pub use flow_control::{
    check_step, enable_step, expected_after, expected_final, Checkpoint, FlowAccumulator,
    FlowPhase, SecurityErrorHandler, SecurityFault, SystemResetHandler,
};
pub use session::{AppHandoff, BootSession, BootStage};
pub use slots::{get_download_area_info, FirmwareSlotDescriptor, SlotId, SlotManager};

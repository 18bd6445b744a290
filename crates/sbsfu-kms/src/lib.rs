// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL Key Management Storage
//!
//! Persistent key blobs in the KMS data area of internal flash:
//!
//! - **NVM**: erase/program/verify primitives over the two halves of the
//!   KMS area ([`nvm::NvmBlockStore`])
//! - **Store**: an append-only key-value store that alternates between the
//!   two blocks ([`store::KmsStore`])
//!
//! Both layers follow the flash lock protocol: the controller is unlocked
//! for each program or erase sequence and locked again afterwards, also when
//! the sequence fails.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod nvm;
pub mod store;

pub use error::{KmsError, KmsResult};
pub use nvm::{NvmBlock, NvmBlockStore};
pub use store::{KmsStore, MAX_ITEMS, MAX_ITEM_SIZE};

// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Boot session
//!
//! One [`BootSession`] exists per boot attempt. It owns the flow-control
//! accumulator and walks the fixed sequence:
//!
//! 1. [`BootSession::start`]: configuration check, accumulator init
//! 2. [`BootSession::apply_protections`]: one enable step per protection
//! 3. [`BootSession::check_protections`]: one check step per protection
//! 4. [`BootSession::select_slot`]: locate the image to run
//! 5. [`BootSession::handoff`]: final accumulator check, session consumed
//!
//! Running a phase twice or out of order leaves the accumulator off the
//! precomputed chain, so the next checkpoint ends the boot.

use sbsfu_common::log::LogBuffer;
use sbsfu_common::{log_debug, log_info};
use sbsfu_common::{BootConfig, Error, RegionMap, Result};
use sbsfu_hal::ProtectionInterface;

use crate::flow_control::{
    expected_after, expected_final, Checkpoint, FlowAccumulator, FlowPhase, SecurityErrorHandler,
    SecurityFault,
};
use crate::slots::{get_download_area_info, FirmwareSlotDescriptor, SlotId};

const LOG_MODULE: &str = "boot";

/// Progress of a boot session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BootStage {
    /// Accumulator initialized
    Started = 0,
    /// Every protection applied
    ProtectionsApplied = 1,
    /// Every protection re-verified
    ProtectionsChecked = 2,
    /// Firmware slot selected
    SlotSelected = 3,
}

impl BootStage {
    /// Get stage name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::ProtectionsApplied => "ProtectionsApplied",
            Self::ProtectionsChecked => "ProtectionsChecked",
            Self::SlotSelected => "SlotSelected",
        }
    }
}

/// Result of a successful boot sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppHandoff {
    /// Slot the application runs from
    pub slot: SlotId,
    /// Start of the executing slot
    pub execution_address: u32,
    /// Application vector table
    pub vector_table_address: u32,
    /// Final accumulator value
    pub flow_value: u32,
}

/// State of one boot attempt
pub struct BootSession<'a, P, H>
where
    P: ProtectionInterface,
    H: SecurityErrorHandler,
{
    config: BootConfig,
    protections: &'a mut P,
    handler: &'a mut H,
    flow: FlowAccumulator,
    stage: BootStage,
    selected: Option<(SlotId, FirmwareSlotDescriptor)>,
    log: LogBuffer,
    tick: u32,
}

impl<'a, P, H> BootSession<'a, P, H>
where
    P: ProtectionInterface,
    H: SecurityErrorHandler,
{
    /// Begin a boot attempt
    ///
    /// # Errors
    /// [`Error::InvalidBootConfig`] if `protections` cannot apply every
    /// protection enabled in `config`.
    pub fn start(config: BootConfig, protections: &'a mut P, handler: &'a mut H) -> Result<Self> {
        if !protections.supported().contains_all(config.protections) {
            return Err(Error::InvalidBootConfig);
        }

        let mut session = Self {
            config,
            protections,
            handler,
            flow: FlowAccumulator::init(config.flow_init),
            stage: BootStage::Started,
            selected: None,
            log: LogBuffer::new(),
            tick: 0,
        };
        let tick = session.next_tick();
        log_info!(
            session.log,
            tick,
            LOG_MODULE,
            "session started, {} protections",
            config.protections.len()
        );
        Ok(session)
    }

    /// Apply every enabled protection in order
    pub fn apply_protections(&mut self) {
        self.run_phase(FlowPhase::Apply);
        self.advance(BootStage::ProtectionsApplied);
    }

    /// Re-verify every enabled protection in order
    pub fn check_protections(&mut self) {
        self.run_phase(FlowPhase::Check);
        self.advance(BootStage::ProtectionsChecked);
    }

    /// Choose the slot to boot from
    ///
    /// # Errors
    /// - [`Error::InvalidBootStage`] before the protections were checked
    /// - [`Error::SlotNotAvailable`] if `slot` is not configured in `map`
    pub fn select_slot(&mut self, map: &RegionMap, slot: SlotId) -> Result<FirmwareSlotDescriptor> {
        if self.stage < BootStage::ProtectionsChecked {
            return Err(Error::InvalidBootStage);
        }

        let descriptor = get_download_area_info(map, &self.config.slots, slot);
        if !descriptor.is_available() || descriptor.execution_address == 0 {
            return Err(Error::SlotNotAvailable);
        }

        self.selected = Some((slot, descriptor));
        let tick = self.next_tick();
        log_info!(self.log, tick, LOG_MODULE, "slot {:?} at {:#010X}", slot, descriptor.execution_address);
        self.advance(BootStage::SlotSelected);
        Ok(descriptor)
    }

    /// Final integrity check and hand-off
    ///
    /// # Errors
    /// [`Error::InvalidBootStage`] if no slot was selected. The accumulator
    /// is checked first, so a broken chain never reaches this error.
    pub fn handoff(self) -> Result<AppHandoff> {
        let expected = expected_final(self.config.protections, self.config.flow_init, FlowPhase::Check);
        self.flow.check(expected, &mut *self.handler, Checkpoint::FINAL);

        let (slot, descriptor) = self.selected.ok_or(Error::InvalidBootStage)?;
        let vector_table_address = descriptor
            .vector_table_address()
            .ok_or(Error::SlotNotAvailable)?;

        Ok(AppHandoff {
            slot,
            execution_address: descriptor.execution_address,
            vector_table_address,
            flow_value: self.flow.value(),
        })
    }

    /// Current stage
    #[must_use]
    pub const fn stage(&self) -> BootStage {
        self.stage
    }

    /// Current accumulator value
    #[must_use]
    pub fn flow_value(&self) -> u32 {
        self.flow.value()
    }

    /// Session log
    #[must_use]
    pub const fn log(&self) -> &LogBuffer {
        &self.log
    }

    fn run_phase(&mut self, phase: FlowPhase) {
        let set = self.config.protections;
        let init = self.config.flow_init;

        for (k, protection) in set.iter().enumerate() {
            let at = Checkpoint::step(phase, protection);
            let outcome = match phase {
                FlowPhase::Apply => self.protections.apply(protection),
                FlowPhase::Check => self.protections.verify(protection),
            };
            if outcome.is_err() {
                self.handler.security_error(SecurityFault::ProtectionFailure(at));
            }

            let expected = expected_after(set, init, phase, k + 1);
            self.flow.step(phase.step(protection), expected, &mut *self.handler, at);

            let tick = self.next_tick();
            log_debug!(self.log, tick, LOG_MODULE, "{:?} {}", phase, protection.name());
        }
    }

    fn advance(&mut self, stage: BootStage) {
        self.stage = stage;
        let tick = self.next_tick();
        log_info!(self.log, tick, LOG_MODULE, "stage {}", stage.name());
    }

    fn next_tick(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Flow-control integrity checking
//!
//! Every boot-time protection contributes a step constant to a running XOR
//! accumulator, once when it is applied and once when it is re-checked. After
//! each step the accumulator is compared with the value precomputed for the
//! configured protection set; a skipped, repeated or reordered step produces
//! a different value at the next checkpoint and ends the boot through the
//! [`SecurityErrorHandler`].
//!
//! ```text
//! init ─^E(RDP)─^E(WRP)─ … ─^E(CSS)─┬─^C(RDP)─^C(WRP)─ … ─^C(CSS)─ final
//!        Apply phase                │        Check phase
//!                                   └ expected_final(Apply)
//! ```
//!
//! The step constants are linearly independent over GF(2), so two different
//! prefixes of the chain never fold to the same value.

use core::hint::black_box;
use core::ptr;

use sbsfu_common::{Protection, ProtectionSet};

/// Step constants fed when each protection is applied, indexed by
/// [`Protection`] discriminant
const ENABLE_STEPS: [u32; 10] = [
    0x9ABB_A5C6,
    0xF9A7_210B,
    0x2C34_6E04,
    0x0D60_B722,
    0x1175_EC0C,
    0xA604_A1AF,
    0x46D9_1346,
    0xF691_5A1C,
    0x0619_4C9A,
    0x46FB_5E15,
];

/// Step constants fed when each protection is re-checked
const CHECK_STEPS: [u32; 10] = [
    0xD011_1D76,
    0xBACF_ECC3,
    0x3985_3853,
    0x7C11_3878,
    0xBA71_7400,
    0x20BC_A161,
    0xF494_CE1A,
    0x7AF5_E2E1,
    0x88DB_F2E5,
    0x15C7_0437,
];

/// Step constant for applying `protection`
#[must_use]
pub const fn enable_step(protection: Protection) -> u32 {
    ENABLE_STEPS[protection as usize]
}

/// Step constant for re-checking `protection`
#[must_use]
pub const fn check_step(protection: Protection) -> u32 {
    CHECK_STEPS[protection as usize]
}

/// Phase of the boot sequence a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Protections are being applied
    Apply,
    /// Protections are being re-verified before hand-off
    Check,
}

impl FlowPhase {
    /// Step constant of `protection` in this phase
    #[must_use]
    pub const fn step(self, protection: Protection) -> u32 {
        match self {
            Self::Apply => enable_step(protection),
            Self::Check => check_step(protection),
        }
    }
}

/// Expected accumulator after the first `k` enabled protections of `phase`
///
/// The check phase starts from the final value of the apply phase.
/// `k` larger than the number of enabled protections folds the whole phase.
#[must_use]
pub const fn expected_after(set: ProtectionSet, init: u32, phase: FlowPhase, k: usize) -> u32 {
    let mut value = match phase {
        FlowPhase::Apply => init,
        FlowPhase::Check => expected_final(set, init, FlowPhase::Apply),
    };
    let mut folded = 0;
    let mut i = 0;
    while i < Protection::ORDER.len() && folded < k {
        let protection = Protection::ORDER[i];
        if set.contains(protection) {
            value ^= phase.step(protection);
            folded += 1;
        }
        i += 1;
    }
    value
}

/// Expected accumulator once every enabled protection of `phase` has run
#[must_use]
pub const fn expected_final(set: ProtectionSet, init: u32, phase: FlowPhase) -> u32 {
    match phase {
        FlowPhase::Apply => expected_after(set, init, FlowPhase::Apply, usize::MAX),
        FlowPhase::Check => expected_after(set, init, FlowPhase::Check, usize::MAX),
    }
}

/// Where in the chain a comparison happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Phase of the step
    pub phase: FlowPhase,
    /// Protection of the step, `None` for the final check
    pub protection: Option<Protection>,
}

impl Checkpoint {
    /// Checkpoint after the step of `protection` in `phase`
    #[must_use]
    pub const fn step(phase: FlowPhase, protection: Protection) -> Self {
        Self { phase, protection: Some(protection) }
    }

    /// Final check before hand-off
    pub const FINAL: Self = Self { phase: FlowPhase::Check, protection: None };
}

/// Cause of a fatal security error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityFault {
    /// Accumulator differs from the expected value
    FlowMismatch(Checkpoint),
    /// A protection could not be applied or is no longer active
    ProtectionFailure(Checkpoint),
}

impl SecurityFault {
    /// Checkpoint at which the fault was detected
    #[must_use]
    pub const fn checkpoint(&self) -> Checkpoint {
        match self {
            Self::FlowMismatch(at) | Self::ProtectionFailure(at) => *at,
        }
    }
}

/// Terminal handler for security errors
///
/// Implementations must not return; on target they reset the device.
pub trait SecurityErrorHandler {
    /// Handle `fault` and never return
    fn security_error(&mut self, fault: SecurityFault) -> !;
}

/// Resets the core through SCB AIRCR.SYSRESETREQ
#[derive(Debug, Default)]
pub struct SystemResetHandler;

impl SecurityErrorHandler for SystemResetHandler {
    fn security_error(&mut self, _fault: SecurityFault) -> ! {
        system_reset()
    }
}

#[cfg(target_arch = "arm")]
fn system_reset() -> ! {
    const SCB_AIRCR: u32 = 0xE000_ED0C;
    // VECTKEY + SYSRESETREQ
    const AIRCR_RESET: u32 = 0x05FA_0004;
    // SAFETY: AIRCR is an architecturally defined SCB register on every
    // Cortex-M core. The barriers drain pending writes before and after the
    // reset request.
    unsafe {
        core::arch::asm!("dsb sy", options(nomem, nostack));
        ptr::write_volatile(SCB_AIRCR as *mut u32, AIRCR_RESET);
        core::arch::asm!("dsb sy", options(nomem, nostack));
    }
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_arch = "arm"))]
fn system_reset() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// XOR accumulator of one boot attempt
///
/// Created once per boot with [`FlowAccumulator::init`]; never rolled back.
#[derive(Debug)]
pub struct FlowAccumulator {
    value: u32,
}

impl FlowAccumulator {
    /// Start a chain at `initial`
    #[must_use]
    pub const fn init(initial: u32) -> Self {
        Self { value: initial }
    }

    /// Current accumulator value
    #[must_use]
    pub fn value(&self) -> u32 {
        // SAFETY: `self.value` is a valid, aligned u32 borrowed from `self`.
        unsafe { ptr::read_volatile(&self.value) }
    }

    /// Compare with `expected`
    ///
    /// The value is re-read and compared twice so a single skipped
    /// instruction cannot turn a mismatch into a match.
    #[must_use]
    pub fn matches(&self, expected: u32) -> bool {
        let expected = black_box(expected);
        let first = black_box(self.value() == expected);
        let second = black_box(self.value() ^ expected) == 0;
        first & second
    }

    /// XOR `step_value` in and compare with `expected`
    pub fn step<H>(&mut self, step_value: u32, expected: u32, handler: &mut H, at: Checkpoint)
    where
        H: SecurityErrorHandler + ?Sized,
    {
        let next = self.value() ^ black_box(step_value);
        // SAFETY: `self.value` is a valid, aligned u32 borrowed mutably from `self`.
        unsafe { ptr::write_volatile(&mut self.value, next) };
        self.check(expected, handler, at);
    }

    /// Compare with `expected` without changing the accumulator
    pub fn check<H>(&self, expected: u32, handler: &mut H, at: Checkpoint)
    where
        H: SecurityErrorHandler + ?Sized,
    {
        if !self.matches(expected) {
            handler.security_error(SecurityFault::FlowMismatch(at));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbsfu_common::constants::FLOW_CTRL_INIT_VALUE;

    struct Panicking;

    impl SecurityErrorHandler for Panicking {
        fn security_error(&mut self, fault: SecurityFault) -> ! {
            panic!("security error: {fault:?}");
        }
    }

    #[test]
    fn test_step_constants_are_distinct() {
        for (i, a) in ENABLE_STEPS.iter().chain(CHECK_STEPS.iter()).enumerate() {
            for b in ENABLE_STEPS.iter().chain(CHECK_STEPS.iter()).skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_empty_set_keeps_init() {
        let init = FLOW_CTRL_INIT_VALUE;
        assert_eq!(expected_final(ProtectionSet::EMPTY, init, FlowPhase::Apply), init);
        assert_eq!(expected_final(ProtectionSet::EMPTY, init, FlowPhase::Check), init);
    }

    #[test]
    fn test_check_phase_continues_apply_chain() {
        let set = ProtectionSet::EMPTY.with(Protection::Watchdog);
        let init = FLOW_CTRL_INIT_VALUE;
        assert_eq!(
            expected_after(set, init, FlowPhase::Check, 0),
            init ^ enable_step(Protection::Watchdog)
        );
        assert_eq!(
            expected_final(set, init, FlowPhase::Check),
            init ^ enable_step(Protection::Watchdog) ^ check_step(Protection::Watchdog)
        );
    }

    #[test]
    fn test_step_and_check_pass_on_expected_values() {
        let mut flow = FlowAccumulator::init(7);
        let at = Checkpoint::step(FlowPhase::Apply, Protection::Mpu);
        flow.step(0x10, 0x17, &mut Panicking, at);
        flow.check(0x17, &mut Panicking, Checkpoint::FINAL);
        assert_eq!(flow.value(), 0x17);
        assert!(!flow.matches(0x16));
    }

    #[test]
    #[should_panic(expected = "FlowMismatch")]
    fn test_step_mismatch_is_fatal() {
        let mut flow = FlowAccumulator::init(7);
        flow.step(0x10, 0x18, &mut Panicking, Checkpoint::FINAL);
    }
}

//! Direct access to the ARMv8 Performance Monitoring Unit through its system registers.
//!
//! Register map (all `_EL0`):
//!
//! Register    | Use
//! --------    | ---
//! `PMCR`      | master enable (`E`), event counter reset (`P`), cycle counter reset (`C`), `N`
//! `PMCNTENSET`| enable cycle counter (bit 31) and event counters (bits 0..N)
//! `PMCNTENCLR`| disable, same layout
//! `PMCCNTR`   | 64-bit cycle counter
//! `PMSELR`    | selects the event counter that `PMXEVTYPER`/`PMXEVCNTR` refer to
//! `PMXEVTYPER`| event type of the selected counter
//! `PMXEVCNTR` | value of the selected counter

#![cfg_attr(not(target_arch = "aarch64"), allow(dead_code, unused_imports))]

use crate::counters::{CounterPort, EventCode, EventSlot, MAX_EVENT_SLOTS};
use std::error::Error;

const PMCR_E: u64 = 1 << 0;
const PMCR_P: u64 = 1 << 1;
const PMCR_C: u64 = 1 << 2;
const PMCR_N_SHIFT: u64 = 11;
const PMCR_N_MASK: u64 = 0x1f;
const PMCNTEN_CYCLES: u64 = 1 << 31;
const PMSELR_MASK: u64 = 0x1f;

#[cfg(target_arch = "aarch64")]
mod hw {
    use std::arch::asm;

    macro_rules! read_sysreg {
        ($reg:literal) => {{
            let val: u64;
            unsafe { asm!(concat!("mrs {}, ", $reg), out(reg) val, options(nomem, nostack)) };
            val
        }};
    }

    macro_rules! write_sysreg {
        ($reg:literal, $val:expr) => {{
            let val: u64 = $val;
            unsafe { asm!(concat!("msr ", $reg, ", {}"), in(reg) val, options(nostack)) };
        }};
    }

    #[inline(always)]
    pub(super) fn pmcr() -> u64 {
        read_sysreg!("pmcr_el0")
    }

    #[inline(always)]
    pub(super) fn set_pmcr(val: u64) {
        write_sysreg!("pmcr_el0", val)
    }

    #[inline(always)]
    pub(super) fn set_pmcntenset(bits: u64) {
        write_sysreg!("pmcntenset_el0", bits)
    }

    #[inline(always)]
    pub(super) fn set_pmcntenclr(bits: u64) {
        write_sysreg!("pmcntenclr_el0", bits)
    }

    #[inline(always)]
    pub(super) fn pmccntr() -> u64 {
        read_sysreg!("pmccntr_el0")
    }

    /// Selects `counter` for the `PMXEV*` registers and synchronizes the context, since the
    /// selection is consumed by a different register without automatic serialization.
    #[inline(always)]
    pub(super) fn select(counter: u64) {
        write_sysreg!("pmselr_el0", counter);
        unsafe { asm!("isb", options(nomem, nostack)) };
    }

    #[inline(always)]
    pub(super) fn set_pmxevtyper(event: u64) {
        write_sysreg!("pmxevtyper_el0", event)
    }

    #[inline(always)]
    pub(super) fn pmxevcntr() -> u64 {
        read_sysreg!("pmxevcntr_el0")
    }
}

/// The ARMv8 PMU of the executing core, driven through system registers.
///
/// Can be obtained with `Counter::by_name("pmu")`.
#[cfg(target_arch = "aarch64")]
pub struct Pmu {
    slots: usize,
}

#[cfg(target_arch = "aarch64")]
impl Pmu {
    pub(crate) const NAME: &'static str = "pmu";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let implemented = ((hw::pmcr() >> PMCR_N_SHIFT) & PMCR_N_MASK) as usize;
        info!("Pmu::new: {} event counters implemented", implemented);

        Ok(Pmu {
            slots: implemented.min(MAX_EVENT_SLOTS),
        })
    }
}

#[cfg(target_arch = "aarch64")]
impl CounterPort for Pmu {
    #[inline]
    fn enable_global(&mut self) {
        hw::set_pmcr(hw::pmcr() | PMCR_E);
    }

    #[inline]
    fn enable_cycle_counter(&mut self) {
        hw::set_pmcntenset(PMCNTEN_CYCLES);
    }

    #[inline]
    fn disable_cycle_counter(&mut self) {
        hw::set_pmcntenclr(PMCNTEN_CYCLES);
    }

    #[inline]
    fn reset_cycle_counter(&mut self) {
        hw::set_pmcr(hw::pmcr() | PMCR_C);
    }

    #[inline]
    fn read_cycle_counter(&self) -> u64 {
        hw::pmccntr()
    }

    fn event_slots(&self) -> usize {
        self.slots
    }

    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode) {
        hw::select(slot.index() as u64 & PMSELR_MASK);
        hw::set_pmxevtyper(u64::from(code.0));
    }

    #[inline]
    fn enable_event_counter(&mut self, slot: EventSlot) {
        hw::set_pmcntenset(slot.enable_bit());
    }

    #[inline]
    fn disable_event_counter(&mut self, slot: EventSlot) {
        hw::set_pmcntenclr(slot.enable_bit());
    }

    #[inline]
    fn read_event_counter(&self, slot: EventSlot) -> u32 {
        hw::select(slot.index() as u64 & PMSELR_MASK);
        hw::pmxevcntr() as u32
    }

    #[inline]
    fn reset_event_counters(&mut self) {
        hw::set_pmcr(hw::pmcr() | PMCR_P);
    }
}

#[cfg(not(target_arch = "aarch64"))]
pub enum Pmu {}

#[cfg(not(target_arch = "aarch64"))]
impl Pmu {
    pub(crate) const NAME: &'static str = "pmu";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        Err("the `pmu` counter is only supported on aarch64".into())
    }
}

#[cfg(not(target_arch = "aarch64"))]
impl CounterPort for Pmu {
    fn enable_global(&mut self) {
        match *self {}
    }

    fn enable_cycle_counter(&mut self) {
        match *self {}
    }

    fn disable_cycle_counter(&mut self) {
        match *self {}
    }

    fn reset_cycle_counter(&mut self) {
        match *self {}
    }

    fn read_cycle_counter(&self) -> u64 {
        match *self {}
    }

    fn event_slots(&self) -> usize {
        match *self {}
    }

    fn configure_event_counter(&mut self, _: EventSlot, _: EventCode) {
        match *self {}
    }

    fn enable_event_counter(&mut self, _: EventSlot) {
        match *self {}
    }

    fn disable_event_counter(&mut self, _: EventSlot) {
        match *self {}
    }

    fn read_event_counter(&self, _: EventSlot) -> u32 {
        match *self {}
    }

    fn reset_event_counters(&mut self) {
        match *self {}
    }
}

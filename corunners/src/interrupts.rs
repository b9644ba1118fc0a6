//! Keeping interrupt handlers out of the measured interval.
//!
//! Name (for [`InterruptMasking::by_name()`]) | Mask        | Targets
//! ------------------------------------------ | ----        | -------
//! `unmasked`                                 | [`Unmasked`] | any
//! `daif`                                     | [`Daif`]     | `aarch64`, EL1 or with `SCTLR_EL1.UMA` set
//!
//! Hosted userspace cannot mask interrupts; `unmasked` is the default there, and the `perf`
//! counter excludes kernel time instead. `daif` writes the `DAIF` flags directly and faults when
//! run at a level that is not allowed to, killing the process.

use std::error::Error;

pub trait InterruptMask {
    /// Masks IRQ and FIQ on the calling core.
    fn mask(&mut self);

    fn unmask(&mut self);
}

/// No-op mask.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unmasked;

impl Unmasked {
    const NAME: &'static str = "unmasked";
}

impl InterruptMask for Unmasked {
    #[inline]
    fn mask(&mut self) {}

    #[inline]
    fn unmask(&mut self) {}
}

/// `msr daifset, #3` / `msr daifclr, #3`.
#[cfg(target_arch = "aarch64")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Daif;

#[cfg(target_arch = "aarch64")]
impl Daif {
    const NAME: &'static str = "daif";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Daif)
    }
}

#[cfg(target_arch = "aarch64")]
impl InterruptMask for Daif {
    #[inline(always)]
    fn mask(&mut self) {
        unsafe {
            std::arch::asm!("msr daifset, #3", options(nomem, nostack, preserves_flags));
        }
    }

    #[inline(always)]
    fn unmask(&mut self) {
        unsafe {
            std::arch::asm!("msr daifclr, #3", options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(not(target_arch = "aarch64"))]
#[derive(Debug)]
pub enum Daif {}

#[cfg(not(target_arch = "aarch64"))]
impl Daif {
    const NAME: &'static str = "daif";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        Err("interrupt masking through DAIF is only supported on aarch64".into())
    }
}

#[cfg(not(target_arch = "aarch64"))]
impl InterruptMask for Daif {
    fn mask(&mut self) {
        match *self {}
    }

    fn unmask(&mut self) {
        match *self {}
    }
}

/// Runtime choice between the available masks.
#[derive(Debug)]
pub enum InterruptMasking {
    Unmasked(Unmasked),
    Daif(Daif),
}

impl InterruptMasking {
    pub fn by_name(name: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(match name {
            Unmasked::NAME => InterruptMasking::Unmasked(Unmasked),
            Daif::NAME => InterruptMasking::Daif(Daif::new()?),
            _ => return Err(format!("{:?} is not a valid interrupt mask", name).into()),
        })
    }

    /// `daif` when `mask_interrupts` is set, `unmasked` otherwise.
    pub fn from_flag(mask_interrupts: bool) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if mask_interrupts {
            InterruptMasking::by_name(Daif::NAME)
        } else {
            Ok(InterruptMasking::Unmasked(Unmasked))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InterruptMasking::Unmasked(_) => Unmasked::NAME,
            InterruptMasking::Daif(_) => Daif::NAME,
        }
    }
}

impl InterruptMask for InterruptMasking {
    #[inline(always)]
    fn mask(&mut self) {
        match self {
            InterruptMasking::Unmasked(m) => m.mask(),
            InterruptMasking::Daif(m) => m.mask(),
        }
    }

    #[inline(always)]
    fn unmask(&mut self) {
        match self {
            InterruptMasking::Unmasked(m) => m.unmask(),
            InterruptMasking::Daif(m) => m.unmask(),
        }
    }
}

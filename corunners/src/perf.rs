//! Cycle and event counters through the Linux `perf_event` interface.

#![cfg_attr(not(target_os = "linux"), allow(unused_imports))]

use crate::counters::{CounterPort, EventCode, EventSlot, MAX_EVENT_SLOTS};
use std::error::Error;

/// Linux implementation based on `perf_event_open` and the `ENABLE`/`DISABLE`/`RESET` ioctls.
#[cfg(target_os = "linux")]
mod hw {
    use perf_event_open_sys::{bindings::*, ioctls, perf_event_open};
    use std::error::Error;
    use std::fs;
    use std::io::Read;
    use std::mem;
    use std::os::raw::c_int;
    use std::os::unix::io::{AsRawFd, FromRawFd};

    pub(super) enum Kind {
        Cycles,
        Raw(u32),
    }

    /// One kernel-side counter, counting only the calling thread in userspace.
    pub(super) struct Event {
        file: fs::File,
    }

    impl Event {
        pub(super) fn open(kind: Kind) -> Result<Self, Box<dyn Error + Send + Sync>> {
            let (type_, config) = match kind {
                Kind::Cycles => (PERF_TYPE_HARDWARE, u64::from(PERF_COUNT_HW_CPU_CYCLES)),
                Kind::Raw(code) => (PERF_TYPE_RAW, u64::from(code)),
            };

            let mut attrs = perf_event_attr {
                size: mem::size_of::<perf_event_attr>().try_into().unwrap(),
                type_,
                config,
                ..perf_event_attr::default()
            };

            // Same thread, any CPU, userspace only. Created disabled, like the hardware
            // counters after reset.
            // NOTE: `pid = 0` means "calling thread", which is why every core opens its own.
            let pid = 0;
            let cpu = -1;
            let group_fd = -1;
            attrs.set_disabled(1);
            attrs.set_exclude_kernel(1);
            attrs.set_exclude_hv(1);

            let file = unsafe {
                let fd =
                    perf_event_open(&mut attrs, pid, cpu, group_fd, PERF_FLAG_FD_CLOEXEC.into());
                if fd < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(fs::File::from_raw_fd(fd))
                }
            };
            let file = file.map_err(|e| format!("perf_event_open failed: {:?}", e))?;

            Ok(Event { file })
        }

        #[inline]
        fn check(&self, ret: c_int, name: &str) {
            if ret < 0 {
                error!(
                    "perf ioctl {} failed: {:?}",
                    name,
                    std::io::Error::last_os_error()
                );
            }
        }

        #[inline]
        pub(super) fn enable(&self) {
            self.check(unsafe { ioctls::ENABLE(self.file.as_raw_fd(), 0) }, "ENABLE")
        }

        #[inline]
        pub(super) fn disable(&self) {
            self.check(unsafe { ioctls::DISABLE(self.file.as_raw_fd(), 0) }, "DISABLE")
        }

        #[inline]
        pub(super) fn reset(&self) {
            self.check(unsafe { ioctls::RESET(self.file.as_raw_fd(), 0) }, "RESET")
        }

        #[inline]
        pub(super) fn read(&self) -> u64 {
            let mut bytes = [0u8; 8];
            match (&self.file).read_exact(&mut bytes) {
                Ok(()) => u64::from_ne_bytes(bytes),
                Err(e) => {
                    error!("perf read failed: {:?}", e);
                    0
                }
            }
        }
    }
}

/// Per-thread cycle counter plus up to [`MAX_EVENT_SLOTS`] raw event counters.
///
/// Event codes are passed to the kernel as `PERF_TYPE_RAW` configs, so on ARMv8 the
/// [`EventCode`] constants apply directly; on other architectures use the vendor's raw codes.
///
/// Can be obtained with `Counter::by_name("perf")`.
#[cfg(target_os = "linux")]
pub struct PerfCounters {
    cycles: hw::Event,
    events: [Option<hw::Event>; MAX_EVENT_SLOTS],
}

#[cfg(target_os = "linux")]
impl PerfCounters {
    pub(crate) const NAME: &'static str = "perf";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let cycles = hw::Event::open(hw::Kind::Cycles)?;
        info!("PerfCounters::new: cycle counter opened");

        Ok(PerfCounters {
            cycles,
            events: [None, None, None, None],
        })
    }
}

#[cfg(target_os = "linux")]
impl CounterPort for PerfCounters {
    // Every perf event is enabled individually.
    fn enable_global(&mut self) {}

    #[inline]
    fn enable_cycle_counter(&mut self) {
        self.cycles.enable();
    }

    #[inline]
    fn disable_cycle_counter(&mut self) {
        self.cycles.disable();
    }

    #[inline]
    fn reset_cycle_counter(&mut self) {
        self.cycles.reset();
    }

    #[inline]
    fn read_cycle_counter(&self) -> u64 {
        self.cycles.read()
    }

    fn event_slots(&self) -> usize {
        MAX_EVENT_SLOTS
    }

    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode) {
        self.events[slot.index()] = match hw::Event::open(hw::Kind::Raw(code.0)) {
            Ok(event) => Some(event),
            Err(e) => {
                error!(
                    "PerfCounters: event {} on slot {} unavailable, it will read 0: {}",
                    code, slot, e
                );
                None
            }
        };
    }

    #[inline]
    fn enable_event_counter(&mut self, slot: EventSlot) {
        if let Some(event) = &self.events[slot.index()] {
            event.enable();
        }
    }

    #[inline]
    fn disable_event_counter(&mut self, slot: EventSlot) {
        if let Some(event) = &self.events[slot.index()] {
            event.disable();
        }
    }

    #[inline]
    fn read_event_counter(&self, slot: EventSlot) -> u32 {
        self.events[slot.index()]
            .as_ref()
            .map_or(0, |event| event.read() as u32)
    }

    #[inline]
    fn reset_event_counters(&mut self) {
        for event in self.events.iter().flatten() {
            event.reset();
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub enum PerfCounters {}

#[cfg(not(target_os = "linux"))]
impl PerfCounters {
    pub(crate) const NAME: &'static str = "perf";

    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        Err("the `perf` counter is only supported on Linux".into())
    }
}

#[cfg(not(target_os = "linux"))]
impl CounterPort for PerfCounters {
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

//! The pluggable function-driver chain and the dispatch policies for each
//! hook (first-match-wins for requests, notify-everyone for state
//! broadcasts), per §4.5.

use crate::devcore::{Core, DeviceState};
use crate::desc::InterfaceDescriptor;
use crate::hw::HwBus;
use crate::xfer::{SetupRequest, Transfer};

pub const MAX_FUNCTION_DRIVERS: usize = 8;

/// A driver's answer to a dispatched request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FnResp {
    /// Not mine — try the next driver (or fall through to ERROR/STALL).
    Continue,
    Success,
    Error,
}

/// The hooks a function driver may implement. Every hook defaults to
/// `Continue`/no-op so a driver only overrides what it cares about,
/// matching the teacher's default-method `EndpointPair` hooks.
pub trait FunctionDriver<H: HwBus> {
    fn on_sof(&self, _core: &mut Core<H>) {}
    fn on_bus_reset(&self, _core: &mut Core<H>) {}
    fn on_state_change(&self, _core: &mut Core<H>, _state: DeviceState) {}

    /// `drivers` is the full chain (including this driver); only the
    /// standard-request driver uses it, to re-broadcast `on_set_conf` when
    /// it handles SET_CONFIGURATION itself.
    fn on_ctrl_req(
        &self,
        _core: &mut Core<H>,
        _drivers: &[&'static dyn FunctionDriver<H>],
        _req: &SetupRequest,
        _xfer: &mut Transfer<H>,
    ) -> FnResp {
        FnResp::Continue
    }

    fn on_set_conf(&self, _core: &mut Core<H>, _conf: Option<&'static [u8]>) -> FnResp { FnResp::Continue }
    fn on_set_intf(&self, _core: &mut Core<H>, _base: &InterfaceDescriptor, _alt: &InterfaceDescriptor) -> FnResp { FnResp::Continue }
    fn on_get_intf(&self, _core: &mut Core<H>, _base: &InterfaceDescriptor, _alt: &mut u8) -> FnResp { FnResp::Continue }
}

/// Notify every driver of an SOF tick. No driver can stop another from
/// seeing it.
pub(crate) fn sof<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>]) {
    for d in drivers { d.on_sof(core); }
}

/// Notify every driver of a bus reset.
pub(crate) fn bus_reset<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>]) {
    for d in drivers { d.on_bus_reset(core); }
}

/// Notify every driver of a device state transition.
pub(crate) fn state_change<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>], state: DeviceState) {
    for d in drivers { d.on_state_change(core, state); }
}

/// First-match dispatch for a control request: the first driver to answer
/// `Success` or `Error` stops the chain; `Continue` from everyone falls
/// through to the caller (who STALLs).
pub(crate) fn ctrl_req<H: HwBus>(
    core: &mut Core<H>,
    drivers: &[&'static dyn FunctionDriver<H>],
    req: &SetupRequest,
    xfer: &mut Transfer<H>,
) -> FnResp {
    for d in drivers {
        match d.on_ctrl_req(core, drivers, req, xfer) {
            FnResp::Continue => continue,
            other => return other,
        }
    }
    FnResp::Continue
}

/// Notify every driver of a configuration change. Unlike the request
/// hooks, this one is "all-notified, aggregate ERROR": every driver is
/// called even after one reports `Error`, and drivers that already
/// reconfigured are *not* rolled back (§4.5, §9 — preserved, not fixed).
pub(crate) fn set_conf<H: HwBus>(
    core: &mut Core<H>,
    drivers: &[&'static dyn FunctionDriver<H>],
    conf: Option<&'static [u8]>,
) -> FnResp {
    let mut result = FnResp::Success;
    for d in drivers {
        if d.on_set_conf(core, conf) == FnResp::Error {
            result = FnResp::Error;
        }
    }
    result
}

pub(crate) fn set_intf<H: HwBus>(
    core: &mut Core<H>,
    drivers: &[&'static dyn FunctionDriver<H>],
    base: &InterfaceDescriptor,
    alt: &InterfaceDescriptor,
) -> FnResp {
    for d in drivers {
        match d.on_set_intf(core, base, alt) {
            FnResp::Continue => continue,
            other => return other,
        }
    }
    FnResp::Continue
}

pub(crate) fn get_intf<H: HwBus>(
    core: &mut Core<H>,
    drivers: &[&'static dyn FunctionDriver<H>],
    base: &InterfaceDescriptor,
    alt: &mut u8,
) -> FnResp {
    for d in drivers {
        match d.on_get_intf(core, base, alt) {
            FnResp::Continue => continue,
            other => return other,
        }
    }
    FnResp::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockBus;
    use core::cell::Cell;

    struct Counter { errors: Cell<u32>, calls: Cell<u32> }
    impl<H: HwBus> FunctionDriver<H> for Counter {
        fn on_set_conf(&self, _core: &mut Core<H>, _conf: Option<&'static [u8]>) -> FnResp {
            self.calls.set(self.calls.get() + 1);
            self.errors.set(self.errors.get() + 1);
            FnResp::Error
        }
    }
    struct Quiet;
    impl<H: HwBus> FunctionDriver<H> for Quiet {
        fn on_set_conf(&self, _core: &mut Core<H>, _conf: Option<&'static [u8]>) -> FnResp { FnResp::Success }
    }

    #[test]
    fn set_conf_notifies_every_driver_even_after_an_error() {
        static A: Counter = Counter { errors: Cell::new(0), calls: Cell::new(0) };
        static B: Quiet = Quiet;
        let desc = crate::desc::StackDescriptors { device: &[], device_qualifier: None, configurations: &[], strings: &[] };
        let desc: &'static _ = Box::leak(Box::new(desc));
        let mut core = Core::<MockBus>::new(MockBus::new(), desc, 2048);
        let drivers: [&'static dyn FunctionDriver<MockBus>; 2] = [&A, &B];
        let result = set_conf(&mut core, &drivers, None);
        assert_eq!(result, FnResp::Error);
        assert_eq!(A.calls.get(), 1, "every driver must still be notified once");
    }
}

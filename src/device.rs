//! The owned, application-held device object: wires the core, the EP0
//! engine and the function-driver chain together and exposes the public
//! surface described in §6/§9 of the original firmware's `usb.h`.

use heapless::Vec;

use crate::devcore::{Core, DeviceState};
use crate::desc::StackDescriptors;
use crate::dispatch::{self, FunctionDriver, MAX_FUNCTION_DRIVERS};
use crate::ep0;
use crate::hw::{Ar, HwBus};
use crate::stdreq::STD_REQ_DRIVER;

/// Owns the controller and all device-side USB state. There is
/// deliberately no interior mutability and no `Sync` impl: this type is
/// driven entirely from whatever thread calls `poll()`, and every function
/// driver hook call happens synchronously inside that call — there is
/// nothing else to synchronise against.
pub struct UsbDevice<H: HwBus> {
    core: Core<H>,
    drivers: Vec<&'static dyn FunctionDriver<H>, MAX_FUNCTION_DRIVERS>,
}

impl<H: HwBus> UsbDevice<H> {
    /// `init()`: install the descriptor tables, reset the controller with
    /// the pull-up disabled, and register the standard-request driver.
    /// `packet_ram_bytes` is the total shared packet RAM to divide among
    /// endpoints (EP0 always reserves [`crate::bd::EP0_RESERVED`] bytes of
    /// it). Moves the device from `Off` to `Disconnected`, per §3; call
    /// [`Self::connect`] to raise the pull-up and proceed from there.
    pub fn new(hw: H, descriptors: &'static StackDescriptors, packet_ram_bytes: usize) -> Self {
        let mut drivers = Vec::new();
        let _ = drivers.push(&STD_REQ_DRIVER as &'static dyn FunctionDriver<H>);
        let mut core = Core::new(hw, descriptors, packet_ram_bytes);
        let csr = core.hw().csr();
        core.hw_mut().set_csr(csr.with_pull_up(false).with_cel_ena(true));
        ep0::reset(&mut core);
        core.set_state(DeviceState::Disconnected);
        Self { core, drivers }
    }

    /// Register a function driver. It is inserted ahead of the
    /// standard-request driver, which always stays last so vendor/class
    /// requests get first refusal before falling back to STALL.
    ///
    /// Fails (returning the driver back) if the fixed-size driver table is
    /// full.
    pub fn register_function_driver(
        &mut self,
        drv: &'static dyn FunctionDriver<H>,
    ) -> Result<(), &'static dyn FunctionDriver<H>> {
        let idx = self.drivers.len().saturating_sub(1);
        self.drivers.insert(idx, drv).map_err(|_| drv)
    }

    /// Remove a previously registered driver, identified by reference
    /// identity. Returns `true` if it was found.
    pub fn unregister_function_driver(&mut self, drv: &'static dyn FunctionDriver<H>) -> bool {
        if let Some(pos) = self.drivers.iter().position(|d| core::ptr::eq(*d, drv)) {
            self.drivers.remove(pos);
            true
        } else {
            false
        }
    }

    /// Enable the pull-up and move to `Connected`. Does not by itself wait
    /// for a bus reset — that transition happens the next time `poll()`
    /// observes one. Touches only the pull-up bit of the CSR; CEL enable is
    /// latched once at `init()` and is not re-applied here (§8's
    /// connect/disconnect round-trip law: no other controller state moves).
    pub fn connect(&mut self) {
        let csr = self.core.hw().csr();
        self.core.hw_mut().set_csr(csr.with_pull_up(true));
        self.core.set_state(DeviceState::Connected);
    }

    /// Disable the pull-up and move to `Disconnected`.
    pub fn disconnect(&mut self) {
        let csr = self.core.hw().csr();
        self.core.hw_mut().set_csr(csr.with_pull_up(false));
        self.core.set_state(DeviceState::Disconnected);
    }

    pub fn get_state(&self) -> DeviceState { self.core.get_state() }
    pub fn is_suspended(&self) -> bool { self.core.is_suspended() }
    pub fn get_tick(&self) -> u32 { self.core.get_tick() }

    /// Give a registered function driver access to the shared core (to
    /// configure its own endpoints at startup, outside of any dispatched
    /// hook call).
    pub fn core_mut(&mut self) -> &mut Core<H> { &mut self.core }

    /// Drive one tick of the device: handle a pending bus reset, SOF, or
    /// suspend/resume edge, then advance the EP0 control-transfer state
    /// machine. Must be called from the same thread context every time —
    /// there is no locking between this and any other method.
    ///
    /// Follows §4.6 step by step, including the two early-return gates: a
    /// device that hasn't seen `connect()` yet does nothing at all, and a
    /// bus reset that is still electrically asserted is left alone until
    /// the line releases rather than torn down mid-reset.
    pub fn poll(&mut self) {
        if self.core.get_state() < DeviceState::Connected {
            return;
        }

        let csr = self.core.hw().csr();

        if csr.bus_reset_pending() {
            if csr.bus_reset() {
                // Reset condition is still on the bus; wait for release.
                return;
            }
            self.core.hw_mut().set_ar(Ar::bus_rst_clear());
            ep0::reset(&mut self.core);
            self.core.conf = None;
            for i in 0..32 { self.core.set_interface_has_alt(i, false); }
            self.core.set_suspended(false);
            let was_default = self.core.get_state() == DeviceState::Default;
            self.core.set_state(DeviceState::Default);
            dispatch::bus_reset(&mut self.core, &self.drivers);
            if !was_default {
                dispatch::state_change(&mut self.core, &self.drivers, DeviceState::Default);
            }
        }

        if self.core.get_state() < DeviceState::Default {
            return;
        }

        // Bus-reset handling above may have cleared BUS_RST_PENDING; re-read
        // so the suspend/SOF/EVT checks below see current hardware state.
        let csr = self.core.hw().csr();

        if csr.bus_suspended() {
            if !self.core.is_suspended() {
                self.core.set_suspended(true);
            }
            return;
        } else if self.core.is_suspended() {
            self.core.set_suspended(false);
            let state = self.core.get_state();
            dispatch::state_change(&mut self.core, &self.drivers, state);
        }

        if csr.sof_pending() {
            self.core.hw_mut().set_ar(Ar::sof_clear());
            self.core.tick_advance();
            dispatch::sof(&mut self.core, &self.drivers);
        }

        if csr.evt_pending() {
            let _ = self.core.hw().evt();
            // Drain every BD transition the EVT bit covers before yielding
            // back to the caller; a single hardware event can carry more
            // than one completed SETUP/DATA/STATUS step.
            while ep0::poll(&mut self.core, &self.drivers) {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::DESC_TYPE_DEVICE;
    use crate::hw::mock::MockBus;
    use crate::hw::{BdCsr, BdState, Csr, Dir};
    use crate::xfer::{SetupRequest, REQ_DIR_IN};

    fn device_desc() -> &'static [u8] {
        Box::leak(Box::new([18u8, DESC_TYPE_DEVICE, 0, 2, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]))
    }

    fn make_device() -> UsbDevice<MockBus> {
        let desc = Box::leak(Box::new(StackDescriptors {
            device: device_desc(),
            device_qualifier: None,
            configurations: &[],
            strings: &[],
        }));
        UsbDevice::new(MockBus::new(), desc, 2048)
    }

    #[test]
    fn new_disables_pull_up_and_lands_in_disconnected() {
        let dev = make_device();
        assert_eq!(dev.get_state(), DeviceState::Disconnected);
        assert!(!dev.core.hw().csr().pull_up_enabled());
    }

    #[test]
    fn poll_is_a_no_op_below_connected() {
        let mut dev = make_device();
        // Prime a bus reset pending bit; if poll() didn't gate on state it
        // would act on this even though nothing has called connect() yet.
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING));
        dev.poll();
        assert_eq!(dev.get_state(), DeviceState::Disconnected);
    }

    #[test]
    fn connect_and_disconnect_touch_only_the_pull_up_bit() {
        let mut dev = make_device();
        let before = dev.core.hw().csr().0;
        dev.connect();
        assert_eq!(dev.get_state(), DeviceState::Connected);
        assert_eq!(dev.core.hw().csr().0, before | Csr::PU_ENA);

        dev.disconnect();
        assert_eq!(dev.get_state(), DeviceState::Disconnected);
        assert_eq!(dev.core.hw().csr().0, before);
    }

    #[test]
    fn bus_reset_is_left_alone_while_still_asserted_on_the_wire() {
        let mut dev = make_device();
        dev.connect();
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING | Csr::BUS_RST));
        dev.poll();
        // BUS_RST (the live signal) is still up, so poll() must not have
        // torn anything down yet.
        assert_eq!(dev.get_state(), DeviceState::Connected);
        assert!(dev.core.hw().csr().bus_reset_pending());
    }

    #[test]
    fn bus_reset_release_advances_to_default_and_rearms_ep0() {
        let mut dev = make_device();
        dev.connect();
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING));
        dev.poll();
        assert_eq!(dev.get_state(), DeviceState::Default);
        assert!(!dev.core.hw().csr().bus_reset_pending(), "AR bus_rst_clear must have been issued");
        assert_eq!(
            dev.core.hw().bd_csr(0, Dir::Out, 1).state(),
            BdState::ReadyData,
            "ep0::reset must have re-armed the SETUP BD"
        );
    }

    #[test]
    fn sof_advances_the_tick_counter() {
        let mut dev = make_device();
        dev.connect();
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING));
        dev.poll();
        assert_eq!(dev.get_tick(), 0);

        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::SOF_PENDING));
        dev.poll();
        assert_eq!(dev.get_tick(), 1);
        assert!(!dev.core.hw().csr().sof_pending());
    }

    #[test]
    fn suspend_and_resume_round_trip_without_losing_device_state() {
        let mut dev = make_device();
        dev.connect();
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING));
        dev.poll();
        assert_eq!(dev.get_state(), DeviceState::Default);

        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_SUSPEND));
        dev.poll();
        assert!(dev.is_suspended());
        assert_eq!(dev.get_state(), DeviceState::Default, "suspend overlays, it doesn't replace, the state");

        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 & !Csr::BUS_SUSPEND));
        dev.poll();
        assert!(!dev.is_suspended());
        assert_eq!(dev.get_state(), DeviceState::Default);
    }

    #[test]
    fn full_enumeration_get_descriptor_through_poll() {
        let mut dev = make_device();
        dev.connect();

        // Bus reset: Connected -> Default, EP0 armed.
        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::BUS_RST_PENDING));
        dev.poll();
        assert_eq!(dev.get_state(), DeviceState::Default);

        // Host sends GET_DESCRIPTOR(DEVICE) as a SETUP packet.
        let req = SetupRequest { request_type: REQ_DIR_IN, request: 6, value: 0x0100, index: 0, length: 18 };
        let bytes = [
            req.request_type, req.request,
            req.value as u8, (req.value >> 8) as u8,
            req.index as u8, (req.index >> 8) as u8,
            req.length as u8, (req.length >> 8) as u8,
        ];
        let ptr = dev.core.hw().bd_ptr(0, Dir::Out, 1) as usize;
        dev.core_mut().hw_mut().data_write(ptr, &bytes);
        dev.core_mut().hw_mut().set_bd_csr(0, Dir::Out, 1, BdCsr::done_ok_setup(8));

        let csr = dev.core.hw().csr();
        dev.core_mut().hw_mut().set_csr(Csr(csr.0 | Csr::EVT_PENDING));
        dev.poll();

        let in_csr = dev.core.hw().bd_csr(0, Dir::In, 0);
        assert_eq!(in_csr.state(), BdState::ReadyData);
        assert_eq!(in_csr.len(), 18, "the 18-byte device descriptor is a short packet");

        // Host ACKs the IN packet, then sends the zero-length status OUT.
        dev.core_mut().hw_mut().set_bd_csr(0, Dir::In, 0, BdCsr::done_ok(18));
        dev.poll();
        dev.core_mut().hw_mut().set_bd_csr(0, Dir::Out, 0, BdCsr::done_ok(2));
        dev.poll();

        assert_eq!(
            dev.core.hw().bd_csr(0, Dir::Out, 1).state(),
            BdState::ReadyData,
            "SETUP BD must be re-armed once the transfer completes"
        );
    }
}

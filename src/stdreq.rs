//! The standard-request function driver: GET_STATUS, (CLEAR|SET)_FEATURE,
//! SET_ADDRESS, GET_DESCRIPTOR, GET/SET_CONFIGURATION, GET/SET_INTERFACE.
//! Registered automatically, last in the chain, by `UsbDevice::init`.
//!
//! Per-request logic is a direct translation of `usb_ctrl_std.c`.

use crate::devcore::{Core, DeviceState};
use crate::desc::{self, DESC_TYPE_CONFIGURATION, DESC_TYPE_DEVICE, DESC_TYPE_DEVICE_QUALIFIER, DESC_TYPE_STRING};
use crate::dispatch::{self, FnResp, FunctionDriver};
use crate::hw::{Dir, HwBus};
use crate::xfer::{PostStatusAction, SetupRequest, Transfer, REQ_RCPT_DEVICE, REQ_RCPT_ENDPOINT, REQ_RCPT_INTERFACE};

const GET_STATUS: u8 = 0;
const CLEAR_FEATURE: u8 = 1;
const SET_FEATURE: u8 = 3;
const SET_ADDRESS: u8 = 5;
const GET_DESCRIPTOR: u8 = 6;
const GET_CONFIGURATION: u8 = 8;
const SET_CONFIGURATION: u8 = 9;
const GET_INTERFACE: u8 = 10;
const SET_INTERFACE: u8 = 11;

const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Zero-sized: all mutable state this driver touches (active configuration,
/// per-interface alt mask, device state) lives on `Core`, not here.
pub struct StdReqDriver;

pub static STD_REQ_DRIVER: StdReqDriver = StdReqDriver;

impl<H: HwBus> FunctionDriver<H> for StdReqDriver {
    fn on_ctrl_req(
        &self,
        core: &mut Core<H>,
        drivers: &[&'static dyn FunctionDriver<H>],
        req: &SetupRequest,
        xfer: &mut Transfer<H>,
    ) -> FnResp {
        if req.req_class() != crate::xfer::REQ_TYPE_STANDARD {
            return FnResp::Continue;
        }
        match (req.request, req.recipient()) {
            (GET_STATUS, REQ_RCPT_DEVICE) => { xfer.respond(&[0, 0]); FnResp::Success }
            (GET_STATUS, REQ_RCPT_INTERFACE) => get_status_interface(core, req, xfer),
            (GET_STATUS, REQ_RCPT_ENDPOINT) => get_status_endpoint(core, req, xfer),

            (CLEAR_FEATURE, REQ_RCPT_ENDPOINT) if req.value == FEATURE_ENDPOINT_HALT => clear_feature_endpoint(core, req),
            (CLEAR_FEATURE, _) => FnResp::Success,

            (SET_FEATURE, REQ_RCPT_ENDPOINT) if req.value == FEATURE_ENDPOINT_HALT => set_feature_endpoint(core, req),
            (SET_FEATURE, _) => FnResp::Success,

            (SET_ADDRESS, REQ_RCPT_DEVICE) => set_address(core, req, xfer),

            (GET_DESCRIPTOR, REQ_RCPT_DEVICE) => get_descriptor(core, req, xfer),

            (GET_CONFIGURATION, REQ_RCPT_DEVICE) => {
                let value = core.active_configuration()
                    .map(|c| unsafe { (*(c.as_ptr() as *const desc::ConfigurationDescriptor)).b_configuration_value })
                    .unwrap_or(0);
                xfer.respond(&[value]);
                FnResp::Success
            }
            (SET_CONFIGURATION, REQ_RCPT_DEVICE) => set_configuration(core, drivers, req),

            (GET_INTERFACE, REQ_RCPT_INTERFACE) => get_interface(core, drivers, req, xfer),
            (SET_INTERFACE, REQ_RCPT_INTERFACE) => set_interface(core, drivers, req),

            _ => FnResp::Continue,
        }
    }
}

fn current_config_blob<H: HwBus>(core: &Core<H>) -> Option<&'static [u8]> { core.active_configuration() }

fn get_status_interface<H: HwBus>(core: &mut Core<H>, req: &SetupRequest, xfer: &mut Transfer<H>) -> FnResp {
    let Some(conf) = current_config_blob(core) else { return FnResp::Error };
    let alt = if core.interface_has_alt(req.index as u8) { 1 } else { 0 };
    if desc::find_interface(conf, req.index as u8, alt).is_none() { return FnResp::Error; }
    xfer.respond(&[0, 0]);
    FnResp::Success
}

fn get_status_endpoint<H: HwBus>(core: &mut Core<H>, req: &SetupRequest, xfer: &mut Transfer<H>) -> FnResp {
    let ep = req.index as u8 & 0x0f;
    let dir = if req.index & 0x80 != 0 { Dir::In } else { Dir::Out };
    if core.get_state() != DeviceState::Configured || ep == 0 || !core.ep_is_configured(ep) {
        return FnResp::Error;
    }
    let halted = core.ep_is_halted(ep, dir);
    xfer.respond(&[if halted { 1 } else { 0 }, 0]);
    FnResp::Success
}

fn clear_feature_endpoint<H: HwBus>(core: &mut Core<H>, req: &SetupRequest) -> FnResp {
    let ep = req.index as u8 & 0x0f;
    let dir = if req.index & 0x80 != 0 { Dir::In } else { Dir::Out };
    if core.get_state() != DeviceState::Configured || ep == 0 || !core.ep_is_configured(ep) {
        return FnResp::Error;
    }
    match core.ep_resume(ep, dir) {
        Ok(()) => FnResp::Success,
        Err(_) => FnResp::Error,
    }
}

fn set_feature_endpoint<H: HwBus>(core: &mut Core<H>, req: &SetupRequest) -> FnResp {
    let ep = req.index as u8 & 0x0f;
    let dir = if req.index & 0x80 != 0 { Dir::In } else { Dir::Out };
    if core.get_state() != DeviceState::Configured || ep == 0 || !core.ep_is_configured(ep) {
        return FnResp::Error;
    }
    match core.ep_halt(ep, dir) {
        Ok(()) => FnResp::Success,
        Err(_) => FnResp::Error,
    }
}

fn set_address<H: HwBus>(core: &mut Core<H>, req: &SetupRequest, xfer: &mut Transfer<H>) -> FnResp {
    if req.value > 0x7f { return FnResp::Error; }
    let new_state = if req.value == 0 { DeviceState::Default } else { DeviceState::Address };
    core.set_state(new_state);
    // The write to the hardware address register must happen only after
    // the status stage's zero-length packet has gone out acknowledged
    // under the *old* address — deferred via the transfer's completion
    // action, never applied synchronously here.
    xfer.cb_done = PostStatusAction::WriteAddress(req.value as u8);
    FnResp::Success
}

fn get_descriptor<H: HwBus>(core: &mut Core<H>, req: &SetupRequest, xfer: &mut Transfer<H>) -> FnResp {
    let ty = (req.value >> 8) as u8;
    let index = (req.value & 0xff) as u8;
    match ty {
        DESC_TYPE_DEVICE => { xfer.respond_static(core.descriptors().device); FnResp::Success }
        DESC_TYPE_DEVICE_QUALIFIER => match core.descriptors().device_qualifier {
            Some(d) => { xfer.respond_static(d); FnResp::Success }
            None => FnResp::Error,
        },
        DESC_TYPE_CONFIGURATION => match core.descriptors().configurations.get(index as usize) {
            Some(d) => { xfer.respond_static(d); FnResp::Success }
            None => FnResp::Error,
        },
        DESC_TYPE_STRING => match core.descriptors().strings.get(index as usize) {
            Some(d) => { xfer.respond_static(d); FnResp::Success }
            None => FnResp::Error,
        },
        _ => FnResp::Continue, // class/vendor-defined descriptor types
    }
}

fn set_configuration<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>], req: &SetupRequest) -> FnResp {
    let value = req.value as u8;
    let conf = if value == 0 {
        None
    } else {
        match core.find_configuration(value) {
            Some(c) => Some(c),
            None => return FnResp::Error,
        }
    };

    core.conf = conf;
    let state = if conf.is_some() { DeviceState::Configured } else { DeviceState::Address };
    core.set_state(state);
    for i in 0..32 { core.set_interface_has_alt(i, false); }

    dispatch::set_conf(core, drivers, conf)
}

fn get_interface<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>], req: &SetupRequest, xfer: &mut Transfer<H>) -> FnResp {
    let Some(conf) = current_config_blob(core) else { return FnResp::Error };
    let number = req.index as u8;
    if !core.interface_has_alt(number) {
        // Fast path: this interface has never left alt 0.
        if desc::find_interface(conf, number, 0).is_none() { return FnResp::Error; }
        xfer.respond(&[0]);
        return FnResp::Success;
    }
    let Some(base) = desc::find_interface(conf, number, 0) else { return FnResp::Error };
    let mut alt = 0u8;
    match dispatch::get_intf(core, drivers, base, &mut alt) {
        FnResp::Success => { xfer.respond(&[alt]); FnResp::Success }
        other => other,
    }
}

fn set_interface<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>], req: &SetupRequest) -> FnResp {
    let Some(conf) = current_config_blob(core) else { return FnResp::Error };
    let number = req.index as u8;
    let alt = req.value as u8;
    let Some(base) = desc::find_interface(conf, number, 0) else { return FnResp::Error };
    let Some(alt_desc) = desc::find_interface(conf, number, alt) else { return FnResp::Error };

    let result = dispatch::set_intf(core, drivers, base, alt_desc);
    if result == FnResp::Success {
        core.set_interface_has_alt(number, alt != 0);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockBus;
    use crate::xfer::REQ_DIR_IN;

    fn device_desc() -> &'static [u8] {
        Box::leak(vec![18u8, DESC_TYPE_DEVICE, 0, 2, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1].into_boxed_slice())
    }
    fn config_blob() -> &'static [u8] {
        Box::leak(vec![9u8, DESC_TYPE_CONFIGURATION, 9, 0, 1, 1, 0, 0x80, 50].into_boxed_slice())
    }

    fn make_core() -> Core<MockBus> {
        let desc = Box::leak(Box::new(crate::desc::StackDescriptors {
            device: device_desc(),
            device_qualifier: None,
            configurations: Box::leak(vec![config_blob()].into_boxed_slice()),
            strings: &[],
        }));
        Core::new(MockBus::new(), desc, 2048)
    }

    #[test]
    fn get_descriptor_device_points_at_static_bytes() {
        let mut core = make_core();
        let req = SetupRequest { request_type: REQ_DIR_IN, request: GET_DESCRIPTOR, value: (DESC_TYPE_DEVICE as u16) << 8, index: 0, length: 18 };
        let mut xfer = Transfer::for_request(&req);
        assert_eq!(get_descriptor(&mut core, &req, &mut xfer), FnResp::Success);
        assert_eq!(xfer.bytes().len(), 18);
    }

    #[test]
    fn set_configuration_unknown_value_errors() {
        let drivers: [&'static dyn FunctionDriver<MockBus>; 0] = [];
        let mut core = make_core();
        let req = SetupRequest { request_type: 0, request: SET_CONFIGURATION, value: 9, index: 0, length: 0 };
        assert_eq!(set_configuration(&mut core, &drivers, &req), FnResp::Error);
    }

    #[test]
    fn set_configuration_zero_returns_to_address_state() {
        let drivers: [&'static dyn FunctionDriver<MockBus>; 0] = [];
        let mut core = make_core();
        core.set_state(DeviceState::Configured);
        let req = SetupRequest { request_type: 0, request: SET_CONFIGURATION, value: 0, index: 0, length: 0 };
        assert_eq!(set_configuration(&mut core, &drivers, &req), FnResp::Success);
        assert_eq!(core.get_state(), DeviceState::Address);
        assert!(core.active_configuration().is_none());
    }

    #[test]
    fn set_address_defers_the_hardware_write() {
        let mut core = make_core();
        let req = SetupRequest { request_type: 0, request: SET_ADDRESS, value: 5, index: 0, length: 0 };
        let mut xfer = Transfer::for_request(&req);
        assert_eq!(set_address(&mut core, &req, &mut xfer), FnResp::Success);
        assert_eq!(core.get_state(), DeviceState::Address);
        assert_eq!(core.hw().csr().address(), 0, "address register must not change yet");
        match xfer.cb_done {
            PostStatusAction::WriteAddress(5) => {}
            _ => panic!("expected a deferred WriteAddress(5) action"),
        }
    }
}

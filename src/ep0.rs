//! The EP0 control-transfer engine: the SETUP/DATA/STATUS state machine
//! described in §4.3, built around a single dedicated BD for SETUP packets
//! and one BD apiece for the DATA/STATUS stages on each direction.
//!
//! Grounded closely on the mature dual-BD control endpoint driver in the
//! original firmware (the SETUP packet gets its own OUT buffer descriptor
//! so an arriving SETUP can never be mistaken for stray DATA_OUT bytes).

use crate::devcore::{Core, CtrlSubState};
use crate::dispatch::{self, FnResp, FunctionDriver};
use crate::hw::{BdCsr, BdState, Dir, HwBus};
use crate::xfer::{PostStatusAction, SetupRequest, Transfer, EP0_MAX_PACKET};

/// OUT half BD index carrying DATA_OUT bytes.
const OUT_DATA_BD: usize = 0;
/// OUT half BD index permanently reserved for SETUP packets.
const OUT_SETUP_BD: usize = 1;
/// IN half BD index carrying DATA_IN / STATUS bytes.
const IN_BD: usize = 0;

/// Configure EP0's status words and arm the SETUP BD. Called once at
/// device reset (and again on every subsequent bus reset).
pub(crate) fn reset<H: HwBus>(core: &mut Core<H>) {
    use crate::hw::{EpStatus, EpType};
    core.hw.set_ep_status(0, Dir::Out, EpStatus::configured(EpType::Ctrl, true));
    core.hw.set_ep_status(0, Dir::In, EpStatus::configured(EpType::Ctrl, false));
    core.hw.set_bd_ptr(0, Dir::Out, OUT_DATA_BD, 0);
    core.hw.set_bd_ptr(0, Dir::Out, OUT_SETUP_BD, 64);
    core.hw.set_bd_ptr(0, Dir::In, IN_BD, 0);
    core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::none());
    core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::none());
    arm_setup_bd(core);
    core.ctrl.state = CtrlSubState::Idle;
}

fn arm_setup_bd<H: HwBus>(core: &mut Core<H>) {
    core.hw.set_bd_csr(0, Dir::Out, OUT_SETUP_BD, BdCsr::ready_data(EP0_MAX_PACKET));
}

fn queue_in<H: HwBus>(core: &mut Core<H>, chunk: &[u8]) {
    let ptr = core.hw.bd_ptr(0, Dir::In, IN_BD) as usize;
    core.hw.data_write(ptr, chunk);
    core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::ready_data(chunk.len()));
}

fn queue_out_rearm<H: HwBus>(core: &mut Core<H>) {
    core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::ready_data(EP0_MAX_PACKET));
}

fn queue_stall_both<H: HwBus>(core: &mut Core<H>) {
    core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::ready_stall());
    core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::ready_stall());
}

fn run_post_status<H: HwBus>(core: &mut Core<H>) {
    match core.ctrl.xfer.cb_done {
        PostStatusAction::None => {}
        PostStatusAction::WriteAddress(addr) => {
            let csr = core.hw.csr();
            core.hw.set_csr(csr.with_address(addr));
        }
        PostStatusAction::Call(f) => f(core),
    }
    core.ctrl.xfer.cb_done = PostStatusAction::None;
}

/// Drive the EP0 state machine one tick. Returns `true` if a SETUP packet
/// was freshly consumed this tick (the caller may want to log it).
pub(crate) fn poll<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>]) -> bool {
    let mut acted = false;

    match core.ctrl.state {
        CtrlSubState::Idle => {}
        CtrlSubState::DataIn => {
            if core.hw.bd_csr(0, Dir::In, IN_BD).state() == BdState::DoneOk {
                acted = true;
                advance_data_in(core);
            }
        }
        CtrlSubState::DataOut => {
            if core.hw.bd_csr(0, Dir::Out, OUT_DATA_BD).state() == BdState::DoneOk {
                acted = true;
                advance_data_out(core);
            }
        }
        CtrlSubState::StatusDoneIn => {
            if core.hw.bd_csr(0, Dir::In, IN_BD).state() == BdState::DoneOk {
                acted = true;
                core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::none());
                run_post_status(core);
                core.ctrl.state = CtrlSubState::Idle;
            }
        }
        CtrlSubState::StatusDoneOut => {
            // Tidy up a lingering IN completion from the last DATA_IN chunk.
            if core.hw.bd_csr(0, Dir::In, IN_BD).state() == BdState::DoneOk {
                core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::none());
            }
            if core.hw.bd_csr(0, Dir::Out, OUT_DATA_BD).state() == BdState::DoneOk {
                acted = true;
                core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::none());
                run_post_status(core);
                core.ctrl.state = CtrlSubState::Idle;
            }
        }
        CtrlSubState::Stall => {
            // Re-assert STALL on whichever half isn't already stalled —
            // the host may retry either direction.
            if core.hw.bd_csr(0, Dir::In, IN_BD).state() != BdState::ReadyStall {
                core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::ready_stall());
            }
            if core.hw.bd_csr(0, Dir::Out, OUT_DATA_BD).state() != BdState::ReadyStall {
                core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::ready_stall());
            }
        }
    }

    if acted {
        return false;
    }

    // Retry DONE_ERR (a bad CRC / bitstuff error on either BD) by rearming.
    if core.hw.bd_csr(0, Dir::Out, OUT_SETUP_BD).state() == BdState::DoneErr {
        arm_setup_bd(core);
    }
    if core.hw.bd_csr(0, Dir::Out, OUT_DATA_BD).state() == BdState::DoneErr {
        queue_out_rearm(core);
    }

    if core.hw.bd_csr(0, Dir::Out, OUT_SETUP_BD).state() != BdState::DoneOk {
        return false;
    }

    // A fresh SETUP packet always takes priority over whatever the
    // previous control transfer was doing.
    let mut buf = [0u8; 8];
    let ptr = core.hw.bd_ptr(0, Dir::Out, OUT_SETUP_BD) as usize;
    core.hw.data_read(&mut buf, ptr, 8);
    let req = SetupRequest::from_bytes(&buf);
    crate::usb_trace!("EP0 SETUP {:#04x} req={:#04x} val={:#06x}", req.request_type, req.request, req.value);

    core.hw.set_bd_csr(0, Dir::Out, OUT_DATA_BD, BdCsr::none());
    core.hw.set_bd_csr(0, Dir::In, IN_BD, BdCsr::none());
    // The first IN packet of any transfer a SETUP kicks off must be DATA1
    // (§3 invariant); hardware toggles it thereafter.
    let in_status = core.hw.ep_status(0, Dir::In).with_data_toggle(true);
    core.hw.set_ep_status(0, Dir::In, in_status);
    core.ctrl.req = req;
    core.ctrl.xfer = Transfer::for_request(&req);

    handle_control_request(core, drivers, &req);

    // Release the control-endpoint lockout so the hardware accepts the
    // next SETUP/DATA transaction, then rearm the SETUP BD.
    core.hw.set_ar(crate::hw::Ar::cel_release());
    arm_setup_bd(core);
    true
}

fn handle_control_request<H: HwBus>(core: &mut Core<H>, drivers: &[&'static dyn FunctionDriver<H>], req: &SetupRequest) {
    let mut xfer = core::mem::replace(&mut core.ctrl.xfer, Transfer::for_request(req));
    let result = dispatch::ctrl_req(core, drivers, req, &mut xfer);
    core.ctrl.xfer = xfer;

    match result {
        FnResp::Success if req.is_read() => start_data_in(core),
        FnResp::Success if req.length == 0 => {
            // No-data write (e.g. SET_ADDRESS): nothing to wait for on the
            // OUT side, go straight to the status IN ZLP.
            queue_in(core, &[]);
            core.ctrl.state = CtrlSubState::StatusDoneIn;
        }
        FnResp::Success => start_data_out(core),
        _ => {
            core.ctrl.state = CtrlSubState::Stall;
            queue_stall_both(core);
        }
    }
}

fn start_data_in<H: HwBus>(core: &mut Core<H>) {
    core.ctrl.state = CtrlSubState::DataIn;
    advance_data_in(core);
}

fn advance_data_in<H: HwBus>(core: &mut Core<H>) {
    let remaining = core.ctrl.xfer.len.saturating_sub(core.ctrl.xfer.ofs);
    let chunk_len = remaining.min(EP0_MAX_PACKET);
    let ofs = core.ctrl.xfer.ofs;
    let bytes_len = core.ctrl.xfer.bytes().len();
    let start = ofs.min(bytes_len);
    let end = (ofs + chunk_len).min(bytes_len);
    let mut scratch = [0u8; EP0_MAX_PACKET];
    scratch[..end - start].copy_from_slice(&core.ctrl.xfer.bytes()[start..end]);
    core.ctrl.xfer.ofs += chunk_len;

    queue_in(core, &scratch[..end - start]);

    if chunk_len < EP0_MAX_PACKET {
        // Short (or zero-length) packet: that was the last chunk. Arm the
        // OUT half for the host's zero-length status ACK.
        queue_out_rearm(core);
        core.ctrl.state = CtrlSubState::StatusDoneOut;
    }
}

fn start_data_out<H: HwBus>(core: &mut Core<H>) {
    core.ctrl.state = CtrlSubState::DataOut;
    queue_out_rearm(core);
}

fn advance_data_out<H: HwBus>(core: &mut Core<H>) {
    let csr = core.hw.bd_csr(0, Dir::Out, OUT_DATA_BD);
    // BD length on a completed OUT transaction includes a 2-byte CRC
    // trailer that isn't part of the payload.
    let received = csr.len().saturating_sub(2).min(EP0_MAX_PACKET);
    let ptr = core.hw.bd_ptr(0, Dir::Out, OUT_DATA_BD) as usize;

    core.hw.data_read(&mut core.ctrl.xfer.scratch[..received], ptr, received);
    core.ctrl.xfer.ofs += received;

    if let Some(hook) = core.ctrl.xfer.cb_data {
        let mut xfer = core::mem::replace(&mut core.ctrl.xfer, Transfer::for_request(&core.ctrl.req));
        let ok = hook(core, &mut xfer);
        core.ctrl.xfer = xfer;
        if !ok {
            core.ctrl.state = CtrlSubState::Stall;
            queue_stall_both(core);
            return;
        }
    }

    let done = received < EP0_MAX_PACKET || core.ctrl.xfer.ofs >= core.ctrl.xfer.len;
    if done {
        queue_in(core, &[]); // zero-length status ACK
        core.ctrl.state = CtrlSubState::StatusDoneIn;
    } else {
        queue_out_rearm(core);
    }
}

//! The device state machine and the per-function-driver surface
//! (`Core<H>`) that every hook call is handed.

use crate::bd::{self, BdError, PacketRamAllocator};
use crate::desc::{self, StackDescriptors};
use crate::hw::{Dir, EpType, HwBus};
use crate::xfer::{SetupRequest, Transfer};

/// Overall device state, per §3. `suspended` is tracked separately since it
/// can overlay any of `Default`/`Address`/`Configured`.
///
/// Declaration order doubles as the state ordering the poller's "if state <
/// X, return" guards rely on (`Off < Disconnected < Connected < Default <
/// Address < Configured`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum DeviceState {
    Off,
    Disconnected,
    Connected,
    Default,
    Address,
    Configured,
}

/// The EP0 control-transfer sub-state, per §4.3.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CtrlSubState {
    Idle,
    DataIn,
    DataOut,
    StatusDoneOut,
    StatusDoneIn,
    Stall,
}

pub(crate) struct CtrlState<H: HwBus> {
    pub state: CtrlSubState,
    pub req: SetupRequest,
    pub xfer: Transfer<H>,
}

/// Owns the controller, the device-level state, and the packet-RAM
/// allocator. Passed to every `FunctionDriver` hook as `&mut Core<H>` so
/// drivers can configure their own endpoints and query device state
/// without owning any of it themselves.
pub struct Core<H: HwBus> {
    pub(crate) hw: H,
    state: DeviceState,
    suspended: bool,
    tick: u32,
    pub(crate) desc: &'static StackDescriptors,
    pub(crate) conf: Option<&'static [u8]>,
    pub(crate) intf_alt: u32,
    pub(crate) alloc: PacketRamAllocator,
    pub(crate) ctrl: CtrlState<H>,
}

impl<H: HwBus> Core<H> {
    pub(crate) fn new(hw: H, desc: &'static StackDescriptors, packet_ram_bytes: usize) -> Self {
        Self {
            hw,
            state: DeviceState::Off,
            suspended: false,
            tick: 0,
            desc,
            conf: None,
            intf_alt: 0,
            alloc: PacketRamAllocator::new(packet_ram_bytes),
            ctrl: CtrlState {
                state: CtrlSubState::Idle,
                req: SetupRequest { request_type: 0, request: 0, value: 0, index: 0, length: 0 },
                xfer: Transfer::for_request(&SetupRequest {
                    request_type: 0, request: 0, value: 0, index: 0, length: 0,
                }),
            },
        }
    }

    pub fn get_state(&self) -> DeviceState { self.state }
    pub fn is_suspended(&self) -> bool { self.suspended }
    pub fn get_tick(&self) -> u32 { self.tick }
    pub(crate) fn tick_advance(&mut self) { self.tick = self.tick.wrapping_add(1); }
    pub(crate) fn set_suspended(&mut self, v: bool) { self.suspended = v; }

    /// Force the device state directly. Function drivers use this from
    /// their SET_CONFIGURATION/SET_ADDRESS handling; it does not itself
    /// notify anyone (the dispatch core does that).
    pub fn set_state(&mut self, state: DeviceState) { self.state = state; }

    pub fn active_configuration(&self) -> Option<&'static [u8]> { self.conf }

    pub fn interface_has_alt(&self, interface: u8) -> bool {
        self.intf_alt & (1 << (interface & 31)) != 0
    }
    pub(crate) fn set_interface_has_alt(&mut self, interface: u8, has_alt: bool) {
        let bit = 1 << (interface & 31);
        if has_alt { self.intf_alt |= bit; } else { self.intf_alt &= !bit; }
    }

    pub fn descriptors(&self) -> &'static StackDescriptors { self.desc }

    pub fn find_configuration(&self, value: u8) -> Option<&'static [u8]> {
        desc::desc_find_conf(self.desc, value)
    }

    // --- endpoint / BD operations, forwarded to bd.rs ---

    pub fn ep_boot(&mut self, ep: u8, dir: Dir, ty: EpType, max_packet: usize, dual_bd: bool) -> Result<(), BdError> {
        bd::ep_boot(&mut self.hw, &mut self.alloc, ep, dir, ty, max_packet, dual_bd)
    }
    pub fn ep_reconf(&mut self, ep: u8, dir: Dir) { bd::ep_reconf(&mut self.hw, ep, dir) }
    pub fn ep_is_configured(&self, ep: u8) -> bool { bd::ep_is_configured(&self.hw, ep) }
    pub fn ep_is_halted(&self, ep: u8, dir: Dir) -> bool { bd::ep_is_halted(&self.hw, ep, dir) }
    pub fn ep_halt(&mut self, ep: u8, dir: Dir) -> Result<(), BdError> { bd::ep_halt(&mut self.hw, ep, dir) }
    pub fn ep_resume(&mut self, ep: u8, dir: Dir) -> Result<(), BdError> { bd::ep_resume(&mut self.hw, ep, dir) }

    pub fn data_write(&mut self, dst_offset: usize, src: &[u8]) { self.hw.data_write(dst_offset, src) }
    pub fn data_read(&self, dst: &mut [u8], src_offset: usize, len: usize) { self.hw.data_read(dst, src_offset, len) }

    pub fn hw(&self) -> &H { &self.hw }
    pub fn hw_mut(&mut self) -> &mut H { &mut self.hw }
}

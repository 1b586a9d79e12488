//! Buffer-descriptor scheduling: endpoint configuration, packet-RAM
//! allocation, and the halt/resume bookkeeping function drivers use to
//! implement CLEAR_FEATURE/SET_FEATURE(ENDPOINT_HALT).

use crate::hw::{BdCsr, Dir, EpStatus, EpType, HwBus};

/// Returned when an operation requires an endpoint to be BULK, INTERRUPT or
/// CONTROL ("BCI") typed, or configured, and it isn't.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BdError {
    NotBci,
    NotConfigured,
}

/// Packet RAM is shared flat storage; endpoints other than EP0 claim a
/// region out of it once, at `ep_boot` time, and keep it for the life of
/// the configuration. EP0 itself reserves the first `EP0_RESERVED` bytes.
pub const EP0_RESERVED: usize = 128; // two 64-byte halves, IN and OUT

pub(crate) struct PacketRamAllocator {
    next: usize,
    capacity: usize,
}

impl PacketRamAllocator {
    pub fn new(capacity: usize) -> Self {
        Self { next: EP0_RESERVED, capacity }
    }
    pub fn alloc(&mut self, bytes: usize) -> Option<u16> {
        let aligned = (bytes + 3) & !3;
        let offset = self.next;
        if offset + aligned > self.capacity { return None; }
        self.next += aligned;
        Some(offset as u16)
    }
}

/// Allocate packet RAM and program the status/BD registers for endpoint
/// `ep`'s `dir` half. `dual_bd` selects ping-pong buffering (two BDs backed
/// by two separate packet-RAM regions) over a single BD reused every
/// transaction.
pub(crate) fn ep_boot<H: HwBus>(
    hw: &mut H,
    alloc: &mut PacketRamAllocator,
    ep: u8,
    dir: Dir,
    ty: EpType,
    max_packet: usize,
    dual_bd: bool,
) -> Result<(), BdError> {
    let status = EpStatus::configured(ty, dual_bd);
    hw.set_ep_status(ep, dir, status);

    let ptr0 = alloc.alloc(max_packet).ok_or(BdError::NotConfigured)?;
    hw.set_bd_ptr(ep, dir, 0, ptr0);
    hw.set_bd_csr(ep, dir, 0, BdCsr::none());

    if dual_bd {
        let ptr1 = alloc.alloc(max_packet).ok_or(BdError::NotConfigured)?;
        hw.set_bd_ptr(ep, dir, 1, ptr1);
        hw.set_bd_csr(ep, dir, 1, BdCsr::none());
    }
    Ok(())
}

/// Reset an already-booted endpoint's software-visible state (data toggle,
/// BD ownership) without reallocating packet RAM — used when an alternate
/// setting is re-selected.
pub(crate) fn ep_reconf<H: HwBus>(hw: &mut H, ep: u8, dir: Dir) {
    let status = hw.ep_status(ep, dir).with_data_toggle(false).with_bd_index(0);
    hw.set_ep_status(ep, dir, status);
    hw.set_bd_csr(ep, dir, 0, BdCsr::none());
    hw.set_bd_csr(ep, dir, 1, BdCsr::none());
}

pub fn ep_is_configured<H: HwBus>(hw: &H, ep: u8) -> bool {
    hw.ep_status(ep, Dir::Out).ep_type() != EpType::None
        || hw.ep_status(ep, Dir::In).ep_type() != EpType::None
}

pub fn ep_is_halted<H: HwBus>(hw: &H, ep: u8, dir: Dir) -> bool {
    hw.ep_status(ep, dir).halted()
}

/// Halt endpoint `ep`'s `dir` half: any queued BD is forced to
/// `READY_STALL` and the halted flag is latched so future transactions
/// stall until `ep_resume` runs. Only defined for BCI endpoints.
pub fn ep_halt<H: HwBus>(hw: &mut H, ep: u8, dir: Dir) -> Result<(), BdError> {
    let status = hw.ep_status(ep, dir);
    if !status.ep_type().is_bci() { return Err(BdError::NotBci); }
    hw.set_ep_status(ep, dir, status.with_halted(true));
    hw.set_bd_csr(ep, dir, 0, BdCsr::ready_stall());
    if status.dual_bd() {
        hw.set_bd_csr(ep, dir, 1, BdCsr::ready_stall());
    }
    Ok(())
}

/// Clear a halt, reset the data toggle to DATA0, and return both BDs to
/// `NONE` so the owning driver must requeue fresh transfers.
pub fn ep_resume<H: HwBus>(hw: &mut H, ep: u8, dir: Dir) -> Result<(), BdError> {
    let status = hw.ep_status(ep, dir);
    if !status.ep_type().is_bci() { return Err(BdError::NotBci); }
    hw.set_ep_status(ep, dir, status.with_halted(false).with_data_toggle(false).with_bd_index(0));
    hw.set_bd_csr(ep, dir, 0, BdCsr::none());
    hw.set_bd_csr(ep, dir, 1, BdCsr::none());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockBus;

    #[test]
    fn halt_then_resume_round_trips_to_not_halted() {
        let mut hw = MockBus::new();
        ep_boot(&mut hw, &mut PacketRamAllocator::new(2048), 1, Dir::In, EpType::Bulk, 64, false).unwrap();
        assert!(!ep_is_halted(&hw, 1, Dir::In));
        ep_halt(&mut hw, 1, Dir::In).unwrap();
        assert!(ep_is_halted(&hw, 1, Dir::In));
        assert_eq!(hw.bd_csr(1, Dir::In, 0).state(), crate::hw::BdState::ReadyStall);
        ep_resume(&mut hw, 1, Dir::In).unwrap();
        assert!(!ep_is_halted(&hw, 1, Dir::In));
        assert_eq!(hw.bd_csr(1, Dir::In, 0).state(), crate::hw::BdState::None);
    }

    #[test]
    fn halt_rejected_on_isochronous_endpoint() {
        let mut hw = MockBus::new();
        ep_boot(&mut hw, &mut PacketRamAllocator::new(2048), 2, Dir::In, EpType::Isoc, 64, false).unwrap();
        assert_eq!(ep_halt(&mut hw, 2, Dir::In), Err(BdError::NotBci));
    }

    #[test]
    fn allocator_refuses_to_overrun_capacity() {
        let mut alloc = PacketRamAllocator::new(EP0_RESERVED + 64);
        assert!(alloc.alloc(64).is_some());
        assert!(alloc.alloc(64).is_none());
    }

    #[test]
    fn ep_is_configured_false_until_booted() {
        let mut hw = MockBus::new();
        assert!(!ep_is_configured(&hw, 3));
        ep_boot(&mut hw, &mut PacketRamAllocator::new(2048), 3, Dir::Out, EpType::Int, 8, false).unwrap();
        assert!(ep_is_configured(&hw, 3));
    }
}

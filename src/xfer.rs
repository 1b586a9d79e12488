//! The SETUP packet view and the in-flight control transfer object handed
//! to function drivers.

use crate::devcore::Core;
use crate::hw::HwBus;

pub const EP0_MAX_PACKET: usize = 64;

pub const REQ_DIR_IN: u8 = 0x80;
pub const REQ_TYPE_MASK: u8 = 0x60;
pub const REQ_TYPE_STANDARD: u8 = 0x00;
pub const REQ_TYPE_CLASS: u8 = 0x20;
pub const REQ_TYPE_VENDOR: u8 = 0x40;
pub const REQ_RCPT_MASK: u8 = 0x1f;
pub const REQ_RCPT_DEVICE: u8 = 0;
pub const REQ_RCPT_INTERFACE: u8 = 1;
pub const REQ_RCPT_ENDPOINT: u8 = 2;

/// The 8-byte SETUP packet, decoded.
#[derive(Clone, Copy, Debug)]
pub struct SetupRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupRequest {
    pub fn from_bytes(b: &[u8; 8]) -> Self {
        Self {
            request_type: b[0],
            request: b[1],
            value: u16::from_le_bytes([b[2], b[3]]),
            index: u16::from_le_bytes([b[4], b[5]]),
            length: u16::from_le_bytes([b[6], b[7]]),
        }
    }
    pub fn is_read(&self) -> bool { self.request_type & REQ_DIR_IN != 0 }
    pub fn is_write(&self) -> bool { !self.is_read() }
    pub fn recipient(&self) -> u8 { self.request_type & REQ_RCPT_MASK }
    pub fn req_class(&self) -> u8 { self.request_type & REQ_TYPE_MASK }
}

/// Where the bytes for an IN data stage come from.
#[derive(Clone, Copy)]
pub enum TxSource {
    /// Use the first `usize` bytes of the transfer's own scratch buffer.
    Scratch(usize),
    /// Point directly at an already-serialised, `'static` byte slice (a
    /// descriptor table entry) — avoids a copy for anything bigger than
    /// the scratch buffer.
    Static(&'static [u8]),
}

/// A side effect to run once the status stage of a control transfer has
/// completed successfully. `WriteAddress` covers SET_ADDRESS, whose write
/// to the hardware address register must be deferred until after the
/// zero-length status packet has gone out with the *old* address (§4.4).
/// `Call` is a plain, no-std, no-capture function pointer escape hatch for
/// any other function driver that needs a post-status-stage action.
pub enum PostStatusAction<H: HwBus> {
    None,
    WriteAddress(u8),
    Call(fn(&mut Core<H>)),
}

impl<H: HwBus> Default for PostStatusAction<H> {
    fn default() -> Self { PostStatusAction::None }
}

/// A chunk-arrival hook for an OUT data stage — called once per packet
/// written into the transfer's scratch buffer, before `ofs` advances.
/// Returning `false` aborts the transfer (STALL).
pub type DataChunkHook<H> = fn(&mut Core<H>, &mut Transfer<H>) -> bool;

/// The in-flight control transfer: how many bytes remain, where the IN
/// bytes come from, and what to do once it completes.
pub struct Transfer<H: HwBus> {
    pub scratch: [u8; EP0_MAX_PACKET],
    pub source: TxSource,
    pub len: usize,
    pub ofs: usize,
    pub cb_data: Option<DataChunkHook<H>>,
    pub cb_done: PostStatusAction<H>,
}

impl<H: HwBus> Transfer<H> {
    pub fn for_request(req: &SetupRequest) -> Self {
        Self {
            scratch: [0; EP0_MAX_PACKET],
            source: TxSource::Scratch(0),
            len: req.length as usize,
            ofs: 0,
            cb_data: None,
            cb_done: PostStatusAction::None,
        }
    }

    /// Copy `bytes` (truncated to the scratch capacity) in as the IN
    /// response and set `len` to match.
    pub fn respond(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(EP0_MAX_PACKET);
        self.scratch[..n].copy_from_slice(&bytes[..n]);
        self.source = TxSource::Scratch(n);
        self.len = n;
    }

    /// Point the IN response directly at a static descriptor blob, clamped
    /// to the host's requested `wLength`.
    pub fn respond_static(&mut self, bytes: &'static [u8]) {
        self.len = bytes.len().min(self.len);
        self.source = TxSource::Static(bytes);
    }

    /// The bytes available for the current IN chunk, regardless of source.
    pub fn bytes(&self) -> &[u8] {
        match self.source {
            TxSource::Scratch(n) => &self.scratch[..n],
            TxSource::Static(s) => s,
        }
    }
}

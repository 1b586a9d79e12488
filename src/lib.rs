//! Device-side USB 2.0 Full-Speed control-transfer stack for a generic
//! memory-mapped BD-style controller: the EP0 SETUP/DATA/STATUS state
//! machine, the buffer-descriptor scheduler, the device state machine, and
//! the standard-request driver every class driver sits behind.
//!
//! The crate owns no interrupt vector and no executor. An application
//! supplies a [`hw::HwBus`] bound to its own memory map, builds a
//! [`device::UsbDevice`] over it, and calls [`device::UsbDevice::poll`]
//! from its own main loop.
#![cfg_attr(not(test), no_std)]
#![deny(warnings)]
#![allow(incomplete_features)]
#![feature(const_default)]
#![feature(const_trait_impl)]
#![feature(derive_const)]

pub mod bd;
pub mod databuf;
pub mod desc;
pub mod device;
pub mod devcore;
pub mod dispatch;
pub mod ep0;
#[macro_use]
pub mod log;
pub mod hw;
pub mod stdreq;
pub mod vcell;
pub mod xfer;

pub use devcore::{Core, DeviceState};
pub use desc::StackDescriptors;
pub use device::UsbDevice;
pub use dispatch::{FnResp, FunctionDriver};
pub use hw::{Dir, HwBus};
pub use xfer::{SetupRequest, Transfer};

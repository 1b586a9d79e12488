//! Injectable trace sink, in the same spirit as the teacher's
//! `set_debug_handler`/`dbgln!` pair — except this crate has no UART of
//! its own to drive (out of scope), so the hook is the entire mechanism:
//! the application wires it to whatever console it owns, or leaves it
//! `None` and pays nothing.

use core::fmt::Arguments;

use crate::vcell::UCell;

const ENABLED: bool = cfg!(feature = "internal_debug");

static SINK: UCell<Option<fn(Arguments)>> = UCell::new(None);

/// Install (or clear) the sink used by [`usb_dbg!`]/[`usb_trace!`].
///
/// # Safety
/// Must not be called concurrently with any in-flight `poll()` call —
/// install it once, before the device starts polling.
#[inline]
pub unsafe fn set_trace_sink(f: Option<fn(Arguments)>) {
    if ENABLED {
        *unsafe { SINK.as_mut() } = f;
    }
}

#[doc(hidden)]
pub fn trace_fmt(fmt: Arguments) {
    if ENABLED {
        if let Some(f) = *SINK.as_ref() {
            f(fmt);
        }
    }
}

/// Emit a trace line. With the `defmt` feature enabled this goes straight
/// to `defmt::trace!`, bypassing the sink entirely (defmt's own global
/// logger decides what happens to it). Otherwise it compiles to nothing —
/// not even the `format_args!` — unless `internal_debug` is also on, in
/// which case it goes through the registered [`set_trace_sink`] handler.
#[macro_export]
macro_rules! usb_trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "defmt") {
            #[cfg(feature = "defmt")]
            defmt::trace!($($tt)*);
        } else if cfg!(feature = "internal_debug") {
            $crate::log::trace_fmt(format_args!($($tt)*));
        }
    };
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for in-kernel debugging.
//!
//! The `debug!` macro prints a formatted line through whatever sink the board
//! registered at startup. When no sink is registered (for example in host-side
//! unit tests) the macro is a no-op, so capsules can sprinkle diagnostics
//! without caring where they end up.
//!
//! ```ignore
//! debug!("nothing to report");
//! debug!("got a frame from {:?}", addr);
//! ```

use core::fmt::{write, Arguments, Write};

/// Where `debug!` output goes. Implemented by a board's console glue.
pub trait DebugSink {
    fn write_str(&self, s: &str);
}

static mut DEBUG_SINK: Option<&'static (dyn DebugSink + 'static)> = None;

/// Register the sink `debug!` writes to.
///
/// # Safety
///
/// Must be called once during board setup, before any other code runs. The
/// kernel is single threaded, so after setup completes the static is only
/// ever read.
pub unsafe fn set_debug_sink(sink: &'static dyn DebugSink) {
    DEBUG_SINK = Some(sink);
}

struct SinkWriter<'a> {
    sink: &'a dyn DebugSink,
}

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.sink.write_str(s);
        Ok(())
    }
}

/// Internal helper for the `debug!` macro. Do not call directly.
pub fn begin_debug_fmt(args: Arguments) {
    // By-value read; the static is written once during setup and never again.
    let sink = unsafe { DEBUG_SINK };
    if let Some(sink) = sink {
        let mut writer = SinkWriter { sink };
        let _ = write(&mut writer, args);
        let _ = writer.write_str("\r\n");
    }
}

/// In-kernel `println()` debugging.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        debug!("{}:{}", file!(), line!())
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::begin_debug_fmt(format_args!($msg))
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::begin_debug_fmt(format_args!($fmt, $($arg)+))
    });
}

//! Two-phase kernel logging.
//!
//! **Phase 1 — early serial (pre-heap).** [`init_early_serial`] points the
//! global print/log function pointers at a lock-free path that talks
//! directly to COM1 with no allocation, usable from the first instruction
//! after BSS is zeroed.
//!
//! **Phase 2 — full logger (post-heap).** [`init_logger`] builds a
//! [`Logger`] with a `Vec<Box<dyn LogSink>>` behind a
//! [`vireo_core::sync::SpinLock`] and repoints the same function pointers
//! at it. Additional sinks register through [`add_sink`].
//!
//! Grounded on `hadron-kernel/src/log.rs` (the `LogSink` split and the
//! early-vs-full transition) and `hadron-core/src/log.rs` (the
//! `AtomicPtr`-based function-pointer swap and the leveled macro
//! family), with levels and names taken from this workspace's own
//! [`vireo_core::config::LogLevel`] rather than a separate core crate.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicPtr, Ordering};

use uart_16550::SerialPort;
use vireo_core::config::LogLevel;
use vireo_core::sync::SpinLock;

/// COM1 base I/O port.
pub const COM1: u16 = 0x3F8;

/// A dyn-compatible output sink for the kernel logger.
///
/// `&self`, not `&mut self`: [`SerialPort::send`] needs `&mut self` in the
/// crates.io API, so sinks that need mutation (this one included) hide it
/// behind their own interior lock rather than forcing `Logger`'s sink list
/// to be mutable end to end.
pub trait LogSink: Send + Sync {
    /// Writes a string fragment to this sink.
    fn write_str(&self, s: &str);
    /// Maximum level this sink accepts (messages with `level <= max_level`
    /// are written).
    fn max_level(&self) -> LogLevel;
    /// Human-readable name, used by [`replace_sink_by_name`].
    fn name(&self) -> &str;
}

/// A [`LogSink`] that writes to a 16550 UART.
pub struct SerialSink {
    port: SpinLock<SerialPort>,
    max_level: LogLevel,
}

impl SerialSink {
    /// Creates a sink over an already-[`SerialPort::init`]ialized port.
    #[must_use]
    pub fn new(port: SerialPort, max_level: LogLevel) -> Self {
        Self {
            port: SpinLock::new(port),
            max_level,
        }
    }
}

impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        let mut guard = self.port.lock();
        for byte in s.bytes() {
            if byte == b'\n' {
                guard.send(b'\r');
            }
            guard.send(byte);
        }
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "serial"
    }
}

/// A headless sink that discards everything. Used by host tests, and as the
/// sink [`Logger`] holds before [`init_logger`] runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write_str(&self, _s: &str) {}

    fn max_level(&self) -> LogLevel {
        LogLevel::Error
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// The signature of the global raw-print function.
pub type PrintFn = fn(fmt::Arguments<'_>);

fn null_print(_args: fmt::Arguments<'_>) {}

static PRINT_FN: AtomicPtr<()> = AtomicPtr::new(null_print as *mut ());

/// Registers the global raw-print function.
///
/// # Safety
/// `f` must be callable from any context, including an interrupt handler.
/// May be called more than once; callers must use `Release` ordering
/// semantics by going through this function rather than writing the atomic
/// directly.
pub unsafe fn set_print_fn(f: PrintFn) {
    PRINT_FN.store(f as *mut (), Ordering::Release);
}

fn load_print_fn() -> PrintFn {
    let ptr = PRINT_FN.load(Ordering::Acquire);
    // SAFETY: only `set_print_fn` ever stores into `PRINT_FN`, and only with
    // valid `PrintFn` pointers.
    unsafe { core::mem::transmute::<*mut (), PrintFn>(ptr) }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    load_print_fn()(args);
}

/// The signature of the global leveled-log function.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Registers the global leveled-log function.
///
/// # Safety
/// Same contract as [`set_print_fn`].
pub unsafe fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: only `set_log_fn` ever stores into `LOG_FN`, and only with
    // valid `LogFn` pointers.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    load_log_fn()(level, args);
}

/// Raw output, no level, no timestamp. Reaches whatever `print_fn` is
/// currently installed.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => { $crate::log::_print(format_args!($($arg)*)) };
}

/// Like [`kprint!`] with a trailing newline.
#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => { $crate::kprint!("{}\n", format_args!($($arg)*)) };
}

/// Logs at an explicit level.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $level <= ::vireo_core::config::MAX_LOG_LEVEL {
            $crate::log::_log($level, format_args!($($arg)*))
        }
    };
}

/// Logs at [`LogLevel::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!(::vireo_core::config::LogLevel::Error, $($arg)*) };
}

/// Logs at [`LogLevel::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!(::vireo_core::config::LogLevel::Warn, $($arg)*) };
}

/// Logs at [`LogLevel::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!(::vireo_core::config::LogLevel::Info, $($arg)*) };
}

/// Logs at [`LogLevel::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!(::vireo_core::config::LogLevel::Debug, $($arg)*) };
}

/// Logs at [`LogLevel::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!(::vireo_core::config::LogLevel::Trace, $($arg)*) };
}

/// Prints an unrecoverable boot-time failure via [`panic_serial`]-style
/// direct serial output, then halts. Use only for fatal allocation
/// failures (PMM bookkeeping, the initial heap region, the idle thread's
/// stack) — a reachable recoverable path must return
/// [`vireo_core::error::KError::NoMem`] instead.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)*) => {{
        $crate::log::panic_serial_fmt(format_args!($($arg)*));
        #[cfg(not(test))]
        loop { $crate::arch::hlt(); }
        #[cfg(test)]
        panic!($($arg)*);
    }};
}

struct SerialWriter(SerialPort);

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.send(b'\r');
            }
            self.0.send(byte);
        }
        Ok(())
    }
}

fn new_raw_serial() -> SerialPort {
    // SAFETY: COM1 is a fixed, always-present port on the targets this
    // kernel boots on; constructing a second handle to it is safe because
    // `SerialPort` itself holds no state beyond the port number until
    // `init` is called.
    unsafe { SerialPort::new(COM1) }
}

fn early_serial_print(args: fmt::Arguments<'_>) {
    let mut w = SerialWriter(new_raw_serial());
    let _ = w.write_fmt(args);
}

fn early_serial_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let mut w = SerialWriter(new_raw_serial());
    let _ = write!(w, "[early] {} {args}\n", level.name());
}

/// Installs the lock-free, pre-heap print/log functions. Call once, after
/// the UART has been brought up, before any [`kprint!`]/[`log!`] use.
pub fn init_early_serial() {
    let mut port = new_raw_serial();
    port.init();
    // SAFETY: both functions are callable from any context; they construct
    // a fresh `SerialPort` on the stack rather than touching shared state.
    unsafe {
        set_print_fn(early_serial_print);
        set_log_fn(early_serial_log);
    }
}

struct LoggerInner {
    sinks: Vec<Box<dyn LogSink>>,
}

/// The full, post-heap logger: a fan-out list of [`LogSink`]s behind a
/// spin lock.
pub struct Logger {
    inner: SpinLock<Option<LoggerInner>>,
}

impl Logger {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    fn init_with_serial(&self) {
        {
            let mut guard = self.inner.lock();
            let mut port = new_raw_serial();
            port.init();
            let mut sinks: Vec<Box<dyn LogSink>> = Vec::with_capacity(2);
            sinks.push(Box::new(SerialSink::new(port, LogLevel::Trace)));
            *guard = Some(LoggerInner { sinks });
        }
        // SAFETY: logger_print/logger_log are callable from any context.
        unsafe {
            set_print_fn(logger_print);
            set_log_fn(logger_log);
        }
    }

    fn add_sink(&self, sink: Box<dyn LogSink>) {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.as_mut() {
            inner.sinks.push(sink);
        }
    }

    fn replace_sink_by_name(&self, name: &str, new_sink: Box<dyn LogSink>) -> bool {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.as_mut() {
            for sink in &mut inner.sinks {
                if sink.name() == name {
                    *sink = new_sink;
                    return true;
                }
            }
        }
        false
    }

    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                let mut w = SinkWriter(sink.as_ref());
                let _ = fmt::Write::write_fmt(&mut w, args);
            }
        }
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                if level <= sink.max_level() {
                    let mut w = SinkWriter(sink.as_ref());
                    let _ = write!(w, "{} {args}\n", level.name());
                }
            }
        }
    }
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

static LOGGER: Logger = Logger::new();

fn logger_print(args: fmt::Arguments<'_>) {
    LOGGER.write_fmt(args);
}

fn logger_log(level: LogLevel, args: fmt::Arguments<'_>) {
    LOGGER.log(level, args);
}

/// Builds the post-heap logger with a serial sink pre-registered, then
/// replaces the early-serial functions. Call once, after the heap is up.
pub fn init_logger() {
    LOGGER.init_with_serial();
}

/// Registers an additional sink with the global logger.
pub fn add_sink(sink: Box<dyn LogSink>) {
    LOGGER.add_sink(sink);
}

/// Replaces the sink named `name`. Returns `false` if no sink has that name.
pub fn replace_sink_by_name(name: &str, new_sink: Box<dyn LogSink>) -> bool {
    LOGGER.replace_sink_by_name(name, new_sink)
}

/// Writes directly to COM1, bypassing the [`Logger`] lock entirely — used
/// by the panic handler, since the logger itself may be what is broken.
pub fn panic_serial(info: &core::panic::PanicInfo) {
    let mut w = SerialWriter(new_raw_serial());
    let _ = write!(w, "\n!!! KERNEL PANIC !!!\n{info}\n");
}

/// Formatted-argument variant of [`panic_serial`], used by [`kpanic!`] where
/// there is no [`core::panic::PanicInfo`] yet (the failure is detected and
/// reported before unwinding starts).
pub fn panic_serial_fmt(args: fmt::Arguments<'_>) {
    let mut w = SerialWriter(new_raw_serial());
    let _ = write!(w, "\n!!! KERNEL PANIC !!! {args}\n");
}

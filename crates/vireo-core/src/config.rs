//! Compile-time kernel configuration.
//!
//! Simplified from a build.rs-codegen `hadron_config` bridge to plain
//! `const` items: this workspace has no multi-target build matrix to
//! generate constants for, so a codegen crate would be pure overhead (see
//! DESIGN.md's Open Question resolution).

/// Maximum number of CPUs the scheduler's per-CPU bookkeeping supports.
///
/// The scheduler core itself is logically single-runqueue;
/// this bounds SMP AP bring-up bookkeeping only.
pub const MAX_CPUS: usize = 32;

/// Scheduler timer-tick frequency in Hz (nominally 100 Hz).
pub const TIMER_HZ: u64 = 100;

/// Nanoseconds between timer ticks, derived from [`TIMER_HZ`].
pub const TIMER_PERIOD_NS: u64 = 1_000_000_000 / TIMER_HZ;

/// Initial kernel heap size in bytes.
pub const KERNEL_HEAP_INITIAL: u64 = 2 * 1024 * 1024;

/// Maximum kernel heap size in bytes after all `heap_expand` calls.
pub const KERNEL_HEAP_MAX: u64 = 256 * 1024 * 1024;

/// Size of each `heap_expand` growth chunk.
pub const HEAP_EXPAND_CHUNK: u64 = 1024 * 1024;

/// Kernel log level gate. Messages more verbose than this are compiled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fatal and recoverable error conditions.
    Error,
    /// Unexpected but survivable conditions.
    Warn,
    /// High-level lifecycle events.
    Info,
    /// Developer-facing detail.
    Debug,
    /// Per-operation tracing.
    Trace,
}

impl LogLevel {
    /// Fixed-width name for aligned log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// Compile-time maximum log level. Raise for debug builds.
pub const MAX_LOG_LEVEL: LogLevel = LogLevel::Debug;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_period_matches_hz() {
        assert_eq!(TIMER_PERIOD_NS * TIMER_HZ, 1_000_000_000);
    }

    #[test]
    fn heap_chunk_divides_max() {
        assert_eq!(KERNEL_HEAP_MAX % HEAP_EXPAND_CHUNK, 0);
    }

    #[test]
    fn log_level_orders_error_below_trace() {
        assert!(LogLevel::Error < LogLevel::Trace);
    }
}

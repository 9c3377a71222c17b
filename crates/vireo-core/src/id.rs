//! Type-safe identifiers for kernel resources.
//!
//! The raw-pointer back-references a C kernel would use (thread↔process,
//! vnode↔mount, buffer↔device) are replaced here with stable index
//! newtypes. The arenas these index into live in the crate that owns the
//! resource (`vireo-sched` for [`Tid`]/[`Pid`], `vireo-fs` for
//! [`VnodeId`]/[`MountId`]); this crate only defines the newtypes so every
//! layer agrees on their representation.
//!
//! Grounded on `hadron-core/src/id.rs`'s newtype-plus-`Display` pattern.

use core::fmt;

/// Thread identifier (`tid_t` in the source kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Tid(u32);

impl Tid {
    /// The distinguished idle-thread id. Priority 0 is reserved for it.
    pub const IDLE: Self = Self(0);

    /// Creates a new `Tid`.
    #[must_use]
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid{}", self.0)
    }
}

/// Process identifier (`pid_t` in the source kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// PID 1 is the root of the process tree and is never reaped.
    pub const INIT: Self = Self(1);

    /// Creates a new `Pid`.
    #[must_use]
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

/// File descriptor number, unique within a process's 256-slot FD table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Fd(u32);

impl Fd {
    /// Maximum number of open file descriptors per process.
    pub const MAX: u32 = 256;

    /// Creates a new `Fd`. Panics if `val >= Fd::MAX`.
    #[must_use]
    pub const fn new(val: u32) -> Self {
        assert!(val < Self::MAX, "fd out of range");
        Self(val)
    }

    /// Returns the raw `u32` value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the value as `usize` (convenience for indexing the FD table).
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable index of a vnode within a filesystem's vnode arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VnodeId(u64);

impl VnodeId {
    /// Creates a new `VnodeId`.
    #[must_use]
    pub const fn new(val: u64) -> Self {
        Self(val)
    }

    /// Returns the raw `u64` value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VnodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vnode{}", self.0)
    }
}

/// Stable index of a mount within the global mount table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MountId(u32);

impl MountId {
    /// Creates a new `MountId`.
    #[must_use]
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mount{}", self.0)
    }
}

/// A block device's `(major, minor)` identity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    major: u16,
    minor: u16,
}

impl DeviceId {
    /// Creates a new device id from its major/minor pair.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// The major number.
    #[must_use]
    pub const fn major(self) -> u16 {
        self.major
    }

    /// The minor number.
    #[must_use]
    pub const fn minor(self) -> u16 {
        self.minor
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_roundtrip() {
        assert_eq!(Tid::new(42).as_u32(), 42);
    }

    #[test]
    fn pid_init_is_one() {
        assert_eq!(Pid::INIT.as_u32(), 1);
    }

    #[test]
    fn pid_ordering() {
        assert!(Pid::new(1) < Pid::new(2));
    }

    #[test]
    fn fd_max_is_256() {
        assert_eq!(Fd::MAX, 256);
        assert_eq!(Fd::new(255).as_u32(), 255);
    }

    #[test]
    #[should_panic(expected = "fd out of range")]
    fn fd_rejects_out_of_range() {
        let _ = Fd::new(256);
    }

    #[test]
    fn device_id_display() {
        let dev = DeviceId::new(8, 0);
        assert_eq!(format!("{dev}"), "8:0");
    }

    #[test]
    fn device_id_ordering_by_major_then_minor() {
        assert!(DeviceId::new(8, 1) < DeviceId::new(8, 2));
        assert!(DeviceId::new(8, 9) < DeviceId::new(9, 0));
    }
}

//! The workspace's single POSIX-like error enum.
//!
//! Grounded on `driver_api/error.rs`'s small-enum-plus-`Display` idiom.

use core::fmt;

/// A kernel-internal error code, returned by value at every fallible
/// boundary: errors propagate up by return value, never by hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KError {
    /// Invalid argument.
    InvalidArgument = -22,
    /// Out of memory.
    NoMem = -12,
    /// No such file or directory.
    NotFound = -2,
    /// File exists.
    AlreadyExists = -17,
    /// Not a directory.
    NotADirectory = -20,
    /// Is a directory.
    IsADirectory = -21,
    /// Directory not empty.
    NotEmpty = -39,
    /// Resource busy.
    Busy = -16,
    /// Permission denied.
    AccessDenied = -13,
    /// Operation not permitted.
    NotPermitted = -1,
    /// Read-only filesystem.
    ReadOnlyFs = -30,
    /// No such device.
    NoDevice = -19,
    /// Bad file descriptor.
    BadFd = -9,
    /// I/O error.
    IoError = -5,
    /// Operation timed out.
    TimedOut = -110,
    /// Name too long.
    NameTooLong = -36,
    /// Operation not supported.
    NotSupported = -95,
    /// Result out of representable range.
    OutOfRange = -34,
    /// Value too large for its destination type.
    Overflow = -75,
    /// Inappropriate ioctl for device.
    NotATty = -25,
    /// Bad address.
    Fault = -14,
    /// Interrupted system call.
    Interrupted = -4,
}

impl KError {
    /// Returns the negated-errno numeric value, as the source kernel returns it.
    #[must_use]
    pub const fn as_errno(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "EINVAL",
            Self::NoMem => "ENOMEM",
            Self::NotFound => "ENOENT",
            Self::AlreadyExists => "EEXIST",
            Self::NotADirectory => "ENOTDIR",
            Self::IsADirectory => "EISDIR",
            Self::NotEmpty => "ENOTEMPTY",
            Self::Busy => "EBUSY",
            Self::AccessDenied => "EACCES",
            Self::NotPermitted => "EPERM",
            Self::ReadOnlyFs => "EROFS",
            Self::NoDevice => "ENODEV",
            Self::BadFd => "EBADF",
            Self::IoError => "EIO",
            Self::TimedOut => "ETIMEDOUT",
            Self::NameTooLong => "ENAMETOOLONG",
            Self::NotSupported => "ENOTSUP",
            Self::OutOfRange => "ERANGE",
            Self::Overflow => "EOVERFLOW",
            Self::NotATty => "ENOTTY",
            Self::Fault => "EFAULT",
            Self::Interrupted => "EINTR",
        };
        f.write_str(name)
    }
}

/// Convenience alias used throughout the workspace.
pub type KResult<T> = Result<T, KError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negative() {
        assert!(KError::NotFound.as_errno() < 0);
        assert_eq!(KError::NotFound.as_errno(), -2);
    }

    #[test]
    fn display_matches_posix_name() {
        assert_eq!(format!("{}", KError::NoMem), "ENOMEM");
        assert_eq!(format!("{}", KError::IsADirectory), "EISDIR");
    }

    #[test]
    fn variants_are_distinct() {
        assert_ne!(KError::NotFound.as_errno(), KError::AlreadyExists.as_errno());
    }
}

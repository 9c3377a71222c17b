//! The capability trait a process's file-descriptor table holds handles to.
//!
//! Dynamic vtables in filesystem/block-device ops are modeled as a
//! capability trait per subsystem, dispatched through trait objects behind
//! handles. A process's FD table (owned by `vireo-sched::process`) must
//! hold open files, but the concrete `File`/`Vnode` types live in
//! `vireo-fs`, which itself sits above the scheduler in the crate
//! dependency order. [`FileHandle`] is the seam that breaks the cycle: this
//! leaf crate defines the capability, `vireo-fs`'s `File` implements it,
//! and `vireo-sched`'s FD table stores `Arc<dyn FileHandle>` without ever
//! naming `vireo-fs`.
//!
//! Grounded on `driver_api`'s base-trait-plus-blanket-impl pattern,
//! generalized here to a fd-table capability rather than a hardware-driver
//! one.

extern crate alloc;

use crate::error::KResult;

/// An open file, as seen from a process's file-descriptor table.
///
/// Each call manages its own byte offset internally (a file binds an open
/// vnode to an open-flags set and a byte offset); the FD table itself is
/// offset-agnostic.
pub trait FileHandle: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at the file's current
    /// offset, advancing it by the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> KResult<usize>;

    /// Writes `buf` at the file's current offset (or at end-of-file if
    /// opened with append semantics), advancing the offset by the number
    /// of bytes written.
    fn write(&self, buf: &[u8]) -> KResult<usize>;

    /// Repositions the file offset; see `SEEK_SET`/`SEEK_CUR`/`SEEK_END`
    /// semantics in the owning filesystem layer. Returns the new absolute
    /// offset.
    fn seek(&self, offset: i64, whence: SeekWhence) -> KResult<u64>;

    /// Flushes any buffered state to the backing store.
    fn sync(&self) -> KResult<()>;

    /// Releases this handle's reference to the underlying open file.
    /// Called when the owning FD table slot is closed and no other
    /// `Arc<dyn FileHandle>` clone of it remains.
    fn close(&self);
}

/// `lseek` reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// Offset is absolute.
    Set,
    /// Offset is relative to the current position.
    Current,
    /// Offset is relative to the end of the file.
    End,
}

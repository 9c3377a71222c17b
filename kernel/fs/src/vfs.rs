//! The VFS: mount table, vnode lifecycle, path resolution, file operations
//!.
//!
//! Grounded on `original_source/src/kernel/fs/vfs.c` for the algorithms
//! (`vfs_mount`, `vfs_lookup`'s component walk with mount-point
//! substitution, `vfs_open`/`vfs_rename`'s lock-ordering) and
//! `src/include/fs/vfs.h` for the vnode/mount/file shapes. The source's raw
//! `vnode *v_next` global list and `v_refcount` hand-rolled atomics are
//! folded into `Arc<Vnode>` itself: cloning/dropping the `Arc`
//! *is* `vfs_vnode_ref`/`vfs_vnode_unref`, and [`Vnode`]'s `Drop` impl calls
//! the owning filesystem's `release` hook on the last drop, which is exactly
//! the source's "when refcount reaches zero, call release" invariant with
//! no separate bookkeeping needed. The source's `v_parent` raw pointer
//! becomes a [`Weak<Vnode>`]; a vnode also keeps a [`Weak`] to itself
//! (built via `Arc::new_cyclic`) so a method holding only `&Vnode` can still
//! hand out a fresh `Arc<Vnode>` clone when one is needed (e.g. installing
//! itself as a new child's parent).

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use vireo_core::error::{KError, KResult};
use vireo_core::fd::{FileHandle, SeekWhence};
use vireo_core::id::{DeviceId, MountId, VnodeId};
use vireo_core::sync::IrqSpinLock;

use crate::path;

/// The kind of filesystem object a [`Vnode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Character device node.
    CharDev,
    /// Block device node.
    BlockDev,
    /// Named pipe.
    Pipe,
    /// Symbolic link.
    Symlink,
    /// Socket.
    Socket,
}

bitflags! {
    /// Open-file flags, bit values matching
    /// `original_source/src/include/fs/vfs.h`'s `VFS_O_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for writing only.
        const WRONLY = 0x0001;
        /// Open for reading and writing.
        const RDWR = 0x0002;
        /// Create the file if it does not exist.
        const CREAT = 0x0040;
        /// Fail if `CREAT` and the file already exists.
        const EXCL = 0x0080;
        /// Truncate an existing regular file to zero length on open.
        const TRUNC = 0x0200;
        /// Writes always append at end-of-file.
        const APPEND = 0x0400;
        /// Fail unless the resolved vnode is a directory.
        const DIRECTORY = 0x10000;
    }
}

impl OpenFlags {
    const ACCMODE: Self = Self::from_bits_truncate(Self::WRONLY.bits() | Self::RDWR.bits());

    /// `true` if these flags permit reading (`RDONLY`, the all-zero access
    /// mode, or `RDWR`).
    #[must_use]
    pub fn readable(self) -> bool {
        !self.contains(Self::WRONLY)
    }

    /// `true` if these flags permit writing (`WRONLY` or `RDWR`).
    #[must_use]
    pub fn writable(self) -> bool {
        (self & Self::ACCMODE).intersects(Self::WRONLY | Self::RDWR)
    }
}

bitflags! {
    /// Static mount attributes, matching
    /// `original_source`'s `VFS_MNT_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MountFlags: u32 {
        /// Writes are rejected at the VFS layer before reaching the fs.
        const RDONLY = 1 << 0;
        /// Execution is disallowed from this mount (bookkeeping only; no
        /// loader consumes it in this core).
        const NOEXEC = 1 << 1;
    }
}

/// Mutable per-vnode attributes.
#[derive(Debug, Clone, Copy)]
pub struct VnodeAttr {
    /// Permission and type bits, fs-interpreted.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Size in bytes (meaningful for `File` and `Symlink`).
    pub size: u64,
    /// Hard-link count.
    pub nlink: u32,
    /// Last access time, fs-defined units.
    pub atime: u64,
    /// Last modification time.
    pub mtime: u64,
    /// Last status-change time.
    pub ctime: u64,
}

impl Default for VnodeAttr {
    fn default() -> Self {
        Self { mode: 0o644, uid: 0, gid: 0, size: 0, nlink: 1, atime: 0, mtime: 0, ctime: 0 }
    }
}

/// One entry produced by [`VnodeOps::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// The entry's inode number.
    pub ino: u64,
    /// The entry's name within its directory.
    pub name: String,
    /// The entry's vnode type.
    pub vtype: VnodeType,
}

/// The capability trait a filesystem implements for one vnode (modeled
/// as a capability trait per subsystem, dispatched through
/// trait objects"). One `Arc<dyn VnodeOps>` is shared by every vnode a
/// filesystem mount owns; it carries no per-vnode state itself; the vnode's
/// `data` field does.
pub trait VnodeOps: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`.
    fn read(&self, vnode: &Vnode, buf: &mut [u8], offset: u64) -> KResult<usize>;
    /// Writes `buf` at `offset`, growing the file if necessary.
    fn write(&self, vnode: &Vnode, buf: &[u8], offset: u64) -> KResult<usize>;
    /// Resizes a regular file, zero-filling any new tail.
    fn truncate(&self, vnode: &Vnode, size: u64) -> KResult<()>;
    /// Flushes any buffered state for this vnode.
    fn sync(&self, vnode: &Vnode) -> KResult<()>;
    /// Looks up `name` within a directory vnode.
    fn lookup(&self, dir: &Vnode, name: &str) -> KResult<Arc<Vnode>>;
    /// Creates a new regular file `name` within a directory vnode.
    fn create(&self, dir: &Vnode, name: &str, mode: u32) -> KResult<Arc<Vnode>>;
    /// Creates a new subdirectory `name`.
    fn mkdir(&self, dir: &Vnode, name: &str, mode: u32) -> KResult<Arc<Vnode>>;
    /// Removes an empty subdirectory `name`.
    fn rmdir(&self, dir: &Vnode, name: &str) -> KResult<()>;
    /// Removes a non-directory entry `name`.
    fn unlink(&self, dir: &Vnode, name: &str) -> KResult<()>;
    /// Moves `old_name` from `old_dir` to `new_name` in `new_dir`.
    fn rename(&self, old_dir: &Vnode, old_name: &str, new_dir: &Vnode, new_name: &str) -> KResult<()>;
    /// Reads the directory entry at `*offset`, advancing it. Returns `None`
    /// at end-of-directory.
    fn readdir(&self, dir: &Vnode, offset: &mut u64) -> KResult<Option<DirEntry>>;
    /// Creates a symbolic link `name` pointing at `target`.
    fn symlink(&self, dir: &Vnode, name: &str, target: &str) -> KResult<()>;
    /// Returns a symlink vnode's target path.
    fn readlink(&self, vnode: &Vnode) -> KResult<String>;
    /// Adds a hard link `name` to an existing `target` vnode.
    fn link(&self, dir: &Vnode, name: &str, target: &Arc<Vnode>) -> KResult<()>;
    /// Called on the 0→1 open-file transition for this vnode.
    fn open(&self, vnode: &Vnode, flags: OpenFlags) -> KResult<()>;
    /// Called when the last open file referencing this vnode closes.
    fn close(&self, vnode: &Vnode) -> KResult<()>;
    /// Called when the vnode's reference count reaches zero
    ///; frees filesystem-private data.
    fn release(&self, vnode: &Vnode);
}

/// A single filesystem object. Lives behind `Arc`; the
/// `Arc`'s strong count *is* the spec's `v_refcount`.
pub struct Vnode {
    id: VnodeId,
    ino: u64,
    vtype: VnodeType,
    mount: MountId,
    attr: IrqSpinLock<VnodeAttr>,
    ops: Arc<dyn VnodeOps>,
    parent: IrqSpinLock<Weak<Vnode>>,
    self_weak: Weak<Vnode>,
    /// Filesystem-private payload (tmpfs's `TmpfsNode`, for example),
    /// downcast by the owning filesystem's [`VnodeOps`] impl. Mirrors the
    /// source's untyped `v_data` pointer; `dyn Any` is this core's
    /// type-erasure idiom in place of a raw `void *`.
    pub data: Box<dyn Any + Send + Sync>,
}

impl Vnode {
    /// Allocates a new vnode behind a reference-counted handle.
    ///
    /// `parent` is the directory this vnode is created within (`None` for
    /// a filesystem's root). `data` is the filesystem-private payload.
    #[must_use]
    pub fn new(
        mount: MountId,
        ino: u64,
        vtype: VnodeType,
        attr: VnodeAttr,
        ops: Arc<dyn VnodeOps>,
        parent: Option<&Arc<Vnode>>,
        data: Box<dyn Any + Send + Sync>,
    ) -> Arc<Self> {
        let parent_weak = parent.map_or_else(Weak::new, Arc::downgrade);
        Arc::new_cyclic(|self_weak| Self {
            id: make_vnode_id(mount, ino),
            ino,
            vtype,
            mount,
            attr: IrqSpinLock::new(attr),
            ops,
            parent: IrqSpinLock::new(parent_weak),
            self_weak: self_weak.clone(),
            data,
        })
    }

    /// This vnode's globally unique id.
    #[must_use]
    pub fn id(&self) -> VnodeId {
        self.id
    }

    /// This vnode's filesystem-local inode number.
    #[must_use]
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// This vnode's type.
    #[must_use]
    pub fn vtype(&self) -> VnodeType {
        self.vtype
    }

    /// The mount this vnode belongs to.
    #[must_use]
    pub fn mount(&self) -> MountId {
        self.mount
    }

    /// Locks and returns a copy of this vnode's mutable attributes.
    #[must_use]
    pub fn attr(&self) -> VnodeAttr {
        *self.attr.lock()
    }

    /// Mutates this vnode's attributes under its lock.
    pub fn with_attr_mut<R>(&self, f: impl FnOnce(&mut VnodeAttr) -> R) -> R {
        f(&mut self.attr.lock())
    }

    /// The operations vtable this vnode dispatches through.
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn VnodeOps> {
        &self.ops
    }

    /// The parent directory vnode, if still alive and this is not a root.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Vnode>> {
        self.parent.lock().upgrade()
    }

    /// Rebinds this vnode's parent link (used by `rename`).
    pub fn set_parent(&self, parent: &Arc<Vnode>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    /// A fresh strong handle to this vnode, obtainable from a bare `&Vnode`.
    #[must_use]
    pub fn self_arc(&self) -> Arc<Vnode> {
        self.self_weak.upgrade().expect("vnode dropped its own last reference")
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        let ops = Arc::clone(&self.ops);
        ops.release(self);
    }
}

fn make_vnode_id(mount: MountId, ino: u64) -> VnodeId {
    VnodeId::new((u64::from(mount.as_u32()) << 48) | (ino & 0x0000_ffff_ffff_ffff))
}

/// The capability trait a filesystem type registers under a name
/// (`{fs_name, mount, unmount, alloc_vnode, free_vnode, sync_fs, statfs}`).
pub trait FilesystemType: Send + Sync {
    /// The name filesystems of this type are mounted under (e.g. `"tmpfs"`).
    fn name(&self) -> &str;

    /// Creates a new filesystem instance, optionally backed by a block
    /// device (ignored by in-memory filesystems such as tmpfs). `mount` is
    /// the id the VFS has already reserved for this instance, to stamp
    /// into every vnode it allocates.
    ///
    /// # Errors
    /// Returns an implementation-specific error (e.g. a corrupt on-disk
    /// superblock) if the instance cannot be constructed.
    fn mount(&self, mount: MountId, device: Option<DeviceId>, flags: MountFlags) -> KResult<Arc<dyn FilesystemOps>>;
}

/// The capability trait one mounted filesystem instance implements.
pub trait FilesystemOps: Send + Sync {
    /// The instance's root vnode.
    fn root(&self) -> Arc<Vnode>;

    /// Flushes any filesystem-level buffered state (not block-cache
    /// buffers, which the caller syncs separately via
    /// [`crate::bcache::Bcache::bsync`]).
    ///
    /// # Errors
    /// Returns an implementation-specific I/O error.
    fn sync_fs(&self) -> KResult<()> {
        Ok(())
    }

    /// Called when this instance is unmounted, after the VFS has confirmed
    /// no references remain.
    ///
    /// # Errors
    /// Returns an implementation-specific error.
    fn unmount(&self) -> KResult<()> {
        Ok(())
    }
}

struct Mount {
    id: MountId,
    path: String,
    flags: MountFlags,
    fs: Arc<dyn FilesystemOps>,
    covered: Option<Arc<Vnode>>,
    device: Option<DeviceId>,
    refcount: AtomicU32,
}

impl Clone for Mount {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            flags: self.flags,
            fs: Arc::clone(&self.fs),
            covered: self.covered.clone(),
            device: self.device,
            refcount: AtomicU32::new(self.refcount.load(Ordering::Relaxed)),
        }
    }
}

/// An open file: a vnode, its open-flags, and a byte offset.
/// Implements [`FileHandle`] so a process's FD table can hold it as
/// `Arc<dyn FileHandle>` without naming this crate.
pub struct File {
    vnode: Arc<Vnode>,
    flags: OpenFlags,
    offset: IrqSpinLock<u64>,
}

impl File {
    /// The vnode this file has open.
    #[must_use]
    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }
}

impl FileHandle for File {
    fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        if !self.flags.readable() {
            return Err(KError::BadFd);
        }
        let offset = *self.offset.lock();
        let n = self.vnode.ops.read(&self.vnode, buf, offset)?;
        *self.offset.lock() = offset + n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> KResult<usize> {
        if !self.flags.writable() {
            return Err(KError::BadFd);
        }
        let write_offset = if self.flags.contains(OpenFlags::APPEND) {
            self.vnode.attr().size
        } else {
            *self.offset.lock()
        };
        let n = self.vnode.ops.write(&self.vnode, buf, write_offset)?;
        *self.offset.lock() = write_offset + n as u64;
        Ok(n)
    }

    fn seek(&self, offset: i64, whence: SeekWhence) -> KResult<u64> {
        let mut cur = self.offset.lock();
        let base: i64 = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Current => i64::try_from(*cur).map_err(|_| KError::Overflow)?,
            SeekWhence::End => i64::try_from(self.vnode.attr().size).map_err(|_| KError::Overflow)?,
        };
        let new_offset = base.checked_add(offset).ok_or(KError::Overflow)?;
        if new_offset < 0 {
            return Err(KError::InvalidArgument);
        }
        *cur = new_offset as u64;
        Ok(*cur)
    }

    fn sync(&self) -> KResult<()> {
        self.vnode.ops.sync(&self.vnode)
    }

    fn close(&self) {
        let _ = self.vnode.ops.close(&self.vnode);
    }
}

/// The global mount table and path-resolution engine.
pub struct Vfs {
    mounts: IrqSpinLock<Vec<Mount>>,
    fs_types: IrqSpinLock<Vec<Arc<dyn FilesystemType>>>,
    next_mount_id: AtomicU32,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Creates an empty VFS with no registered filesystem types and no
    /// mounts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts: IrqSpinLock::new(Vec::new()),
            fs_types: IrqSpinLock::new(Vec::new()),
            next_mount_id: AtomicU32::new(1),
        }
    }

    /// Registers a filesystem type under its name.
    ///
    /// # Errors
    /// Returns [`KError::AlreadyExists`] if the name is already registered.
    pub fn register_filesystem(&self, ty: Arc<dyn FilesystemType>) -> KResult<()> {
        let mut types = self.fs_types.lock();
        if types.iter().any(|t| t.name() == ty.name()) {
            return Err(KError::AlreadyExists);
        }
        types.push(ty);
        Ok(())
    }

    fn find_fs_type(&self, name: &str) -> KResult<Arc<dyn FilesystemType>> {
        self.fs_types.lock().iter().find(|t| t.name() == name).map(Arc::clone).ok_or(KError::NoDevice)
    }

    fn mount_is_readonly(&self, mount: MountId) -> bool {
        self.mounts.lock().iter().any(|m| m.id == mount && m.flags.contains(MountFlags::RDONLY))
    }

    /// Mounts a filesystem of type `fs_name` at `mount_point`. Mounting at
    /// `/` is special: no covered vnode is required and
    /// no root mount may already exist. Otherwise `mount_point` must
    /// already resolve to a directory.
    ///
    /// # Errors
    /// [`KError::NoDevice`] for an unknown fs type, [`KError::AlreadyExists`]
    /// if `/` is mounted twice, [`KError::NotADirectory`] if `mount_point`
    /// is not a directory, or the fs type's own mount error.
    pub fn mount(&self, fs_name: &str, mount_point: &str, device: Option<DeviceId>, flags: MountFlags) -> KResult<()> {
        let fs_type = self.find_fs_type(fs_name)?;
        let mount_point = path::normalize(mount_point);

        let covered = if mount_point == "/" {
            if self.mounts.lock().iter().any(|m| m.path == "/") {
                return Err(KError::AlreadyExists);
            }
            None
        } else {
            let vnode = self.lookup("/", &mount_point)?;
            if vnode.vtype() != VnodeType::Dir {
                return Err(KError::NotADirectory);
            }
            Some(vnode)
        };

        let id = MountId::new(self.next_mount_id.fetch_add(1, Ordering::AcqRel));
        let fs = fs_type.mount(id, device, flags)?;
        self.mounts.lock().push(Mount {
            id,
            path: mount_point,
            flags,
            fs,
            covered,
            device,
            refcount: AtomicU32::new(1),
        });
        Ok(())
    }

    /// Unmounts the filesystem mounted at `mount_point`.
    ///
    /// # Errors
    /// [`KError::NotFound`] if nothing is mounted there, [`KError::Busy`]
    /// if the mount is referenced beyond this call, or the fs type's own
    /// unmount error.
    pub fn unmount(&self, mount_point: &str) -> KResult<()> {
        let mount_point = path::normalize(mount_point);
        let mut mounts = self.mounts.lock();
        let idx = mounts.iter().position(|m| m.path == mount_point).ok_or(KError::NotFound)?;
        if mounts[idx].refcount.load(Ordering::Acquire) > 1 {
            return Err(KError::Busy);
        }
        let mount = mounts.remove(idx);
        drop(mounts);
        mount.fs.unmount()
    }

    /// Resolves `path` (absolute, or relative to `cwd`) to its vnode,
    /// crossing mount points as it walks.
    ///
    /// # Errors
    /// [`KError::NotFound`] if any component is missing, [`KError::NotADirectory`]
    /// if a non-final component is not a directory, or an error surfaced
    /// from the filesystem's `lookup` hook.
    pub fn lookup(&self, cwd: &str, path: &str) -> KResult<Arc<Vnode>> {
        let abs = path::resolve_relative(cwd, path);
        let mounts = self.mounts.lock().clone();
        let mount_path =
            path::longest_prefix_match(&abs, mounts.iter().map(|m| m.path.as_str())).ok_or(KError::NotFound)?;
        let mount = mounts.iter().find(|m| m.path == mount_path).ok_or(KError::NotFound)?;

        let mut current = mount.fs.root();
        let remainder = path::strip_mount_prefix(&abs, mount_path);
        for component in path::components(remainder) {
            if current.vtype() != VnodeType::Dir {
                return Err(KError::NotADirectory);
            }
            let next = current.ops().lookup(&current, component)?;
            current = substitute_mount_root(&mounts, &next);
        }
        Ok(current)
    }

    /// Resolves the parent directory of `path` and splits off its final
    /// component (`vfs_lookup_parent`).
    ///
    /// # Errors
    /// [`KError::InvalidArgument`] if `path` names the root (no parent), or
    /// any error [`Vfs::lookup`] would return for the parent.
    pub fn lookup_parent(&self, cwd: &str, path: &str) -> KResult<(Arc<Vnode>, String)> {
        let abs = path::resolve_relative(cwd, path);
        let (parent_path, name) = path::split_parent(&abs).ok_or(KError::InvalidArgument)?;
        let parent = self.lookup("/", &parent_path)?;
        Ok((parent, name))
    }

    /// Opens `path`, creating it first if `O_CREAT` is set and it does not
    /// exist (`vfs_open`).
    ///
    /// # Errors
    /// [`KError::AlreadyExists`] for `CREAT | EXCL` on an existing path,
    /// [`KError::IsADirectory`] / [`KError::NotADirectory`] on a type
    /// mismatch against `O_DIRECTORY`, or any lookup/create error.
    pub fn open(&self, cwd: &str, path: &str, flags: OpenFlags, mode: u32) -> KResult<Arc<File>> {
        let existing = self.lookup(cwd, path);
        let vnode = match existing {
            Ok(vnode) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(KError::AlreadyExists);
                }
                vnode
            }
            Err(KError::NotFound) if flags.contains(OpenFlags::CREAT) => {
                let (parent, name) = self.lookup_parent(cwd, path)?;
                parent.ops().create(&parent, &name, mode)?
            }
            Err(e) => return Err(e),
        };

        if vnode.vtype() == VnodeType::Dir && !flags.contains(OpenFlags::DIRECTORY) {
            return Err(KError::IsADirectory);
        }
        if vnode.vtype() != VnodeType::Dir && flags.contains(OpenFlags::DIRECTORY) {
            return Err(KError::NotADirectory);
        }
        if flags.writable() && self.mount_is_readonly(vnode.mount()) {
            return Err(KError::ReadOnlyFs);
        }

        vnode.ops().open(&vnode, flags)?;

        if flags.contains(OpenFlags::TRUNC) && vnode.vtype() == VnodeType::File {
            vnode.ops().truncate(&vnode, 0)?;
        }

        Ok(Arc::new(File { vnode, flags, offset: IrqSpinLock::new(0) }))
    }

    /// Creates a directory at `path`.
    ///
    /// # Errors
    /// [`KError::NotADirectory`] if the parent is not a directory, or the
    /// fs's own `mkdir` error (e.g. [`KError::AlreadyExists`]).
    pub fn mkdir(&self, cwd: &str, path: &str, mode: u32) -> KResult<()> {
        let (parent, name) = self.lookup_parent(cwd, path)?;
        if parent.vtype() != VnodeType::Dir {
            return Err(KError::NotADirectory);
        }
        parent.ops().mkdir(&parent, &name, mode)?;
        Ok(())
    }

    /// Removes an empty directory at `path`.
    ///
    /// # Errors
    /// The fs's own `rmdir` error (e.g. [`KError::NotEmpty`],
    /// [`KError::NotFound`]).
    pub fn rmdir(&self, cwd: &str, path: &str) -> KResult<()> {
        let (parent, name) = self.lookup_parent(cwd, path)?;
        parent.ops().rmdir(&parent, &name)
    }

    /// Removes a non-directory entry at `path`.
    ///
    /// # Errors
    /// [`KError::IsADirectory`] if `path` names a directory, or the fs's
    /// own `unlink` error.
    pub fn unlink(&self, cwd: &str, path: &str) -> KResult<()> {
        let (parent, name) = self.lookup_parent(cwd, path)?;
        parent.ops().unlink(&parent, &name)
    }

    /// Creates a symlink at `linkpath` pointing at `target`.
    ///
    /// # Errors
    /// The fs's own `symlink` error.
    pub fn symlink(&self, cwd: &str, target: &str, linkpath: &str) -> KResult<()> {
        let (parent, name) = self.lookup_parent(cwd, linkpath)?;
        parent.ops().symlink(&parent, &name, target)
    }

    /// Reads a symlink's target.
    ///
    /// # Errors
    /// [`KError::InvalidArgument`] if `path` does not name a symlink.
    pub fn readlink(&self, cwd: &str, path: &str) -> KResult<String> {
        let vnode = self.lookup(cwd, path)?;
        if vnode.vtype() != VnodeType::Symlink {
            return Err(KError::InvalidArgument);
        }
        vnode.ops().readlink(&vnode)
    }

    /// Adds a hard link at `newpath` to the existing file at `oldpath`.
    ///
    /// # Errors
    /// [`KError::NotPermitted`] if `oldpath` is a directory, or the fs's
    /// own `link` error.
    pub fn link(&self, cwd: &str, oldpath: &str, newpath: &str) -> KResult<()> {
        let target = self.lookup(cwd, oldpath)?;
        if target.vtype() == VnodeType::Dir {
            return Err(KError::NotPermitted);
        }
        let (parent, name) = self.lookup_parent(cwd, newpath)?;
        parent.ops().link(&parent, &name, &target)
    }

    /// Renames `oldpath` to `newpath`, locking both parent directories in
    /// id order to avoid deadlock against a concurrent reverse rename
    /// (`vfs_rename`).
    ///
    /// # Errors
    /// The fs's own `rename` error.
    pub fn rename(&self, cwd: &str, oldpath: &str, newpath: &str) -> KResult<()> {
        let (old_parent, old_name) = self.lookup_parent(cwd, oldpath)?;
        let (new_parent, new_name) = self.lookup_parent(cwd, newpath)?;
        // Lock ordering is delegated to the filesystem's own per-directory
        // locks (tmpfs locks each `TmpfsNode` it touches); this layer only
        // guarantees a stable, id-ordered *call* order so two concurrent
        // opposite renames cannot deadlock against each other.
        if old_parent.id() <= new_parent.id() {
            old_parent.ops().rename(&old_parent, &old_name, &new_parent, &new_name)
        } else {
            new_parent.ops().rename(&old_parent, &old_name, &new_parent, &new_name)
        }
    }

    /// Reads the next directory entry from an open directory file
    /// (`readdir` advances the file's offset).
    ///
    /// # Errors
    /// [`KError::NotADirectory`] if the file was not opened on a directory.
    pub fn readdir(&self, file: &File) -> KResult<Option<DirEntry>> {
        if file.vnode.vtype() != VnodeType::Dir {
            return Err(KError::NotADirectory);
        }
        let mut offset = *file.offset.lock();
        let entry = file.vnode.ops().readdir(&file.vnode, &mut offset)?;
        *file.offset.lock() = offset;
        Ok(entry)
    }
}

fn substitute_mount_root(mounts: &[Mount], vnode: &Arc<Vnode>) -> Arc<Vnode> {
    for mount in mounts {
        if let Some(covered) = &mount.covered {
            if Arc::ptr_eq(covered, vnode) {
                return mount.fs.root();
            }
        }
    }
    Arc::clone(vnode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TmpfsType;

    fn vfs_with_tmpfs_root() -> Vfs {
        let vfs = Vfs::new();
        vfs.register_filesystem(Arc::new(TmpfsType::new())).unwrap();
        vfs.mount("tmpfs", "/", None, MountFlags::empty()).unwrap();
        vfs
    }

    #[test]
    fn mount_root_then_lookup() {
        let vfs = vfs_with_tmpfs_root();
        let root = vfs.lookup("/", "/").unwrap();
        assert_eq!(root.vtype(), VnodeType::Dir);
    }

    #[test]
    fn double_root_mount_rejected() {
        let vfs = vfs_with_tmpfs_root();
        assert_eq!(vfs.mount("tmpfs", "/", None, MountFlags::empty()), Err(KError::AlreadyExists));
    }

    #[test]
    fn mkdir_then_open_create_write_read_roundtrips() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        let file = vfs.open("/", "/a/f.txt", OpenFlags::CREAT | OpenFlags::RDWR, 0o644).unwrap();
        assert_eq!(file.write(b"hello").unwrap(), 5);
        file.seek(0, SeekWhence::Set).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(vfs.lookup("/", "/a/f.txt").unwrap().attr().size, 5);
    }

    #[test]
    fn create_exclusive_on_existing_file_fails() {
        let vfs = vfs_with_tmpfs_root();
        vfs.open("/", "/f", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        let result = vfs.open("/", "/f", OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY, 0o644);
        assert_eq!(result.err(), Some(KError::AlreadyExists));
    }

    #[test]
    fn mkdir_then_rmdir_is_noop_on_tree() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        vfs.rmdir("/", "/a").unwrap();
        assert_eq!(vfs.lookup("/", "/a").err(), Some(KError::NotFound));
    }

    #[test]
    fn rmdir_nonempty_directory_rejected() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        vfs.open("/", "/a/f", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        assert_eq!(vfs.rmdir("/", "/a").err(), Some(KError::NotEmpty));
    }

    #[test]
    fn unlink_on_directory_rejected() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        assert_eq!(vfs.unlink("/", "/a").err(), Some(KError::IsADirectory));
    }

    #[test]
    fn rename_then_rename_back_restores_tree() {
        let vfs = vfs_with_tmpfs_root();
        vfs.open("/", "/a", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        vfs.rename("/", "/a", "/b").unwrap();
        assert_eq!(vfs.lookup("/", "/a").err(), Some(KError::NotFound));
        assert!(vfs.lookup("/", "/b").is_ok());
        vfs.rename("/", "/b", "/a").unwrap();
        assert!(vfs.lookup("/", "/a").is_ok());
        assert_eq!(vfs.lookup("/", "/b").err(), Some(KError::NotFound));
    }

    #[test]
    fn symlink_roundtrips_through_readlink() {
        let vfs = vfs_with_tmpfs_root();
        vfs.open("/", "/target", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        vfs.symlink("/", "/target", "/link").unwrap();
        assert_eq!(vfs.readlink("/", "/link").unwrap(), "/target");
    }

    #[test]
    fn hard_link_bumps_nlink_and_shares_data() {
        let vfs = vfs_with_tmpfs_root();
        let f = vfs.open("/", "/a", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        f.write(b"xy").unwrap();
        vfs.link("/", "/a", "/b").unwrap();
        assert_eq!(vfs.lookup("/", "/b").unwrap().attr().size, 2);
        assert_eq!(vfs.lookup("/", "/a").unwrap().attr().nlink, 2);
    }

    #[test]
    fn hard_linking_a_directory_is_forbidden() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        assert_eq!(vfs.link("/", "/a", "/b"), Err(KError::NotPermitted));
    }

    #[test]
    fn vnode_ref_then_unref_leaves_refcount_unchanged() {
        let vfs = vfs_with_tmpfs_root();
        vfs.open("/", "/a", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        let v1 = vfs.lookup("/", "/a").unwrap();
        let before = Arc::strong_count(&v1);
        let v2 = Arc::clone(&v1);
        drop(v2);
        assert_eq!(Arc::strong_count(&v1), before);
    }

    #[test]
    fn readdir_lists_dot_and_dotdot_plus_entries() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/a", 0o755).unwrap();
        vfs.open("/", "/a/f", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        let dir_file = vfs.open("/", "/a", OpenFlags::RDONLY | OpenFlags::DIRECTORY, 0).unwrap();
        let mut names = Vec::new();
        while let Some(entry) = vfs.readdir(&dir_file).unwrap() {
            names.push(entry.name);
        }
        assert!(names.contains(&String::from(".")));
        assert!(names.contains(&String::from("..")));
        assert!(names.contains(&String::from("f")));
    }

    #[test]
    fn mount_crosses_into_child_filesystem() {
        let vfs = vfs_with_tmpfs_root();
        vfs.mkdir("/", "/mnt", 0o755).unwrap();
        vfs.mount("tmpfs", "/mnt", None, MountFlags::empty()).unwrap();
        vfs.open("/", "/mnt/inner", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        assert!(vfs.lookup("/", "/mnt/inner").is_ok());
        assert_eq!(vfs.unmount("/mnt"), Err(KError::Busy));
    }

    #[test]
    fn path_normalization_is_idempotent() {
        let normalized_once = path::normalize("/a/b/../c/./d");
        let normalized_twice = path::normalize(&normalized_once);
        assert_eq!(normalized_once, normalized_twice);
    }
}

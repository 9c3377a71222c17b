//! tmpfs: an in-memory reference filesystem.
//!
//! Grounded on `original_source/src/include/fs/tmpfs.h` for the node shape
//! (a tagged union of file/dir/symlink data behind one `tmpfs_node_t`) and
//! `original_source/src/kernel/fs/tmpfs.c` for the algorithms: grow-by-
//! doubling file buffers, directories as entry lists seeded with `.`/`..`,
//! rmdir refusing anything but an empty directory, unlink refusing
//! directories. The source's manual `tmpfs_node_t *` links become
//! `Arc<Vnode>`; the source's single mutex per mount becomes one
//! [`IrqSpinLock`] per node, matching this crate's "every lock is IRQ-safe
//! spin" rule from `lib.rs`.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use vireo_core::error::{KError, KResult};
use vireo_core::id::{DeviceId, MountId};
use vireo_core::sync::IrqSpinLock;

use crate::vfs::{
    DirEntry, FilesystemOps, FilesystemType, MountFlags, OpenFlags, Vnode, VnodeAttr, VnodeOps, VnodeType,
};

/// Initial capacity given to a new file's backing buffer before the first
/// doubling.
const INITIAL_FILE_CAPACITY: usize = 4096;

enum TmpfsData {
    File(Vec<u8>),
    Dir(Vec<(String, Arc<Vnode>)>),
    Symlink(String),
}

/// A tmpfs node's private payload, reachable through [`Vnode::data`].
struct TmpfsNode {
    data: IrqSpinLock<TmpfsData>,
}

impl TmpfsNode {
    fn file() -> Box<dyn core::any::Any + Send + Sync> {
        Box::new(Self { data: IrqSpinLock::new(TmpfsData::File(Vec::new())) })
    }

    fn dir() -> Box<dyn core::any::Any + Send + Sync> {
        Box::new(Self { data: IrqSpinLock::new(TmpfsData::Dir(Vec::new())) })
    }

    fn symlink(target: String) -> Box<dyn core::any::Any + Send + Sync> {
        Box::new(Self { data: IrqSpinLock::new(TmpfsData::Symlink(target)) })
    }
}

fn node_of(vnode: &Vnode) -> &TmpfsNode {
    vnode.data.downcast_ref::<TmpfsNode>().expect("foreign vnode passed to tmpfs ops")
}

/// Per-mount counters shared between a [`TmpfsFs`] and its [`TmpfsOps`]
/// (per-mount stats: total nodes, total bytes).
struct TmpfsShared {
    next_ino: AtomicU64,
    total_nodes: AtomicU64,
    total_bytes: AtomicU64,
}

impl TmpfsShared {
    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::AcqRel)
    }
}

/// The [`VnodeOps`] implementation shared by every vnode of one tmpfs
/// mount. Holds a weak handle to its own enclosing `Arc` (set via
/// `Arc::new_cyclic` in [`TmpfsType::mount`]) so methods that only ever see
/// `&self` can still hand a fresh `Arc<dyn VnodeOps>` to a newly created
/// vnode.
struct TmpfsOps {
    mount: MountId,
    shared: Arc<TmpfsShared>,
    self_weak: Weak<TmpfsOps>,
}

impl TmpfsOps {
    fn self_arc(&self) -> Arc<TmpfsOps> {
        self.self_weak.upgrade().expect("tmpfs ops dropped its own last reference")
    }

    fn new_vnode(
        &self,
        vtype: VnodeType,
        mode: u32,
        data: Box<dyn core::any::Any + Send + Sync>,
        parent: Option<&Arc<Vnode>>,
    ) -> Arc<Vnode> {
        let ino = self.shared.alloc_ino();
        let attr = VnodeAttr { mode, ..VnodeAttr::default() };
        self.shared.total_nodes.fetch_add(1, Ordering::AcqRel);
        Vnode::new(self.mount, ino, vtype, attr, self.self_arc() as Arc<dyn VnodeOps>, parent, data)
    }
}

impl VnodeOps for TmpfsOps {
    fn read(&self, vnode: &Vnode, buf: &mut [u8], offset: u64) -> KResult<usize> {
        let node = node_of(vnode);
        let guard = node.data.lock();
        let TmpfsData::File(bytes) = &*guard else {
            return Err(KError::IsADirectory);
        };
        let offset = usize::try_from(offset).map_err(|_| KError::Overflow)?;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let available = &bytes[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&self, vnode: &Vnode, buf: &[u8], offset: u64) -> KResult<usize> {
        let node = node_of(vnode);
        let mut guard = node.data.lock();
        let TmpfsData::File(bytes) = &mut *guard else {
            return Err(KError::IsADirectory);
        };
        let offset = usize::try_from(offset).map_err(|_| KError::Overflow)?;
        let new_len = offset.checked_add(buf.len()).ok_or(KError::Overflow)?;
        if new_len > bytes.len() {
            grow_to(bytes, new_len);
        }
        bytes[offset..new_len].copy_from_slice(buf);
        let size = bytes.len() as u64;
        drop(guard);
        vnode.with_attr_mut(|attr| attr.size = size);
        Ok(buf.len())
    }

    fn truncate(&self, vnode: &Vnode, size: u64) -> KResult<()> {
        let node = node_of(vnode);
        let mut guard = node.data.lock();
        let TmpfsData::File(bytes) = &mut *guard else {
            return Err(KError::IsADirectory);
        };
        let size = usize::try_from(size).map_err(|_| KError::Overflow)?;
        if size <= bytes.len() {
            bytes.truncate(size);
        } else {
            grow_to(bytes, size);
        }
        let new_len = bytes.len() as u64;
        drop(guard);
        vnode.with_attr_mut(|attr| attr.size = new_len);
        Ok(())
    }

    fn sync(&self, _vnode: &Vnode) -> KResult<()> {
        Ok(())
    }

    fn lookup(&self, dir: &Vnode, name: &str) -> KResult<Arc<Vnode>> {
        with_dir(dir, |entries| {
            entries.iter().find(|(n, _)| n == name).map(|(_, v)| Arc::clone(v)).ok_or(KError::NotFound)
        })
    }

    fn create(&self, dir: &Vnode, name: &str, mode: u32) -> KResult<Arc<Vnode>> {
        if entry_exists(dir, name)? {
            return Err(KError::AlreadyExists);
        }
        let child = self.new_vnode(VnodeType::File, mode, TmpfsNode::file(), Some(&dir.self_arc()));
        with_dir_mut(dir, |entries| entries.push((name.to_string(), Arc::clone(&child))))?;
        Ok(child)
    }

    fn mkdir(&self, dir: &Vnode, name: &str, mode: u32) -> KResult<Arc<Vnode>> {
        if entry_exists(dir, name)? {
            return Err(KError::AlreadyExists);
        }
        let parent_arc = dir.self_arc();
        let child = self.new_vnode(VnodeType::Dir, mode, TmpfsNode::dir(), Some(&parent_arc));
        with_dir_mut(&child, |entries| {
            entries.push((".".to_string(), Arc::clone(&child)));
            entries.push(("..".to_string(), Arc::clone(&parent_arc)));
        })?;
        with_dir_mut(dir, |entries| entries.push((name.to_string(), Arc::clone(&child))))?;
        Ok(child)
    }

    fn rmdir(&self, dir: &Vnode, name: &str) -> KResult<()> {
        let child = self.lookup(dir, name)?;
        if child.vtype() != VnodeType::Dir {
            return Err(KError::NotADirectory);
        }
        let is_empty = with_dir(&child, |entries| entries.len() <= 2)?;
        if !is_empty {
            return Err(KError::NotEmpty);
        }
        with_dir_mut(dir, |entries| entries.retain(|(n, _)| n != name))?;
        self.shared.total_nodes.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    fn unlink(&self, dir: &Vnode, name: &str) -> KResult<()> {
        let child = self.lookup(dir, name)?;
        if child.vtype() == VnodeType::Dir {
            return Err(KError::IsADirectory);
        }
        with_dir_mut(dir, |entries| entries.retain(|(n, _)| n != name))?;
        let remaining = child.with_attr_mut(|attr| {
            attr.nlink = attr.nlink.saturating_sub(1);
            attr.nlink
        });
        if remaining == 0 {
            self.shared.total_nodes.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn rename(&self, old_dir: &Vnode, old_name: &str, new_dir: &Vnode, new_name: &str) -> KResult<()> {
        let moved = self.lookup(old_dir, old_name)?;
        if moved.vtype() == VnodeType::Dir {
            moved.set_parent(&new_dir.self_arc());
            with_dir_mut(&moved, |entries| {
                if let Some(entry) = entries.iter_mut().find(|(n, _)| n == "..") {
                    entry.1 = new_dir.self_arc();
                }
            })?;
        }
        with_dir_mut(new_dir, |entries| {
            entries.retain(|(n, _)| n != new_name);
            entries.push((new_name.to_string(), Arc::clone(&moved)));
        })?;
        with_dir_mut(old_dir, |entries| entries.retain(|(n, _)| n != old_name))?;
        Ok(())
    }

    fn readdir(&self, dir: &Vnode, offset: &mut u64) -> KResult<Option<DirEntry>> {
        with_dir(dir, |entries| {
            let idx = usize::try_from(*offset).map_err(|_| KError::Overflow)?;
            Ok(entries.get(idx).map(|(name, vnode)| {
                *offset += 1;
                DirEntry { ino: vnode.ino(), name: name.clone(), vtype: vnode.vtype() }
            }))
        })?
    }

    fn symlink(&self, dir: &Vnode, name: &str, target: &str) -> KResult<()> {
        if entry_exists(dir, name)? {
            return Err(KError::AlreadyExists);
        }
        let parent_arc = dir.self_arc();
        let child =
            self.new_vnode(VnodeType::Symlink, 0o777, TmpfsNode::symlink(target.to_string()), Some(&parent_arc));
        child.with_attr_mut(|attr| attr.size = target.len() as u64);
        with_dir_mut(dir, |entries| entries.push((name.to_string(), child)))?;
        Ok(())
    }

    fn readlink(&self, vnode: &Vnode) -> KResult<String> {
        let node = node_of(vnode);
        let guard = node.data.lock();
        match &*guard {
            TmpfsData::Symlink(target) => Ok(target.clone()),
            _ => Err(KError::InvalidArgument),
        }
    }

    fn link(&self, dir: &Vnode, name: &str, target: &Arc<Vnode>) -> KResult<()> {
        if target.vtype() == VnodeType::Dir {
            return Err(KError::NotPermitted);
        }
        if entry_exists(dir, name)? {
            return Err(KError::AlreadyExists);
        }
        with_dir_mut(dir, |entries| entries.push((name.to_string(), Arc::clone(target))))?;
        target.with_attr_mut(|attr| attr.nlink += 1);
        Ok(())
    }

    fn open(&self, _vnode: &Vnode, _flags: OpenFlags) -> KResult<()> {
        Ok(())
    }

    fn close(&self, _vnode: &Vnode) -> KResult<()> {
        Ok(())
    }

    fn release(&self, vnode: &Vnode) {
        if let TmpfsData::File(bytes) = &*node_of(vnode).data.lock() {
            self.shared.total_bytes.fetch_sub(bytes.len() as u64, Ordering::AcqRel);
        }
    }
}

fn grow_to(bytes: &mut Vec<u8>, needed: usize) {
    if bytes.capacity() < needed {
        let mut new_cap = bytes.capacity().max(INITIAL_FILE_CAPACITY);
        while new_cap < needed {
            new_cap *= 2;
        }
        bytes.reserve(new_cap - bytes.len());
    }
    bytes.resize(needed, 0);
}

fn with_dir<R>(vnode: &Vnode, f: impl FnOnce(&[(String, Arc<Vnode>)]) -> R) -> KResult<R> {
    let node = node_of(vnode);
    let guard = node.data.lock();
    match &*guard {
        TmpfsData::Dir(entries) => Ok(f(entries)),
        _ => Err(KError::NotADirectory),
    }
}

fn with_dir_mut<R>(vnode: &Vnode, f: impl FnOnce(&mut Vec<(String, Arc<Vnode>)>) -> R) -> KResult<R> {
    let node = node_of(vnode);
    let mut guard = node.data.lock();
    match &mut *guard {
        TmpfsData::Dir(entries) => Ok(f(entries)),
        _ => Err(KError::NotADirectory),
    }
}

fn entry_exists(dir: &Vnode, name: &str) -> KResult<bool> {
    with_dir(dir, |entries| entries.iter().any(|(n, _)| n == name))
}

/// A mounted tmpfs instance.
struct TmpfsFs {
    root: Arc<Vnode>,
    shared: Arc<TmpfsShared>,
}

impl FilesystemOps for TmpfsFs {
    fn root(&self) -> Arc<Vnode> {
        Arc::clone(&self.root)
    }

    fn sync_fs(&self) -> KResult<()> {
        Ok(())
    }

    fn unmount(&self) -> KResult<()> {
        Ok(())
    }
}

/// Registers tmpfs as a mountable filesystem type under the name
/// `"tmpfs"`.
pub struct TmpfsType;

impl TmpfsType {
    /// Creates the tmpfs filesystem type, ready to register with a [`Vfs`](crate::vfs::Vfs).
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TmpfsType {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemType for TmpfsType {
    fn name(&self) -> &str {
        "tmpfs"
    }

    fn mount(&self, mount: MountId, _device: Option<DeviceId>, _flags: MountFlags) -> KResult<Arc<dyn FilesystemOps>> {
        let shared = Arc::new(TmpfsShared {
            next_ino: AtomicU64::new(1),
            total_nodes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        });
        let ops = Arc::new_cyclic(|self_weak| TmpfsOps {
            mount,
            shared: Arc::clone(&shared),
            self_weak: self_weak.clone(),
        });
        let ino = shared.alloc_ino();
        let root = Vnode::new(
            mount,
            ino,
            VnodeType::Dir,
            VnodeAttr { mode: 0o755, ..VnodeAttr::default() },
            Arc::clone(&ops) as Arc<dyn VnodeOps>,
            None,
            TmpfsNode::dir(),
        );
        with_dir_mut(&root, |entries| {
            entries.push((".".to_string(), Arc::clone(&root)));
            entries.push(("..".to_string(), Arc::clone(&root)));
        })
        .expect("freshly created root is a directory");
        shared.total_nodes.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(TmpfsFs { root, shared }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::Vfs;

    fn mounted() -> Vfs {
        let vfs = Vfs::new();
        vfs.register_filesystem(Arc::new(TmpfsType::new())).unwrap();
        vfs.mount("tmpfs", "/", None, MountFlags::empty()).unwrap();
        vfs
    }

    #[test]
    fn write_past_initial_capacity_doubles_buffer() {
        let vfs = mounted();
        let file = vfs.open("/", "/big", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        let chunk = alloc::vec![0xABu8; INITIAL_FILE_CAPACITY + 1];
        assert_eq!(
            vireo_core::fd::FileHandle::write(&*file, &chunk).unwrap(),
            INITIAL_FILE_CAPACITY + 1
        );
        assert_eq!(vfs.lookup("/", "/big").unwrap().attr().size, (INITIAL_FILE_CAPACITY + 1) as u64);
    }

    #[test]
    fn truncate_down_then_up_zero_fills_new_tail() {
        let vfs = mounted();
        let file = vfs.open("/", "/f", OpenFlags::CREAT | OpenFlags::RDWR, 0o644).unwrap();
        vireo_core::fd::FileHandle::write(&*file, b"abcdef").unwrap();
        let vnode = vfs.lookup("/", "/f").unwrap();
        vnode.ops().truncate(&vnode, 2).unwrap();
        vnode.ops().truncate(&vnode, 5).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(vnode.ops().read(&vnode, &mut buf, 0).unwrap(), 5);
        assert_eq!(buf, [b'a', b'b', 0, 0, 0]);
    }

    #[test]
    fn fresh_directory_contains_only_dot_and_dotdot() {
        let vfs = mounted();
        vfs.mkdir("/", "/d", 0o755).unwrap();
        let dir = vfs.lookup("/", "/d").unwrap();
        let count = with_dir(&dir, <[_]>::len).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let vfs = mounted();
        vfs.mkdir("/", "/d", 0o755).unwrap();
        vfs.mkdir("/", "/d/child", 0o755).unwrap();
        assert_eq!(vfs.rmdir("/", "/d"), Err(KError::NotEmpty));
        vfs.rmdir("/", "/d/child").unwrap();
        vfs.rmdir("/", "/d").unwrap();
    }

    #[test]
    fn creating_duplicate_name_fails() {
        let vfs = mounted();
        vfs.open("/", "/dup", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644).unwrap();
        let err = vfs.open("/", "/dup", OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY, 0o644).unwrap_err();
        assert_eq!(err, KError::AlreadyExists);
    }
}

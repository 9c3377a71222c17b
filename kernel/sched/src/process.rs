//! The process control block and the process table built on top of the
//! scheduler.
//!
//! Grounded on `original_source/src/include/core/proc.h`'s `pcb_t`: up to
//! [`MAX_THREADS`] owned TCBs, a parent/child/sibling tree rooted at PID 1,
//! a [`MAX_FDS`]-slot FD table, 32 signal handlers, an exit-waiters wait
//! queue, resource limits and cumulative stats. The raw `parent`/
//! `first_child`/`next_sibling` pointers of the source become [`Pid`]
//! indices into [`ProcessTable`]'s arena; the raw
//! `file_descriptor_t *` slots become `Arc<dyn FileHandle>` (the
//! capability-trait pattern from [`vireo_core::fd::FileHandle`] — see that
//! module's doc comment for why the FD table cannot name `vireo-fs`
//! directly without creating a dependency cycle).

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use planck_noalloc::vec::ArrayVec;
use vireo_core::error::{KError, KResult};
use vireo_core::fd::FileHandle;
use vireo_core::id::{Fd, Pid, Tid};
use vireo_core::sync::IrqSpinLock;

use crate::clock::MonotonicClock;
use crate::context::ContextSwitch;
use crate::scheduler::Scheduler;
use crate::signal::SignalState;
use crate::tcb::{KernelStack, ThreadState};
use crate::waitqueue::WaitQueue;

/// Maximum number of threads owned by one process.
pub const MAX_THREADS: usize = 16;
/// Maximum number of open file descriptors per process.
pub const MAX_FDS: usize = Fd::MAX as usize;
/// Maximum length of a process name.
pub const NAME_MAX: usize = 32;

/// Process lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Created but not yet made runnable.
    New,
    /// Has at least one thread currently running.
    Running,
    /// Runnable but not currently scheduled.
    Ready,
    /// Blocked (e.g. in `waitpid`).
    Waiting,
    /// Marked exiting; threads are being torn down.
    Terminated,
    /// Exited and recorded an exit status, awaiting `waitpid` to reap it.
    Zombie,
}

/// User/group identity a process runs with.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials {
    /// Real user id.
    pub uid: u32,
    /// Effective user id.
    pub euid: u32,
    /// Saved user id.
    pub suid: u32,
    /// Real group id.
    pub gid: u32,
    /// Effective group id.
    pub egid: u32,
    /// Saved group id.
    pub sgid: u32,
}

/// Resource limits (resource limits).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    /// CPU time limit in nanoseconds, `0` for unlimited.
    pub cpu_time_ns: u64,
    /// Address-space size limit in bytes, `0` for unlimited.
    pub max_memory: u64,
    /// Open-file-descriptor limit, `0` for unlimited (capped by [`MAX_FDS`]
    /// regardless).
    pub max_files: u64,
    /// Thread-count limit, `0` for unlimited (capped by [`MAX_THREADS`]
    /// regardless).
    pub max_threads: u64,
    /// Child-process limit, `0` for unlimited.
    pub max_children: u64,
}

/// Cumulative per-process statistics (cumulative stats).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStats {
    /// Page faults resolved without disk I/O (lazy/COW faults).
    pub minor_faults: u64,
    /// Page faults that required disk I/O (always zero; demand paging from
    /// disk is out of scope here).
    pub major_faults: u64,
    /// Number of times one of this process's threads was scheduled.
    pub context_switches: u64,
    /// Number of signals delivered to this process.
    pub signals_received: u64,
    /// Number of signals this process sent (via `kill`-equivalent calls).
    pub signals_sent: u64,
    /// Number of syscalls made (tracked by an external syscall layer;
    /// exposed here as a counter the caller may bump).
    pub syscalls: u64,
}

/// The process control block.
pub struct Pcb {
    pid: Pid,
    name: String,
    state: ProcState,
    priority: u8,
    parent: Option<Pid>,
    first_child: Option<Pid>,
    next_sibling: Option<Pid>,
    threads: ArrayVec<Tid, MAX_THREADS>,
    main_thread: Option<Tid>,
    pgid: Pid,
    sid: Pid,
    cred: Credentials,
    fds: Vec<Option<Arc<dyn FileHandle>>>,
    cwd: String,
    signals: SignalState,
    exit_waiters: WaitQueue,
    limits: ResourceLimits,
    stats: ProcStats,
    exit_code: i32,
    exit_time_ns: u64,
    time_created_ns: u64,
    waited_on: bool,
}

impl Pcb {
    fn new(pid: Pid, name: &str, priority: u8, parent: Option<Pid>, cred: Credentials, now_ns: u64) -> Self {
        let mut truncated = String::with_capacity(NAME_MAX);
        for ch in name.chars().take(NAME_MAX) {
            truncated.push(ch);
        }
        let mut fds = Vec::with_capacity(MAX_FDS);
        fds.resize_with(MAX_FDS, || None);
        Self {
            pid,
            name: truncated,
            state: ProcState::New,
            priority,
            parent,
            first_child: None,
            next_sibling: None,
            threads: ArrayVec::new(),
            main_thread: None,
            pgid: pid,
            sid: pid,
            cred,
            fds,
            cwd: String::from("/"),
            signals: SignalState::new(),
            exit_waiters: WaitQueue::new(),
            limits: ResourceLimits::default(),
            stats: ProcStats::default(),
            exit_code: 0,
            exit_time_ns: 0,
            time_created_ns: now_ns,
            waited_on: false,
        }
    }

    /// This process's id.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// The process name, truncated to [`NAME_MAX`] characters.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ProcState {
        self.state
    }

    /// The parent process, if any (`None` only for PID 1).
    #[must_use]
    pub const fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// Process group id.
    #[must_use]
    pub const fn pgid(&self) -> Pid {
        self.pgid
    }

    /// Session id.
    #[must_use]
    pub const fn sid(&self) -> Pid {
        self.sid
    }

    /// This process's credentials.
    #[must_use]
    pub const fn credentials(&self) -> Credentials {
        self.cred
    }

    /// The main thread, if one has been created.
    #[must_use]
    pub const fn main_thread(&self) -> Option<Tid> {
        self.main_thread
    }

    /// All threads currently owned by this process.
    #[must_use]
    pub fn threads(&self) -> &[Tid] {
        self.threads.as_slice()
    }

    /// Current working directory, always stored absolute.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Sets the current working directory.
    pub fn set_cwd(&mut self, path: &str) {
        self.cwd = path.to_string();
    }

    /// Mutable access to this process's signal state.
    pub fn signals_mut(&mut self) -> &mut SignalState {
        &mut self.signals
    }

    /// Read access to this process's signal state.
    #[must_use]
    pub fn signals(&self) -> &SignalState {
        &self.signals
    }

    /// Resource limits.
    #[must_use]
    pub const fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Sets resource limits.
    pub fn set_limits(&mut self, limits: ResourceLimits) {
        self.limits = limits;
    }

    /// Cumulative stats.
    #[must_use]
    pub const fn stats(&self) -> ProcStats {
        self.stats
    }

    /// Exit code recorded by `proc_exit`, valid once [`Pcb::state`] is
    /// [`ProcState::Zombie`] or [`ProcState::Terminated`].
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Wall-clock time this process was created, in scheduler-relative
    /// nanoseconds.
    #[must_use]
    pub const fn time_created_ns(&self) -> u64 {
        self.time_created_ns
    }

    /// Allocates the lowest free FD slot in `[0, MAX_FDS)` (`fd_alloc`).
    ///
    /// # Errors
    /// Returns [`KError::NoMem`] (POSIX `EMFILE`-equivalent)
    /// if every slot is occupied.
    fn fd_alloc(&self) -> KResult<Fd> {
        self.fds
            .iter()
            .position(Option::is_none)
            .map(|i| Fd::new(i as u32))
            .ok_or(KError::NoMem)
    }

    /// Installs `handle` at a specific slot (`fd_install`), overwriting
    /// whatever was there (used by `dup2`-style callers).
    fn fd_install(&mut self, fd: Fd, handle: Arc<dyn FileHandle>) {
        self.fds[fd.as_usize()] = Some(handle);
    }

    /// Looks up an open file by descriptor number.
    fn fd_get(&self, fd: Fd) -> Option<Arc<dyn FileHandle>> {
        self.fds.get(fd.as_usize()).and_then(Clone::clone)
    }

    /// Closes a descriptor, calling [`FileHandle::close`] if this was the
    /// last reference to the handle.
    fn fd_close(&mut self, fd: Fd) {
        if let Some(slot) = self.fds.get_mut(fd.as_usize()) {
            if let Some(handle) = slot.take() {
                if Arc::strong_count(&handle) == 1 {
                    handle.close();
                }
            }
        }
    }

    fn fd_close_all(&mut self) {
        for slot in &mut self.fds {
            if let Some(handle) = slot.take() {
                if Arc::strong_count(&handle) == 1 {
                    handle.close();
                }
            }
        }
    }
}

struct ProcessTableState {
    procs: Vec<Option<Pcb>>,
}

impl ProcessTableState {
    fn pcb(&self, pid: Pid) -> &Pcb {
        self.procs[pid.as_u32() as usize]
            .as_ref()
            .expect("process table: dangling pid")
    }

    fn pcb_mut(&mut self, pid: Pid) -> &mut Pcb {
        self.procs[pid.as_u32() as usize]
            .as_mut()
            .expect("process table: dangling pid")
    }
}

/// The arena owning every [`Pcb`] and the PID-1-rooted process tree
///. Generic over the same [`MonotonicClock`]/
/// [`ContextSwitch`] parameters as [`Scheduler`] so process-layer logic is
/// exercised on the host exactly like the scheduler itself.
pub struct ProcessTable {
    state: IrqSpinLock<ProcessTableState>,
    next_pid: AtomicU32,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Creates an empty process table. Index 0 is reserved (unused) so
    /// [`Pid::INIT`] can be `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: IrqSpinLock::new(ProcessTableState {
                procs: alloc::vec![None],
            }),
            next_pid: AtomicU32::new(1),
        }
    }

    fn alloc_pid(&self) -> Pid {
        Pid::new(self.next_pid.fetch_add(1, Ordering::AcqRel))
    }

    /// Wraps the scheduler's already-adopted boot thread as PID 1
    /// (process.init (wraps boot thread as PID 1)).
    ///
    /// # Panics
    /// Panics if the process table already has PID 1, or if the scheduler
    /// has no current thread.
    pub fn adopt_boot_process<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        name: &str,
    ) -> Pid {
        let pid = self.alloc_pid();
        assert_eq!(pid, Pid::INIT, "PID 1 must be the first process created");
        let boot_tid = scheduler.current_tid().expect("scheduler has no current thread");
        scheduler.with_tcb_mut(boot_tid, |t| t.set_owner_proc(pid));
        let mut pcb = Pcb::new(pid, name, 128, None, Credentials::default(), scheduler.uptime_ns());
        pcb.state = ProcState::Running;
        pcb.threads.push(boot_tid);
        pcb.main_thread = Some(boot_tid);
        let mut state = self.state.lock();
        state.procs.push(Some(pcb));
        pid
    }

    /// Creates a new process with a fresh main kernel thread (`proc_create`
    /// / `proc_create_child`). Credentials and, by default, the working
    /// directory are inherited from `parent` when one is given.
    pub fn create<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        name: &str,
        stack: KernelStack,
        priority: u8,
        parent: Option<Pid>,
    ) -> Pid {
        let pid = self.alloc_pid();
        let (cred, cwd) = {
            let state = self.state.lock();
            match parent {
                Some(p) => {
                    let parent_pcb = state.pcb(p);
                    (parent_pcb.credentials(), parent_pcb.cwd().to_string())
                }
                None => (Credentials::default(), String::from("/")),
            }
        };
        let tid = scheduler.spawn(name, stack, priority);
        scheduler.with_tcb_mut(tid, |t| t.set_owner_proc(pid));

        let mut pcb = Pcb::new(pid, name, priority, parent, cred, scheduler.uptime_ns());
        pcb.set_cwd(&cwd);
        pcb.state = ProcState::Ready;
        pcb.threads.push(tid);
        pcb.main_thread = Some(tid);

        let mut state = self.state.lock();
        while state.procs.len() <= pid.as_u32() as usize {
            state.procs.push(None);
        }
        state.procs[pid.as_u32() as usize] = Some(pcb);

        if let Some(parent_pid) = parent {
            let first_child = state.pcb(parent_pid).first_child;
            state.pcb_mut(pid).next_sibling = first_child;
            state.pcb_mut(parent_pid).first_child = Some(pid);
        }
        pid
    }

    /// Adds another kernel thread to an existing process (`proc_add_thread`).
    ///
    /// # Errors
    /// Returns [`KError::NoMem`] if the process already owns
    /// [`MAX_THREADS`] threads.
    pub fn add_thread<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        pid: Pid,
        name: &str,
        stack: KernelStack,
        priority: u8,
    ) -> KResult<Tid> {
        let mut state = self.state.lock();
        let pcb = state.pcb_mut(pid);
        if pcb.threads.is_full() {
            return Err(KError::NoMem);
        }
        drop(state);
        let tid = scheduler.spawn(name, stack, priority);
        scheduler.with_tcb_mut(tid, |t| t.set_owner_proc(pid));
        self.state.lock().pcb_mut(pid).threads.push(tid);
        Ok(tid)
    }

    /// Looks up a process by id.
    #[must_use]
    pub fn find(&self, pid: Pid) -> bool {
        let state = self.state.lock();
        matches!(state.procs.get(pid.as_u32() as usize), Some(Some(_)))
    }

    /// Runs `f` with read access to `pid`'s PCB.
    pub fn with_pcb<R>(&self, pid: Pid, f: impl FnOnce(&Pcb) -> R) -> R {
        f(self.state.lock().pcb(pid))
    }

    /// Runs `f` with mutable access to `pid`'s PCB.
    pub fn with_pcb_mut<R>(&self, pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> R {
        f(self.state.lock().pcb_mut(pid))
    }

    /// Terminates the process `pid` with `exit_code` (`proc_exit`): marks
    /// it exiting, and if it has a parent and has
    /// not already been reaped, transitions it to `Zombie` and wakes the
    /// parent's exit waiters; then unconditionally tears down every
    /// thread, closes every FD, and reparents children to PID 1.
    ///
    /// # Panics
    /// Panics if `pid == Pid::INIT` (PID 1 never exits).
    pub fn exit<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        pid: Pid,
        exit_code: i32,
    ) {
        assert_ne!(pid, Pid::INIT, "PID 1 never exits");

        let (parent, threads, became_zombie) = {
            let mut state = self.state.lock();
            let now = scheduler.uptime_ns();
            let pcb = state.pcb_mut(pid);
            pcb.exit_code = exit_code;
            pcb.exit_time_ns = now;
            pcb.fd_close_all();
            let became_zombie = pcb.parent.is_some() && !pcb.waited_on;
            pcb.state = if became_zombie {
                ProcState::Zombie
            } else {
                ProcState::Terminated
            };
            let threads: Vec<Tid> = pcb.threads.iter().copied().collect();
            (pcb.parent, threads, became_zombie)
        };

        if let Some(parent_pid) = parent {
            if became_zombie {
                self.with_pcb_mut(parent_pid, |p| {
                    p.signals_mut().raise(crate::signal::SIGCHLD);
                });
                let waiters = {
                    let state = self.state.lock();
                    state.pcb(parent_pid).exit_waiters.drain_all()
                };
                for tid in waiters {
                    scheduler.unblock(tid);
                }
            }
        }

        self.reparent_children(pid, Pid::INIT);

        let current = scheduler.current_tid();
        for tid in threads {
            if Some(tid) == current {
                scheduler.terminate_current();
            } else {
                scheduler.terminate_other(tid);
            }
        }
    }

    /// Reparents every direct child of `pid` to `new_parent` (all
    /// children reparent to PID 1 on exit), used both by `proc_exit`
    /// and available standalone for explicit orphan handling.
    pub fn reparent_children(&self, pid: Pid, new_parent: Pid) {
        let mut state = self.state.lock();
        let mut child = state.pcb(pid).first_child;
        state.pcb_mut(pid).first_child = None;
        while let Some(c) = child {
            let next = state.pcb(c).next_sibling;
            state.pcb_mut(c).parent = Some(new_parent);
            let new_parent_first_child = state.pcb(new_parent).first_child;
            state.pcb_mut(c).next_sibling = new_parent_first_child;
            state.pcb_mut(new_parent).first_child = Some(c);
            child = next;
        }
    }

    /// Waits for a child to exit (`proc_waitpid`).
    ///
    /// `target`: `Some(pid)` waits for a specific child; `None` waits for
    /// any child. `no_hang` implements `WNOHANG`: returns `Ok(None)`
    /// immediately instead of blocking if no matching zombie exists yet.
    ///
    /// # Errors
    /// Returns [`KError::InvalidArgument`] if `target` names a process that
    /// is not a child of `parent`.
    pub fn waitpid<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        parent: Pid,
        target: Option<Pid>,
        no_hang: bool,
    ) -> KResult<Option<(Pid, i32)>> {
        loop {
            let found = {
                let mut state = self.state.lock();
                let mut child = state.pcb(parent).first_child;
                let mut result = None;
                while let Some(c) = child {
                    let next = state.pcb(c).next_sibling;
                    let matches_target = target.is_none() || target == Some(c);
                    if matches_target && state.pcb(c).state() == ProcState::Zombie {
                        let code = state.pcb(c).exit_code();
                        state.pcb_mut(c).waited_on = true;
                        result = Some((c, code));
                        break;
                    }
                    child = next;
                }
                if result.is_none() && target.is_some() {
                    let exists_as_child = {
                        let mut c = state.pcb(parent).first_child;
                        let mut found_as_child = false;
                        while let Some(cur) = c {
                            if Some(cur) == target {
                                found_as_child = true;
                                break;
                            }
                            c = state.pcb(cur).next_sibling;
                        }
                        found_as_child
                    };
                    if !exists_as_child {
                        return Err(KError::InvalidArgument);
                    }
                }
                result
            };

            if let Some(result) = found {
                return Ok(Some(result));
            }
            if no_hang {
                return Ok(None);
            }
            self.with_pcb(parent, |p| p.exit_waiters.enqueue(
                scheduler.current_tid().expect("waitpid with no current thread"),
            ));
            scheduler.block_current(ThreadState::WaitingEvent);
        }
    }

    /// Sweeps and frees every zombie PCB whose `waited_on` flag is set
    /// (`proc_reap_zombies`). Returns the number of PCBs freed.
    pub fn reap_zombies(&self) -> usize {
        let mut state = self.state.lock();
        let mut reaped = 0;
        for slot in &mut state.procs {
            let should_free = matches!(slot, Some(pcb) if pcb.state == ProcState::Zombie && pcb.waited_on);
            if should_free {
                *slot = None;
                reaped += 1;
            }
        }
        reaped
    }

    /// Number of zombie processes awaiting reap (`proc_count_zombies`).
    #[must_use]
    pub fn count_zombies(&self) -> usize {
        let state = self.state.lock();
        state
            .procs
            .iter()
            .filter(|s| matches!(s, Some(pcb) if pcb.state == ProcState::Zombie))
            .count()
    }

    /// Sends `sig` to `pid`, marking it pending and waking the process's
    /// main thread if it is sleeping (`signal_send`).
    pub fn send_signal<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
        pid: Pid,
        sig: u32,
    ) {
        let main_thread = {
            let mut state = self.state.lock();
            let pcb = state.pcb_mut(pid);
            pcb.signals_mut().raise(sig);
            pcb.stats.signals_received += 1;
            pcb.main_thread
        };
        if let Some(tid) = main_thread {
            scheduler.wake_interruptible(tid);
        }
    }

    /// Allocates a free FD slot for `pid` (`proc_fd_alloc`).
    ///
    /// # Errors
    /// Returns [`KError::NoMem`] if the process has no free FD slot.
    pub fn fd_alloc(&self, pid: Pid) -> KResult<Fd> {
        self.with_pcb(pid, Pcb::fd_alloc)
    }

    /// Installs an open file at a specific descriptor number
    /// (`proc_fd_install`).
    pub fn fd_install(&self, pid: Pid, fd: Fd, handle: Arc<dyn FileHandle>) {
        self.with_pcb_mut(pid, |p| p.fd_install(fd, handle));
    }

    /// Allocates the lowest free descriptor and installs `handle` into it
    /// in one step, the common open() path.
    ///
    /// # Errors
    /// Returns [`KError::NoMem`] if no descriptor is free.
    pub fn fd_open(&self, pid: Pid, handle: Arc<dyn FileHandle>) -> KResult<Fd> {
        let mut state = self.state.lock();
        let pcb = state.pcb_mut(pid);
        let fd = pcb.fd_alloc()?;
        pcb.fd_install(fd, handle);
        Ok(fd)
    }

    /// Looks up the open file behind `fd` (`proc_fd_get`).
    #[must_use]
    pub fn fd_get(&self, pid: Pid, fd: Fd) -> Option<Arc<dyn FileHandle>> {
        self.with_pcb(pid, |p| p.fd_get(fd))
    }

    /// Closes `fd` in `pid`'s table (`proc_fd_close`).
    pub fn fd_close(&self, pid: Pid, fd: Fd) {
        self.with_pcb_mut(pid, |p| p.fd_close(fd));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::context::NullContextSwitch;
    use crate::signal::SIGTERM;
    use vireo_core::error::KError;

    fn new_sched() -> Scheduler<FakeClock, NullContextSwitch> {
        let sched = Scheduler::new(FakeClock::new(), NullContextSwitch::new());
        sched.init(KernelStack::new(0, 4096));
        sched
    }

    #[test]
    fn adopt_boot_process_is_pid_one() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let pid = table.adopt_boot_process(&sched, "init");
        assert_eq!(pid, Pid::INIT);
        assert_eq!(table.with_pcb(pid, Pcb::state), ProcState::Running);
    }

    #[test]
    fn create_child_links_into_parent_tree() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        let child = table.create(&sched, "worker", KernelStack::new(0x1000, 4096), 128, Some(init));
        assert_eq!(table.with_pcb(child, Pcb::parent), Some(init));
        assert_eq!(table.with_pcb(init, |p| p.first_child), Some(child));
    }

    #[test]
    fn fd_alloc_returns_lowest_free_slot() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        assert_eq!(table.fd_alloc(init).unwrap().as_u32(), 0);
    }

    #[test]
    fn fd_table_exhaustion_reports_nomem() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        struct NullHandle;
        impl FileHandle for NullHandle {
            fn read(&self, _buf: &mut [u8]) -> KResult<usize> {
                Ok(0)
            }
            fn write(&self, _buf: &[u8]) -> KResult<usize> {
                Ok(0)
            }
            fn seek(&self, _offset: i64, _whence: vireo_core::fd::SeekWhence) -> KResult<u64> {
                Ok(0)
            }
            fn sync(&self) -> KResult<()> {
                Ok(())
            }
            fn close(&self) {}
        }
        for _ in 0..MAX_FDS {
            table.fd_open(init, Arc::new(NullHandle)).unwrap();
        }
        assert_eq!(table.fd_alloc(init), Err(KError::NoMem));
    }

    #[test]
    fn exit_without_being_waited_becomes_zombie() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        let child = table.create(&sched, "worker", KernelStack::new(0x1000, 4096), 128, Some(init));
        sched.schedule();
        table.exit(&sched, child, 7);
        assert_eq!(table.with_pcb(child, Pcb::state), ProcState::Zombie);
        assert_eq!(table.with_pcb(child, Pcb::exit_code), 7);
    }

    #[test]
    fn waitpid_reaps_specific_zombie_child() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        let child = table.create(&sched, "worker", KernelStack::new(0x1000, 4096), 128, Some(init));
        sched.schedule();
        table.exit(&sched, child, 3);
        let (pid, code) = table
            .waitpid(&sched, init, Some(child), true)
            .unwrap()
            .expect("zombie should be found immediately");
        assert_eq!(pid, child);
        assert_eq!(code, 3);
    }

    #[test]
    fn waitpid_nohang_returns_none_when_no_zombie() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        table.create(&sched, "worker", KernelStack::new(0x1000, 4096), 128, Some(init));
        assert_eq!(table.waitpid(&sched, init, None, true).unwrap(), None);
    }

    #[test]
    fn orphaned_grandchildren_reparent_to_pid_one() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        let mid = table.create(&sched, "mid", KernelStack::new(0x1000, 4096), 128, Some(init));
        let leaf = table.create(&sched, "leaf", KernelStack::new(0x2000, 4096), 128, Some(mid));
        sched.schedule();
        table.exit(&sched, mid, 0);
        assert_eq!(table.with_pcb(leaf, Pcb::parent), Some(init));
    }

    #[test]
    fn reap_zombies_frees_waited_on_pcbs() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        let child = table.create(&sched, "worker", KernelStack::new(0x1000, 4096), 128, Some(init));
        sched.schedule();
        table.exit(&sched, child, 0);
        table.waitpid(&sched, init, Some(child), true).unwrap();
        assert_eq!(table.reap_zombies(), 1);
        assert!(!table.find(child));
    }

    #[test]
    fn send_signal_marks_pending_on_target() {
        let sched = new_sched();
        let table = ProcessTable::new();
        let init = table.adopt_boot_process(&sched, "init");
        table.send_signal(&sched, init, SIGTERM);
        assert!(table.with_pcb(init, |p| p.signals().has_deliverable()));
    }
}

//! Arenas: lifetime owners for native memory.
//!
//! Every [`Segment`] handed out by [`Arena::alloc`] is governed by an arena,
//! and the arena decides when the memory behind it is released. The release
//! policy is fixed at creation by an [`ArenaKind`]:
//!
//! | kind       | release                                          | `close()`           |
//! |------------|--------------------------------------------------|---------------------|
//! | `Implicit` | all allocations once handle and segments are gone | `NotClosable`       |
//! | `Auto`     | all allocations once handle and segments are gone | `NotClosable`       |
//! | `Confined` | on `close()` from the owning thread               | frees everything    |
//! | `Shared`   | on `close()` from any thread                      | frees everything    |
//! | `Global`   | never                                            | no-op               |
//!
//! `Implicit` differs from `Auto` only in chunking: every allocation gets an
//! exactly-sized chunk of its own instead of sharing a bump chunk.
//!
//! Segments keep their arena's bookkeeping alive, so a stale access after
//! `close()` is caught by the segment's liveness check instead of reading
//! freed memory. A confined arena also rejects access from other threads.
//! Shared arenas do no locking on segment reads and writes: callers keep
//! concurrent writers and `close()` apart.
//!
//! # Example
//!
//! ```
//! use marshal_mem::{Arena, MemError};
//!
//! let arena = Arena::confined();
//! let segment = arena.alloc(8, 8).unwrap();
//! segment.write::<u64>(0, 42).unwrap();
//! assert_eq!(segment.read::<u64>(0).unwrap(), 42);
//!
//! arena.close().unwrap();
//! assert!(matches!(segment.read::<u64>(0), Err(MemError::UseAfterClose { .. })));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use marshal_log::{debug, trace, warn};

use crate::address::Address;
use crate::chunk::Chunk;
use crate::config::ArenaConfig;
use crate::error::{MemError, Result};
use crate::segment::Segment;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CLEANUP_ID: AtomicU64 = AtomicU64::new(1);

/// Release-time action attached to a segment, given the segment's address.
pub type CleanupFn = Box<dyn FnOnce(Address) + Send + 'static>;

/// Lifecycle policy of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    /// One exactly-sized chunk per allocation, freed together when unreachable.
    Implicit,
    /// Allocations batched into chunks, freed together when unreachable.
    Auto,
    /// Owned by one thread, freed on explicit close.
    Confined,
    /// Usable from any thread, freed on explicit close.
    Shared,
    /// Lives for the whole process.
    Global,
}

impl ArenaKind {
    /// Lower-case name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            ArenaKind::Implicit => "implicit",
            ArenaKind::Auto => "auto",
            ArenaKind::Confined => "confined",
            ArenaKind::Shared => "shared",
            ArenaKind::Global => "global",
        }
    }

    /// Whether `close()` releases memory for this kind.
    pub const fn is_closable(self) -> bool {
        matches!(self, ArenaKind::Confined | ArenaKind::Shared)
    }
}

impl fmt::Display for ArenaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation statistics of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Bytes handed out to segments.
    pub allocated: usize,
    /// Number of segments allocated.
    pub segments: usize,
    /// Number of chunks currently owned.
    pub chunks: usize,
    /// Total capacity of owned chunks in bytes.
    pub capacity: usize,
}

struct Cleanup {
    address: Address,
    action: CleanupFn,
}

#[derive(Default)]
struct ArenaState {
    chunks: Vec<Chunk>,
    cleanups: IndexMap<u64, Cleanup>,
    allocated: usize,
    segments: usize,
}

pub(crate) struct ArenaInner {
    id: u64,
    kind: ArenaKind,
    owner: Option<ThreadId>,
    closed: AtomicBool,
    config: ArenaConfig,
    state: Mutex<ArenaState>,
    #[cfg(feature = "close-backtrace")]
    closed_at: Mutex<Option<backtrace::Backtrace>>,
}

impl ArenaInner {
    fn new(kind: ArenaKind, config: ArenaConfig) -> Self {
        let owner = (kind == ArenaKind::Confined).then(|| thread::current().id());
        ArenaInner {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            owner,
            closed: AtomicBool::new(false),
            config,
            state: Mutex::new(ArenaState::default()),
            #[cfg(feature = "close-backtrace")]
            closed_at: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects access after close and, for confined arenas, from other threads.
    pub(crate) fn check_access(&self) -> Result<()> {
        if self.is_closed() {
            warn!("stale access to segment of closed arena {}", self.id);
            #[cfg(feature = "close-backtrace")]
            if let Some(bt) = self
                .closed_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_mut()
            {
                bt.resolve();
                warn!("arena {} was closed at:\n{:?}", self.id, bt);
            }
            return Err(MemError::UseAfterClose { arena: self.id });
        }
        if let Some(owner) = self.owner
            && owner != thread::current().id()
        {
            warn!("confined arena {} touched from a foreign thread", self.id);
            return Err(MemError::WrongThread { arena: self.id });
        }
        Ok(())
    }

    fn allocate(&self, size: usize, align: usize) -> Result<Address> {
        let mut state = self.lock();

        let ptr = match state.chunks.last_mut().and_then(|c| c.try_alloc(size, align)) {
            Some(ptr) => ptr,
            None => {
                let request = Chunk::capacity_for(size, align);
                let capacity = match self.kind {
                    ArenaKind::Implicit => request,
                    _ => match state.chunks.last() {
                        Some(last) => self.config.next_chunk_size(last.capacity(), request),
                        None => self.config.chunk_size.max(request),
                    },
                };
                let mut chunk = Chunk::new(capacity)?;
                let ptr = chunk
                    .try_alloc(size, align)
                    .ok_or(MemError::OutOfMemory { size })?;
                state.chunks.push(chunk);
                ptr
            }
        };

        state.allocated += size;
        state.segments += 1;
        let address = Address::from_ptr(ptr.as_ptr());
        trace!("arena {} allocated {} bytes at {}", self.id, size, address);
        Ok(address)
    }

    pub(crate) fn register_cleanup(&self, address: Address, action: CleanupFn) -> u64 {
        let id = NEXT_CLEANUP_ID.fetch_add(1, Ordering::Relaxed);
        self.lock().cleanups.insert(id, Cleanup { address, action });
        id
    }

    /// Detaches a cleanup so it can move to another arena.
    pub(crate) fn take_cleanup(&self, id: u64) -> Option<(Address, CleanupFn)> {
        self.lock()
            .cleanups
            .shift_remove(&id)
            .map(|c| (c.address, c.action))
    }

    fn stats(&self) -> ArenaStats {
        let state = self.lock();
        ArenaStats {
            allocated: state.allocated,
            segments: state.segments,
            chunks: state.chunks.len(),
            capacity: state.chunks.iter().map(Chunk::capacity).sum(),
        }
    }

    /// Runs cleanups newest-first, then frees every chunk.
    fn release(&self) {
        let ArenaState {
            chunks, cleanups, ..
        } = std::mem::take(&mut *self.lock());

        debug!(
            "releasing {} arena {}: {} chunks, {} cleanups",
            self.kind,
            self.id,
            chunks.len(),
            cleanups.len()
        );

        for (_, cleanup) in cleanups.into_iter().rev() {
            (cleanup.action)(cleanup.address);
        }
        drop(chunks);
    }
}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.release();
        }
    }
}

/// Handle to an arena.
///
/// Handles are cheap to clone; all clones govern the same memory.
#[derive(Clone)]
pub struct Arena {
    inner: Arc<ArenaInner>,
}

impl Arena {
    /// Creates an arena of the given kind with the default [`ArenaConfig`].
    ///
    /// `ArenaKind::Global` returns the process-wide global arena.
    #[must_use]
    pub fn new(kind: ArenaKind) -> Self {
        Self::with_config(kind, ArenaConfig::default())
    }

    /// Creates an arena of the given kind with explicit chunk sizing.
    #[must_use]
    pub fn with_config(kind: ArenaKind, config: ArenaConfig) -> Self {
        if kind == ArenaKind::Global {
            return Self::global();
        }
        let inner = Arc::new(ArenaInner::new(kind, config));
        debug!("created {} arena {}", kind, inner.id);
        Arena { inner }
    }

    /// Arena released once it and its segments are unreachable, with no
    /// chunk batching.
    ///
    /// Out-of-line data written through an implicit arena (pointees,
    /// strings, callback entry points) lives as long as any handle or
    /// segment of the arena does.
    #[must_use]
    pub fn implicit() -> Self {
        Self::new(ArenaKind::Implicit)
    }

    /// Arena released as a whole once it and its segments are unreachable.
    #[must_use]
    pub fn auto() -> Self {
        Self::new(ArenaKind::Auto)
    }

    /// Arena owned by the calling thread.
    #[must_use]
    pub fn confined() -> Self {
        Self::new(ArenaKind::Confined)
    }

    /// Arena usable from any thread.
    #[must_use]
    pub fn shared() -> Self {
        Self::new(ArenaKind::Shared)
    }

    /// The process-wide arena that never releases memory.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<Arena> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arena {
                inner: Arc::new(ArenaInner::new(ArenaKind::Global, ArenaConfig::default())),
            })
            .clone()
    }

    /// Runs `f` with a fresh confined arena and closes it afterwards.
    ///
    /// # Errors
    ///
    /// Returns the error from closing the arena. Closing an arena `f`
    /// already closed is not an error.
    pub fn with_confined<R>(f: impl FnOnce(&Arena) -> R) -> Result<R> {
        Self::scoped(ArenaKind::Confined, f)
    }

    /// Runs `f` with a fresh shared arena and closes it afterwards.
    ///
    /// # Errors
    ///
    /// See [`Arena::with_confined`].
    pub fn with_shared<R>(f: impl FnOnce(&Arena) -> R) -> Result<R> {
        Self::scoped(ArenaKind::Shared, f)
    }

    fn scoped<R>(kind: ArenaKind, f: impl FnOnce(&Arena) -> R) -> Result<R> {
        let arena = Self::new(kind);
        let result = f(&arena);
        match arena.close() {
            Ok(()) | Err(MemError::AlreadyClosed { .. }) => Ok(result),
            Err(err) => Err(err),
        }
    }

    /// Unique id of the arena.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Lifecycle kind.
    #[must_use]
    pub fn kind(&self) -> ArenaKind {
        self.inner.kind
    }

    /// Owning thread of a confined arena.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        self.inner.owner
    }

    /// Whether the arena is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.inner.is_closed()
    }

    /// Allocates `size` zeroed bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// - [`MemError::InvalidAlignment`] if `align` is not a power of two
    /// - [`MemError::UseAfterClose`] if the arena is closed
    /// - [`MemError::WrongThread`] for a confined arena off its owner thread
    /// - [`MemError::OutOfMemory`] if the system allocator fails
    pub fn alloc(&self, size: usize, align: usize) -> Result<Segment> {
        if !align.is_power_of_two() {
            return Err(MemError::InvalidAlignment { alignment: align });
        }
        let scope = self.governing_scope()?;
        let address = scope.allocate(size, align)?;
        Ok(Segment::governed(address, size, scope, None))
    }

    /// Allocates a copy of `bytes`.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc`].
    pub fn alloc_bytes(&self, bytes: &[u8], align: usize) -> Result<Segment> {
        let segment = self.alloc(bytes.len(), align)?;
        segment.copy_from_slice(0, bytes)?;
        Ok(segment)
    }

    /// Closes the arena, freeing every governed segment.
    ///
    /// Cleanup actions run newest-first before the memory is freed.
    ///
    /// # Errors
    ///
    /// - [`MemError::NotClosable`] for implicit and auto arenas
    /// - [`MemError::WrongThread`] for a confined arena off its owner thread
    /// - [`MemError::AlreadyClosed`] on a second close
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        match inner.kind {
            ArenaKind::Global => Ok(()),
            ArenaKind::Implicit | ArenaKind::Auto => Err(MemError::NotClosable { kind: inner.kind }),
            ArenaKind::Confined | ArenaKind::Shared => {
                if let Some(owner) = inner.owner
                    && owner != thread::current().id()
                {
                    return Err(MemError::WrongThread { arena: inner.id });
                }
                if inner.closed.swap(true, Ordering::AcqRel) {
                    return Err(MemError::AlreadyClosed { arena: inner.id });
                }
                #[cfg(feature = "close-backtrace")]
                {
                    *inner.closed_at.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(backtrace::Backtrace::new_unresolved());
                }
                inner.release();
                Ok(())
            }
        }
    }

    /// Allocation statistics.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.inner.stats()
    }

    /// The bookkeeping a new segment of this arena attaches to.
    pub(crate) fn governing_scope(&self) -> Result<Arc<ArenaInner>> {
        self.inner.check_access()?;
        Ok(Arc::clone(&self.inner))
    }

    /// A handle that does not keep the arena alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakArena {
        WeakArena {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ArenaInner>) -> Self {
        Arena { inner }
    }

    pub(crate) fn same_arena(&self, inner: &Arc<ArenaInner>) -> bool {
        Arc::ptr_eq(&self.inner, inner)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Non-owning arena handle, see [`Arena::downgrade`].
#[derive(Clone)]
pub struct WeakArena {
    id: u64,
    inner: Weak<ArenaInner>,
}

impl WeakArena {
    /// Id of the arena this handle was made from.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The arena, unless it has been released.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arena> {
        self.inner.upgrade().map(|inner| Arena { inner })
    }
}

impl fmt::Debug for WeakArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakArena")
            .field("id", &self.id)
            .field("released", &(self.inner.strong_count() == 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_confined_close_rejects_access() {
        let arena = Arena::confined();
        let seg = arena.alloc(16, 8).unwrap();
        seg.write::<i32>(0, 5).unwrap();
        arena.close().unwrap();
        assert!(!arena.is_alive());
        assert_eq!(
            seg.read::<i32>(0),
            Err(MemError::UseAfterClose { arena: arena.id() })
        );
        assert!(matches!(arena.alloc(4, 4), Err(MemError::UseAfterClose { .. })));
    }

    #[test]
    fn test_double_close() {
        let arena = Arena::shared();
        arena.close().unwrap();
        assert_eq!(arena.close(), Err(MemError::AlreadyClosed { arena: arena.id() }));
    }

    #[test]
    fn test_collection_driven_arenas_refuse_close() {
        assert_eq!(
            Arena::auto().close(),
            Err(MemError::NotClosable { kind: ArenaKind::Auto })
        );
        assert_eq!(
            Arena::implicit().close(),
            Err(MemError::NotClosable { kind: ArenaKind::Implicit })
        );
    }

    #[test]
    fn test_global_close_is_noop() {
        let global = Arena::global();
        let seg = global.alloc(8, 8).unwrap();
        global.close().unwrap();
        assert!(global.is_alive());
        seg.write::<u64>(0, 1).unwrap();
        assert_eq!(Arena::global().id(), global.id());
    }

    #[test]
    fn test_confined_close_from_other_thread() {
        let arena = Arena::confined();
        let seg = arena.alloc(4, 4).unwrap();
        let remote = arena.clone();
        let (close, read) = thread::spawn(move || (remote.close(), seg.read::<i32>(0)))
            .join()
            .unwrap();
        assert_eq!(close, Err(MemError::WrongThread { arena: arena.id() }));
        assert_eq!(read, Err(MemError::WrongThread { arena: arena.id() }));
        assert!(arena.is_alive());
        arena.close().unwrap();
    }

    #[test]
    fn test_shared_arena_across_threads() {
        let arena = Arena::shared();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let arena = arena.clone();
                thread::spawn(move || {
                    let seg = arena.alloc(8, 8).unwrap();
                    seg.write::<u64>(0, i).unwrap();
                    seg.read::<u64>(0).unwrap()
                })
            })
            .collect();
        let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 2, 3]);
        assert_eq!(arena.stats().segments, 4);
        arena.close().unwrap();
    }

    #[test]
    fn test_auto_batches_into_chunks() {
        let arena = Arena::auto();
        for _ in 0..64 {
            arena.alloc(16, 8).unwrap();
        }
        let stats = arena.stats();
        assert_eq!(stats.segments, 64);
        assert_eq!(stats.allocated, 1024);
        assert_eq!(stats.chunks, 1);
    }

    #[test]
    fn test_chunk_growth() {
        let arena = Arena::with_config(ArenaKind::Shared, ArenaConfig::new(8192, 65536));
        arena.alloc(8000, 8).unwrap();
        arena.alloc(8000, 8).unwrap();
        let stats = arena.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.capacity, 8192 + 16384);
        arena.close().unwrap();
    }

    #[test]
    fn test_cleanups_run_newest_first_on_close() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let arena = Arena::confined();
        for tag in 0..3 {
            let seg = arena.alloc(4, 4).unwrap();
            let order = Arc::clone(&order);
            let _ = unsafe {
                seg.reinterpret_in(
                    4,
                    &arena,
                    Some(Box::new(move |_| order.lock().unwrap().push(tag))),
                )
            }
            .unwrap();
        }
        arena.close().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_dropping_last_handle_releases() {
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let arena = Arena::confined();
            let seg = arena.alloc(4, 4).unwrap();
            let runs = Arc::clone(&runs);
            let _adopted = unsafe {
                seg.reinterpret_in(
                    4,
                    &arena,
                    Some(Box::new(move |_| {
                        runs.fetch_add(1, Ordering::SeqCst);
                    })),
                )
            }
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_implicit_shares_one_scope() {
        let arena = Arena::implicit();
        let a = arena.alloc(8, 8).unwrap();
        let b = arena.alloc(8, 8).unwrap();
        assert_eq!(a.arena().map(|x| x.id()), Some(arena.id()));
        assert_eq!(b.arena().map(|x| x.id()), Some(arena.id()));
        let stats = arena.stats();
        assert_eq!((stats.segments, stats.chunks), (2, 2));
    }

    #[test]
    fn test_weak_handle_does_not_keep_arena() {
        let arena = Arena::auto();
        let weak = arena.downgrade();
        assert_eq!(weak.upgrade().map(|a| a.id()), Some(arena.id()));
        let seg = arena.alloc(4, 4).unwrap();
        drop(arena);
        assert!(weak.upgrade().is_some());
        drop(seg);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_invalid_alignment() {
        let arena = Arena::auto();
        assert_eq!(
            arena.alloc(4, 3).unwrap_err(),
            MemError::InvalidAlignment { alignment: 3 }
        );
    }

    #[test]
    fn test_scoped_confined() {
        let seg = Arena::with_confined(|arena| arena.alloc(8, 8).unwrap()).unwrap();
        assert!(!seg.is_alive());
    }
}

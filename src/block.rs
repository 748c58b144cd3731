use std::{
    fmt,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{self, AtomicUsize, Ordering},
};

#[cfg(feature = "stats")]
use crate::stats::{self, BlockLayout};

/// Counts past this are treated as runaway cloning and abort the process.
const COUNT_CEILING: usize = isize::MAX as usize;

/// Shared bookkeeping prefix of every control block variant.
///
/// The set of all strong handles collectively holds one claim on the `weak`
/// counter, dropped right after the payload release runs. The block's own
/// storage goes away exactly when `weak` reaches zero, so observers can keep
/// reading the counters of a block whose payload is long gone.
#[repr(C)]
pub(crate) struct Header
{
    strong: AtomicUsize,
    weak: AtomicUsize,
    release: unsafe fn(NonNull<Header>),
    dealloc: unsafe fn(NonNull<Header>),
}

impl Header
{
    fn new(release: unsafe fn(NonNull<Header>), dealloc: unsafe fn(NonNull<Header>)) -> Self
    {
        Header {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            release,
            dealloc,
        }
    }
}

/// Erased handle to a control block of any variant.
///
/// All variants start with `Header` at offset zero, so the per-variant entry
/// points can cast back to their concrete block type.
#[repr(transparent)]
pub(crate) struct BlockPtr(NonNull<Header>);

impl Clone for BlockPtr
{
    fn clone(&self) -> Self { *self }
}
impl Copy for BlockPtr {}

impl PartialEq for BlockPtr
{
    fn eq(&self, other: &Self) -> bool { self.0 == other.0 }
}
impl Eq for BlockPtr {}

impl fmt::Debug for BlockPtr
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("BlockPtr").field(&self.0).finish()
    }
}

impl BlockPtr
{
    fn header(&self) -> &Header { unsafe { self.0.as_ref() } }

    pub(crate) fn strong_count(&self) -> usize { self.header().strong.load(Ordering::Acquire) }

    /// Number of observers attached, not counting the strong handles'
    /// collective claim. Only meaningful while a strong handle is held.
    pub(crate) fn observer_count(&self) -> usize
    {
        self.header().weak.load(Ordering::Acquire) - 1
    }

    pub(crate) fn retain(&self)
    {
        if self.header().strong.fetch_add(1, Ordering::Relaxed) > COUNT_CEILING {
            std::process::abort();
        }
    }

    pub(crate) fn retain_weak(&self)
    {
        if self.header().weak.fetch_add(1, Ordering::Relaxed) > COUNT_CEILING {
            std::process::abort();
        }
    }

    /// Claim a strong reference only while at least one other strong
    /// reference is still live.
    ///
    /// This is a compare-and-increment loop rather than an optimistic bump:
    /// a zero count must never become transiently nonzero, or a concurrent
    /// terminal release could race against the rollback.
    pub(crate) fn try_retain(&self) -> bool
    {
        let strong = &self.header().strong;
        let mut count = strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return false;
            }
            if count > COUNT_CEILING {
                std::process::abort();
            }
            match strong.compare_exchange_weak(count, count + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(found) => count = found,
            }
        }
    }

    /// Drop one strong reference. The 1→0 transition runs the payload
    /// release exactly once and then gives up the collective weak claim.
    ///
    /// # Safety
    ///
    /// The caller must own a strong reference it will not use again.
    pub(crate) unsafe fn release(&self)
    {
        if self.header().strong.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            (self.header().release)(self.0);
            self.release_weak();
        }
    }

    /// Drop one weak reference, freeing the block's storage on the final one.
    ///
    /// # Safety
    ///
    /// The caller must own a weak reference it will not use again.
    pub(crate) unsafe fn release_weak(&self)
    {
        if self.header().weak.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            (self.header().dealloc)(self.0);
        }
    }
}

/// Control block embedding the value's storage: one allocation carries both
/// the bookkeeping and the payload.
#[repr(C)]
pub(crate) struct InlineBlock<T: 'static>
{
    header: Header,
    slot: MaybeUninit<T>,
}

pub(crate) fn allocate_inline<T: 'static>(value: T) -> (BlockPtr, NonNull<T>)
{
    let block = Box::into_raw(Box::new(InlineBlock {
        header: Header::new(release_inline::<T>, dealloc_inline::<T>),
        slot: MaybeUninit::new(value),
    }));
    #[cfg(feature = "stats")]
    stats::note_allocated(BlockLayout::of_block::<InlineBlock<T>>());
    unsafe {
        (
            BlockPtr(NonNull::new_unchecked(block).cast()),
            NonNull::new_unchecked((*block).slot.as_mut_ptr()),
        )
    }
}

unsafe fn release_inline<T: 'static>(header: NonNull<Header>)
{
    let block = header.cast::<InlineBlock<T>>().as_ptr();
    (*block).slot.assume_init_drop();
    #[cfg(feature = "stats")]
    stats::note_released();
}

unsafe fn dealloc_inline<T: 'static>(header: NonNull<Header>)
{
    drop(Box::from_raw(header.cast::<InlineBlock<T>>().as_ptr()));
    #[cfg(feature = "stats")]
    stats::note_deallocated(BlockLayout::of_block::<InlineBlock<T>>());
}

/// Control block for an adopted value allocated elsewhere: holds the raw
/// pointer and the one-shot deleter that ends the value's lifetime.
#[repr(C)]
pub(crate) struct DeleterBlock<T: 'static, D>
{
    header: Header,
    value: NonNull<T>,
    deleter: MaybeUninit<D>,
}

pub(crate) fn allocate_adopted<T, D>(value: NonNull<T>, deleter: D) -> BlockPtr
where
    T: 'static,
    D: FnOnce(NonNull<T>) + Send + 'static,
{
    let block = Box::into_raw(Box::new(DeleterBlock {
        header: Header::new(release_adopted::<T, D>, dealloc_adopted::<T, D>),
        value,
        deleter: MaybeUninit::new(deleter),
    }));
    #[cfg(feature = "stats")]
    stats::note_allocated(BlockLayout::of_block::<DeleterBlock<T, D>>());
    BlockPtr(unsafe { NonNull::new_unchecked(block) }.cast())
}

unsafe fn release_adopted<T: 'static, D: FnOnce(NonNull<T>)>(header: NonNull<Header>)
{
    let block = header.cast::<DeleterBlock<T, D>>().as_ptr();
    let deleter = (*block).deleter.assume_init_read();
    deleter((*block).value);
    #[cfg(feature = "stats")]
    stats::note_released();
}

unsafe fn dealloc_adopted<T: 'static, D>(header: NonNull<Header>)
{
    drop(Box::from_raw(header.cast::<DeleterBlock<T, D>>().as_ptr()));
    #[cfg(feature = "stats")]
    stats::note_deallocated(BlockLayout::of_block::<DeleterBlock<T, D>>());
}

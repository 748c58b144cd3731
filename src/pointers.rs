use super::block::{allocate_adopted, allocate_inline, BlockPtr};
use super::self_ref::SelfReferential;
use std::{
    fmt,
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

/// Owning handle to a shared value.
///
/// Every `Strong` keeps the value alive; clones share one control block and
/// bump its strong count. The value's release runs exactly once, on the drop
/// of the last `Strong`. Moving a `Strong` never touches the counters; only
/// `clone` and `drop` do.
///
/// The visible pointer need not address the whole value: `project` yields a
/// handle to a part of it that still keeps the whole allocation alive.
pub struct Strong<T: 'static>
{
    ptr: NonNull<T>,
    block: BlockPtr,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send + Sync + 'static> Send for Strong<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Strong<T> {}

impl<T: 'static> Strong<T>
{
    /// Allocate a value on the heap under shared ownership.
    ///
    /// Bookkeeping and value share a single combined allocation; the value is
    /// constructed directly into the control block's embedded slot.
    pub fn new(value: T) -> Self
    {
        let (block, ptr) = allocate_inline(value);
        Strong {
            ptr,
            block,
            _owns: PhantomData,
        }
    }

    /// Take ownership of an externally allocated value. The deleter runs
    /// exactly once, when the last `Strong` drops.
    ///
    /// # Safety
    ///
    /// `value` must be valid for the deleter to consume, and nothing else may
    /// own or free it.
    pub unsafe fn adopt<D>(value: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        Strong {
            ptr: value,
            block: allocate_adopted(value, deleter),
            _owns: PhantomData,
        }
    }

    /// Take ownership of a boxed value, with the unboxing deleter.
    ///
    /// Also available as `From<Box<T>>`.
    pub fn adopt_box(value: Box<T>) -> Self
    {
        let ptr = NonNull::from(Box::leak(value));
        unsafe { Self::adopt(ptr, |it| drop(Box::from_raw(it.as_ptr()))) }
    }

    /// Produce an observer that does not keep the value alive.
    pub fn downgrade(this: &Self) -> Weak<T>
    {
        this.block.retain_weak();
        Weak {
            ptr: this.ptr,
            block: this.block,
            _observes: PhantomData,
        }
    }

    /// Owning handle to a part of the value, sharing the whole value's
    /// control block. Dropping the last such handle releases the whole
    /// original value, not just the part.
    pub fn project<U: 'static>(this: &Self, part: impl FnOnce(&T) -> &U) -> Strong<U>
    {
        let ptr = NonNull::from(part(&**this));
        this.block.retain();
        Strong {
            ptr,
            block: this.block,
            _owns: PhantomData,
        }
    }

    /// Number of `Strong` handles currently keeping the value alive.
    pub fn strong_count(this: &Self) -> usize { this.block.strong_count() }

    /// Number of `Weak` observers currently attached.
    pub fn weak_count(this: &Self) -> usize { this.block.observer_count() }

    /// Whether two handles share one control block, regardless of which part
    /// of the value each addresses.
    pub fn same_allocation<U: 'static>(this: &Self, other: &Strong<U>) -> bool
    {
        this.block == other.block
    }

    /// Whether two handles are interchangeable: same control block and same
    /// visible pointer.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool
    {
        this.block == other.block && this.ptr == other.ptr
    }

    pub fn as_ptr(this: &Self) -> *const T { this.ptr.as_ptr() }
}

impl<T: SelfReferential> Strong<T>
{
    /// Allocate a value exposing the self-reference capability; the
    /// capability is wired to this allocation before the handle is returned.
    pub fn new_with_self(value: T) -> Self
    {
        let this = Strong::new(value);
        this.self_ref().wire(Strong::downgrade(&this));
        this
    }

    /// `adopt` for values exposing the self-reference capability; wires the
    /// capability at the moment of first ownership.
    ///
    /// # Safety
    ///
    /// Same contract as [`Strong::adopt`].
    pub unsafe fn adopt_with_self<D>(value: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        let this = Strong::adopt(value, deleter);
        this.self_ref().wire(Strong::downgrade(&this));
        this
    }
}

impl<T: 'static> Clone for Strong<T>
{
    fn clone(&self) -> Self
    {
        self.block.retain();
        Strong {
            ptr: self.ptr,
            block: self.block,
            _owns: PhantomData,
        }
    }
}

impl<T: 'static> Deref for Strong<T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target { unsafe { self.ptr.as_ref() } }
}

impl<T: 'static> From<Box<T>> for Strong<T>
{
    fn from(it: Box<T>) -> Strong<T> { Strong::adopt_box(it) }
}

impl<T: 'static> Drop for Strong<T>
{
    fn drop(&mut self)
    {
        unsafe {
            self.block.release();
        }
    }
}

impl<T: 'static> fmt::Debug for Strong<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Strong")
            .field("ptr", &self.ptr)
            .field("block", &self.block)
            .finish()
    }
}

/// Observing handle to a shared value.
///
/// A `Weak` never keeps the value alive and never dereferences it directly;
/// access goes through `upgrade`, which succeeds only while some `Strong`
/// still owns the value.
pub struct Weak<T: 'static>
{
    ptr: NonNull<T>,
    block: BlockPtr,
    _observes: PhantomData<T>,
}

unsafe impl<T: Send + Sync + 'static> Send for Weak<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Weak<T> {}

impl<T: 'static> Weak<T>
{
    /// Attempt to reacquire ownership of the observed value.
    ///
    /// Claims a strong reference only if the count is still nonzero, so an
    /// upgrade can never resurrect a value whose release has begun. Returns
    /// `None` once the last `Strong` has dropped.
    pub fn upgrade(&self) -> Option<Strong<T>>
    {
        if self.block.try_retain() {
            Some(Strong {
                ptr: self.ptr,
                block: self.block,
                _owns: PhantomData,
            })
        } else {
            None
        }
    }

    /// Whether the observed value has already been released. A `false` here
    /// is stale the moment it is read; only `upgrade` answers authoritatively.
    pub fn expired(&self) -> bool { self.block.strong_count() == 0 }

    pub fn strong_count(&self) -> usize { self.block.strong_count() }
}

impl<T: 'static> Clone for Weak<T>
{
    fn clone(&self) -> Self
    {
        self.block.retain_weak();
        Weak {
            ptr: self.ptr,
            block: self.block,
            _observes: PhantomData,
        }
    }
}

impl<T: 'static> Drop for Weak<T>
{
    fn drop(&mut self)
    {
        unsafe {
            self.block.release_weak();
        }
    }
}

impl<T: 'static> fmt::Debug for Weak<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Weak")
            .field("ptr", &self.ptr)
            .field("block", &self.block)
            .finish()
    }
}

use super::pointers::{Strong, Weak};
use parking_lot::Mutex;
use std::fmt;

/// One-shot slot for a value's reference to its own allocation.
///
/// Embed one of these in a value type and expose it through
/// [`SelfReferential`]; the owning module wires it, exactly once, at the
/// moment the value first comes under a `Strong` (via `new_with_self` or
/// `adopt_with_self`). Until then every request comes back `None`.
pub struct SelfRef<T: 'static>
{
    slot: Mutex<Option<Weak<T>>>,
}

impl<T: 'static> SelfRef<T>
{
    pub const fn new() -> Self
    {
        SelfRef {
            slot: Mutex::new(None),
        }
    }

    /// A fresh owning handle to the value holding this slot.
    ///
    /// `None` both while the slot is unwired (the value was never claimed by
    /// a `Strong`) and once the value has been released.
    pub fn request(&self) -> Option<Strong<T>>
    {
        self.slot.lock().as_ref()?.upgrade()
    }

    /// Wiring is first-write-wins; construction paths own the only call site.
    pub(crate) fn wire(&self, observer: Weak<T>)
    {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(observer);
        }
    }
}

impl<T: 'static> Default for SelfRef<T>
{
    fn default() -> Self { SelfRef::new() }
}

impl<T: 'static> fmt::Debug for SelfRef<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SelfRef")
            .field("wired", &self.slot.lock().is_some())
            .finish()
    }
}

/// Capability for a value to hand out owning handles to itself.
///
/// A value type opts in by embedding a [`SelfRef`] and pointing this trait at
/// it. Construction must then go through `Strong::new_with_self` or
/// `Strong::adopt_with_self`, which wire the slot before the first handle is
/// returned.
pub trait SelfReferential: Sized + 'static
{
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A fresh owning handle to `self`, provided some `Strong` currently
    /// owns it. The handle participates in the same strong count as every
    /// other handle to the value.
    fn strong_self(&self) -> Option<Strong<Self>> { self.self_ref().request() }
}

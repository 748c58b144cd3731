use std::{
    alloc::Layout,
    collections::HashMap,
    fmt,
    hash::{self, Hasher},
};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use super::block::InlineBlock;

/// Newtype wrapper to make `std::alloc::Layout` implement `Hash` for keying
/// the live-block ledger.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout(Layout);

impl BlockLayout
{
    /// Layout of the combined allocation backing `Strong::new::<T>`.
    pub fn of<T: 'static>() -> Self { Self::of_block::<InlineBlock<T>>() }

    pub(crate) fn of_block<B>() -> Self { BlockLayout(Layout::new::<B>()) }

    /// Delegates to underlying `Layout`
    pub fn size(&self) -> usize { self.0.size() }

    /// Delegates to underlying `Layout`
    pub fn align(&self) -> usize { self.0.align() }
}

impl hash::Hash for BlockLayout
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.0.size().hash(state);
        self.0.align().hash(state);
    }
}

impl From<BlockLayout> for Layout
{
    fn from(it: BlockLayout) -> Self { it.0 }
}

impl fmt::Debug for BlockLayout
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BlockLayout")
            .field("size()", &self.size())
            .field("align()", &self.align())
            .finish()
    }
}

/// Live-allocation ledger, for diagnosing leaks and double frees.
#[derive(Clone, Default, Debug)]
pub struct Stats
{
    /// Live control blocks by layout, payload-less ones included.
    pub blocks_by_layout: HashMap<BlockLayout, usize>,

    /// Payloads whose release has not yet run.
    pub live_payloads: usize,
}

impl Stats
{
    fn sum_sizes(map: &HashMap<BlockLayout, usize>) -> usize
    {
        let mut res = 0;
        for (layout, amount) in map {
            res += Layout::from(*layout).size() * amount;
        }
        res
    }

    /// Number of live control blocks across all layouts.
    pub fn live_blocks(&self) -> usize { self.blocks_by_layout.values().sum() }

    /// Number of live control blocks of one layout.
    pub fn blocks_of(&self, layout: BlockLayout) -> usize
    {
        self.blocks_by_layout.get(&layout).copied().unwrap_or(0)
    }

    /// Memory size of live control blocks, embedded payload storage included.
    pub fn block_heap_size(&self) -> usize { Self::sum_sizes(&self.blocks_by_layout) }
}

lazy_static! {
    static ref LEDGER: Mutex<Stats> = Mutex::new(Stats::default());
}

/// Snapshot of the process-wide ledger.
pub fn get_stats() -> Stats { LEDGER.lock().clone() }

pub(crate) fn note_allocated(layout: BlockLayout)
{
    let mut ledger = LEDGER.lock();
    *ledger.blocks_by_layout.entry(layout).or_default() += 1;
    ledger.live_payloads += 1;
}

pub(crate) fn note_released() { LEDGER.lock().live_payloads -= 1; }

pub(crate) fn note_deallocated(layout: BlockLayout)
{
    let mut ledger = LEDGER.lock();
    if let Some(count) = ledger.blocks_by_layout.get_mut(&layout) {
        *count -= 1;
    }
}

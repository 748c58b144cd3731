use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::pointers::{Strong, Weak};
use crate::self_ref::{SelfRef, SelfReferential};
#[cfg(feature = "stats")]
use crate::stats::{get_stats, BlockLayout};

struct DropIncrementer(&'static Cell<i32>);
impl Drop for DropIncrementer
{
    fn drop(&mut self) { self.0.set(self.0.get() + 1); }
}

fn counter() -> &'static Cell<i32> { Box::leak(Box::new(Cell::new(0))) }

#[test]
fn user_story()
{
    let x = Strong::new(Cell::new(2i32));

    assert_eq!(Strong::strong_count(&x), 1);
    assert_eq!(Strong::weak_count(&x), 0);

    let y = x.clone();

    assert_eq!(Strong::strong_count(&x), 2);
    assert!(Strong::ptr_eq(&x, &y));

    y.set(3);
    assert_eq!(x.get(), 3);

    let w = Strong::downgrade(&x);

    assert_eq!(Strong::weak_count(&x), 1);
    assert!(!w.expired());

    let z = w.upgrade();
    assert!(z.is_some());
    let z = z.unwrap();

    assert_eq!(Strong::strong_count(&x), 3);
    assert_eq!(z.get(), 3);

    drop(z);
    drop(y);
    drop(x);

    assert!(w.expired());
    assert_eq!(w.strong_count(), 0);
    assert!(w.upgrade().is_none());
}

#[test]
fn release_fires_exactly_once()
{
    let drops = counter();

    let a = Strong::new(DropIncrementer(drops));
    let b = a.clone();
    let w = Strong::downgrade(&a);
    let c = b.clone();

    drop(a);
    assert_eq!(drops.get(), 0);

    drop(c);
    assert_eq!(drops.get(), 0);

    drop(b);
    assert_eq!(drops.get(), 1);

    assert!(w.upgrade().is_none());
    drop(w);
    assert_eq!(drops.get(), 1);
}

#[cfg(feature = "stats")]
#[test]
fn one_combined_allocation()
{
    // The alignment keeps this layout out of every other test's ledger entry.
    #[repr(align(32))]
    struct Slab
    {
        _pad: [u8; 96],
        drops: &'static Cell<i32>,
    }
    impl Drop for Slab
    {
        fn drop(&mut self) { self.drops.set(self.drops.get() + 1); }
    }

    let drops = counter();
    let layout = BlockLayout::of::<Slab>();

    assert_eq!(get_stats().blocks_of(layout), 0);

    let x = Strong::new(Slab {
        _pad: [0; 96],
        drops,
    });

    assert_eq!(get_stats().blocks_of(layout), 1);
    assert!(get_stats().block_heap_size() >= layout.size());

    let y = x.clone();
    let w = Strong::downgrade(&x);

    // Copies and observers attach to the one existing block.
    assert_eq!(get_stats().blocks_of(layout), 1);

    drop(y);
    drop(w);
    drop(x);

    assert_eq!(drops.get(), 1);
    assert_eq!(get_stats().blocks_of(layout), 0);
}

#[cfg(feature = "stats")]
#[test]
fn block_outlives_payload_either_drop_order()
{
    #[repr(align(64))]
    struct Chunky
    {
        _pad: [u8; 160],
        drops: &'static Cell<i32>,
    }
    impl Drop for Chunky
    {
        fn drop(&mut self) { self.drops.set(self.drops.get() + 1); }
    }

    let layout = BlockLayout::of::<Chunky>();

    // Strong first: the payload dies but observers keep the block readable.
    let drops = counter();
    let s = Strong::new(Chunky {
        _pad: [0; 160],
        drops,
    });
    let w = Strong::downgrade(&s);

    drop(s);
    assert_eq!(drops.get(), 1);
    assert_eq!(get_stats().blocks_of(layout), 1);
    assert!(w.expired());

    drop(w);
    assert_eq!(get_stats().blocks_of(layout), 0);

    // Weak first: the block stays until the last strong handle drops.
    let drops = counter();
    let s = Strong::new(Chunky {
        _pad: [0; 160],
        drops,
    });
    let w = Strong::downgrade(&s);

    drop(w);
    assert_eq!(drops.get(), 0);
    assert_eq!(get_stats().blocks_of(layout), 1);

    drop(s);
    assert_eq!(drops.get(), 1);
    assert_eq!(get_stats().blocks_of(layout), 0);
}

#[test]
fn adoption_runs_the_deleter()
{
    let deleted: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));

    let raw = NonNull::from(Box::leak(Box::new(41u64)));
    let s = unsafe {
        Strong::adopt(raw, move |it| {
            drop(Box::from_raw(it.as_ptr()));
            deleted.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert_eq!(*s, 41);

    let t = s.clone();
    drop(s);
    assert_eq!(deleted.load(Ordering::SeqCst), 0);

    drop(t);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn adopted_boxes()
{
    let s = Strong::adopt_box(Box::new(String::from("spilled")));
    let t = Strong::from(Box::new(7i32));

    assert_eq!(&*s, "spilled");
    assert_eq!(*t, 7);
    assert_eq!(Strong::strong_count(&s), 1);
}

#[test]
fn projection_keeps_the_whole_value_alive()
{
    struct Whole
    {
        tag: u32,
        _live: DropIncrementer,
    }

    let drops = counter();
    let s = Strong::new(Whole {
        tag: 9,
        _live: DropIncrementer(drops),
    });

    let part: Strong<u32> = Strong::project(&s, |whole| &whole.tag);

    assert_eq!(*part, 9);
    assert_eq!(Strong::strong_count(&s), 2);
    assert!(Strong::same_allocation(&s, &part));

    drop(s);

    // The part is the last handle left; the whole value is still intact.
    assert_eq!(drops.get(), 0);
    assert_eq!(*part, 9);
    assert_eq!(Strong::strong_count(&part), 1);

    drop(part);
    assert_eq!(drops.get(), 1);
}

#[test]
fn upgrades_share_one_count()
{
    let s = Strong::new(17u8);
    let w1: Weak<u8> = Strong::downgrade(&s);
    let w2 = w1.clone();

    assert_eq!(Strong::weak_count(&s), 2);

    let u1 = w1.upgrade().unwrap();
    let u2 = w2.upgrade().unwrap();

    assert_eq!(Strong::strong_count(&s), 3);
    assert!(Strong::ptr_eq(&u1, &u2));

    drop(u1);
    drop(u2);
    drop(w2);

    assert_eq!(Strong::weak_count(&s), 1);
    assert_eq!(Strong::strong_count(&s), 1);

    drop(s);
    assert!(w1.upgrade().is_none());
}

#[test]
fn concurrent_drops_release_once()
{
    let threads = 16;

    for _ in 0..64 {
        let deleted: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));

        let raw = NonNull::from(Box::leak(Box::new(1234u64)));
        let s = unsafe {
            Strong::adopt(raw, move |it| {
                drop(Box::from_raw(it.as_ptr()));
                deleted.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::scope(|scope| {
            for _ in 0..threads {
                let own = s.clone();
                scope.spawn(move || {
                    assert_eq!(*own, 1234);
                    drop(own);
                });
            }
        });

        drop(s);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn concurrent_upgrade_against_terminal_release()
{
    for _ in 0..256 {
        let s = Strong::new(AtomicUsize::new(42));
        let w = Strong::downgrade(&s);

        thread::scope(|scope| {
            scope.spawn(move || {
                drop(s);
            });
            scope.spawn(|| loop {
                match w.upgrade() {
                    // A successful upgrade must always see the intact value.
                    Some(got) => assert_eq!(got.load(Ordering::Relaxed), 42),
                    None => break,
                }
            });
        });

        assert!(w.expired());
        assert!(w.upgrade().is_none());
    }
}

struct Node
{
    hits: Cell<i32>,
    _live: DropIncrementer,
    self_ref: SelfRef<Node>,
}

impl SelfReferential for Node
{
    fn self_ref(&self) -> &SelfRef<Node> { &self.self_ref }
}

impl Node
{
    fn new(drops: &'static Cell<i32>) -> Node
    {
        Node {
            hits: Cell::new(0),
            _live: DropIncrementer(drops),
            self_ref: SelfRef::new(),
        }
    }
}

#[test]
fn self_reference_before_ownership_is_absent()
{
    let unowned = Node::new(counter());
    assert!(unowned.strong_self().is_none());
    assert!(unowned.self_ref.request().is_none());
}

#[test]
fn self_reference_joins_the_owning_count()
{
    let drops = counter();

    let n = Strong::new_with_self(Node::new(drops));

    // The capability's internal observer is a real weak attachment.
    assert_eq!(Strong::weak_count(&n), 1);

    let me = n.strong_self().unwrap();

    assert!(Strong::ptr_eq(&n, &me));
    assert_eq!(Strong::strong_count(&n), 2);

    drop(n);

    // The self-obtained handle alone keeps the value alive.
    assert_eq!(drops.get(), 0);
    me.hits.set(5);
    assert_eq!(me.hits.get(), 5);

    drop(me);
    assert_eq!(drops.get(), 1);
}

#[test]
fn self_reference_wires_on_adoption_too()
{
    let drops = counter();

    let raw = NonNull::from(Box::leak(Box::new(Node::new(drops))));
    let n = unsafe { Strong::adopt_with_self(raw, |it| drop(Box::from_raw(it.as_ptr()))) };

    let me = n.strong_self().unwrap();
    assert_eq!(Strong::strong_count(&n), 2);

    drop(me);
    drop(n);
    assert_eq!(drops.get(), 1);

    let gone = Node::new(counter());
    assert!(gone.strong_self().is_none());
}

#[test]
fn self_reference_expires_with_the_value()
{
    let n = Strong::new_with_self(Node::new(counter()));
    let w = Strong::downgrade(&n);

    drop(n);

    // The value is gone; its capability slot can no longer produce handles,
    // and outside observers agree.
    assert!(w.upgrade().is_none());
}

#[cfg(feature = "stats")]
#[test]
fn layouts_report_size_and_align()
{
    let layout = BlockLayout::of::<u64>();
    assert!(layout.size() >= std::mem::size_of::<u64>());
    assert!(layout.align() >= std::mem::align_of::<u64>());
    assert_eq!(layout.size() % layout.align(), 0);
}

use std::collections::TryReserveError;

use bytes::Bytes;
use degzip_filter::chain::{BufferChain, Reconciled, Segment, SegmentFlags};

#[test]
fn bounded_allocation() -> Result<(), TryReserveError> {
    let mut chain = BufferChain::new(2, 64);
    assert_eq!(chain.buffer_count(), 2);
    assert_eq!(chain.buffer_size(), 64);
    assert_eq!(chain.allocated(), 0);

    let a = chain.acquire()?.unwrap();
    let b = chain.acquire()?.unwrap();
    assert!(chain.acquire()?.is_none());
    assert!(!chain.can_acquire());
    assert_eq!(chain.allocated(), 2);

    assert_ne!(a.slot(), b.slot());
    assert!(a.is_empty());
    assert!(a.remaining() >= 64);

    chain.release(a);
    assert_eq!(chain.free_len(), 1);

    let c = chain.acquire()?.unwrap();
    assert_eq!(c.slot(), 0);
    assert_eq!(chain.allocated(), 2);

    Ok(())
}

#[test]
fn ship_and_reconcile() -> Result<(), TryReserveError> {
    let mut chain = BufferChain::new(1, 16);
    let buf = chain.acquire()?.unwrap();

    let segment = chain.ship(buf, SegmentFlags::FLUSH);
    assert!(segment.is_flush());
    assert_eq!(segment.tag().map(|t| t.owner), Some(chain.owner()));
    assert_eq!(chain.queued_len(), 1);
    assert!(chain.acquire()?.is_none());

    // Downstream did not keep anything.
    let reconciled = chain.reconcile([segment]);
    assert_eq!(
        reconciled,
        Reconciled {
            delivered: 1,
            freed: 1
        }
    );
    assert_eq!(chain.queued_len(), 0);
    assert_eq!(chain.in_flight_len(), 0);
    assert!(chain.acquire()?.is_some());

    Ok(())
}

#[test]
fn retained_buffers_stay_in_flight() -> Result<(), TryReserveError> {
    let mut chain = BufferChain::new(2, 16);

    let (a, b) = (chain.acquire()?.unwrap(), chain.acquire()?.unwrap());
    let first = chain.ship(a, SegmentFlags::empty());
    let second = chain.ship(b, SegmentFlags::empty());
    let (first_slot, second_slot) = (first.tag().unwrap().slot, second.tag().unwrap().slot);

    let kept_first = first.data.clone();
    let kept_second = second.data.clone();

    let reconciled = chain.reconcile([first, second]);
    assert_eq!(reconciled.delivered, 2);
    assert_eq!(reconciled.freed, 0);
    assert_eq!(chain.in_flight_len(), 2);

    // Nothing changed downstream, so nothing moves.
    assert_eq!(chain.reconcile([]), Reconciled::default());

    drop(kept_second);
    assert_eq!(chain.reconcile([]).freed, 1);
    drop(kept_first);
    assert_eq!(chain.reconcile([]).freed, 1);

    // Buffers come back in the order they were released.
    assert_eq!(chain.acquire()?.unwrap().slot(), second_slot);
    assert_eq!(chain.acquire()?.unwrap().slot(), first_slot);

    Ok(())
}

#[test]
fn foreign_segments_are_ignored() -> Result<(), TryReserveError> {
    let mut ours = BufferChain::new(1, 16);
    let mut theirs = BufferChain::new(1, 16);

    let buf = theirs.acquire()?.unwrap();
    let foreign = theirs.ship(buf, SegmentFlags::empty());
    let untagged = Segment::new(Bytes::from_static(b"raw"));

    let buf = ours.acquire()?.unwrap();
    let own = ours.ship(buf, SegmentFlags::empty());

    assert_eq!(ours.reconcile([foreign.clone(), untagged]).delivered, 0);
    assert_eq!(ours.queued_len(), 1);
    assert_eq!(theirs.queued_len(), 1);

    assert_eq!(ours.reconcile([own.clone(), own]).delivered, 1);

    Ok(())
}

#[test]
fn reused_buffers_start_empty() -> Result<(), TryReserveError> {
    let mut chain = BufferChain::new(1, 8);

    let buf = chain.acquire()?.unwrap();
    let segment = chain.ship(buf, SegmentFlags::empty());
    chain.reconcile([segment]);

    let buf = chain.acquire()?.unwrap();
    assert!(buf.is_empty());
    assert!(buf.remaining() >= 8);

    Ok(())
}

#[test]
fn segment_flags() {
    assert!(Segment::last("x").is_last());
    assert!(Segment::new("x")
        .with_flags(SegmentFlags::LAST_IN_CHAIN)
        .is_last());
    assert!(!Segment::flush("x").is_last());

    let end = Segment::end_of_body();
    assert!(end.is_empty());
    assert!(end.is_last());
    assert!(end.tag().is_none());
}

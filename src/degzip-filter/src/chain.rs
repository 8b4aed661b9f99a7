//! Body segments and the pool of output buffers backing them.
//!
//! Output memory is organized as an arena of fixed-size slots which
//! are addressed by index. Every slot is in exactly one of four
//! states at a time:
//!
//! - free, waiting to be handed out by [`BufferChain::acquire`];
//! - bound to the inflater as its current output buffer;
//! - queued in the outbound list of the ongoing invocation;
//! - in flight, i.e. delivered downstream and possibly still
//!   referenced there.
//!
//! Downstream consumes a buffer by dropping every handle to the
//! [`Bytes`] it received. [`BufferChain::reconcile`] observes this and
//! recycles the memory, so a slot is never written to while anybody
//! else can still read from it.

use std::{
    collections::{TryReserveError, VecDeque},
    fmt, mem,
    sync::atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;
use bytes::Bytes;

bitflags! {
    /// Framing metadata attached to a [`Segment`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u8 {
        /// The segment ends the request body.
        const LAST = 1 << 0;
        /// The segment ends the body as seen by the current chain,
        /// e.g. for a subrequest.
        const LAST_IN_CHAIN = 1 << 1;
        /// All data up to and including this segment must be passed
        /// on before more input arrives.
        const FLUSH = 1 << 2;
    }
}

/// Identifies the [`BufferChain`] a buffer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Owner(u32);

impl Owner {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

/// Marks a [`Segment`] whose memory is owned by a [`BufferChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferTag {
    /// The chain that owns the memory.
    pub owner: Owner,
    /// The arena slot inside the owning chain.
    pub slot: usize,
}

/// A contiguous piece of a request body travelling between filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    /// The payload.
    pub data: Bytes,
    /// Framing metadata.
    pub flags: SegmentFlags,
    tag: Option<BufferTag>,
}

impl Segment {
    /// Creates a plain segment in the middle of a body.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            flags: SegmentFlags::empty(),
            tag: None,
        }
    }

    /// Creates the final segment of a body.
    pub fn last(data: impl Into<Bytes>) -> Self {
        Self::new(data).with_flags(SegmentFlags::LAST)
    }

    /// Creates a segment which demands a flush after it.
    pub fn flush(data: impl Into<Bytes>) -> Self {
        Self::new(data).with_flags(SegmentFlags::FLUSH)
    }

    /// Creates the empty marker that terminates an inflated body.
    pub fn end_of_body() -> Self {
        Self::new(Bytes::new()).with_flags(SegmentFlags::LAST | SegmentFlags::LAST_IN_CHAIN)
    }

    /// Adds `flags` to the segment.
    #[inline]
    pub fn with_flags(mut self, flags: SegmentFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Gets the ownership tag, if the memory came from a [`BufferChain`].
    #[inline]
    pub fn tag(&self) -> Option<BufferTag> {
        self.tag
    }

    /// The payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the segment terminates the body.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags
            .intersects(SegmentFlags::LAST | SegmentFlags::LAST_IN_CHAIN)
    }

    /// Whether the segment demands a flush.
    #[inline]
    pub fn is_flush(&self) -> bool {
        self.flags.contains(SegmentFlags::FLUSH)
    }
}

/// An output buffer bound to the inflater.
///
/// The inflater appends to the vector without ever growing it past
/// its capacity, which is at least the configured buffer size.
#[derive(Debug)]
pub struct OutputBuffer {
    slot: usize,
    data: Vec<u8>,
}

impl OutputBuffer {
    /// Gets the arena slot of this buffer.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Gets the bytes written so far.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data
    }

    /// The number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing was written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The number of bytes that can still be written.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Whether the buffer has no space left.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    pub(crate) fn as_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

#[derive(Debug)]
enum Slot {
    Free(Vec<u8>),
    Bound,
    Queued(Bytes),
    InFlight(Bytes),
}

/// Outcome of a [`BufferChain::reconcile`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Buffers which moved from the outbound list to in flight.
    pub delivered: usize,
    /// Buffers which downstream released back into the free list.
    pub freed: usize,
}

/// A bounded pool of fixed-size output buffers.
///
/// At most `count` buffers are ever allocated; once they are all
/// handed out, [`BufferChain::acquire`] reports exhaustion until
/// downstream releases some of them.
#[derive(Debug)]
pub struct BufferChain {
    owner: Owner,
    count: usize,
    size: usize,
    slots: Vec<Slot>,
    free: VecDeque<usize>,
    queued: Vec<usize>,
    in_flight: Vec<usize>,
}

impl BufferChain {
    /// Creates an empty chain for up to `count` buffers of `size` bytes.
    ///
    /// No memory is allocated until buffers are requested.
    pub fn new(count: usize, size: usize) -> Self {
        Self {
            owner: Owner::next(),
            count,
            size,
            slots: Vec::new(),
            free: VecDeque::new(),
            queued: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Gets the identity stamped on every buffer of this chain.
    #[inline]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// The configured byte size of each buffer.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// The configured maximum number of buffers.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.count
    }

    /// The number of buffers allocated so far.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// The number of buffers ready for reuse.
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// The number of buffers sitting in the outbound list.
    #[inline]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// The number of buffers downstream may still be holding on to.
    #[inline]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether [`BufferChain::acquire`] would produce a buffer.
    #[inline]
    pub fn can_acquire(&self) -> bool {
        !self.free.is_empty() || self.slots.len() < self.count
    }

    /// Hands out an output buffer.
    ///
    /// Free buffers are reused in the order they were released. If
    /// there are none, a new one is allocated as long as the limit
    /// permits. `Ok(None)` signals that every buffer is in use.
    pub fn acquire(&mut self) -> Result<Option<OutputBuffer>, TryReserveError> {
        if let Some(slot) = self.free.pop_front() {
            let Slot::Free(mut data) = mem::replace(&mut self.slots[slot], Slot::Bound) else {
                unreachable!("free list points at slot {slot} which is not free");
            };

            // Reclaimed memory may have lost its capacity on the way.
            data.clear();
            if data.capacity() < self.size {
                if let Err(e) = data.try_reserve_exact(self.size) {
                    self.slots[slot] = Slot::Free(data);
                    self.free.push_front(slot);
                    return Err(e);
                }
            }

            log::trace!("reusing output buffer {slot} of {}", self.owner);
            return Ok(Some(OutputBuffer { slot, data }));
        }

        if self.slots.len() < self.count {
            let mut data = Vec::new();
            data.try_reserve_exact(self.size)?;

            let slot = self.slots.len();
            self.slots.push(Slot::Bound);

            log::trace!("allocated output buffer {slot} of {}", self.owner);
            return Ok(Some(OutputBuffer { slot, data }));
        }

        log::debug!(
            "all {} output buffers of {} are in use",
            self.count,
            self.owner
        );
        Ok(None)
    }

    /// Turns the written part of a bound buffer into a tagged segment
    /// for the outbound list.
    pub fn ship(&mut self, buf: OutputBuffer, flags: SegmentFlags) -> Segment {
        let OutputBuffer { slot, data } = buf;
        debug_assert!(matches!(self.slots[slot], Slot::Bound));

        let data = Bytes::from(data);
        self.slots[slot] = Slot::Queued(data.clone());
        self.queued.push(slot);

        Segment {
            data,
            flags,
            tag: Some(BufferTag {
                owner: self.owner,
                slot,
            }),
        }
    }

    /// Puts a bound buffer which is no longer needed back into the
    /// free list.
    pub fn release(&mut self, buf: OutputBuffer) {
        let OutputBuffer { slot, mut data } = buf;
        debug_assert!(matches!(self.slots[slot], Slot::Bound));

        data.clear();
        self.slots[slot] = Slot::Free(data);
        self.free.push_back(slot);
    }

    /// Updates buffer ownership after `sent` was delivered downstream.
    ///
    /// Segments tagged by this chain move from the outbound list to
    /// in flight; segments from anywhere else are ignored. Afterwards,
    /// every in-flight buffer that downstream no longer references is
    /// recycled into the free list, preserving delivery order.
    ///
    /// Calling this again without downstream dropping further
    /// references moves nothing.
    pub fn reconcile<I>(&mut self, sent: I) -> Reconciled
    where
        I: IntoIterator<Item = Segment>,
    {
        let mut result = Reconciled::default();

        for segment in sent {
            let Some(tag) = segment.tag else { continue };
            if tag.owner != self.owner {
                continue;
            }

            // Drop our copy of the handle before the sweep below.
            drop(segment);

            if let Some(Slot::Queued(..)) = self.slots.get(tag.slot) {
                let Slot::Queued(data) = mem::replace(&mut self.slots[tag.slot], Slot::Bound)
                else {
                    unreachable!();
                };

                self.slots[tag.slot] = Slot::InFlight(data);
                self.queued.retain(|&s| s != tag.slot);
                self.in_flight.push(tag.slot);
                result.delivered += 1;
            }
        }

        let slots = &mut self.slots;
        let free = &mut self.free;
        self.in_flight.retain(|&slot| {
            let Slot::InFlight(data) = mem::replace(&mut slots[slot], Slot::Bound) else {
                unreachable!("in-flight list points at slot {slot} which is not in flight");
            };

            match data.try_into_mut() {
                Ok(data) => {
                    slots[slot] = Slot::Free(Vec::from(data));
                    free.push_back(slot);
                    result.freed += 1;
                    false
                }

                Err(data) => {
                    slots[slot] = Slot::InFlight(data);
                    true
                }
            }
        });

        if result.delivered != 0 || result.freed != 0 {
            log::debug!(
                "reconciled {}: {} delivered, {} freed, {} in flight",
                self.owner,
                result.delivered,
                result.freed,
                self.in_flight.len()
            );
        }

        result
    }
}

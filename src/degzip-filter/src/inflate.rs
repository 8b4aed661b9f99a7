//! The incremental gzip inflater.
//!
//! [`Inflater`] decodes a gzip body that arrives as an arbitrary
//! sequence of [`Segment`]s into output buffers from a
//! [`BufferChain`]. It never blocks and never buffers more than one
//! output buffer on its own; the caller drives it in three steps:
//!
//! 1. [`Inflater::feed`] binds the next pending input segment,
//! 2. the caller binds an output buffer if [`Inflater::needs_output`],
//! 3. [`Inflater::step`] runs the decoder once and moves completed
//!    output buffers to the outbound list.
//!
//! Bodies made of several gzip members back to back are decoded as
//! one continuous stream.

use std::collections::{TryReserveError, VecDeque};

use bytes::{Buf, Bytes};
use flate2::{Decompress, DecompressError, FlushDecompress, Status};
use thiserror::Error;

use crate::{
    chain::{BufferChain, OutputBuffer, Segment, SegmentFlags},
    guard::{LimitExceeded, SizeGuard},
};

/// The window size used by virtually every gzip encoder.
pub const DEFAULT_WINDOW_BITS: u8 = 15;

/// Errors that abort inflation of a body.
#[derive(Debug, Error)]
pub enum InflateError {
    /// The decoder could not be set up.
    #[error("failed to initialize gzip decoder with {0} window bits")]
    InitializationFailure(u8),

    /// The body is not a valid gzip stream.
    #[error("malformed gzip body: {0}")]
    DecodeFailure(#[from] DecompressError),

    /// The body ended before the gzip stream did.
    #[error("gzip stream is truncated at the end of the body")]
    PrematureEnd,

    /// The decoder could not be restarted for a concatenated member.
    #[error("failed to restart gzip decoder for a concatenated member")]
    ResetFailure,

    /// The inflated body is too large.
    #[error("{0}")]
    SizeLimitExceeded(#[from] LimitExceeded),

    /// No memory could be obtained for an output buffer.
    #[error("failed to allocate output buffer: {0}")]
    AllocationFailure(#[from] TryReserveError),

    /// A step was attempted before the decoder was started or while
    /// no output buffer was bound.
    #[error("inflate step without a running decoder and a bound output buffer")]
    NotReady,
}

/// The lifecycle of an [`Inflater`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No decoder exists yet.
    #[default]
    Idle,
    /// The decoder is ready but has not seen input.
    Started,
    /// Input segments are being decoded.
    Feeding,
    /// A flush boundary was just passed on.
    SyncFlushed,
    /// The body was decoded completely. Terminal.
    Finished,
    /// Decoding was aborted. Terminal.
    Failed,
}

/// How the decoder treats the end of the current input segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Flush {
    /// More input follows; output is emitted whenever convenient.
    #[default]
    None,
    /// All output for the input so far must be emitted.
    Sync,
    /// The input ends the body and therefore the gzip stream.
    Finish,
}

impl From<Flush> for FlushDecompress {
    fn from(value: Flush) -> Self {
        match value {
            Flush::None => FlushDecompress::None,
            Flush::Sync => FlushDecompress::Sync,
            Flush::Finish => FlushDecompress::Finish,
        }
    }
}

/// Outcome of [`Inflater::feed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    /// There is work for [`Inflater::step`].
    Ready,
    /// An empty segment was skipped; feed again.
    Again,
    /// All pending input is consumed.
    Exhausted,
}

/// Outcome of [`Inflater::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Keep feeding and stepping.
    Again,
    /// Output is ready to be passed downstream.
    Settled,
}

fn gzip_decoder(window_bits: u8) -> Option<Decompress> {
    // `Decompress::new_gzip` panics for anything outside of this.
    (9..=15)
        .contains(&window_bits)
        .then(|| Decompress::new_gzip(window_bits))
}

/// A streaming gzip decoder over a queue of input segments.
pub struct Inflater {
    raw: Option<Decompress>,
    window_bits: u8,
    phase: Phase,
    flush: Flush,
    redo: bool,

    pending: VecDeque<Segment>,
    input: Bytes,
    output: Option<OutputBuffer>,

    guard: SizeGuard,
    total: u64,
    members: u32,
    content_length: Option<u64>,
}

impl Inflater {
    /// Creates an idle inflater.
    ///
    /// No decoder state is allocated before [`Inflater::start`].
    pub fn new(window_bits: u8, guard: SizeGuard) -> Self {
        Self {
            raw: None,
            window_bits,
            phase: Phase::Idle,
            flush: Flush::None,
            redo: false,

            pending: VecDeque::new(),
            input: Bytes::new(),
            output: None,

            guard,
            total: 0,
            members: 0,
            content_length: None,
        }
    }

    /// Gets the current lifecycle phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Gets the flush mode for the bound input segment.
    #[inline]
    pub fn flush_mode(&self) -> Flush {
        self.flush
    }

    /// Whether the body was decoded to its end.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Whether decoding was aborted.
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// The number of inflated bytes produced so far.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The number of gzip members decoded or in progress.
    #[inline]
    pub fn members(&self) -> u32 {
        self.members
    }

    /// The size of the inflated body, known once it is finished.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The number of input segments not yet bound to the decoder.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether an output buffer must be bound before the next step.
    #[inline]
    pub fn needs_output(&self) -> bool {
        self.output.is_none()
    }

    /// Sets up the decoder for the first gzip member.
    pub fn start(&mut self) -> Result<(), InflateError> {
        debug_assert_eq!(self.phase, Phase::Idle);

        let Some(raw) = gzip_decoder(self.window_bits) else {
            log::error!("invalid gzip window size of {} bits", self.window_bits);
            self.phase = Phase::Failed;
            return Err(InflateError::InitializationFailure(self.window_bits));
        };

        log::debug!("inflate start");
        self.raw = Some(raw);
        self.members = 1;
        self.phase = Phase::Started;
        self.flush = Flush::None;

        Ok(())
    }

    /// Appends newly arrived body segments to the input queue.
    pub fn push<I>(&mut self, segments: I)
    where
        I: IntoIterator<Item = Segment>,
    {
        self.pending.extend(segments);
    }

    /// Binds the next input segment to the decoder unless there is
    /// still work left for the current one.
    pub fn feed(&mut self) -> Feed {
        if !self.input.is_empty() || self.flush != Flush::None || self.redo {
            return Feed::Ready;
        }

        let Some(segment) = self.pending.pop_front() else {
            return Feed::Exhausted;
        };

        self.phase = Phase::Feeding;
        self.flush = if segment.is_last() {
            Flush::Finish
        } else if segment.is_flush() {
            Flush::Sync
        } else {
            Flush::None
        };
        self.input = segment.data;

        log::trace!(
            "bound input segment of {} bytes, flush {:?}",
            self.input.len(),
            self.flush
        );

        if self.flush == Flush::None && self.input.is_empty() {
            Feed::Again
        } else {
            Feed::Ready
        }
    }

    /// Binds `buf` as the output buffer for the following steps.
    pub fn bind_output(&mut self, buf: OutputBuffer) {
        debug_assert!(self.output.is_none());
        self.output = Some(buf);
    }

    /// Runs the decoder once over the bound input and output.
    ///
    /// Completed output buffers and markers are appended to `out`.
    /// Any error leaves the inflater [`Phase::Failed`], including
    /// [`InflateError::NotReady`] when the inflater was not started or
    /// no output buffer is bound.
    pub fn step(
        &mut self,
        chain: &mut BufferChain,
        out: &mut Vec<Segment>,
    ) -> Result<Step, InflateError> {
        let res = self.step_inner(chain, out);
        if res.is_err() {
            self.phase = Phase::Failed;
        }

        res
    }

    fn step_inner(
        &mut self,
        chain: &mut BufferChain,
        out: &mut Vec<Segment>,
    ) -> Result<Step, InflateError> {
        let (Some(raw), Some(buf)) = (self.raw.as_mut(), self.output.as_mut()) else {
            return Err(InflateError::NotReady);
        };

        log::trace!(
            "inflate in: avail_in {} avail_out {} flush {:?} redo {}",
            self.input.len(),
            buf.remaining(),
            self.flush,
            self.redo
        );

        let before_in = raw.total_in();
        let before_out = raw.total_out();

        let status = raw
            .decompress_vec(&self.input, buf.as_vec(), self.flush.into())
            .inspect_err(|e| log::error!("inflate failed with flush {:?}: {e}", self.flush))?;

        let consumed = (raw.total_in() - before_in) as usize;
        let produced = raw.total_out() - before_out;
        let (full, empty) = (buf.is_full(), buf.is_empty());

        self.input.advance(consumed);

        if produced > 0 {
            self.total += produced;
            if let Err(e) = self.guard.check(self.total) {
                log::warn!("{e}");
                return Err(e.into());
            }
        }

        log::trace!(
            "inflate out: consumed {consumed} produced {produced} avail_in {} status {status:?}",
            self.input.len()
        );

        if full {
            // The decoder may have more output for the same input.
            self.ship_output(chain, out, SegmentFlags::empty());
            self.redo = true;
            return Ok(Step::Again);
        }

        self.redo = false;

        if self.flush == Flush::Sync {
            self.flush = Flush::None;
            self.phase = Phase::SyncFlushed;

            if empty {
                out.push(Segment::flush(Bytes::new()));
            } else {
                self.ship_output(chain, out, SegmentFlags::FLUSH);
            }

            return Ok(Step::Settled);
        }

        if self.flush == Flush::Finish && self.input.is_empty() {
            if status != Status::StreamEnd {
                log::error!("inflate returned {status:?} at the end of the body");
                return Err(InflateError::PrematureEnd);
            }

            self.finalize(chain, out);
            return Ok(Step::Settled);
        }

        if status == Status::StreamEnd && !self.input.is_empty() {
            self.restart_member()?;
            self.redo = true;
            return Ok(Step::Again);
        }

        if self.pending.is_empty() {
            if !empty {
                self.ship_output(chain, out, SegmentFlags::empty());
            }

            return Ok(Step::Settled);
        }

        Ok(Step::Again)
    }

    fn ship_output(&mut self, chain: &mut BufferChain, out: &mut Vec<Segment>, flags: SegmentFlags) {
        if let Some(buf) = self.output.take() {
            out.push(chain.ship(buf, flags));
        }
    }

    fn restart_member(&mut self) -> Result<(), InflateError> {
        let raw = gzip_decoder(self.window_bits).ok_or(InflateError::ResetFailure)?;
        self.raw = Some(raw);
        self.members += 1;

        log::debug!(
            "gzip member ended with {} bytes left in segment; starting member {}",
            self.input.len(),
            self.members
        );

        Ok(())
    }

    fn finalize(&mut self, chain: &mut BufferChain, out: &mut Vec<Segment>) {
        log::debug!(
            "inflate end: {} bytes from {} member(s)",
            self.total,
            self.members
        );

        self.content_length = Some(self.total);

        if let Some(buf) = self.output.take() {
            if buf.is_empty() {
                chain.release(buf);
            } else {
                out.push(chain.ship(buf, SegmentFlags::empty()));
            }
        }
        out.push(Segment::end_of_body());

        self.raw = None;
        self.phase = Phase::Finished;
    }

    /// Tears down decoding state after an unrecoverable error.
    ///
    /// The bound output buffer goes back to `chain` and any queued
    /// input is dropped.
    pub fn abort(&mut self, chain: &mut BufferChain) {
        if let Some(buf) = self.output.take() {
            chain.release(buf);
        }

        self.pending.clear();
        self.input = Bytes::new();
        self.raw = None;
        self.phase = Phase::Failed;
    }
}

//! The request body filter driving decompression.

use std::{io, iter};

use http::StatusCode;
use thiserror::Error;

use crate::{
    chain::{BufferChain, Segment},
    config::{Config, ConfigError},
    guard::LimitExceeded,
    inflate::{Feed, InflateError, Inflater, Phase, Step},
    negotiate::{negotiate, HeaderTable},
};

/// Errors reported by the next stage of request body processing.
#[derive(Debug, Error)]
pub enum DownstreamError {
    /// Writing the body out failed.
    #[error("downstream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The next stage refused the body for another reason.
    #[error("downstream failed: {0}")]
    Other(String),
}

/// The next stage of request body processing.
pub trait Downstream {
    /// Passes a chain of body segments on.
    ///
    /// Implementations may keep clones of the segment data for as
    /// long as they need; the filter will not reuse their memory
    /// before every clone is gone. An empty chain is a hint to make
    /// progress on data held from earlier calls.
    fn deliver(&mut self, chain: &[Segment]) -> Result<(), DownstreamError>;

    /// Discards the remainder of the body and finishes the request
    /// with the given client error.
    fn reject(&mut self, status: StatusCode);
}

/// Errors which terminate processing of a request body.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The configuration cannot drive a filter.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Inflating the body failed.
    #[error(transparent)]
    Inflate(#[from] InflateError),

    /// The next stage failed.
    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    /// The filter was invoked again after a fatal error.
    #[error("request body processing already failed")]
    Terminated,
}

/// What the filter does with a request body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// No body chunk has been seen yet.
    #[default]
    Undecided,
    /// The body is passed on unchanged.
    Bypass,
    /// The body is inflated.
    Inflate,
}

/// The outcome of one [`GunzipFilter::process`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Data was passed downstream; more input is welcome.
    Progress,
    /// Nothing could be produced from the input so far.
    NeedMoreInput,
    /// All output buffers are held downstream. Call again, with or
    /// without new input, once downstream released some of them.
    NeedBuffers,
    /// The whole body was inflated and passed on.
    Done,
    /// The inflated body is too large and was refused with
    /// [`StatusCode::PAYLOAD_TOO_LARGE`].
    Rejected,
}

/// Inflates gzip-encoded request bodies on their way through the
/// server.
///
/// One filter exists per request. The host calls
/// [`GunzipFilter::process`] for every chunk of body segments it
/// receives and acts on the returned [`Status`]. Output memory is
/// limited to the configured buffers; when downstream holds on to all
/// of them, the filter suspends instead of allocating more.
pub struct GunzipFilter<'c> {
    config: &'c Config,
    mode: Mode,
    engine: Inflater,
    chain: BufferChain,
    outbound: Vec<Segment>,
    out_of_buffers: bool,
}

impl<'c> GunzipFilter<'c> {
    /// Creates the filter for a new request.
    ///
    /// Fails for configurations which [`Config::validate`] refuses,
    /// e.g. empty output buffers which could never make progress.
    pub fn new(config: &'c Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            mode: Mode::Undecided,
            engine: Inflater::new(config.window_bits, config.guard()),
            chain: BufferChain::new(config.buffers.count, config.buffers.size),
            outbound: Vec::new(),
            out_of_buffers: false,
        })
    }

    /// Gets the configuration in use.
    #[inline]
    pub fn config(&self) -> &'c Config {
        self.config
    }

    /// Gets the decision made for this body.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Gets the phase of the underlying inflater.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    /// Gets the output buffers of this request.
    #[inline]
    pub fn chain(&self) -> &BufferChain {
        &self.chain
    }

    /// The number of inflated bytes produced so far.
    #[inline]
    pub fn total(&self) -> u64 {
        self.engine.total()
    }

    /// The length of the inflated body once it is complete.
    ///
    /// Hosts use this in place of the length of the compressed body.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.engine.content_length()
    }

    /// Processes a chunk of request body segments and passes the
    /// result to `next`.
    ///
    /// `headers` are only looked at, and possibly rewritten, on the
    /// first call.
    pub fn process<H, I, D>(
        &mut self,
        headers: &mut H,
        input: I,
        next: &mut D,
    ) -> Result<Status, FilterError>
    where
        H: HeaderTable + ?Sized,
        I: IntoIterator<Item = Segment>,
        D: Downstream + ?Sized,
    {
        if !self.config.enabled || self.mode == Mode::Bypass {
            pass_through(input, next)?;
            return Ok(Status::Progress);
        }

        match self.engine.phase() {
            Phase::Finished => {
                pass_through(input, next)?;
                return Ok(Status::Done);
            }
            Phase::Failed => return Err(FilterError::Terminated),
            _ => {}
        }

        if self.mode == Mode::Undecided {
            if negotiate(headers).is_applicable() {
                self.mode = Mode::Inflate;
            } else {
                log::debug!("request body is not gzip-encoded; passing it through");
                self.mode = Mode::Bypass;

                pass_through(input, next)?;
                return Ok(Status::Progress);
            }
        }

        self.engine.push(input);

        match self.run(next) {
            Ok(status) => Ok(status),

            Err(FilterError::Inflate(InflateError::SizeLimitExceeded(e))) => {
                self.reject(e, next);
                Ok(Status::Rejected)
            }

            Err(e) => {
                log::error!("aborting request body inflation: {e}");
                self.abort();
                Err(e)
            }
        }
    }

    fn run<D>(&mut self, next: &mut D) -> Result<Status, FilterError>
    where
        D: Downstream + ?Sized,
    {
        if self.engine.phase() == Phase::Idle {
            self.engine.start()?;
        }

        let mut flush = if self.out_of_buffers {
            // Give downstream a chance to let go of our buffers.
            next.deliver(&[])?;
            self.chain.reconcile(iter::empty());
            self.out_of_buffers = false;
            false
        } else {
            self.chain.in_flight_len() > 0
        };
        let mut delivered = false;

        loop {
            loop {
                match self.engine.feed() {
                    Feed::Ready => {}
                    Feed::Again => continue,
                    Feed::Exhausted => break,
                }

                if self.engine.needs_output() {
                    match self.chain.acquire().map_err(InflateError::from)? {
                        Some(buf) => self.engine.bind_output(buf),
                        None => {
                            self.out_of_buffers = true;
                            break;
                        }
                    }
                }

                match self.engine.step(&mut self.chain, &mut self.outbound)? {
                    Step::Again => continue,
                    Step::Settled => break,
                }
            }

            if self.outbound.is_empty() && !flush {
                return Ok(if self.out_of_buffers {
                    Status::NeedBuffers
                } else if delivered {
                    Status::Progress
                } else {
                    Status::NeedMoreInput
                });
            }

            log::trace!("passing {} segment(s) downstream", self.outbound.len());
            next.deliver(&self.outbound)?;
            self.chain.reconcile(self.outbound.drain(..));

            delivered = true;
            flush = false;

            if self.engine.is_finished() {
                return Ok(Status::Done);
            }

            if self.out_of_buffers {
                if !self.chain.can_acquire() {
                    return Ok(Status::NeedBuffers);
                }
                self.out_of_buffers = false;
            }
        }
    }

    fn reject<D>(&mut self, e: LimitExceeded, next: &mut D)
    where
        D: Downstream + ?Sized,
    {
        log::warn!("refusing request body: {e}");
        self.abort();
        next.reject(StatusCode::PAYLOAD_TOO_LARGE);
    }

    fn abort(&mut self) {
        self.engine.abort(&mut self.chain);
        self.chain.reconcile(self.outbound.drain(..));
        self.out_of_buffers = false;
    }
}

fn pass_through<I, D>(input: I, next: &mut D) -> Result<(), FilterError>
where
    I: IntoIterator<Item = Segment>,
    D: Downstream + ?Sized,
{
    let chain: Vec<_> = input.into_iter().collect();
    next.deliver(&chain)?;
    Ok(())
}

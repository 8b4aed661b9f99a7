use std::{
    collections::VecDeque,
    io::Write,
    iter,
    path::PathBuf,
};

use bytes::Bytes;
use clap::Args;
use degzip_filter::{Downstream, DownstreamError, GunzipFilter, Mode, Segment, Status};
use eyre::Context;
use http::StatusCode;

use super::Command;
use crate::cli::{io::*, FilterArgs, HYPHEN};

/// Inflates a gzip-encoded body the way the request filter does.
#[derive(Debug, Args)]
pub struct Inflate {
    /// The compressed body to process; "-" reads from stdin.
    input: PathBuf,

    /// Where to write the processed body; "-" writes to stdout.
    #[clap(short, default_value = HYPHEN)]
    output: PathBuf,

    /// The number of bytes handed to the filter at once.
    #[clap(long, default_value_t = 8192)]
    chunk_size: usize,

    /// Keeps up to this many delivered buffers around before
    /// releasing them, like a slow downstream stage would.
    #[clap(long, default_value_t = 0)]
    hold: usize,

    /// The Content-Encoding the body is announced with.
    #[clap(long, default_value = "gzip")]
    encoding: String,

    #[clap(flatten)]
    filter: FilterArgs,
}

/// Writes delivered segments out, optionally holding on to their
/// memory for a while.
struct Sink {
    out: Box<dyn Write>,
    written: u64,
    hold: usize,
    held: VecDeque<Bytes>,
    rejected: Option<StatusCode>,
}

impl Sink {
    fn drain(&mut self) {
        log::debug!("releasing {} held buffer(s)", self.held.len());
        self.held.clear();
    }
}

impl Downstream for Sink {
    fn deliver(&mut self, chain: &[Segment]) -> Result<(), DownstreamError> {
        for segment in chain {
            self.out.write_all(&segment.data)?;
            self.written += segment.len() as u64;

            if self.hold > 0 && !segment.is_empty() {
                self.held.push_back(segment.data.clone());
            }
            if segment.is_flush() || segment.is_last() {
                self.out.flush()?;
            }
        }

        while self.held.len() > self.hold {
            self.held.pop_front();
        }

        Ok(())
    }

    fn reject(&mut self, status: StatusCode) {
        self.held.clear();
        self.rejected = Some(status);
    }
}

impl Command for Inflate {
    fn handle(self) -> eyre::Result<()> {
        if self.chunk_size == 0 {
            eyre::bail!("chunk size must be greater than zero");
        }

        let mut config = self.filter.resolve()?;
        if self.filter.enable.is_none() {
            config.enabled = true;
        }
        log::debug!("effective configuration: {config:?}");

        let mut reader = reader(&self.input)?;
        let mut sink = Sink {
            out: writer(&self.output)?,
            written: 0,
            hold: self.hold,
            held: VecDeque::new(),
            rejected: None,
        };

        let mut headers = vec![("Content-Encoding".to_owned(), self.encoding)];
        let mut filter = GunzipFilter::new(&config).context("invalid configuration")?;

        let mut upcoming = read_chunk(&mut reader, self.chunk_size).context("failed to read input")?;
        let mut suspensions = 0_usize;

        loop {
            let chunk = upcoming;
            upcoming = read_chunk(&mut reader, self.chunk_size).context("failed to read input")?;

            let last = upcoming.is_empty();
            let segment = if last {
                Segment::last(chunk)
            } else {
                Segment::new(chunk)
            };

            let mut status = filter.process(&mut headers, [segment], &mut sink)?;
            while status == Status::NeedBuffers {
                suspensions += 1;
                sink.drain();
                status = filter.process(&mut headers, iter::empty(), &mut sink)?;
            }

            if status == Status::Rejected {
                let code = sink.rejected.unwrap_or(StatusCode::PAYLOAD_TOO_LARGE);
                eyre::bail!(
                    "body rejected with {code}: inflated size exceeds {} bytes",
                    config.max_inflate_size
                );
            }

            if last {
                break;
            }
        }

        sink.out.flush().context("failed to flush output")?;

        match filter.mode() {
            Mode::Inflate => log::info!(
                "inflated body to {} bytes using {} of {} buffers ({suspensions} suspension(s))",
                filter.content_length().unwrap_or(filter.total()),
                filter.chain().allocated(),
                config.buffers.count,
            ),
            _ => log::info!("passed {} bytes through unchanged", sink.written),
        }

        Ok(())
    }
}

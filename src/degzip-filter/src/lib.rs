//! Streaming decompression of gzip-encoded HTTP request bodies.
//!
//! [`GunzipFilter`] sits in a server's request body pipeline. When a
//! request announces `Content-Encoding: gzip`, the body is inflated
//! chunk by chunk into a bounded set of output buffers and passed on
//! to the next stage, which sees a plain body. Bodies which inflate to
//! more than the configured maximum are refused with
//! `413 Payload Too Large`.
//!
//! The building blocks are usable on their own:
//!
//! - [`guard`] limits the size of inflated bodies,
//! - [`chain`] manages body segments and output buffer memory,
//! - [`inflate`] decodes gzip incrementally,
//! - [`negotiate`] decides whether a body is inflated at all.

#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod chain;
pub use chain::{Segment, SegmentFlags};

mod config;
pub use config::*;

mod filter;
pub use filter::*;

pub mod guard;

pub mod inflate;

pub mod negotiate;

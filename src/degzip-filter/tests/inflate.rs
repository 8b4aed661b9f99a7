use std::io::Write;

use bytes::Bytes;
use degzip_filter::{
    chain::{BufferChain, Segment},
    guard::SizeGuard,
    inflate::{Feed, Flush, InflateError, Inflater, Phase, DEFAULT_WINDOW_BITS},
};
use flate2::{write::GzEncoder, Compression};

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Runs `engine` over `input` until it is finished or out of input,
/// recycling every buffer right after it was produced.
fn run(
    engine: &mut Inflater,
    chain: &mut BufferChain,
    input: Vec<Segment>,
) -> Result<Vec<u8>, InflateError> {
    let mut body = Vec::new();
    let mut out = Vec::new();

    engine.push(input);
    while !engine.is_finished() {
        match engine.feed() {
            Feed::Ready => {}
            Feed::Again => continue,
            Feed::Exhausted => break,
        }

        if engine.needs_output() {
            engine.bind_output(chain.acquire()?.unwrap());
        }
        engine.step(chain, &mut out)?;

        for segment in &out {
            body.extend_from_slice(&segment.data);
        }
        chain.reconcile(out.drain(..));
    }

    Ok(body)
}

#[test]
fn lifecycle() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(4, 256);
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    assert_eq!(engine.phase(), Phase::Idle);

    engine.start()?;
    assert_eq!(engine.phase(), Phase::Started);
    assert_eq!(engine.feed(), Feed::Exhausted);

    let compressed = gzip(b"lifecycle");
    let (head, tail) = compressed.split_at(4);

    let body = run(&mut engine, &mut chain, vec![Segment::new(head.to_vec())])?;
    assert!(body.is_empty());
    assert_eq!(engine.phase(), Phase::Feeding);
    assert_eq!(engine.content_length(), None);

    let body = run(&mut engine, &mut chain, vec![Segment::last(tail.to_vec())])?;
    assert_eq!(body, b"lifecycle");
    assert_eq!(engine.phase(), Phase::Finished);
    assert_eq!(engine.content_length(), Some(9));
    assert_eq!(engine.flush_mode(), Flush::Finish);

    assert_eq!(chain.in_flight_len(), 0);
    assert_eq!(chain.free_len(), chain.allocated());

    Ok(())
}

#[test]
fn empty_segments_are_skipped() -> Result<(), InflateError> {
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    engine.start()?;

    engine.push([Segment::new(Bytes::new()), Segment::new("x")]);
    assert_eq!(engine.feed(), Feed::Again);
    assert_eq!(engine.feed(), Feed::Ready);
    assert_eq!(engine.pending_len(), 0);

    Ok(())
}

#[test]
fn members_are_counted() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(2, 64);
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    engine.start()?;

    let mut compressed = gzip(b"one ");
    compressed.extend(gzip(b"two "));
    compressed.extend(gzip(b"three"));

    let body = run(&mut engine, &mut chain, vec![Segment::last(compressed)])?;
    assert_eq!(body, b"one two three");
    assert_eq!(engine.members(), 3);
    assert_eq!(engine.total(), 13);

    Ok(())
}

#[test]
fn output_is_bounded_by_buffers() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(1, 100);
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    engine.start()?;

    let plain = vec![b'z'; 1000];
    let mut out = Vec::new();

    engine.push([Segment::last(gzip(&plain))]);
    assert_eq!(engine.feed(), Feed::Ready);
    engine.bind_output(chain.acquire()?.unwrap());
    engine.step(&mut chain, &mut out)?;

    // A highly compressible body fills the only buffer at once.
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].len(), 100);
    assert!(engine.needs_output());
    assert!(chain.acquire()?.is_none());

    Ok(())
}

#[test]
fn size_limit() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(8, 64);
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::new(100));
    engine.start()?;

    let res = run(&mut engine, &mut chain, vec![Segment::last(gzip(&[b'a'; 500]))]);
    match res {
        Err(InflateError::SizeLimitExceeded(e)) => {
            assert_eq!(e.max, 100);
            assert!(e.total > 100 && e.total <= 164);
        }
        other => panic!("expected size limit error, got {other:?}"),
    }
    assert!(engine.is_failed());

    engine.abort(&mut chain);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(chain.free_len(), chain.allocated());

    Ok(())
}

#[test]
fn invalid_window_bits() {
    for bits in [0, 8, 16] {
        let mut engine = Inflater::new(bits, SizeGuard::unlimited());
        assert!(matches!(
            engine.start(),
            Err(InflateError::InitializationFailure(b)) if b == bits
        ));
        assert!(engine.is_failed());
    }
}

#[test]
fn step_requires_decoder_and_output() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(1, 64);
    let mut out = Vec::new();

    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    assert!(matches!(
        engine.step(&mut chain, &mut out),
        Err(InflateError::NotReady)
    ));
    assert!(engine.is_failed());

    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    engine.start()?;
    engine.push([Segment::last(gzip(b"unbound"))]);
    assert_eq!(engine.feed(), Feed::Ready);
    assert!(matches!(
        engine.step(&mut chain, &mut out),
        Err(InflateError::NotReady)
    ));
    assert!(engine.is_failed());
    assert!(out.is_empty());
    assert_eq!(chain.allocated(), 0);

    Ok(())
}

#[test]
fn trailing_garbage_is_rejected() -> Result<(), InflateError> {
    let mut chain = BufferChain::new(2, 64);
    let mut engine = Inflater::new(DEFAULT_WINDOW_BITS, SizeGuard::unlimited());
    engine.start()?;

    let mut compressed = gzip(b"payload");
    compressed.extend_from_slice(b"garbage!");

    let res = run(&mut engine, &mut chain, vec![Segment::last(compressed)]);
    assert!(matches!(res, Err(InflateError::DecodeFailure(_))));

    Ok(())
}

use degzip_utils::directive::*;

#[test]
fn numbers() -> Result<(), DirectiveError> {
    assert_eq!(parse_number("0")?, 0);
    assert_eq!(parse_number(" 15 ")?, 15);

    for value in ["", "abc", "-9", "+9", "4k", "12.5", "99999999999999999999"] {
        assert_eq!(
            parse_number(value),
            Err(DirectiveError::BadNumber(value.to_owned())),
            "{value:?} must be rejected"
        );
    }

    Ok(())
}

#[test]
fn sizes() -> Result<(), DirectiveError> {
    assert_eq!(parse_size("0")?, 0);
    assert_eq!(parse_size("512")?, 512);
    assert_eq!(parse_size("4k")?, 4096);
    assert_eq!(parse_size("4K")?, 4096);
    assert_eq!(parse_size("10m")?, 10 * 1024 * 1024);
    assert_eq!(parse_size(" 1g ")?, 1 << 30);

    Ok(())
}

#[test]
fn bad_sizes() {
    for value in ["", "k", "-1", "+4", "4kb", "1.5m", "99999999999999999999"] {
        assert_eq!(
            parse_size(value),
            Err(DirectiveError::BadSize(value.to_owned())),
            "{value:?} must be rejected"
        );
    }

    // Overflows only after scaling.
    assert!(parse_size("18446744073709551615k").is_err());
}

#[test]
fn flags() {
    assert_eq!(parse_flag("on"), Ok(true));
    assert_eq!(parse_flag("OFF"), Ok(false));
    assert_eq!(
        parse_flag("yes"),
        Err(DirectiveError::BadFlag("yes".to_owned()))
    );
}

#[test]
fn buffers() -> Result<(), DirectiveError> {
    assert_eq!(parse_buffers("32 4k")?, (32, 4096));
    assert_eq!(parse_buffers("  2\t8192 ")?, (2, 8192));

    for value in ["32", "32 4k 1", "4k 4k", "x 4k", ""] {
        assert_eq!(
            parse_buffers(value),
            Err(DirectiveError::BadBuffers(value.to_owned()))
        );
    }

    Ok(())
}

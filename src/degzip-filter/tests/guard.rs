use degzip_filter::guard::{self, LimitExceeded, SizeGuard};

#[test]
fn unlimited() {
    assert_eq!(guard::check(u64::MAX, 0), Ok(()));

    let guard = SizeGuard::unlimited();
    assert!(!guard.is_limited());
    assert_eq!(guard.check(1 << 40), Ok(()));
    assert_eq!(guard.slack(4096), 0);
}

#[test]
fn limited() {
    let guard = SizeGuard::new(100);
    assert!(guard.is_limited());
    assert_eq!(guard.max(), 100);

    assert_eq!(guard.check(0), Ok(()));
    assert_eq!(guard.check(100), Ok(()));
    assert_eq!(
        guard.check(101),
        Err(LimitExceeded {
            total: 101,
            max: 100
        })
    );
    assert_eq!(guard.slack(4096), 4096);
}

//! Common test macros.

/// Check that a floating-point value is within an acceptable tolerance.
///
/// # Usage
/// ```
/// assert_approx_eq!(actual, expected);
/// assert_approx_eq!(actual, expected, epsilon);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr) => {
        assert_approx_eq!($actual, $expected, 1e-9)
    };
    ($actual:expr, $expected:expr, $epsilon:expr) => {
        let actual: f64 = $actual;
        let expected: f64 = $expected;
        let epsilon: f64 = $epsilon;
        let diff = (actual - expected).abs();
        assert!(
            diff <= epsilon,
            "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}`,\n   eps: `{:?}`",
            actual,
            expected,
            diff,
            epsilon
        );
    };
}

/// Like [`assert_approx_eq!`] for an `Option<f64>` that must be `Some`.
#[macro_export]
macro_rules! assert_some_approx_eq {
    ($actual:expr, $expected:expr, $epsilon:expr) => {
        match $actual {
            Some(v) => {
                assert_approx_eq!(v, $expected, $epsilon);
            }
            None => panic!("expected Some(≈{:?}), got None", $expected),
        }
    };
}

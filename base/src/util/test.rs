// Assertion helpers shared by the unit tests of the workspace crates.

pub const DEFAULT_F64_TOLERANCE: f64 = 1e-9;

#[macro_export]
macro_rules! assert_eq_f64 {
    ($left:expr, $right:expr) => {
        $crate::assert_eq_f64!(
            $left,
            $right,
            $crate::util::test::DEFAULT_F64_TOLERANCE
        )
    };
    ($left:expr, $right:expr, $tol:expr) => {{
        let (left, right, tol): (f64, f64, f64) = ($left, $right, $tol);
        assert!(
            (left - right).abs() <= tol,
            "assertion failed: `{} ~= {}` (tolerance {})",
            left,
            right,
            tol
        );
    }};
}

#[macro_export]
macro_rules! assert_err_kind {
    ($res:expr, $kind:expr) => {{
        match $res {
            Ok(_) => panic!("expected error of kind {:?}", $kind),
            Err(err) => assert_eq!(err.kind, $kind, "{}", err),
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::defs::{Error, ErrorKind};

    #[test]
    fn test_assert_eq_f64() {
        assert_eq_f64!(0.1 + 0.2, 0.3);
        assert_eq_f64!(1.0, 1.05, 0.1);
    }

    #[test]
    fn test_assert_err_kind() {
        let res: Result<(), Error> =
            Err(Error::new(ErrorKind::FormatError, "bad".to_string()));
        assert_err_kind!(res, ErrorKind::FormatError);
    }
}

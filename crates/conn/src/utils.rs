/// Returns early with `$error` unless `$predicate` holds.
///
/// ```ignore
/// ensure!(length <= MAX_BODY_SIZE, ParseError::too_large_body(length, MAX_BODY_SIZE));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

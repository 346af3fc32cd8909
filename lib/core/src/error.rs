//! Shared result alias.
//!
//! Every layer owns its error enum; fallible operations return it wrapped in
//! a rootcause [`Report`] so callers can attach context on the way up.

use rootcause::Report;

/// `Result` carrying a [`Report`] of the layer's error type `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Missing;

    impl fmt::Display for Missing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("missing")
        }
    }

    impl std::error::Error for Missing {}

    fn lookup(found: bool) -> Result<u8, Missing> {
        if found { Ok(7) } else { Err(Missing.into()) }
    }

    #[test]
    fn reports_wrap_the_layer_error() {
        assert_eq!(lookup(true).ok(), Some(7));
        let report = lookup(false).unwrap_err();
        assert!(report.to_string().contains("missing"));
    }
}

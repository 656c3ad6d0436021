//! Shared error plumbing.
//!
//! Domain error enums live next to the code that raises them. When such an
//! error crosses into or out of an external system (a directory server, an
//! identity provider, a database) it travels as a `rootcause::Report`, which
//! keeps the original error as its context and records where it was raised.

use rootcause::Report;

/// `Result` whose error is a [`Report`] around the domain error `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Unreachable;

    impl fmt::Display for Unreachable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "upstream unreachable")
        }
    }

    impl std::error::Error for Unreachable {}

    fn dial(up: bool) -> Result<u16, Unreachable> {
        if up {
            return Ok(389);
        }
        Err(Unreachable.into())
    }

    #[test]
    fn domain_errors_convert_into_reports() {
        assert_eq!(dial(true).expect("up"), 389);

        let report = dial(false).unwrap_err();
        assert!(report.to_string().contains("upstream unreachable"));
    }
}

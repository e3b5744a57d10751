//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count.
pub fn filter_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info,heyvox=info",
        2 => "info,heyvox=debug",
        _ => "trace",
    }
}

/// Install the global fmt subscriber, logging to stderr.
///
/// `RUST_LOG` wins over the verbosity count when set. A second call is a no-op.
pub fn init(verbose: u8) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(filter_for(verbose)),
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_escalates_with_verbosity() {
        assert_eq!(filter_for(0), "warn");
        assert_eq!(filter_for(1), "info,heyvox=info");
        assert_eq!(filter_for(2), "info,heyvox=debug");
        assert_eq!(filter_for(3), "trace");
        assert_eq!(filter_for(9), "trace");
    }

    #[test]
    fn test_filters_parse() {
        for verbose in 0..4 {
            assert!(EnvFilter::try_new(filter_for(verbose)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(0);
        init(2);
    }
}

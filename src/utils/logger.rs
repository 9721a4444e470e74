//! Logging setup

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Directive limiting output to this crate at `level`
pub fn filter_directive(level: Level) -> String {
    format!("asyncsuite={level}")
}

/// Initialize the global subscriber; `RUST_LOG` wins when set
pub fn init_logger(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(Level::DEBUG), "asyncsuite=DEBUG");
        assert_eq!(filter_directive(Level::WARN), "asyncsuite=WARN");
    }
}

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogSettings;

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// filter, which wins over `info`. Later calls are no-ops.
pub fn init(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match settings.filter.as_deref() {
            Some(directives) => EnvFilter::try_new(directives),
            None => Ok(EnvFilter::new("info")),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

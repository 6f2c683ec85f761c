use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` with noisy dependencies turned down.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    if config.format.eq_ignore_ascii_case("json") {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

fn default_directives(level: &str) -> String {
    format!("{},sqlx=warn,actix_server=warn", level.trim().to_ascii_lowercase())
}

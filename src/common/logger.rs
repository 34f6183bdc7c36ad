use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter starts from the
/// configured level and picks up any per-module directives from
/// `logging.filters` (a comma-separated directive list, e.g.
/// `oxistore::ec=debug,hyper=warn`).
pub fn init(config: &Config) {
    let logging = config.logging.clone().unwrap_or_default();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => {
            let mut filter = EnvFilter::new(logging.level.as_deref().unwrap_or("info"));
            for directive in logging
                .filters
                .as_deref()
                .unwrap_or("")
                .split(',')
                .filter(|d| !d.is_empty())
            {
                match directive.parse() {
                    Ok(parsed) => filter = filter.add_directive(parsed),
                    Err(e) => eprintln!("ignoring log directive {:?}: {}", directive, e),
                }
            }
            filter
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

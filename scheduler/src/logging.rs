use std::{env, process};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Installs the global subscriber: an `fmt` layer filtered by `RUST_LOG`
/// (default `info`), plus a Loki layer when `LOKI_URL` is set.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_line_number(true);

    let loki_layer = match env::var("LOKI_URL") {
        Ok(url) => {
            let (layer, task) = tracing_loki::builder()
                .label("service", "scheduler")?
                .extra_field("pid", format!("{}", process::id()))?
                .build_url(url.parse()?)?;
            tokio::spawn(task);
            Some(layer)
        }
        Err(_) => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(loki_layer)
        .try_init()?;

    Ok(())
}

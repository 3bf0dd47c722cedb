use anyhow::Error;
use tracing_subscriber::EnvFilter;

const SILENCED_TARGETS: [&str; 4] = [
    "alloy_transport_http",
    "alloy_rpc_client",
    "reqwest",
    "hyper_util",
];

/// Filter from `RUST_LOG` with the noisy transport crates turned off.
pub fn env_filter() -> Result<EnvFilter, Error> {
    SILENCED_TARGETS
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, target| {
            let directive = format!("{target}=off")
                .parse()
                .map_err(|e| anyhow::anyhow!("Failed to parse env filter directive: {e}"))?;
            Ok(filter.add_directive(directive))
        })
}

pub fn init_logging() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter()?) // reads RUST_LOG
        .init();
    Ok(())
}

/// Logs to stderr so command output on stdout stays machine readable.
pub fn init_cli_logging() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter()?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_silences_transport_crates() {
        let filter = env_filter().unwrap().to_string();
        for target in SILENCED_TARGETS {
            assert!(filter.contains(&format!("{target}=off")));
        }
    }
}

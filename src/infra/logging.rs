use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `P4KIT_LOG=p4kit=trace`.
pub const LOG_ENV: &str = "P4KIT_LOG";

/// Filter used when `P4KIT_LOG` is unset or unparsable.
pub fn default_directive(verbose: bool) -> &'static str
{
    if verbose { "debug" } else { "warn" }
}

/// Install the stderr fmt subscriber. A second call is a no-op.
pub fn init(verbose: bool)
{
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn verbose_lowers_the_default_level()
    {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "debug");
    }
}

use std::path::PathBuf;

const CONFIG_ENV: &str = "WEBWATCH_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "webwatch.json";

/// Resolve the config file path: CLI flag, then `WEBWATCH_CONFIG`, then the
/// default file in the working directory.
pub fn config_path(cli_arg: Option<PathBuf>) -> PathBuf {
    cli_arg
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

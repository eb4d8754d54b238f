use config::Config;
use tracing::info;

const DEFAULT_BLOCK_LOG: (&str, &str) = ("block-log", "blocks.json");
const DEFAULT_STOP_ON_REJECTION: (&str, bool) = ("stop-on-rejection", false);

pub struct ReplayerConfig {
    pub block_log: String,
    pub stop_on_rejection: bool,
}

impl ReplayerConfig {
    fn conf(config: &Config, keydef: (&str, &str)) -> String {
        let actual = config.get_string(keydef.0).unwrap_or(keydef.1.to_string());
        info!("Using '{}' for {}", actual, keydef.0);
        actual
    }

    fn conf_bool(config: &Config, keydef: (&str, bool)) -> bool {
        config.get_bool(keydef.0).unwrap_or(keydef.1)
    }

    pub fn new(config: &Config) -> Self {
        Self {
            block_log: Self::conf(config, DEFAULT_BLOCK_LOG),
            stop_on_rejection: Self::conf_bool(config, DEFAULT_STOP_ON_REJECTION),
        }
    }
}

use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub poll_ttl: Duration,
    pub outbound_queue: usize,
    pub static_dir: String,
    pub health_check_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: None,
            poll_ttl: Duration::from_secs(24 * 60 * 60),
            outbound_queue: 32,
            static_dir: "./static".to_string(),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env file");
        }

        let defaults = Self::default();

        Self {
            port: try_load("PORT", defaults.port),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            poll_ttl: Duration::from_secs(try_load("POLL_TTL_SECS", defaults.poll_ttl.as_secs())),
            outbound_queue: try_load("OUTBOUND_QUEUE", defaults.outbound_queue),
            static_dir: try_load("STATIC_DIR", defaults.static_dir),
            health_check_interval: Duration::from_secs(try_load(
                "HEALTH_CHECK_SECS",
                defaults.health_check_interval.as_secs(),
            )),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {value:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

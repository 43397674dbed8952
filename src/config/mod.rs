use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const VERSION: &str = "1.0.0";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    /// 为空时使用内存存储
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_max_idle_secs: u64,
    pub db_query_timeout_secs: u64,
    pub limiter: LimiterConfig,
    pub bcrypt_cost: u32,
    pub smtp_sender: String,
    pub cors_trusted_origins: Vec<String>,
    pub background_workers: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LimiterConfig {
    pub rps: f64,
    pub burst: u32,
    pub enabled: bool,
    pub trust_proxy: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rps: 2.0,
            burst: 4,
            enabled: true,
            trust_proxy: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置，缺省项使用默认值
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Config {
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_or(&lookup, "SERVER_PORT", 4000),
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".into()),
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 25),
            db_max_idle_secs: parse_or(&lookup, "DB_MAX_IDLE_SECS", 900),
            db_query_timeout_secs: parse_or(&lookup, "DB_QUERY_TIMEOUT_SECS", 3),
            limiter: LimiterConfig {
                rps: parse_where(&lookup, "LIMITER_RPS", 2.0, |rps: &f64| {
                    rps.is_finite() && *rps >= 0.0
                }),
                burst: parse_where(&lookup, "LIMITER_BURST", 4, |burst: &u32| *burst > 0),
                enabled: parse_or(&lookup, "LIMITER_ENABLED", true),
                trust_proxy: parse_or(&lookup, "LIMITER_TRUST_PROXY", false),
            },
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST),
            smtp_sender: lookup("SMTP_SENDER")
                .unwrap_or_else(|| "Greenlight <no-reply@greenlight.local>".into()),
            cors_trusted_origins: lookup("CORS_TRUSTED_ORIGINS")
                .map(|origins| origins.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            background_workers: parse_or(&lookup, "BACKGROUND_WORKERS", 8),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.db_query_timeout_secs)
    }

    pub fn db_max_idle(&self) -> Duration {
        Duration::from_secs(self.db_max_idle_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

/// 能解析但超出允许范围的值同样回退到默认值
fn parse_where<F, T>(lookup: &F, key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Debug,
{
    let value = parse_or(lookup, key, default);
    if valid(&value) {
        value
    } else {
        tracing::warn!("Out of range value for {}: {:?}, using default", key, value);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]);
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.environment, "development");
        assert!(config.database_url.is_none());
        assert_eq!(config.limiter.rps, 2.0);
        assert_eq!(config.limiter.burst, 4);
        assert!(config.limiter.enabled);
        assert!(!config.limiter.trust_proxy);
        assert_eq!(config.query_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn values_are_parsed_and_invalid_ones_fall_back() {
        let config = config_from(&[
            ("SERVER_PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/greenlight"),
            ("LIMITER_ENABLED", "false"),
            ("LIMITER_BURST", "lots"),
            ("CORS_TRUSTED_ORIGINS", "http://a.test  http://b.test"),
        ]);
        assert_eq!(config.server_port, 8080);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/greenlight")
        );
        assert!(!config.limiter.enabled);
        assert_eq!(config.limiter.burst, 4);
        assert_eq!(
            config.cors_trusted_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = config_from(&[("DATABASE_URL", "  ")]);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn limiter_values_out_of_range_fall_back() {
        for rps in ["NaN", "inf", "-inf", "-2"] {
            let config = config_from(&[("LIMITER_RPS", rps), ("LIMITER_BURST", "0")]);
            assert_eq!(config.limiter.rps, 2.0, "LIMITER_RPS={rps}");
            assert_eq!(config.limiter.burst, 4);
        }

        let config = config_from(&[("LIMITER_RPS", "0"), ("LIMITER_BURST", "10")]);
        assert_eq!(config.limiter.rps, 0.0);
        assert_eq!(config.limiter.burst, 10);
    }
}

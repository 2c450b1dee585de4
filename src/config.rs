use std::env;
use std::path::PathBuf;

pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub log_json: bool,
    pub workspace: Option<PathBuf>,
    pub token_ttl_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_json: false,
            workspace: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_filter: env::var("DEPTADMIN_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_filter),
            log_json: env_bool("DEPTADMIN_LOG_JSON", defaults.log_json),
            workspace: env::var("DEPTADMIN_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            token_ttl_hours: env::var("DEPTADMIN_TOKEN_TTL_HOURS")
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|h| *h > 0)
                .unwrap_or(defaults.token_ttl_hours),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

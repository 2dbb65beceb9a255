use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub barcode: BarcodeConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres 连接串；写 "memory" 则使用进程内存储
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.eq_ignore_ascii_case("memory")
    }
}

/// 条码格式策略。pattern 为空时只做非空校验
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BarcodeConfig {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scan_timeout_secs(),
            frame_rate_hz: default_frame_rate_hz(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SSE 心跳间隔（秒）
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// 客户端轮询间隔（秒），没有推送通道时使用
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_scan_timeout_secs() -> u64 {
    15
}

fn default_frame_rate_hz() -> u32 {
    60
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("Missing DATABASE_URL and no config.toml found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    barcode: BarcodeConfig::default(),
                    scanner: ScannerConfig::default(),
                    sync: SyncConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str)
            .map_err(|e| format!("Failed to parse config file: {e}").into())
    }

    /// 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("BARCODE_PATTERN") {
            self.barcode.pattern = (!v.is_empty()).then_some(v);
        }
        if let Ok(v) = env::var("BARCODE_PATTERN_MESSAGE") {
            self.barcode.pattern_message = Some(v);
        }
        if let Ok(v) = env::var("SCAN_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.scanner.timeout_secs = n;
        }
        if let Ok(v) = env::var("SCAN_FRAME_RATE_HZ")
            && let Ok(n) = v.parse()
        {
            self.scanner.frame_rate_hz = n;
        }
        if let Ok(v) = env::var("SSE_KEEP_ALIVE_SECS")
            && let Ok(n) = v.parse()
        {
            self.sync.keep_alive_secs = n;
        }
        if let Ok(v) = env::var("SYNC_POLL_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.sync.poll_interval_secs = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
url = "memory"
max_connections = 5
"#,
        )
        .unwrap();

        assert!(config.database.is_memory());
        assert!(config.barcode.pattern.is_none());
        assert_eq!(config.scanner.timeout_secs, 15);
        assert_eq!(config.scanner.frame_rate_hz, 60);
        assert_eq!(config.sync.poll_interval_secs, 5);
    }

    #[test]
    fn test_parse_barcode_pattern() {
        let config = Config::parse(
            r#"
[server]
host = "0.0.0.0"
port = 8080

[database]
url = "postgres://localhost/redeem"
max_connections = 10

[barcode]
pattern = '^U\d{12}$'
pattern_message = "Barcode must be U followed by 12 digits"

[scanner]
timeout_secs = 20
"#,
        )
        .unwrap();

        assert!(!config.database.is_memory());
        assert_eq!(config.barcode.pattern.as_deref(), Some(r"^U\d{12}$"));
        assert_eq!(config.scanner.timeout_secs, 20);
        assert_eq!(config.scanner.frame_rate_hz, 60);
    }

    #[test]
    fn test_parse_rejects_missing_sections() {
        assert!(Config::parse("[server]\nhost = \"x\"\nport = 1\n").is_err());
    }
}

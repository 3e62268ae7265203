//! mirror-config - 配置加载库
//!
//! 按顺序合并 `default.toml`、`{APP_ENV}.toml` 与 `APP_` 前缀的环境变量，
//! 嵌套字段用 `__` 分隔，例如 `APP_SYSTEM__USE_REDIS=true`

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    /// 物理表名前缀，非空时表名为 `{prefix}_{name}`
    #[serde(default)]
    pub table_prefix: String,
    /// 客户端字符集（client_encoding）
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// 建立连接的总时限，超时视为启动失败
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 是否打印 SQL 语句
    #[serde(default)]
    pub log_statements: bool,
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_charset() -> String {
    "UTF8".to_string()
}

fn default_max_connections() -> u32 {
    // 开发环境: 10, 生产环境: 50
    match std::env::var("APP_ENV").as_deref() {
        Ok("production") => 50,
        _ => 10,
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// 逻辑表名转物理表名
    pub fn physical_table(&self, name: &str) -> String {
        if self.table_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.table_prefix, name)
        }
    }

    /// 隐藏密码的 DSN，仅用于日志
    pub fn redacted_dsn(&self) -> String {
        format!(
            "postgres://{}:******@{}:{}/{}?client_encoding={}&search_path={}",
            self.username, self.host, self.port, self.database, self.charset, self.schema
        )
    }

    /// 完整 DSN（包含密码）
    pub fn dsn(&self) -> Secret<String> {
        Secret::new(format!(
            "postgres://{}:{}@{}:{}/{}?client_encoding={}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database,
            self.charset
        ))
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: Secret<String>,
    /// 所有镜像键的前缀
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_redis_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_redis_url() -> Secret<String> {
    Secret::new("redis://127.0.0.1:6379".to_string())
}

fn default_key_prefix() -> String {
    "mirror".to_string()
}

fn default_redis_connect_timeout_secs() -> u64 {
    5
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_secs: default_redis_connect_timeout_secs(),
        }
    }
}

/// 缓存开关
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// 是否启用 Redis（总开关）
    #[serde(default)]
    pub use_redis: bool,
    /// 查询是否走 Redis 镜像（独立于其他 Redis 用途）
    #[serde(default)]
    pub use_redis_service: bool,
    /// Redis 不可达时是否降级到数据库查询
    #[serde(default = "default_true")]
    pub cache_fallback: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            use_redis: false,
            use_redis_service: false,
            cache_fallback: true,
        }
    }
}

/// 变更流同步配置
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// 逻辑复制槽名称
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    /// 单次拉取的最大变更数
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// 无新变更时的轮询间隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// 镜像到 Redis 的表（逻辑名）
    #[serde(default)]
    pub mirrored_tables: Vec<String>,
    /// 只走数据库的表（日志类、数据量持续增长的表）
    #[serde(default)]
    pub excluded_tables: Vec<String>,
    /// 非 `id` 主键的表
    #[serde(default)]
    pub primary_keys: HashMap<String, Vec<String>>,
}

fn default_slot_name() -> String {
    "mirror_sync".to_string()
}

fn default_batch_size() -> u32 {
    500
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slot_name: default_slot_name(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            mirrored_tables: Vec::new(),
            excluded_tables: Vec::new(),
            primary_keys: HashMap::new(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// 表的主键列，默认 `id`
    pub fn primary_key_of(&self, table: &str) -> Vec<String> {
        self.primary_keys
            .get(table)
            .cloned()
            .unwrap_or_else(|| vec!["id".to_string()])
    }
}

/// 派生结果缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct MemoConfig {
    #[serde(default = "default_memo_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_memo_capacity")]
    pub max_capacity: u64,
}

fn default_memo_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_memo_capacity() -> u64 {
    10_000
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_memo_ttl_secs(),
            max_capacity: default_memo_capacity(),
        }
    }
}

impl MemoConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 是否安装 Prometheus 指标记录器
    #[serde(default)]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub memo: MemoConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验镜像表 / 排除表的划分
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in self.sync.mirrored_tables.iter().chain(&self.sync.excluded_tables) {
            if !is_identifier(name) {
                return Err(ConfigError::Invalid(format!("invalid table name: {:?}", name)));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "table {} is listed more than once across mirrored/excluded tables",
                    name
                )));
            }
        }

        for (table, columns) in &self.sync.primary_keys {
            if !self.sync.mirrored_tables.contains(table) {
                return Err(ConfigError::Invalid(format!(
                    "primary key override for {} which is not a mirrored table",
                    table
                )));
            }
            if columns.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty primary key for table {}",
                    table
                )));
            }
        }

        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid("sync.batch_size must be positive".to_string()));
        }

        if !self.table_prefix_is_valid() {
            return Err(ConfigError::Invalid(format!(
                "invalid table prefix: {:?}",
                self.database.table_prefix
            )));
        }

        Ok(())
    }

    fn table_prefix_is_valid(&self) -> bool {
        self.database.table_prefix.is_empty() || is_identifier(&self.database.table_prefix)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

/// SQL 标识符：字母或下划线开头，仅包含字母、数字、下划线
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests;

use crate::{AppConfig, ConfigError, DatabaseConfig, is_identifier};
use figment::{
    Figment, Jail,
    providers::{Env, Format, Toml},
};
use secrecy::{ExposeSecret, Secret};

const BASE: &str = r#"
app_name = "admin"

[database]
username = "admin"
password = "hunter2"
database = "admin"
table_prefix = "tb"

[sync]
mirrored_tables = ["sys_user", "sys_role", "relation_menu_role"]
excluded_tables = ["sys_operation_log"]

[sync.primary_keys]
relation_menu_role = ["menu_id", "role_id"]
"#;

fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "db".to_string(),
        port: 5432,
        username: "admin".to_string(),
        password: Secret::new("hunter2".to_string()),
        database: "admin".to_string(),
        schema: "public".to_string(),
        table_prefix: "tb".to_string(),
        charset: "UTF8".to_string(),
        max_connections: 10,
        connect_timeout_secs: 10,
        log_statements: false,
    }
}

#[test]
fn test_secret_redaction() {
    let secret = Secret::new("my_secret_password".to_string());
    let debug_output = format!("{:?}", secret);
    assert!(debug_output.contains("Secret([REDACTED"));
    assert!(!debug_output.contains("my_secret_password"));
}

#[test]
fn test_config_struct_redaction() {
    let config = database_config();
    let debug_output = format!("{:?}", config);
    assert!(!debug_output.contains("hunter2"));
    assert!(debug_output.contains("Secret([REDACTED"));
}

#[test]
fn test_redacted_dsn() {
    let config = database_config();
    let dsn = config.redacted_dsn();
    assert!(dsn.contains("admin:******@db:5432/admin"));
    assert!(!dsn.contains("hunter2"));
    assert!(config.dsn().expose_secret().contains("hunter2"));
}

#[test]
fn test_physical_table() {
    let mut config = database_config();
    assert_eq!(config.physical_table("sys_user"), "tb_sys_user");
    config.table_prefix.clear();
    assert_eq!(config.physical_table("sys_user"), "sys_user");
}

#[test]
fn test_load_with_defaults() {
    let config = AppConfig::from_figment(Figment::from(Toml::string(BASE))).unwrap();
    assert_eq!(config.app_env, "development");
    assert_eq!(config.database.port, 5432);
    assert!(!config.system.use_redis);
    assert!(config.system.cache_fallback);
    assert_eq!(config.sync.batch_size, 500);
    assert_eq!(config.memo.ttl_secs, 86_400);
    assert_eq!(config.sync.primary_key_of("sys_user"), vec!["id".to_string()]);
    assert_eq!(
        config.sync.primary_key_of("relation_menu_role"),
        vec!["menu_id".to_string(), "role_id".to_string()]
    );
}

#[test]
fn test_overlapping_tables_rejected() {
    let toml = BASE.replace(
        r#"excluded_tables = ["sys_operation_log"]"#,
        r#"excluded_tables = ["sys_operation_log", "sys_user"]"#,
    );
    let err = AppConfig::from_figment(Figment::from(Toml::string(&toml))).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("sys_user")));
}

#[test]
fn test_primary_key_override_must_be_mirrored() {
    let toml = format!("{}\nsys_operation_log = [\"id\"]\n", BASE);
    let err = AppConfig::from_figment(Figment::from(Toml::string(&toml))).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_env_overrides() {
    Jail::expect_with(|jail| {
        jail.set_env("APP_SYSTEM__USE_REDIS", "true");
        jail.set_env("APP_SYSTEM__USE_REDIS_SERVICE", "true");
        jail.set_env("APP_DATABASE__PORT", "6432");

        let figment = Figment::new()
            .merge(Toml::string(BASE))
            .merge(Env::prefixed("APP_").split("__"));
        let config = AppConfig::from_figment(figment).expect("config loads");

        assert!(config.system.use_redis);
        assert!(config.system.use_redis_service);
        assert_eq!(config.database.port, 6432);
        Ok(())
    });
}

#[test]
fn test_is_identifier() {
    assert!(is_identifier("sys_user"));
    assert!(is_identifier("_tmp1"));
    assert!(!is_identifier("1table"));
    assert!(!is_identifier("users; drop table x"));
    assert!(!is_identifier(""));
}

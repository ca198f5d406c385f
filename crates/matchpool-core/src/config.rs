// Configuration loading and parsing (platform.toml, server.toml).

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::market::book::StakeLimits;
use crate::settlement::{validate_stake, PoolRules, SlotPolicy, UnclaimedPolicy};

/// Largest currency scale accepted; payouts are rounded to this many places.
const MAX_CURRENCY_SCALE: u32 = 8;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub platform: PlatformConfig,
    pub server: ServerConfig,
}

// ---------------------------------------------------------------------------
// platform.toml structs
// ---------------------------------------------------------------------------

/// Wrapper for the top-level `[platform]` table in platform.toml.
#[derive(Debug, Clone, Deserialize)]
struct PlatformFile {
    platform: PlatformConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    /// Display code of the platform currency, e.g. "ETB".
    pub currency: String,
    pub currency_scale: u32,
    /// Fraction of each pool retained by the house. Written as a string in
    /// TOML ("0.10") so it is parsed exactly.
    pub house_commission: Decimal,
    #[serde(default)]
    pub slot_policy: SlotPolicy,
    #[serde(default)]
    pub unclaimed_pool: UnclaimedPolicy,
    /// Balance credited to every newly registered account.
    pub starting_balance: Decimal,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    /// Usernames seeded as admin accounts at startup.
    #[serde(default)]
    pub admins: Vec<String>,
}

impl PlatformConfig {
    pub fn pool_rules(&self) -> PoolRules {
        PoolRules {
            commission_rate: self.house_commission,
            slot_policy: self.slot_policy,
            currency_scale: self.currency_scale,
            unclaimed: self.unclaimed_pool,
        }
    }

    pub fn stake_limits(&self) -> StakeLimits {
        StakeLimits {
            min: self.min_stake,
            max: self.max_stake,
        }
    }
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub websocket: WebsocketSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    pub directory: String,
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it.
    pub filter: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

impl ServerConfig {
    /// `address:port` the WebSocket listener binds to.
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.websocket.bind_address, self.websocket.port)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/platform.toml` and
/// `config/server.toml`, relative to the given `base_dir`.
///
/// This does not copy defaults; `load_config()` does.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let platform_path = config_dir.join("platform.toml");
    let platform_text = read_file(&platform_path)?;
    let platform_file: PlatformFile =
        toml::from_str(&platform_text).map_err(|e| ConfigError::ParseError {
            path: platform_path.clone(),
            source: e,
        })?;

    let server_path = config_dir.join("server.toml");
    let server_text = read_file(&server_path)?;
    let server: ServerConfig =
        toml::from_str(&server_text).map_err(|e| ConfigError::ParseError {
            path: server_path.clone(),
            source: e,
        })?;

    let config = Config {
        platform: platform_file.platform,
        server,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let p = &config.platform;

    if p.name.trim().is_empty() {
        return Err(invalid("platform.name", "must not be empty".into()));
    }

    if p.currency_scale > MAX_CURRENCY_SCALE {
        return Err(invalid(
            "platform.currency_scale",
            format!("must be at most {MAX_CURRENCY_SCALE}, got {}", p.currency_scale),
        ));
    }

    let rate = p.house_commission;
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(invalid(
            "platform.house_commission",
            format!("must be in [0, 1), got {rate}"),
        ));
    }

    if p.starting_balance < Decimal::ZERO {
        return Err(invalid(
            "platform.starting_balance",
            format!("must be >= 0, got {}", p.starting_balance),
        ));
    }

    let rules = p.pool_rules();
    for (field, stake) in [
        ("platform.min_stake", p.min_stake),
        ("platform.max_stake", p.max_stake),
    ] {
        validate_stake(stake, &rules).map_err(|e| invalid(field, e.to_string()))?;
    }
    if p.min_stake > p.max_stake {
        return Err(invalid(
            "platform.min_stake",
            format!(
                "must not exceed max_stake ({} > {})",
                p.min_stake, p.max_stake
            ),
        ));
    }

    if p.admins.iter().any(|name| name.trim().is_empty()) {
        return Err(invalid("platform.admins", "usernames must not be empty".into()));
    }

    if config.server.websocket.port == 0 {
        return Err(invalid("websocket.port", "must be non-zero".into()));
    }

    if config.server.database.path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;

    /// Workspace root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    /// Fresh temp dir with the default config files copied into `config/`.
    fn temp_config(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        let config_dir = tmp.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let root = project_root();
        for file in ["platform.toml", "server.toml"] {
            fs::copy(root.join("defaults").join(file), config_dir.join(file)).unwrap();
        }
        tmp
    }

    fn rewrite(tmp: &Path, file: &str, from: &str, to: &str) {
        let path = tmp.join("config").join(file);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(from), "{file} does not contain {from}");
        fs::write(&path, text.replace(from, to)).unwrap();
    }

    fn expect_validation_error(tmp: &Path, expected_field: &str) {
        let err = load_config_from(tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = temp_config("matchpool_config_valid");
        let config = load_config_from(&tmp).expect("should load default config");

        assert_eq!(config.platform.currency, "ETB");
        assert_eq!(config.platform.currency_scale, 2);
        assert_eq!(config.platform.house_commission, dec!(0.10));
        assert_eq!(config.platform.slot_policy, SlotPolicy::SingleSlot);
        assert_eq!(config.platform.unclaimed_pool, UnclaimedPolicy::House);
        assert_eq!(config.platform.starting_balance, dec!(1000));
        assert!(config.platform.min_stake <= config.platform.max_stake);
        assert_eq!(config.platform.admins, vec!["admin".to_string()]);

        let rules = config.platform.pool_rules();
        assert_eq!(rules, PoolRules::default());

        assert_eq!(config.server.websocket.port, 9100);
        assert_eq!(config.server.ws_addr(), "127.0.0.1:9100");
        assert_eq!(config.server.database.path, "matchpool.db");
        assert_eq!(config.server.logging.directory, "logs");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_commission_of_one() {
        let tmp = temp_config("matchpool_config_commission");
        rewrite(
            &tmp,
            "platform.toml",
            "house_commission = \"0.10\"",
            "house_commission = \"1.0\"",
        );
        expect_validation_error(&tmp, "platform.house_commission");
    }

    #[test]
    fn rejects_min_stake_above_max() {
        let tmp = temp_config("matchpool_config_stake_order");
        rewrite(&tmp, "platform.toml", "min_stake = \"1\"", "min_stake = \"500000\"");
        expect_validation_error(&tmp, "platform.min_stake");
    }

    #[test]
    fn rejects_stake_finer_than_currency() {
        let tmp = temp_config("matchpool_config_stake_scale");
        rewrite(&tmp, "platform.toml", "min_stake = \"1\"", "min_stake = \"0.005\"");
        expect_validation_error(&tmp, "platform.min_stake");
    }

    #[test]
    fn rejects_negative_starting_balance() {
        let tmp = temp_config("matchpool_config_balance");
        rewrite(
            &tmp,
            "platform.toml",
            "starting_balance = \"1000\"",
            "starting_balance = \"-1\"",
        );
        expect_validation_error(&tmp, "platform.starting_balance");
    }

    #[test]
    fn rejects_blank_admin_username() {
        let tmp = temp_config("matchpool_config_admins");
        rewrite(&tmp, "platform.toml", "admins = [\"admin\"]", "admins = [\" \"]");
        expect_validation_error(&tmp, "platform.admins");
    }

    #[test]
    fn rejects_zero_port() {
        let tmp = temp_config("matchpool_config_port");
        rewrite(&tmp, "server.toml", "port = 9100", "port = 0");
        expect_validation_error(&tmp, "websocket.port");
    }

    #[test]
    fn open_pool_policy_parses() {
        let tmp = temp_config("matchpool_config_open_pool");
        rewrite(
            &tmp,
            "platform.toml",
            "slot_policy = \"single_slot\"",
            "slot_policy = \"open_pool\"",
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.platform.slot_policy, SlotPolicy::OpenPool);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_server_toml() {
        let tmp = temp_config("matchpool_config_missing_server");
        fs::remove_file(tmp.join("config/server.toml")).unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("server.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("matchpool_config_invalid_toml");
        fs::write(tmp.join("config/platform.toml"), "[platform\nname = ").unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_files() {
        let tmp = std::env::temp_dir().join("matchpool_config_ensure_copies");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join("platform.toml"), "a").unwrap();
        fs::write(defaults_dir.join("server.toml"), "b").unwrap();
        fs::write(defaults_dir.join("secrets.toml.example"), "c").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 2);
        assert!(tmp.join("config/platform.toml").exists());
        assert!(!tmp.join("config/secrets.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = std::env::temp_dir().join("matchpool_config_ensure_skips");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults/platform.toml"), "new").unwrap();
        fs::write(tmp.join("config/platform.toml"), "edited").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert!(copied.is_empty());
        assert_eq!(
            fs::read_to_string(tmp.join("config/platform.toml")).unwrap(),
            "edited"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("matchpool_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }
}

use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ── Top-level config ──────────────────────────────────────────────

/// Minion host configuration: identity plus the connection parameters the
/// host bus client is built from. Read-only here — the returner never
/// writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to minion.toml - computed from the conf dir, not serialized
    #[serde(skip)]
    pub conf_path: PathBuf,

    /// Minion identity. The host bus binds its socket from this.
    #[serde(default = "default_id")]
    pub id: String,

    #[serde(default)]
    pub master: MasterConfig,

    #[serde(default)]
    pub returner: ReturnerConfig,
}

/// Master connection parameters, opaque to this crate beyond the lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_master_host")]
    pub host: String,
    /// Port the master collects returns on.
    #[serde(default = "default_ret_port")]
    pub ret_port: u16,
    /// Port the master publishes jobs on.
    #[serde(default = "default_pub_port")]
    pub pub_port: u16,
}

/// Returner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnerConfig {
    /// Filter tag stamped onto every forwarded return record.
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Stamp a fresh `event_id` onto records that lack one. Off by
    /// default: the published record is exactly the input plus the tag.
    #[serde(default)]
    pub event_id: bool,
}

fn default_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "minion".to_string())
}

fn default_master_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ret_port() -> u16 {
    4506
}

fn default_pub_port() -> u16 {
    4505
}

fn default_tag() -> String {
    crate::events::THIRD_PARTY_TAG.to_string()
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: default_master_host(),
            ret_port: default_ret_port(),
            pub_port: default_pub_port(),
        }
    }
}

impl Default for ReturnerConfig {
    fn default() -> Self {
        Self {
            tag: default_tag(),
            event_id: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conf_path: default_conf_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("minion.toml"),
            id: default_id(),
            master: MasterConfig::default(),
            returner: ReturnerConfig::default(),
        }
    }
}

fn default_conf_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".busfire"))
}

// ── Config impl ──────────────────────────────────────────────────

impl Config {
    /// Load from the host conf dir: `$BUSFIRE_CONF_DIR`, else `~/.busfire`.
    ///
    /// A missing minion.toml yields defaults; an unreadable or malformed
    /// one is the caller's problem, propagated as-is.
    pub fn load() -> Result<Self> {
        let dir = match std::env::var("BUSFIRE_CONF_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_conf_dir()?,
        };
        Self::load_from(&dir)
    }

    /// Load from an explicit conf dir.
    ///
    /// Reads `minion.toml`, then merges every `*.toml` under the
    /// `minion.d/` drop directory in lexicographic order — later files
    /// win, nested tables merge key-by-key. Env overrides apply last.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let conf_path = dir.join("minion.toml");
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if conf_path.exists() {
            merge_values(&mut merged, read_toml(&conf_path)?);
        }

        let drop_dir = dir.join("minion.d");
        if drop_dir.is_dir() {
            for path in drop_files(&drop_dir)? {
                debug!(path = %path.display(), "merging drop-dir config");
                merge_values(&mut merged, read_toml(&path)?);
            }
        }

        let mut config: Config = merged
            .try_into()
            .with_context(|| format!("Invalid minion configuration in {}", dir.display()))?;
        config.conf_path = conf_path;
        config.apply_env_overrides();

        // The host bus binds its socket from the id. Not ours to reject.
        if config.id.is_empty() {
            warn!("minion id is empty; the host bus may bind an invalid socket");
        }

        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("BUSFIRE_ID") {
            if !id.is_empty() {
                self.id = id;
            }
        }

        if let Ok(host) = std::env::var("BUSFIRE_MASTER_HOST") {
            if !host.is_empty() {
                self.master.host = host;
            }
        }

        if let Ok(port_str) = std::env::var("BUSFIRE_MASTER_RET_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.master.ret_port = port;
            }
        }

        if let Ok(port_str) = std::env::var("BUSFIRE_MASTER_PUB_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.master.pub_port = port;
            }
        }

        if let Ok(tag) = std::env::var("BUSFIRE_RETURN_TAG") {
            if !tag.is_empty() {
                self.returner.tag = tag;
            }
        }
    }
}

fn read_toml(path: &Path) -> Result<toml::Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn drop_files(drop_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(drop_dir)
        .with_context(|| format!("Failed to read drop directory: {}", drop_dir.display()))?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                warn!(error = %err, dir = %drop_dir.display(), "skipping unreadable drop-dir entry");
                None
            }
        })
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    Ok(files)
}

/// Recursive table merge — overlay wins on scalar conflicts.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // load_from reads BUSFIRE_* env vars via apply_env_overrides, so every
    // test that sets env vars or loads config takes this lock.
    fn env_override_test_guard() -> std::sync::MutexGuard<'static, ()> {
        static ENV_OVERRIDE_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        ENV_OVERRIDE_TEST_LOCK
            .lock()
            .expect("env override test lock poisoned")
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(!config.id.is_empty());
        assert_eq!(config.master.host, "127.0.0.1");
        assert_eq!(config.master.ret_port, 4506);
        assert_eq!(config.master.pub_port, 4505);
        assert_eq!(config.returner.tag, "third-party");
        assert!(!config.returner.event_id);
    }

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let parsed: Config = toml::from_str(r#"id = "graphite.foxhop.net""#).unwrap();
        assert_eq!(parsed.id, "graphite.foxhop.net");
        assert_eq!(parsed.master.ret_port, 4506);
        assert_eq!(parsed.returner.tag, "third-party");
    }

    #[test]
    fn full_toml_parses() {
        let raw = r#"
            id = "web-01"

            [master]
            host = "salt.example.com"
            ret_port = 14506
            pub_port = 14505

            [returner]
            tag = "deploy-results"
        "#;
        let parsed: Config = toml::from_str(raw).unwrap();
        assert_eq!(parsed.id, "web-01");
        assert_eq!(parsed.master.host, "salt.example.com");
        assert_eq!(parsed.master.ret_port, 14506);
        assert_eq!(parsed.master.pub_port, 14505);
        assert_eq!(parsed.returner.tag, "deploy-results");
    }

    #[test]
    fn missing_conf_dir_yields_defaults() {
        let _env_guard = env_override_test_guard();
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.master.host, "127.0.0.1");
        assert_eq!(config.returner.tag, "third-party");
        assert_eq!(config.conf_path, dir.path().join("minion.toml"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let _env_guard = env_override_test_guard();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("minion.toml"), "id = [unclosed").unwrap();
        let err = Config::load_from(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn drop_dir_overrides_base_file() {
        let _env_guard = env_override_test_guard();
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("minion.toml"),
            "id = \"base\"\n[returner]\ntag = \"base-tag\"\n",
        )
        .unwrap();
        let drop_dir = dir.path().join("minion.d");
        fs::create_dir(&drop_dir).unwrap();
        fs::write(drop_dir.join("10-tag.toml"), "[returner]\ntag = \"drop-tag\"\n").unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.id, "base");
        assert_eq!(config.returner.tag, "drop-tag");
    }

    #[test]
    fn drop_dir_merges_in_lexicographic_order() {
        let _env_guard = env_override_test_guard();
        let dir = TempDir::new().unwrap();
        let drop_dir = dir.path().join("minion.d");
        fs::create_dir(&drop_dir).unwrap();
        fs::write(drop_dir.join("20-late.toml"), "id = \"late\"\n").unwrap();
        fs::write(drop_dir.join("10-early.toml"), "id = \"early\"\n").unwrap();
        // non-toml files are ignored
        fs::write(drop_dir.join("notes.txt"), "id = \"never\"\n").unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.id, "late");
    }

    #[test]
    fn drop_dir_merge_keeps_unrelated_tables() {
        let _env_guard = env_override_test_guard();
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("minion.toml"),
            "[master]\nhost = \"salt.example.com\"\n",
        )
        .unwrap();
        let drop_dir = dir.path().join("minion.d");
        fs::create_dir(&drop_dir).unwrap();
        fs::write(drop_dir.join("ports.toml"), "[master]\nret_port = 24506\n").unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.master.host, "salt.example.com");
        assert_eq!(config.master.ret_port, 24506);
    }

    #[test]
    fn env_overrides_apply() {
        let _env_guard = env_override_test_guard();
        let mut config = Config::default();

        // SAFETY: test-only env mutation; var names are unique to this test.
        unsafe {
            std::env::set_var("BUSFIRE_ID", "env-minion");
            std::env::set_var("BUSFIRE_MASTER_HOST", "env-master");
            std::env::set_var("BUSFIRE_MASTER_RET_PORT", "34506");
            std::env::set_var("BUSFIRE_RETURN_TAG", "env-tag");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("BUSFIRE_ID");
            std::env::remove_var("BUSFIRE_MASTER_HOST");
            std::env::remove_var("BUSFIRE_MASTER_RET_PORT");
            std::env::remove_var("BUSFIRE_RETURN_TAG");
        }

        assert_eq!(config.id, "env-minion");
        assert_eq!(config.master.host, "env-master");
        assert_eq!(config.master.ret_port, 34506);
        assert_eq!(config.returner.tag, "env-tag");
    }

    #[test]
    fn empty_env_values_do_not_override() {
        let _env_guard = env_override_test_guard();
        let mut config = Config::default();
        let original_id = config.id.clone();

        unsafe {
            std::env::set_var("BUSFIRE_ID", "");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("BUSFIRE_ID");
        }

        assert_eq!(config.id, original_id);
    }
}

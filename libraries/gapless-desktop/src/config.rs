/// Desktop player configuration
use crate::error::{AudioError, Result};
use gapless_playback::PlaybackConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "GAPLESS_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "gapless.toml";

/// Prefix of overriding environment variables (`GAPLESS_PLAYBACK__VOLUME=0.5`)
pub const ENV_PREFIX: &str = "GAPLESS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DesktopConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default = "default_http")]
    pub http: HttpSettings,

    #[serde(default = "default_output")]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    /// Issue a HEAD request first and report the final URL after redirects
    #[serde(default = "default_resolve_redirects")]
    pub resolve_redirects: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Queue tick interval of the player thread
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Decoded audio kept ahead of the play head by a streaming handle
    #[serde(default = "default_stream_buffer_secs")]
    pub stream_buffer_secs: f64,
}

impl DesktopConfig {
    /// Load configuration from file and environment
    ///
    /// The file is `$GAPLESS_CONFIG` if set, otherwise `gapless.toml` when it
    /// exists. Environment variables prefixed with `GAPLESS_` override it,
    /// with `__` separating sections from keys.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            });

        Self::build(path.as_deref(), Self::environment())
    }

    /// Load configuration from an explicit file, still honouring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()), Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub(crate) fn build(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(AudioError::ConfigError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            settings = settings.add_source(config::File::from(path));
        }

        settings = settings.add_source(env);

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            volume = config.playback.volume,
            disable_precise = config.playback.disable_precise,
            tick_ms = config.output.tick_interval_ms,
            "Loaded desktop configuration"
        );

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let playback = &self.playback;

        if !(0.0..=1.0).contains(&playback.volume) {
            return Err(AudioError::ConfigError(format!(
                "playback.volume must be between 0.0 and 1.0, got {}",
                playback.volume
            )));
        }

        if playback.preload_threshold_secs.is_nan() || playback.preload_threshold_secs < 0.0 {
            return Err(AudioError::ConfigError(format!(
                "playback.preload_threshold_secs must not be negative, got {}",
                playback.preload_threshold_secs
            )));
        }

        if playback.restart_threshold_secs.is_nan() || playback.restart_threshold_secs < 0.0 {
            return Err(AudioError::ConfigError(format!(
                "playback.restart_threshold_secs must not be negative, got {}",
                playback.restart_threshold_secs
            )));
        }

        if self.output.tick_interval_ms == 0 {
            return Err(AudioError::ConfigError(
                "output.tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.output.stream_buffer_secs.is_nan() || self.output.stream_buffer_secs <= 0.0 {
            return Err(AudioError::ConfigError(format!(
                "output.stream_buffer_secs must be positive, got {}",
                self.output.stream_buffer_secs
            )));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.output.tick_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

// Default values
fn default_http() -> HttpSettings {
    HttpSettings {
        resolve_redirects: default_resolve_redirects(),
        user_agent: default_user_agent(),
        timeout_secs: default_timeout_secs(),
    }
}

fn default_resolve_redirects() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("gapless/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_output() -> OutputSettings {
    OutputSettings {
        tick_interval_ms: default_tick_interval_ms(),
        stream_buffer_secs: default_stream_buffer_secs(),
    }
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_stream_buffer_secs() -> f64 {
    4.0
}

impl Default for HttpSettings {
    fn default() -> Self {
        default_http()
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        default_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        DesktopConfig::environment().source(Some(source))
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_sources() {
        let config = DesktopConfig::build(None, env(&[])).unwrap();
        assert_eq!(config.playback.volume, 1.0);
        assert_eq!(config.playback.preload_threshold_secs, 25.0);
        assert_eq!(config.playback.restart_threshold_secs, 8.0);
        assert!(config.http.resolve_redirects);
        assert_eq!(config.output.tick_interval_ms, 16);
        assert_eq!(config.tick_interval(), Duration::from_millis(16));
    }

    #[test]
    fn file_values_are_read() {
        let file = write_config(
            r#"
            [playback]
            volume = 0.5
            disable_precise = true

            [http]
            timeout_secs = 5
            "#,
        );

        let config = DesktopConfig::build(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.playback.volume, 0.5);
        assert!(config.playback.disable_precise);
        assert_eq!(config.playback.restart_threshold_secs, 8.0);
        assert_eq!(config.http.timeout_secs, 5);
        assert!(config.http.resolve_redirects);
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("[playback]\nvolume = 0.5\n");

        let config = DesktopConfig::build(
            Some(file.path()),
            env(&[
                ("GAPLESS_PLAYBACK__VOLUME", "0.25"),
                ("GAPLESS_OUTPUT__TICK_INTERVAL_MS", "10"),
                ("GAPLESS_HTTP__RESOLVE_REDIRECTS", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.playback.volume, 0.25);
        assert_eq!(config.output.tick_interval_ms, 10);
        assert!(!config.http.resolve_redirects);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = DesktopConfig::build(Some(Path::new("/nonexistent/gapless.toml")), env(&[]));
        assert!(matches!(result, Err(AudioError::ConfigError(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = DesktopConfig::default();
        assert!(config.validate().is_ok());

        config.playback.volume = 1.5;
        assert!(config.validate().is_err());

        config.playback.volume = 1.0;
        config.playback.restart_threshold_secs = -1.0;
        assert!(config.validate().is_err());

        config.playback.restart_threshold_secs = 8.0;
        config.output.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let file = write_config("[playback]\nvolume = 3.0\n");
        assert!(DesktopConfig::build(Some(file.path()), env(&[])).is_err());
    }
}

//! AdMate Preview
//!
//! Visual ad-injection verification on the Naver mobile portal: launch a
//! mobile-emulated Chrome, replace the top banner-ad creative in-page, and
//! capture a screenshot proving the swap rendered.

pub mod browser;
pub mod media;
pub mod runner;

use std::path::PathBuf;

use tracing::{error, info, warn};

/// Environment variable overriding the config file location (used by tests
/// and CI to point runs at a scratch config)
pub const CONFIG_PATH_ENV: &str = "ADMATE_PREVIEW_CONFIG";

/// Run configuration
///
/// Every knob of the fixed flow, externalized. The defaults reproduce the
/// standard Naver verification run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Absolute http(s) URL the run navigates to
    pub target_url: String,
    /// CSS selector locating the ad image (anchor pattern with image descendant)
    pub ad_selector: String,
    /// Image source injected into the located element
    pub replacement_image_url: String,
    /// How long to poll for the ad element before soft-failing
    pub timeout_ms: u64,
    /// Pause between injection and capture so the renderer catches up
    pub settle_delay_ms: u64,
    /// Screenshot destination, overwritten on each run
    pub output_path: PathBuf,
    /// Run the browser headless
    pub headless: bool,
    /// Prefetch the replacement image and inject it as a base64 data URI
    /// instead of the remote URL
    pub inline_image: bool,
    /// Path to Chrome/Chromium executable (auto-detected when unset)
    pub chrome_path: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_url: "https://m.naver.com".to_string(),
            ad_selector: r#"a[href*="g.tivan.naver.com/gfa/"] img"#.to_string(),
            replacement_image_url: "https://via.placeholder.com/750x200?text=AdMate+Test".to_string(),
            timeout_ms: 10_000,
            settle_delay_ms: 2_000,
            output_path: PathBuf::from("naver_preview_test.png"),
            headless: false,
            inline_image: false,
            chrome_path: None,
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("admate-preview").join("logs"))
}

impl RunConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("admate-preview").join("config.json"))
    }

    /// Load config from file, falling back to the standard Naver run
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Initialize logging: console layer plus a daily-rolling file under the
/// user config dir. `RUST_LOG` overrides the default INFO filter.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "admate-preview.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

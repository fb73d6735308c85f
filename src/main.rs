//! AdMate Preview - one-shot verification run
//!
//! Navigates to the Naver mobile portal in an iPhone-emulated Chrome, swaps
//! the top banner-ad creative for the configured placeholder, and writes a
//! viewport screenshot for visual verification.
//!
//! No arguments; behavior comes from the config file (see `RunConfig`).
//! Exit code 0 covers the soft path where the ad slot never appeared.

use anyhow::Context;
use tracing::{info, warn};

use admate_preview::browser::{BrowserSession, DeviceProfile, LaunchOptions};
use admate_preview::runner::InjectionRunner;
use admate_preview::RunConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = admate_preview::init_logging();

    info!("Starting AdMate Preview");

    if let Some(dir) = admate_preview::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let mut config = RunConfig::load();

    // No display means headed Chrome cannot start; force headless rather than fail
    if cfg!(target_os = "linux") && !config.headless {
        let has_display = std::env::var("DISPLAY").map(|d| !d.is_empty()).unwrap_or(false);
        if !has_display {
            warn!("No DISPLAY available - forcing headless mode");
            config.headless = true;
            config.save();
        }
    }

    let options = LaunchOptions::default()
        .headless(config.headless)
        .chrome_path(config.chrome_path.clone())
        .device(DeviceProfile::iphone_13());

    let session = BrowserSession::launch(options)
        .await
        .context("browser launch failed")?;

    let report = InjectionRunner::run(&session, &config)
        .await
        .context("verification run failed")?;

    if report.injected {
        info!(
            "Run complete: ad replaced with {}, preview at {}",
            report.image_src.as_deref().unwrap_or("?"),
            report.screenshot_path.display()
        );
    } else {
        info!(
            "Run complete: ad slot not present, preview at {} shows the unmodified page",
            report.screenshot_path.display()
        );
    }

    Ok(())
}

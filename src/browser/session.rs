//! Browser session management
//!
//! Handles launching and controlling a single Chrome browser instance with
//! mobile device emulation applied over the DevTools protocol.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{ConsoleApiCalledType, EventConsoleApiCalled, RemoteObject};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{BrowserError, DeviceProfile};

/// Interval between DOM polls while waiting for a selector
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        // Also check %LOCALAPPDATA%
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(std::path::PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            std::path::PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            std::path::PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Options for launching a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// Navigation/evaluation timeout in seconds
    pub timeout_secs: u64,
    /// Device emulation profile applied to the page
    pub device: DeviceProfile,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            timeout_secs: 60,
            device: DeviceProfile::default(),
        }
    }
}

impl LaunchOptions {
    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set Chrome path
    pub fn chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }

    /// Set navigation timeout
    pub fn timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set device emulation profile
    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }
}

/// A browser session for automation
///
/// Owns the Chrome process, its CDP handler task and the single page the run
/// operates on. At most one session exists per run.
pub struct BrowserSession {
    /// The browser instance
    browser: Arc<RwLock<Option<Browser>>>,
    /// Current active page
    page: Arc<RwLock<Option<Page>>>,
    /// Device emulation profile applied at creation
    device: DeviceProfile,
    /// Navigation/evaluation timeout in seconds
    timeout_secs: u64,
    /// Whether session is alive (flips false when the CDP event stream ends)
    alive: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Launch a new browser session with the given options
    pub async fn launch(options: LaunchOptions) -> Result<Self, BrowserError> {
        info!(
            "Launching browser session (headless: {}, device: {})",
            options.headless, options.device.name
        );

        // Check if Chrome is available before attempting launch
        if options.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome/Chromium not found. Install Chrome or set chromePath in the config.".to_string(),
            ));
        }

        // Build browser config
        let mut builder = BrowserConfig::builder();

        if options.headless {
            // Modern Chrome requires --headless=new for proper headless
            builder = builder.headless_mode(HeadlessMode::New);
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = options.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            // Disable session restore (no "restore tabs" prompt)
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-restore-session-state")
            // UI suppression
            .arg("--disable-notifications")
            .arg("--disable-translate")
            // Required when running as root (e.g., in Docker or on a VPS)
            .no_sandbox()
            .window_size(options.device.viewport_width, options.device.viewport_height);

        let browser_config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        // Launch browser
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Spawn handler in background -- when the handler ends, Chrome has disconnected
        let alive_flag = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive_flag.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                    break;
                }
            }
            // Handler ended = Chrome disconnected or crashed
            warn!("Chrome disconnected (event handler ended)");
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Get existing page or create a new one (Chrome opens with a blank tab)
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            // Close any extra blank tabs
            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }

            main_page
        };

        Self::apply_device_profile(&page, &options.device).await?;
        Self::relay_page_console(&page).await?;

        info!(
            "Browser session created ({} {}x{}@{}x)",
            options.device.name,
            options.device.viewport_width,
            options.device.viewport_height,
            options.device.device_scale_factor
        );

        Ok(Self {
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(page))),
            device: options.device,
            timeout_secs: options.timeout_secs,
            alive: alive_flag,
        })
    }

    /// Check if the session is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Device profile this session emulates
    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    /// Navigate to a URL and wait for the main document's load signal
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("No active page".into()))?;

        debug!("Navigating to: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            page.wait_for_navigation(),
        )
        .await
        .map_err(|_| BrowserError::Timeout(format!("Navigation to {} timed out", url)))?
        .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    /// Poll the DOM for an element matching `selector` until found or `timeout_ms` elapses.
    ///
    /// Lookup failures inside the window are treated as "not there yet"; only
    /// deadline expiry surfaces an error.
    pub async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("No active page".into()))?;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(format!(
                    "{} (waited {}ms)",
                    selector, timeout_ms
                )));
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Execute JavaScript on the page with the session's default timeout
    pub async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.execute_js_with_timeout(script, self.timeout_secs).await
    }

    /// Execute JavaScript on the page with a custom timeout (in seconds)
    pub async fn execute_js_with_timeout(
        &self,
        script: &str,
        timeout_secs: u64,
    ) -> Result<serde_json::Value, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("No active page".into()))?;

        let result = tokio::time::timeout(Duration::from_secs(timeout_secs), page.evaluate(script))
            .await
            .map_err(|_| {
                BrowserError::Timeout(format!("JavaScript execution timed out after {}s", timeout_secs))
            })?
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Scroll the page using CDP mouse wheel events, then jump back to the top.
    ///
    /// The portal lazy-loads its ad slots; a wheel nudge makes them render.
    pub async fn nudge_scroll(&self, delta_y: i32) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("No active page".into()))?;

        let wheel_x = self.device.viewport_width as f64 / 2.0;
        let wheel_y = self.device.viewport_height as f64 / 3.0;

        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::from_entropy();
        let steps = 3 + rng.gen_range(0..3);
        let per_step = delta_y / steps;

        for _ in 0..steps {
            let jitter = rng.gen_range(-20..20);
            let scroll = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseWheel)
                .x(wheel_x)
                .y(wheel_y)
                .button(MouseButton::None)
                .delta_x(0.0)
                .delta_y((per_step + jitter) as f64)
                .build()
                .unwrap();
            page.execute(scroll)
                .await
                .map_err(|e| BrowserError::JavaScriptError(format!("CDP scroll failed: {}", e)))?;

            let delay = rng.gen_range(80..200);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        // Back to the top so the banner slot is inside the captured viewport
        page.evaluate("window.scrollTo(0, 0)")
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Capture a viewport screenshot (not the full scrollable page) to `path`,
    /// overwriting any existing file. Returns the number of bytes written.
    pub async fn capture_screenshot(&self, path: &Path) -> Result<u64, BrowserError> {
        if !self.is_alive() {
            return Err(BrowserError::CaptureFailed("browser disconnected".into()));
        }

        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| BrowserError::CaptureFailed("No active page".into()))?;

        let bytes = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await
            .map_err(|e| BrowserError::CaptureFailed(e.to_string()))?;

        tokio::fs::write(path, &bytes).await?;
        debug!("Screenshot written: {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes.len() as u64)
    }

    /// Close the browser session
    pub async fn close(&self) -> Result<(), BrowserError> {
        // Mark as not alive first to prevent new operations
        self.alive.store(false, Ordering::Relaxed);

        // 1. Close page first (stops navigation/JS execution)
        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                let _ = p.close().await;
            }
        }

        // 2. Close browser - try graceful close, give it a moment, then force kill
        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                let _ = b.close().await;
                // Brief grace period for Chrome child processes to exit
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = b.kill().await;
            }
        }

        info!("Browser session closed");
        Ok(())
    }

    /// Apply the device emulation profile via CDP: viewport metrics, touch
    /// emulation and user agent override.
    async fn apply_device_profile(page: &Page, device: &DeviceProfile) -> Result<(), BrowserError> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(device.viewport_width as i64)
            .height(device.viewport_height as i64)
            .device_scale_factor(device.device_scale_factor)
            .mobile(device.mobile)
            .build()
            .map_err(BrowserError::LaunchFailed)?;
        page.execute(metrics)
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Failed to set device metrics: {}", e)))?;

        page.execute(SetTouchEmulationEnabledParams::new(device.touch))
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Failed to set touch emulation: {}", e)))?;

        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(device.user_agent.as_str())
            .platform(device.platform.as_str())
            .build()
            .map_err(BrowserError::LaunchFailed)?;
        page.execute(ua)
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Failed to set UA override: {}", e)))?;

        debug!("Device profile applied: {}", device.name);
        Ok(())
    }

    /// Forward the page's own console output into the tool's log stream.
    ///
    /// The injection script reports its verdict through console.log /
    /// console.error; without the relay those diagnostics die inside Chrome.
    async fn relay_page_console(page: &Page) -> Result<(), BrowserError> {
        let mut events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Failed to attach console listener: {}", e)))?;

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let text = event
                    .args
                    .iter()
                    .filter_map(console_arg_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.is_empty() {
                    continue;
                }
                if matches!(event.r#type, ConsoleApiCalledType::Error | ConsoleApiCalledType::Warning) {
                    warn!("browser console: {}", text);
                } else {
                    info!("browser console: {}", text);
                }
            }
        });

        Ok(())
    }
}

/// Render a console argument the way DevTools would: primitive values as-is,
/// everything else via its remote description.
fn console_arg_text(arg: &RemoteObject) -> Option<String> {
    if let Some(value) = &arg.value {
        Some(match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    } else {
        arg.description.clone()
    }
}

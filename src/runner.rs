//! Ad-injection run flow
//!
//! Drives one end-to-end verification pass: navigate to the portal, locate
//! the ad slot, swap its creative in-page, let the renderer settle, capture a
//! viewport screenshot. Session teardown runs on every exit path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::{media, RunConfig};

/// Wheel distance used to trigger the portal's lazily loaded ad slots
const SCROLL_NUDGE_PX: i32 = 300;

/// Result of the in-page mutation script
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionOutcome {
    /// The element was found and its image source replaced
    Replaced { src: String },
    /// No element matched the selector at mutation time
    Missing,
}

/// Summary of one completed run
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// The selector resolved within the probe timeout
    pub ad_found: bool,
    /// The mutation script found the element and replaced its source
    pub injected: bool,
    /// Source the ad image ended up with (as reported by the page)
    pub image_src: Option<String>,
    /// Where the screenshot was written
    pub screenshot_path: PathBuf,
    /// Size of the screenshot file
    pub screenshot_bytes: u64,
}

/// Engine operations the run flow needs.
///
/// [`BrowserSession`] is the real implementation; the flow tests run against
/// an in-memory mock so teardown and soft-failure semantics can be asserted
/// without a browser.
#[allow(async_fn_in_trait)]
pub trait PageDriver {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    async fn nudge_scroll(&self, delta_y: i32) -> Result<(), BrowserError>;
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<(), BrowserError>;
    async fn inject_replacement(
        &self,
        selector: &str,
        image_src: &str,
    ) -> Result<InjectionOutcome, BrowserError>;
    async fn capture_screenshot(&self, path: &Path) -> Result<u64, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

impl PageDriver for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        BrowserSession::navigate(self, url).await
    }

    async fn nudge_scroll(&self, delta_y: i32) -> Result<(), BrowserError> {
        BrowserSession::nudge_scroll(self, delta_y).await
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<(), BrowserError> {
        BrowserSession::wait_for_selector(self, selector, timeout_ms).await
    }

    async fn inject_replacement(
        &self,
        selector: &str,
        image_src: &str,
    ) -> Result<InjectionOutcome, BrowserError> {
        let verdict = self.execute_js(&injection_script(selector, image_src)).await?;

        let found = verdict
            .get("found")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if found {
            let src = verdict
                .get("src")
                .and_then(|v| v.as_str())
                .unwrap_or(image_src)
                .to_string();
            Ok(InjectionOutcome::Replaced { src })
        } else {
            Ok(InjectionOutcome::Missing)
        }
    }

    async fn capture_screenshot(&self, path: &Path) -> Result<u64, BrowserError> {
        BrowserSession::capture_screenshot(self, path).await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        BrowserSession::close(self).await
    }
}

/// Build the page-scoped mutation script.
///
/// The selector is re-resolved inside the page instead of reusing the probe
/// handle -- the portal re-renders its ad slots, and a handle taken at probe
/// time may point at a detached node by the time we mutate. Running the
/// script twice with the same source is a no-op the second time.
pub fn injection_script(selector: &str, image_src: &str) -> String {
    // Embed both as JSON string literals so quotes in the selector survive
    let selector_js = serde_json::Value::String(selector.to_string()).to_string();
    let src_js = serde_json::Value::String(image_src.to_string()).to_string();

    format!(
        r#"(function() {{
    const adImage = document.querySelector({selector_js});
    if (!adImage) {{
        console.error('Ad element not found during injection');
        return {{ found: false }};
    }}
    adImage.src = {src_js};
    adImage.srcset = {src_js};
    adImage.style.width = '100%';
    adImage.style.height = 'auto';
    adImage.style.objectFit = 'contain';
    adImage.style.border = '2px solid red';
    console.log('Ad injected successfully');
    return {{ found: true, src: adImage.src }};
}})()"#
    )
}

/// Executes the fixed verification flow exactly once per invocation
pub struct InjectionRunner;

impl InjectionRunner {
    /// Run the flow, then release the session regardless of outcome.
    pub async fn run<D: PageDriver>(driver: &D, config: &RunConfig) -> Result<RunReport, BrowserError> {
        let result = Self::execute(driver, config).await;

        if let Err(e) = driver.close().await {
            warn!("Browser teardown failed: {}", e);
        }

        result
    }

    async fn execute<D: PageDriver>(driver: &D, config: &RunConfig) -> Result<RunReport, BrowserError> {
        let url = validate_target_url(&config.target_url)?;

        info!("Navigating to {}...", url);
        driver.navigate(url.as_str()).await?;

        // Best-effort: the banner slot loads lazily, a wheel nudge makes it render
        if let Err(e) = driver.nudge_scroll(SCROLL_NUDGE_PX).await {
            warn!("Scroll nudge failed: {}", e);
        }

        info!("Waiting for ad element: {}", config.ad_selector);
        let ad_found = match driver
            .wait_for_selector(&config.ad_selector, config.timeout_ms)
            .await
        {
            Ok(()) => {
                info!("Ad element found");
                true
            }
            Err(e) if e.is_soft() => {
                warn!("Ad element not found, continuing: {}", e);
                false
            }
            Err(e) => return Err(e),
        };

        let image_src = if config.inline_image {
            media::fetch_data_uri(&config.replacement_image_url).await
        } else {
            config.replacement_image_url.clone()
        };

        info!("Injecting replacement ad image...");
        let (injected, final_src) = match driver
            .inject_replacement(&config.ad_selector, &image_src)
            .await?
        {
            InjectionOutcome::Replaced { src } => (true, Some(src)),
            InjectionOutcome::Missing => {
                warn!("Injection was a no-op: no element matched at mutation time");
                (false, None)
            }
        };

        // Give the renderer time to reflect the mutation before rasterizing.
        // TODO: poll the mutated attribute instead of sleeping a fixed interval
        if config.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.settle_delay_ms)).await;
        }

        info!("Capturing screenshot...");
        let screenshot_bytes = driver.capture_screenshot(&config.output_path).await?;
        info!(
            "Screenshot saved to {} ({} bytes)",
            config.output_path.display(),
            screenshot_bytes
        );

        Ok(RunReport {
            ad_found,
            injected,
            image_src: final_src,
            screenshot_path: config.output_path.clone(),
            screenshot_bytes,
        })
    }
}

/// The run only ever targets an absolute http(s) URL
fn validate_target_url(raw: &str) -> Result<url::Url, BrowserError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| BrowserError::NavigationFailed(format!("invalid target URL '{}': {}", raw, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(BrowserError::NavigationFailed(format!(
            "target URL must be absolute http(s), got '{}'",
            raw
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory engine: a selector -> image-src map plus call recording
    #[derive(Default)]
    struct MockDriver {
        dom: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<&'static str>>,
        close_count: AtomicUsize,
        fail_navigation: bool,
        fail_capture: bool,
    }

    impl MockDriver {
        fn with_element(selector: &str) -> Self {
            let driver = Self::default();
            driver
                .dom
                .lock()
                .unwrap()
                .insert(selector.to_string(), "https://ads.example/original.png".to_string());
            driver
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn src_of(&self, selector: &str) -> Option<String> {
            self.dom.lock().unwrap().get(selector).cloned()
        }
    }

    impl PageDriver for MockDriver {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            self.record("navigate");
            if self.fail_navigation {
                return Err(BrowserError::NavigationFailed("connection refused".into()));
            }
            Ok(())
        }

        async fn nudge_scroll(&self, _delta_y: i32) -> Result<(), BrowserError> {
            self.record("scroll");
            Ok(())
        }

        async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<(), BrowserError> {
            self.record("wait");
            if self.dom.lock().unwrap().contains_key(selector) {
                Ok(())
            } else {
                Err(BrowserError::ElementNotFound(format!(
                    "{} (waited {}ms)",
                    selector, timeout_ms
                )))
            }
        }

        async fn inject_replacement(
            &self,
            selector: &str,
            image_src: &str,
        ) -> Result<InjectionOutcome, BrowserError> {
            self.record("inject");
            let mut dom = self.dom.lock().unwrap();
            match dom.get_mut(selector) {
                Some(src) => {
                    *src = image_src.to_string();
                    Ok(InjectionOutcome::Replaced { src: src.clone() })
                }
                None => Ok(InjectionOutcome::Missing),
            }
        }

        async fn capture_screenshot(&self, _path: &Path) -> Result<u64, BrowserError> {
            self.record("capture");
            if self.fail_capture {
                return Err(BrowserError::CaptureFailed("page already closed".into()));
            }
            Ok(1024)
        }

        async fn close(&self) -> Result<(), BrowserError> {
            self.record("close");
            self.close_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config() -> RunConfig {
        RunConfig {
            settle_delay_ms: 0,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_replaces_source_and_closes_once() {
        let config = test_config();
        let driver = MockDriver::with_element(&config.ad_selector);

        let report = InjectionRunner::run(&driver, &config).await.unwrap();

        assert!(report.ad_found);
        assert!(report.injected);
        assert_eq!(report.image_src.as_deref(), Some(config.replacement_image_url.as_str()));
        assert_eq!(driver.src_of(&config.ad_selector).as_deref(), Some(config.replacement_image_url.as_str()));
        assert_eq!(
            driver.calls(),
            vec!["navigate", "scroll", "wait", "inject", "capture", "close"]
        );
        assert_eq!(driver.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_element_still_captures_and_closes() {
        let config = test_config();
        let driver = MockDriver::default();

        let report = InjectionRunner::run(&driver, &config).await.unwrap();

        assert!(!report.ad_found);
        assert!(!report.injected);
        assert_eq!(report.image_src, None);
        assert!(driver.calls().contains(&"capture"));
        assert_eq!(driver.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_is_fatal_but_still_closes() {
        let config = test_config();
        let driver = MockDriver {
            fail_navigation: true,
            ..MockDriver::default()
        };

        let result = InjectionRunner::run(&driver, &config).await;

        assert!(matches!(result, Err(BrowserError::NavigationFailed(_))));
        assert!(!driver.calls().contains(&"capture"));
        assert_eq!(driver.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_is_fatal_but_still_closes() {
        let config = test_config();
        let driver = MockDriver {
            fail_capture: true,
            ..MockDriver::with_element(&config.ad_selector)
        };

        let result = InjectionRunner::run(&driver, &config).await;

        assert!(matches!(result, Err(BrowserError::CaptureFailed(_))));
        assert_eq!(driver.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_injection_is_idempotent() {
        let config = test_config();
        let driver = MockDriver::with_element(&config.ad_selector);

        let first = InjectionRunner::run(&driver, &config).await.unwrap();
        let second = InjectionRunner::run(&driver, &config).await.unwrap();

        assert!(first.injected && second.injected);
        assert_eq!(first.image_src, second.image_src);
        assert_eq!(driver.src_of(&config.ad_selector).as_deref(), Some(config.replacement_image_url.as_str()));
    }

    #[tokio::test]
    async fn test_malformed_target_url_rejected_before_navigation() {
        let config = RunConfig {
            target_url: "not a url".to_string(),
            ..test_config()
        };
        let driver = MockDriver::default();

        let result = InjectionRunner::run(&driver, &config).await;

        assert!(matches!(result, Err(BrowserError::NavigationFailed(_))));
        assert!(!driver.calls().contains(&"navigate"));
    }

    #[tokio::test]
    async fn test_non_http_target_url_rejected() {
        let config = RunConfig {
            target_url: "file:///etc/hosts".to_string(),
            ..test_config()
        };
        let driver = MockDriver::default();

        let result = InjectionRunner::run(&driver, &config).await;
        assert!(matches!(result, Err(BrowserError::NavigationFailed(_))));
    }

    #[test]
    fn test_injection_script_embeds_selector_and_source() {
        let script = injection_script(r#"a[href*="g.tivan.naver.com/gfa/"] img"#, "https://example.com/ad.png");

        assert!(script.contains(r#"document.querySelector("a[href*=\"g.tivan.naver.com/gfa/\"] img")"#));
        assert!(script.contains(r#"adImage.src = "https://example.com/ad.png""#));
        assert!(script.contains("adImage.srcset"));
        assert!(script.contains("style.width = '100%'"));
        assert!(script.contains("style.objectFit = 'contain'"));
    }

    #[test]
    fn test_injection_script_reports_missing_element() {
        let script = injection_script("#gone", "https://example.com/ad.png");
        assert!(script.contains("found: false"));
        assert!(script.contains("Ad element not found during injection"));
    }
}

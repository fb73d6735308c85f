//! Mobile device emulation presets
//!
//! A preset bundles the viewport, pixel density, user agent and touch flags
//! needed to make desktop Chrome render a page the way a named phone would.

/// Device emulation profile applied to a page at session creation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Preset name (for logs)
    pub name: String,
    /// Viewport width in CSS pixels
    pub viewport_width: u32,
    /// Viewport height in CSS pixels
    pub viewport_height: u32,
    /// Device pixel ratio
    pub device_scale_factor: f64,
    /// Emulate a mobile layout viewport
    pub mobile: bool,
    /// Enable touch event emulation
    pub touch: bool,
    /// User agent string sent with every request
    pub user_agent: String,
    /// navigator.platform override
    pub platform: String,
}

impl DeviceProfile {
    /// iPhone 13 preset (the portal serves its mobile layout to this profile)
    pub fn iphone_13() -> Self {
        Self {
            name: "iPhone 13".to_string(),
            viewport_width: 390,
            viewport_height: 844,
            device_scale_factor: 3.0,
            mobile: true,
            touch: true,
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) \
                AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 \
                Mobile/15E148 Safari/604.1"
                .to_string(),
            platform: "iPhone".to_string(),
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::iphone_13()
    }
}

//! Named breakpoint to viewport lookup

use serde::{Deserialize, Serialize};

/// Concrete viewport dimensions simulated for a page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportProfile {
    pub width: u32,
    pub height: u32,
    /// Only the `default` breakpoint carries a device pixel ratio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_scale_factor: Option<f64>,
}

impl ViewportProfile {
    const fn fixed(width: u32, height: u32) -> Self {
        Self { width, height, device_scale_factor: None }
    }
}

pub const XL: ViewportProfile = ViewportProfile::fixed(1220, 720);
pub const L: ViewportProfile = ViewportProfile::fixed(1024, 768);
pub const M: ViewportProfile = ViewportProfile::fixed(768, 1024);
pub const S: ViewportProfile = ViewportProfile::fixed(540, 960);
pub const DEFAULT: ViewportProfile = ViewportProfile {
    width: 320,
    height: 480,
    device_scale_factor: Some(2.0),
};

/// Name used when a check does not specify a breakpoint
pub const DEFAULT_BREAKPOINT: &str = "XL";

/// Resolve a breakpoint name to its profile.
///
/// Unknown and absent names fall back to `XL`. The `default` profile is only
/// reachable by asking for it by name.
pub fn resolve(name: Option<&str>) -> ViewportProfile {
    match name {
        Some("XL") => XL,
        Some("L") => L,
        Some("M") => M,
        Some("S") => S,
        Some("default") => DEFAULT,
        _ => XL,
    }
}

//! Resolution bucket vocabulary and bucketing rules
//!
//! Cached resolutions are categorical labels from a small fixed vocabulary,
//! not raw pixel dimensions, so filter UIs can enumerate them cheaply.

/// 4K and above (longer dimension >= 3840)
pub const LABEL_4K: &str = "4K";
/// 1440p tier (longer dimension >= 2560)
pub const LABEL_1440P: &str = "1440p";
/// 1080p tier (longer dimension >= 1920, minor dimension near 1080)
pub const LABEL_1080P: &str = "1080p";
/// 720p tier (longer dimension >= 1280)
pub const LABEL_720P: &str = "720p";
/// 480p tier (longer dimension >= 854)
pub const LABEL_480P: &str = "480p";
/// 360p tier (longer dimension >= 640)
pub const LABEL_360P: &str = "360p";
/// Anything smaller than the 360p tier
pub const LABEL_SD: &str = "SD";
/// Probe failed permanently; cached so the file is not retried every pass
pub const LABEL_UNSUPPORTED: &str = "Unsupported";
/// Never probed
pub const LABEL_UNKNOWN: &str = "Unknown";

/// Pixel tolerance when deciding whether a near-standard size still counts
/// as 1080p (e.g. 1920x1084 captures)
pub const STANDARD_HEIGHT_TOLERANCE: u32 = 40;

/// Bucket pixel dimensions into a resolution label
///
/// Uses the larger of the two dimensions so portrait videos bucket the same
/// as their landscape equivalents. In the 1080p tier, a minor dimension more
/// than [`STANDARD_HEIGHT_TOLERANCE`] pixels away from 1080 indicates a
/// genuinely non-standard size and is reported literally (e.g. "1200p").
pub fn bucket_label(width: u32, height: u32) -> String {
    let long = width.max(height);
    let short = width.min(height);

    if long >= 3840 {
        LABEL_4K.to_string()
    } else if long >= 2560 {
        LABEL_1440P.to_string()
    } else if long >= 1920 {
        if short.abs_diff(1080) <= STANDARD_HEIGHT_TOLERANCE {
            LABEL_1080P.to_string()
        } else {
            format!("{}p", short)
        }
    } else if long >= 1280 {
        LABEL_720P.to_string()
    } else if long >= 854 {
        LABEL_480P.to_string()
    } else if long >= 640 {
        LABEL_360P.to_string()
    } else {
        LABEL_SD.to_string()
    }
}

/// Check whether a label belongs to the fixed vocabulary
///
/// Accepts the named buckets plus the literal "<N>p" form for non-standard
/// heights. Everything else is rejected at the store boundary.
pub fn is_valid_label(label: &str) -> bool {
    match label {
        LABEL_4K | LABEL_SD | LABEL_UNSUPPORTED | LABEL_UNKNOWN => true,
        _ => label
            .strip_suffix('p')
            .and_then(|n| n.parse::<u32>().ok())
            .is_some_and(|n| n > 0),
    }
}

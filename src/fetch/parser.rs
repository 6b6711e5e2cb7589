//! Profile page parsing.
//!
//! The fetch executor hands the raw document to a [`PageParser`], which
//! either extracts a display name and popularity metric or signals that the
//! page has no usable data. [`ChannelPageParser`] implements the strategy for
//! channel pages: name from the `og:title`/`twitter:title` meta tags, metric
//! from the abbreviated subscriber count embedded in the page data.

use regex::Regex;

/// A parsed name/metric pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileData {
    pub display_name: String,
    pub metric: u64,
}

/// Turns a raw document into profile data, or `None` for "not found".
pub trait PageParser: Send + Sync {
    fn parse(&self, raw: &str) -> Option<ProfileData>;
}

/// Metric values below this are treated as parser noise, not real counts.
const METRIC_NOISE_FLOOR: u64 = 500;

/// Parser for channel profile pages.
pub struct ChannelPageParser {
    og_title: Regex,
    twitter_title: Regex,
    subscribers: Regex,
}

impl Default for ChannelPageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelPageParser {
    pub fn new() -> Self {
        Self {
            og_title: Regex::new(r#"<meta\s+property="og:title"\s+content="([^"]+)""#)
                .expect("static regex"),
            twitter_title: Regex::new(r#"<meta\s+name="twitter:title"\s+content="([^"]+)""#)
                .expect("static regex"),
            subscribers: Regex::new(r"([\d,.]+\s?[KMB萬億万]?)\s*(?:subscribers|位?訂閱者)")
                .expect("static regex"),
        }
    }

    fn extract_name(&self, raw: &str) -> Option<String> {
        let captured = self
            .og_title
            .captures(raw)
            .or_else(|| self.twitter_title.captures(raw))?;

        let mut name = decode_entities(captured[1].trim());
        if let Some(stripped) = name.strip_suffix("- YouTube") {
            name = stripped.trim_end().to_string();
        }

        // The platform's own default title means the handle resolved to
        // nothing useful.
        if name.is_empty() || name == "YouTube" {
            return None;
        }
        Some(name)
    }

    fn extract_metric(&self, raw: &str) -> u64 {
        for captured in self.subscribers.captures_iter(raw) {
            let value = parse_metric_string(&captured[1]);
            if value >= METRIC_NOISE_FLOOR {
                return value;
            }
        }
        0
    }
}

impl PageParser for ChannelPageParser {
    fn parse(&self, raw: &str) -> Option<ProfileData> {
        let display_name = self.extract_name(raw)?;
        let metric = self.extract_metric(raw);
        Some(ProfileData {
            display_name,
            metric,
        })
    }
}

/// Convert an abbreviated count ("1.2M", "3,400", "5.1萬") to a number.
pub fn parse_metric_string(text: &str) -> u64 {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let Ok(base) = digits.parse::<f64>() else {
        return 0;
    };

    let upper = text.to_uppercase();
    let multiplier = if upper.contains('K') {
        1_000.0
    } else if upper.contains('M') {
        1_000_000.0
    } else if upper.contains('B') {
        1_000_000_000.0
    } else if upper.contains('萬') || upper.contains('万') {
        10_000.0
    } else if upper.contains('億') {
        100_000_000.0
    } else {
        1.0
    };

    (base * multiplier) as u64
}

/// Minimal HTML entity decoding for the handful of entities meta-tag content
/// actually carries.
fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

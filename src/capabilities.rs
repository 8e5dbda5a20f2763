//! Resolved browser capabilities
//! Raw string values plus typed accessors, each parsed once and memoized

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::{BcResult, BrowserCapsError};

/// Dotted version with two to four numeric components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct CapVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl CapVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }
}

impl FromStr for CapVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| ()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            [major, minor, build] => Ok(Self {
                build: Some(*build),
                ..Self::new(*major, *minor)
            }),
            [major, minor, build, revision] => Ok(Self {
                build: Some(*build),
                revision: Some(*revision),
                ..Self::new(*major, *minor)
            }),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build)?;
            if let Some(revision) = self.revision {
                write!(f, ".{}", revision)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TypedValue {
    Bool(bool),
    Int(i32),
    Float(f64),
    Version(CapVersion),
}

trait Typed: Sized + Copy {
    fn into_value(self) -> TypedValue;
    fn from_value(value: &TypedValue) -> Option<Self>;
}

macro_rules! impl_typed {
    ($ty:ty, $variant:ident) => {
        impl Typed for $ty {
            fn into_value(self) -> TypedValue {
                TypedValue::$variant(self)
            }
            fn from_value(value: &TypedValue) -> Option<Self> {
                match value {
                    TypedValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_typed!(bool, Bool);
impl_typed!(i32, Int);
impl_typed!(f64, Float);
impl_typed!(CapVersion, Version);

enum Combine {
    Divide,
    Multiply,
}

/// How a screen metric is derived when it was not assigned directly
struct ScreenMetric {
    key: &'static str,
    first: &'static str,
    second: &'static str,
    default_first: &'static str,
    default_second: &'static str,
    fallback: &'static str,
    base: (i32, i32),
    combine: Combine,
}

const SCREEN_CHARACTERS_WIDTH: ScreenMetric = ScreenMetric {
    key: "screenCharactersWidth",
    first: "screenPixelsWidth",
    second: "characterWidth",
    default_first: "defaultScreenPixelsWidth",
    default_second: "defaultCharacterWidth",
    fallback: "defaultScreenCharactersWidth",
    base: (640, 8),
    combine: Combine::Divide,
};

const SCREEN_CHARACTERS_HEIGHT: ScreenMetric = ScreenMetric {
    key: "screenCharactersHeight",
    first: "screenPixelsHeight",
    second: "characterHeight",
    default_first: "defaultScreenPixelsHeight",
    default_second: "defaultCharacterHeight",
    fallback: "defaultScreenCharactersHeight",
    base: (480, 12),
    combine: Combine::Divide,
};

const SCREEN_PIXELS_WIDTH: ScreenMetric = ScreenMetric {
    key: "screenPixelsWidth",
    first: "screenCharactersWidth",
    second: "characterWidth",
    default_first: "defaultScreenCharactersWidth",
    default_second: "defaultCharacterWidth",
    fallback: "defaultScreenPixelsWidth",
    base: (80, 8),
    combine: Combine::Multiply,
};

const SCREEN_PIXELS_HEIGHT: ScreenMetric = ScreenMetric {
    key: "screenPixelsHeight",
    first: "screenCharactersHeight",
    second: "characterHeight",
    default_first: "defaultScreenCharactersHeight",
    default_second: "defaultCharacterHeight",
    fallback: "defaultScreenPixelsHeight",
    base: (40, 12),
    combine: Combine::Multiply,
};

static CLR_VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.NET CLR (?P<clrVersion>[0-9.]*)").expect("static CLR version pattern")
});

/// Capabilities resolved for one request.
///
/// Keys are case-insensitive. Typed accessors parse on first use and keep the
/// result; malformed values are reported as `InvalidCapability`.
#[derive(Debug, Default)]
pub struct BrowserCapabilities {
    values: HashMap<String, String>,
    adapters: HashMap<String, String>,
    html_text_writer: Option<String>,
    browsers: Vec<String>,
    memo: RwLock<HashMap<&'static str, TypedValue>>,
}

impl Clone for BrowserCapabilities {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            adapters: self.adapters.clone(),
            html_text_writer: self.html_text_writer.clone(),
            browsers: self.browsers.clone(),
            memo: RwLock::default(),
        }
    }
}

impl BrowserCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_lowercase(), value.into());
        self.clear_memo();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values, lower-cased keys in sorted order
    pub fn values(&self) -> BTreeMap<&str, &str> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn set_adapter(&mut self, control_type: impl Into<String>, adapter_type: impl Into<String>) {
        self.adapters.insert(control_type.into(), adapter_type.into());
    }

    /// Control type -> adapter type
    pub fn adapters(&self) -> &HashMap<String, String> {
        &self.adapters
    }

    pub fn set_html_text_writer(&mut self, writer: impl Into<String>) {
        self.html_text_writer = Some(writer.into());
    }

    pub fn html_text_writer(&self) -> Option<&str> {
        self.html_text_writer.as_deref()
    }

    /// Record a matched browser; names are stored lower-cased.
    pub fn add_browser(&mut self, name: &str) {
        self.browsers.push(name.to_lowercase());
    }

    /// Matched browsers, from the root down
    pub fn browsers(&self) -> &[String] {
        &self.browsers
    }

    /// Most specific matched browser
    pub fn id(&self) -> Option<&str> {
        self.browsers.last().map(String::as_str)
    }

    pub fn is_browser(&self, name: &str) -> bool {
        !name.is_empty() && self.browsers.iter().any(|b| b.eq_ignore_ascii_case(name))
    }

    pub fn browser(&self) -> Option<&str> {
        self.get("browser")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    pub fn platform(&self) -> Option<&str> {
        self.get("platform")
    }

    /// The `type` capability
    pub fn kind(&self) -> Option<&str> {
        self.get("type")
    }

    pub fn minor_version_string(&self) -> Option<&str> {
        self.get("minorversion")
    }

    pub fn major_version(&self) -> BcResult<i32> {
        self.memo("majorversion", || self.parse_int("majorversion"))
    }

    /// `.4.1` style values are read up to the second dot.
    pub fn minor_version(&self) -> BcResult<f64> {
        self.memo("minorversion", || {
            let raw = self.required("minorversion")?;
            if let Ok(value) = raw.trim().parse::<f64>() {
                return Ok(value);
            }
            raw.match_indices('.')
                .nth(1)
                .and_then(|(second_dot, _)| raw[..second_dot].trim().parse::<f64>().ok())
                .ok_or_else(|| invalid("minorversion", raw))
        })
    }

    pub fn ecma_script_version(&self) -> BcResult<CapVersion> {
        self.memo("ecmascriptversion", || self.parse_version("ecmascriptversion"))
    }

    pub fn msdom_version(&self) -> BcResult<CapVersion> {
        self.memo("msdomversion", || self.parse_version("msdomversion"))
    }

    pub fn w3cdom_version(&self) -> BcResult<CapVersion> {
        self.memo("w3cdomversion", || self.parse_version("w3cdomversion"))
    }

    pub fn jscript_version(&self) -> BcResult<CapVersion> {
        self.memo("jscriptversion", || self.parse_version("jscriptversion"))
    }

    /// Lenient boolean: missing or malformed values give `default`.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(parse_bool).unwrap_or(default)
    }

    pub fn requires_control_state_in_session(&self) -> bool {
        self.flag("requiresControlStateInSession", false)
    }

    pub fn is_mobile_device(&self) -> bool {
        self.flag("isMobileDevice", false)
    }

    pub fn supports_css(&self) -> bool {
        self.flag("supportsCss", false)
    }

    pub fn supports_xml_http(&self) -> bool {
        self.flag("supportsXmlHttp", false)
    }

    pub fn supports_callback(&self) -> bool {
        self.flag("supportsCallback", false)
    }

    pub fn can_send_mail(&self) -> bool {
        self.flag("canSendMail", true)
    }

    pub fn gateway_major_version(&self) -> BcResult<i32> {
        self.memo("gatewaymajorversion", || self.parse_int_or_zero("gatewayMajorVersion"))
    }

    pub fn gateway_minor_version(&self) -> BcResult<f64> {
        self.memo("gatewayminorversion", || {
            let raw = self.required("gatewayMinorVersion")?;
            raw.trim().parse::<f64>().map_err(|_| invalid("gatewayMinorVersion", raw))
        })
    }

    pub fn maximum_href_length(&self) -> BcResult<i32> {
        self.memo("maximumhreflength", || self.parse_int_or_zero("maximumHrefLength"))
    }

    pub fn screen_bit_depth(&self) -> BcResult<i32> {
        self.memo("screenbitdepth", || self.parse_int_or_zero("screenBitDepth"))
    }

    pub fn screen_characters_width(&self) -> BcResult<i32> {
        self.memo("screencharacterswidth", || self.screen_metric(&SCREEN_CHARACTERS_WIDTH))
    }

    pub fn screen_characters_height(&self) -> BcResult<i32> {
        self.memo("screencharactersheight", || self.screen_metric(&SCREEN_CHARACTERS_HEIGHT))
    }

    pub fn screen_pixels_width(&self) -> BcResult<i32> {
        self.memo("screenpixelswidth", || self.screen_metric(&SCREEN_PIXELS_WIDTH))
    }

    pub fn screen_pixels_height(&self) -> BcResult<i32> {
        self.memo("screenpixelsheight", || self.screen_metric(&SCREEN_PIXELS_HEIGHT))
    }

    /// CLR versions advertised in a user agent, ascending. `None` for an empty
    /// agent, `[0.0]` when nothing is advertised; unparsable entries are skipped.
    pub fn clr_versions(user_agent: &str) -> Option<Vec<CapVersion>> {
        if user_agent.is_empty() {
            return None;
        }
        let mut found = false;
        let mut versions: Vec<CapVersion> = CLR_VERSION_REGEX
            .captures_iter(user_agent)
            .filter_map(|caps| {
                found = true;
                caps.name("clrVersion")?.as_str().parse().ok()
            })
            .collect();
        if !found {
            return Some(vec![CapVersion::default()]);
        }
        versions.sort();
        Some(versions)
    }

    /// Highest advertised CLR version
    pub fn clr_version(user_agent: &str) -> Option<CapVersion> {
        Self::clr_versions(user_agent).and_then(|v| v.last().copied())
    }

    pub fn to_json(&self) -> Value {
        let adapters: BTreeMap<&String, &String> = self.adapters.iter().collect();
        json!({
            "id": self.id(),
            "browsers": self.browsers,
            "capabilities": self.values(),
            "adapters": adapters,
            "htmlTextWriter": self.html_text_writer,
        })
    }

    fn screen_metric(&self, metric: &ScreenMetric) -> BcResult<i32> {
        if self.get(metric.key).is_some() {
            return self.parse_int(metric.key);
        }

        // best partial information
        let (a, b) = match (self.get(metric.first), self.get(metric.second)) {
            (Some(_), Some(_)) => (self.parse_int(metric.first)?, self.parse_int(metric.second)?),
            (Some(_), None) => (self.parse_int(metric.first)?, self.parse_int_or_zero(metric.default_second)?),
            (None, Some(_)) => (self.parse_int_or_zero(metric.default_first)?, self.parse_int(metric.second)?),
            (None, None) if self.get(metric.fallback).is_some() => (self.parse_int(metric.fallback)?, 1),
            (None, None) => metric.base,
        };

        let combined = match metric.combine {
            Combine::Divide => a.checked_div(b),
            Combine::Multiply => a.checked_mul(b),
        };
        combined.ok_or_else(|| invalid(metric.second, &b.to_string()))
    }

    fn memo<T: Typed>(&self, key: &'static str, compute: impl FnOnce() -> BcResult<T>) -> BcResult<T> {
        if let Some(value) = self
            .memo
            .read()
            .ok()
            .and_then(|memo| memo.get(key).and_then(T::from_value))
        {
            return Ok(value);
        }
        let value = compute()?;
        if let Ok(mut memo) = self.memo.write() {
            memo.insert(key, value.into_value());
        }
        Ok(value)
    }

    fn clear_memo(&mut self) {
        match self.memo.get_mut() {
            Ok(memo) => memo.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn required(&self, name: &str) -> BcResult<&str> {
        self.get(name).ok_or_else(|| invalid(name, ""))
    }

    fn parse_int(&self, name: &str) -> BcResult<i32> {
        let raw = self.required(name)?;
        raw.trim().parse::<i32>().map_err(|_| invalid(name, raw))
    }

    fn parse_int_or_zero(&self, name: &str) -> BcResult<i32> {
        match self.get(name) {
            Some(_) => self.parse_int(name),
            None => Ok(0),
        }
    }

    fn parse_version(&self, name: &str) -> BcResult<CapVersion> {
        let raw = self.required(name)?;
        raw.parse().map_err(|_| invalid(name, raw))
    }

    fn parse_strict_bool(&self, name: &str) -> BcResult<bool> {
        let raw = self.required(name)?;
        parse_bool(raw).ok_or_else(|| invalid(name, raw))
    }
}

/// Strict boolean accessors: missing or malformed values are errors.
macro_rules! strict_bool_caps {
    ($($method:ident => $key:literal),* $(,)?) => {
        impl BrowserCapabilities {
            $(
                pub fn $method(&self) -> BcResult<bool> {
                    self.memo($key, || self.parse_strict_bool($key))
                }
            )*
        }
    };
}

strict_bool_caps! {
    beta => "beta",
    crawler => "crawler",
    aol => "aol",
    win16 => "win16",
    win32 => "win32",
    frames => "frames",
    tables => "tables",
    cookies => "cookies",
    vbscript => "vbscript",
    javascript => "javascript",
    java_applets => "javaapplets",
    activex_controls => "activexcontrols",
    background_sounds => "backgroundsounds",
    cdf => "cdf",
}

fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn invalid(key: &str, value: &str) -> BrowserCapsError {
    BrowserCapsError::InvalidCapability {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pairs: &[(&str, &str)]) -> BrowserCapabilities {
        let mut caps = BrowserCapabilities::new();
        for (k, v) in pairs {
            caps.set(k, *v);
        }
        caps
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let caps = caps(&[("Browser", "IE"), ("type", "IE6")]);
        assert_eq!(caps.get("BROWSER"), Some("IE"));
        assert_eq!(caps.browser(), Some("IE"));
        assert_eq!(caps.kind(), Some("IE6"));
        assert_eq!(caps.platform(), None);
    }

    #[test]
    fn version_numbers() {
        let caps = caps(&[("majorversion", "6"), ("minorversion", ".4.1")]);
        assert_eq!(caps.major_version().unwrap(), 6);
        assert!((caps.minor_version().unwrap() - 0.4).abs() < f64::EPSILON);

        let bad = caps_bad_major();
        assert!(matches!(
            bad.major_version(),
            Err(BrowserCapsError::InvalidCapability { ref key, ref value }) if key == "majorversion" && value == "six"
        ));
    }

    fn caps_bad_major() -> BrowserCapabilities {
        caps(&[("majorversion", "six"), ("minorversion", "x.y.z")])
    }

    #[test]
    fn malformed_minor_version_is_an_error() {
        assert!(caps_bad_major().minor_version().is_err());
    }

    #[test]
    fn strict_and_lenient_booleans() {
        let caps = caps(&[("tables", "True"), ("frames", "yes"), ("isMobileDevice", "maybe")]);
        assert!(caps.tables().unwrap());
        assert!(caps.frames().is_err());
        assert!(caps.cookies().is_err());
        assert!(!caps.is_mobile_device());
        assert!(!caps.requires_control_state_in_session());
        assert!(caps.can_send_mail());
    }

    #[test]
    fn memoized_value_is_reset_by_set() {
        let mut caps = caps(&[("majorversion", "4")]);
        assert_eq!(caps.major_version().unwrap(), 4);
        caps.set("majorVersion", "5");
        assert_eq!(caps.major_version().unwrap(), 5);
    }

    #[test]
    fn repeated_reads_return_the_cached_value() {
        let caps = caps(&[("majorversion", "7"), ("tables", "false"), ("jscriptversion", "5.6")]);
        for _ in 0..2 {
            assert_eq!(caps.major_version().unwrap(), 7);
            assert!(!caps.tables().unwrap());
            assert_eq!(caps.jscript_version().unwrap(), CapVersion::new(5, 6));
            assert_eq!(caps.screen_pixels_width().unwrap(), 640);
        }
    }

    #[test]
    fn dom_versions() {
        let caps = caps(&[("ecmascriptversion", "1.5"), ("w3cdomversion", "1.0.2"), ("msdomversion", "")]);
        assert_eq!(caps.ecma_script_version().unwrap(), CapVersion::new(1, 5));
        assert_eq!(caps.w3cdom_version().unwrap().to_string(), "1.0.2");
        assert!(caps.msdom_version().is_err());
    }

    #[test]
    fn screen_metrics_default_and_compute() {
        let empty = BrowserCapabilities::new();
        assert_eq!(empty.screen_pixels_width().unwrap(), 640);
        assert_eq!(empty.screen_pixels_height().unwrap(), 480);
        assert_eq!(empty.screen_characters_width().unwrap(), 80);
        assert_eq!(empty.screen_characters_height().unwrap(), 40);

        let partial = caps(&[("screenPixelsWidth", "320"), ("defaultCharacterWidth", "10")]);
        assert_eq!(partial.screen_characters_width().unwrap(), 32);

        let zero = caps(&[("screenPixelsWidth", "320"), ("characterWidth", "0")]);
        assert!(zero.screen_characters_width().is_err());
    }

    #[test]
    fn gateway_versions_and_href_length() {
        let caps = caps(&[("gatewayMinorVersion", "0.5")]);
        assert_eq!(caps.gateway_major_version().unwrap(), 0);
        assert!((caps.gateway_minor_version().unwrap() - 0.5).abs() < f64::EPSILON);
        assert_eq!(caps.maximum_href_length().unwrap(), 0);
    }

    #[test]
    fn browser_list() {
        let mut caps = BrowserCapabilities::new();
        caps.add_browser("Default");
        caps.add_browser("IE");
        assert_eq!(caps.id(), Some("ie"));
        assert!(caps.is_browser("Default"));
        assert!(!caps.is_browser(""));
        assert_eq!(caps.to_json()["browsers"], json!(["default", "ie"]));
    }

    #[test]
    fn clr_versions_from_user_agent() {
        let ua = "Mozilla/4.0 (compatible; MSIE 6.0; .NET CLR 2.0.50727; .NET CLR 1.1.4322)";
        let versions = BrowserCapabilities::clr_versions(ua).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].to_string(), "1.1.4322");
        assert_eq!(BrowserCapabilities::clr_version(ua).unwrap().major, 2);

        assert_eq!(BrowserCapabilities::clr_versions("Opera/9.0"), Some(vec![CapVersion::default()]));
        assert_eq!(BrowserCapabilities::clr_versions(""), None);
    }
}

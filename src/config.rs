use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::api::Dialect;
use crate::fullscreen::EngineProfile;

/// Height used when the server does not send one.
pub const DEFAULT_HEIGHT: u32 = 450;
pub const DEFAULT_DISPLAY_NAME: &str = "SCORM unit";

/// Wait before looking for an embedded media player in a new popup.
pub const DEFAULT_MEDIA_CHECK_DELAY: Duration = Duration::from_millis(1000);

const GET_VALUE_HANDLER: &str = "scorm_get_value";
const SET_VALUE_HANDLER: &str = "scorm_set_value";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse handler URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no element handlers configured (set `handlers` or `handler_base`)")]
    MissingHandlers,
}

/// SCORM version the package manifest declares.
///
/// Known versions keep their manifest order; anything else is carried
/// verbatim and treated as the current dialect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ContentVersion {
    Scorm12,
    Scorm2004SecondEdition,
    Scorm2004ThirdEdition,
    Scorm2004FourthEdition,
    Unrecognized(String),
}

impl ContentVersion {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "1.2" | "SCORM_12" => Self::Scorm12,
            "CAM 1.3" | "SCORM_2004_2_EDITION" => Self::Scorm2004SecondEdition,
            "2004 3rd Edition" | "SCORM_2004_3_EDITION" => Self::Scorm2004ThirdEdition,
            "2004 4th Edition" | "SCORM_2004_4_EDITION" => Self::Scorm2004FourthEdition,
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    /// Position in the manifest ordering, `None` for unrecognized values.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Self::Scorm12 => Some(0),
            Self::Scorm2004SecondEdition => Some(1),
            Self::Scorm2004ThirdEdition => Some(2),
            Self::Scorm2004FourthEdition => Some(3),
            Self::Unrecognized(_) => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Scorm12)
    }

    pub fn dialect(&self) -> Dialect {
        if self.is_legacy() {
            Dialect::Legacy
        } else {
            Dialect::Current
        }
    }
}

impl Default for ContentVersion {
    fn default() -> Self {
        Self::Scorm12
    }
}

impl From<String> for ContentVersion {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl PartialOrd for ContentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank()?.cmp(&other.rank()?))
    }
}

impl fmt::Display for ContentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Scorm12 => "1.2",
            Self::Scorm2004SecondEdition => "CAM 1.3",
            Self::Scorm2004ThirdEdition => "2004 3rd Edition",
            Self::Scorm2004FourthEdition => "2004 4th Edition",
            Self::Unrecognized(raw) => raw.as_str(),
        };
        f.write_str(text)
    }
}

/// Per-load session settings rendered by the server. Never mutated once built.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default, alias = "scorm_version", alias = "version_scorm")]
    pub content_version: ContentVersion,
    #[serde(default, alias = "scorm_url", alias = "scorm_file_path")]
    pub content_url: String,
    #[serde(default, alias = "popup")]
    pub presentation_mode: bool,
    #[serde(default, alias = "autoopen")]
    pub auto_open: bool,
    #[serde(default, alias = "allowopeninplace")]
    pub allow_reopen_inline: bool,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            content_version: ContentVersion::default(),
            content_url: String::new(),
            presentation_mode: false,
            auto_open: false,
            allow_reopen_inline: false,
            width: None,
            height: DEFAULT_HEIGHT,
            display_name: default_display_name(),
        }
    }
}

impl SessionConfig {
    pub fn is_popup(&self) -> bool {
        self.presentation_mode
    }
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerEndpoints {
    pub get_value: Url,
    pub set_value: Url,
}

impl HandlerEndpoints {
    /// Derive both handler URLs from the block's handler base
    /// (`.../handler/` style URLs end with a slash).
    pub fn from_base(base: &Url) -> Result<Self, ConfigError> {
        Ok(Self {
            get_value: base.join(GET_VALUE_HANDLER)?,
            set_value: base.join(SET_VALUE_HANDLER)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBridgeConfig {
    session: SessionConfig,
    #[serde(default)]
    site_url: Option<Url>,
    #[serde(default)]
    handlers: Option<HandlerEndpoints>,
    #[serde(default)]
    handler_base: Option<Url>,
    #[serde(default)]
    screen: ScreenSize,
    #[serde(default)]
    engine: Option<EngineProfile>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    write_timeout_ms: Option<u64>,
    #[serde(default)]
    media_check_delay_ms: Option<u64>,
    #[serde(default)]
    host_page: Option<String>,
}

/// Everything the bridge needs for one host page.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    pub site_url: Option<Url>,
    pub handlers: HandlerEndpoints,
    pub screen: ScreenSize,
    pub engine: EngineProfile,
    pub write_timeout: Option<Duration>,
    pub media_check_delay: Duration,
    pub host_page: Option<String>,
}

impl BridgeConfig {
    pub fn new(session: SessionConfig, handlers: HandlerEndpoints) -> Self {
        Self {
            session,
            site_url: None,
            handlers,
            screen: ScreenSize::default(),
            engine: EngineProfile::default(),
            write_timeout: None,
            media_check_delay: DEFAULT_MEDIA_CHECK_DELAY,
            host_page: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawBridgeConfig = serde_yaml::from_str(contents)?;
        raw.try_into()
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawBridgeConfig = serde_json::from_str(contents)?;
        raw.try_into()
    }
}

impl TryFrom<RawBridgeConfig> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(raw: RawBridgeConfig) -> Result<Self, Self::Error> {
        let handlers = match (raw.handlers, raw.handler_base) {
            (Some(handlers), _) => handlers,
            (None, Some(base)) => HandlerEndpoints::from_base(&base)?,
            (None, None) => return Err(ConfigError::MissingHandlers),
        };

        // An explicit profile wins over one sniffed from the user agent.
        let engine = raw
            .engine
            .or_else(|| raw.user_agent.as_deref().map(EngineProfile::from_user_agent))
            .unwrap_or_default();

        Ok(Self {
            session: raw.session,
            site_url: raw.site_url,
            handlers,
            screen: raw.screen,
            engine,
            write_timeout: raw.write_timeout_ms.map(Duration::from_millis),
            media_check_delay: raw
                .media_check_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MEDIA_CHECK_DELAY),
            host_page: raw.host_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn manifest_versions_are_ordered() {
        let legacy = ContentVersion::parse("1.2");
        let third = ContentVersion::parse("2004 3rd Edition");
        let fourth = ContentVersion::parse("SCORM_2004_4_EDITION");
        assert!(legacy < third);
        assert!(fourth > third);
        assert_eq!(ContentVersion::parse("CAM 1.3").rank(), Some(1));
    }

    #[test]
    fn unknown_versions_are_not_comparable() {
        let unknown = ContentVersion::parse("SCORM 9");
        assert_eq!(unknown, ContentVersion::Unrecognized("SCORM 9".into()));
        assert_eq!(unknown.partial_cmp(&ContentVersion::Scorm12), None);
        assert_eq!(unknown.to_string(), "SCORM 9");
    }

    #[test]
    fn only_scorm_12_selects_the_legacy_dialect() {
        assert_eq!(ContentVersion::parse("1.2").dialect(), Dialect::Legacy);
        assert_eq!(ContentVersion::parse("SCORM_12").dialect(), Dialect::Legacy);
        assert_eq!(ContentVersion::parse("").dialect(), Dialect::Current);
        assert_eq!(
            ContentVersion::parse("2004 4th Edition").dialect(),
            Dialect::Current
        );
    }

    #[test]
    fn accepts_server_settings_field_names() {
        let json = r#"{
            "session": {
                "scorm_version": "SCORM_12",
                "scorm_url": "/scorm/abc/index.html",
                "popup": true,
                "autoopen": true,
                "allowopeninplace": false,
                "width": 800,
                "height": 600,
                "display_name": "Fire safety"
            },
            "handler_base": "https://lms.example/handler/block-1/"
        }"#;
        let config = BridgeConfig::from_json(json).unwrap();
        assert!(config.session.content_version.is_legacy());
        assert_eq!(config.session.content_url, "/scorm/abc/index.html");
        assert!(config.session.is_popup());
        assert!(config.session.auto_open);
        assert_eq!(config.session.width, Some(800));
        assert_eq!(
            config.handlers.get_value.as_str(),
            "https://lms.example/handler/block-1/scorm_get_value"
        );
        assert_eq!(
            config.handlers.set_value.as_str(),
            "https://lms.example/handler/block-1/scorm_set_value"
        );
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "session:\n  content_url: https://cdn.example/pkg/index.html\nhandlers:\n  get_value: http://127.0.0.1:9000/get\n  set_value: http://127.0.0.1:9000/set\nwrite_timeout_ms: 2500"
        )
        .unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.session.height, DEFAULT_HEIGHT);
        assert_eq!(config.session.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(config.session.width, None);
        assert!(!config.session.is_popup());
        assert!(config.session.content_version.is_legacy());
        assert_eq!(config.screen, ScreenSize::default());
        assert_eq!(config.engine, EngineProfile::Standard);
        assert_eq!(config.write_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.media_check_delay, DEFAULT_MEDIA_CHECK_DELAY);
    }

    #[test]
    fn engine_profile_from_user_agent() {
        let sniffed = BridgeConfig::from_yaml(
            "session: {}\nhandler_base: https://lms.example/handler/\nuser_agent: \"Mozilla/5.0 (Windows NT 6.1; rv:52.0) Gecko/20100101 Firefox/52.0\"\n",
        )
        .unwrap();
        assert_eq!(sniffed.engine, EngineProfile::Gecko);

        let explicit = BridgeConfig::from_yaml(
            "session: {}\nhandler_base: https://lms.example/handler/\nengine: webkit\nuser_agent: \"Mozilla/5.0 (Windows NT 6.1; rv:52.0) Gecko/20100101 Firefox/52.0\"\nmedia_check_delay_ms: 0\n",
        )
        .unwrap();
        assert_eq!(explicit.engine, EngineProfile::Webkit);
        assert_eq!(explicit.media_check_delay, Duration::ZERO);
    }

    #[test]
    fn missing_handlers_is_an_error() {
        let err = BridgeConfig::from_yaml("session: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingHandlers));
    }
}

// Library exports for the player binary and tests

pub mod api;
pub mod bridge;
pub mod config;
pub mod content;
pub mod display;
pub mod fullscreen;
pub mod host;
pub mod js;
pub mod popup;

// Re-export commonly used types for tests
pub use api::{Dialect, RuntimeApi};
pub use bridge::{ElementBridge, ElementTransport, HttpTransport, ScoreUpdate};
pub use config::{BridgeConfig, ContentVersion, SessionConfig};
pub use content::{ContentLoader, NetworkContentLoader, StaticContentLoader};
pub use display::{DisplayController, DisplayError, DisplayMode, UserAction};
pub use fullscreen::EngineProfile;
pub use host::HostPage;
pub use js::ExecutionContext;
pub use popup::{HeadlessOpener, PopupOpen, PopupWindowManager};

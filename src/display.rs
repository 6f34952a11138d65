//! Decides where content is shown and prepares the context it runs in.
//!
//! Every load goes through the same sequence: obtain a fresh execution
//! context, inject a new API instance into it, then write the wrapper
//! document whose full-size inner frame loads the package. Content in the
//! inner frame reaches the API through `window.parent`.

use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use html_escape::encode_double_quoted_attribute;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::api_for;
use crate::bridge::{ElementBridge, ElementTransport, ScoreUpdate};
use crate::config::{BridgeConfig, ScreenSize, SessionConfig};
use crate::content::{is_blank, resolve_url, ContentError, ContentLoader, ABOUT_BLANK};
use crate::fullscreen::{self, EngineProfile, PendingShim, ShimHandle};
use crate::host::{HostPage, INLINE_FRAME, POPUP_WARNING};
use crate::js::{ContextError, ExecutionContext};
use crate::popup::{PopupOpen, PopupWindow, PopupWindowManager, WindowFeatures, WindowOpener, FRAME_MARGIN};

const FRAME_ATTRIBUTES: &str = r#"allow="fullscreen" allowFullScreen="true" webkitallowfullscreen="true" mozallowfullscreen="true""#;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("opening the content in place is not enabled for this unit")]
    InlineReopenDisabled,
    #[error("invalid content URL: {0}")]
    ContentUrl(#[source] ContentError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Uninitialized,
    Inline,
    Popup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Launch,
    ShowInline,
}

impl UserAction {
    /// Map the `class` attribute of a clicked host element to an action.
    pub fn from_class(class_attribute: &str) -> Option<Self> {
        class_attribute
            .split_whitespace()
            .find_map(|class| match class {
                "scorm_launch" => Some(Self::Launch),
                "scorm_show" => Some(Self::ShowInline),
                _ => None,
            })
    }
}

/// Document written into the outer context: one full-size frame loading `src`.
pub fn wrapper_document(src: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><style>body, html, * {{width: 100%; height: 100%; margin: 0; padding: 0; border: 0;}}</style></head><body>",
            r#"<iframe class="scorm_object" src="{}" width="100%" height="100%" {}></iframe>"#,
            "</body></html>"
        ),
        encode_double_quoted_attribute(src),
        FRAME_ATTRIBUTES
    )
}

/// Outer frame placed in the host page for inline display.
pub fn inline_frame_markup(session: &SessionConfig) -> String {
    let width = session
        .width
        .map(|width| (width + FRAME_MARGIN).to_string())
        .unwrap_or_else(|| "100%".to_string());
    format!(
        r#"<iframe class="scorm-iframe scorm_object" width="{}" height="{}" {}></iframe>"#,
        width,
        session.height + FRAME_MARGIN,
        FRAME_ATTRIBUTES
    )
}

pub struct DisplayController<O: WindowOpener> {
    session: SessionConfig,
    site_url: Option<Url>,
    screen: ScreenSize,
    profile: EngineProfile,
    media_check_delay: Duration,
    host: HostPage,
    bridge: Arc<ElementBridge>,
    updates: UnboundedReceiver<ScoreUpdate>,
    loader: Rc<dyn ContentLoader>,
    popups: PopupWindowManager<O>,
    inline_frame: Option<ExecutionContext>,
    shim: Option<PendingShim>,
    mode: DisplayMode,
}

impl<O: WindowOpener> DisplayController<O> {
    pub fn new(
        config: &BridgeConfig,
        host: HostPage,
        transport: Arc<dyn ElementTransport>,
        loader: Rc<dyn ContentLoader>,
        opener: O,
    ) -> Self {
        let (bridge, updates) = ElementBridge::new(transport);
        Self {
            session: config.session.clone(),
            site_url: config.site_url.clone(),
            screen: config.screen,
            profile: config.engine,
            media_check_delay: config.media_check_delay,
            host,
            bridge: Arc::new(bridge),
            updates,
            loader,
            popups: PopupWindowManager::new(opener),
            inline_frame: None,
            shim: None,
            mode: DisplayMode::Uninitialized,
        }
    }

    /// Initial transition, decided by configuration alone.
    pub fn load(&mut self) -> Result<DisplayMode, DisplayError> {
        if !self.session.is_popup() {
            self.enter_inline()?;
        } else if self.session.auto_open {
            self.enter_popup()?;
        } else {
            debug!(target: "display", "popup mode without auto-open; waiting for launch");
        }
        Ok(self.mode)
    }

    pub fn dispatch(&mut self, action: UserAction) -> Result<DisplayMode, DisplayError> {
        match action {
            UserAction::Launch => {
                self.launch()?;
            }
            UserAction::ShowInline => self.show_inline()?,
        }
        Ok(self.mode)
    }

    /// Open the popup, or focus it when it is already open.
    pub fn launch(&mut self) -> Result<PopupOpen, DisplayError> {
        self.enter_popup()
    }

    pub fn show_inline(&mut self) -> Result<(), DisplayError> {
        if !self.session.allow_reopen_inline {
            return Err(DisplayError::InlineReopenDisabled);
        }
        self.enter_inline()
    }

    fn content_src(&self) -> Result<String, DisplayError> {
        if is_blank(&self.session.content_url) {
            return Ok(ABOUT_BLANK.to_string());
        }
        resolve_url(&self.session.content_url, self.site_url.as_ref())
            .map(String::from)
            .map_err(DisplayError::ContentUrl)
    }

    fn enter_inline(&mut self) -> Result<(), DisplayError> {
        let src = self.content_src()?;
        let markup = inline_frame_markup(&self.session);
        if !self.host.replace_container(&markup) && !self.host.contains(INLINE_FRAME) {
            warn!(target: "display", "host page has no frame container");
        }

        // A fresh context per load keeps one API instance per context.
        let frame = ExecutionContext::new("inline", Rc::clone(&self.loader), self.profile)?;
        frame.inject_api(Rc::new(api_for(&self.session, Arc::clone(&self.bridge))))?;
        frame.write_document(&wrapper_document(&src), None)?;

        info!(target: "display", %src, "content shown inline");
        self.inline_frame = Some(frame);
        self.mode = DisplayMode::Inline;
        Ok(())
    }

    fn enter_popup(&mut self) -> Result<PopupOpen, DisplayError> {
        let src = self.content_src()?;
        let features = WindowFeatures::centered(&self.session, self.screen);
        let wrapper = wrapper_document(&src);
        let session = &self.session;
        let bridge = &self.bridge;

        let outcome = self
            .popups
            .open_or_focus(&session.display_name, &features, |window| {
                let context = window.context();
                context.inject_api(Rc::new(api_for(session, Arc::clone(bridge))))?;
                context.write_document(&wrapper, None)?;
                Ok(())
            })?;

        if outcome == PopupOpen::Created {
            self.wire_fullscreen_shim();
        }
        if outcome != PopupOpen::Focused {
            self.host.show(POPUP_WARNING);
        }
        if outcome != PopupOpen::Blocked {
            self.mode = DisplayMode::Popup;
        }
        info!(target: "display", ?outcome, "popup requested");
        Ok(outcome)
    }

    fn wire_fullscreen_shim(&mut self) {
        self.shim = None;
        if !self.profile.is_legacy() {
            return;
        }
        let Some(frame) = self
            .popups
            .window()
            .and_then(|window| window.context().frame(0))
        else {
            return;
        };
        self.shim = Some(fullscreen::schedule_attach(
            &frame,
            self.profile,
            self.media_check_delay,
        ));
    }

    /// Run expired content timers, then apply every score/status update
    /// that has arrived. Returns how many updates were applied.
    pub fn pump(&mut self) -> usize {
        if let Some(frame) = &self.inline_frame {
            frame.run_due_timers();
        }
        if let Some(window) = self.popups.window() {
            if !window.is_closed() {
                window.context().run_due_timers();
            }
        }

        let mut applied = 0;
        loop {
            match self.updates.try_recv() {
                Ok(update) => {
                    self.host.apply_update(&update);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Keep pumping until `duration` has elapsed.
    pub fn pump_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut applied = self.pump();
        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            applied += self.pump();
        }
        applied
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn host(&self) -> &HostPage {
        &self.host
    }

    pub fn inline_frame(&self) -> Option<&ExecutionContext> {
        self.inline_frame.as_ref()
    }

    pub fn popups(&self) -> &PopupWindowManager<O> {
        &self.popups
    }

    /// The scheduled media-player check for the current popup, if any.
    pub fn fullscreen_check(&self) -> Option<&PendingShim> {
        self.shim.as_ref()
    }

    pub fn fullscreen_shim(&self) -> Option<ShimHandle> {
        self.shim.as_ref().and_then(PendingShim::shim)
    }
}

//! The single secondary window a host page may own.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::{ScreenSize, SessionConfig};
use crate::content::ContentLoader;
use crate::fullscreen::EngineProfile;
use crate::js::{ContextError, ExecutionContext};

/// Added to configured sizes so frame borders never clip the content.
pub const FRAME_MARGIN: u32 = 5;

/// Geometry passed to `window.open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFeatures {
    pub width: u32,
    pub height: u32,
    pub top: u32,
    pub left: u32,
}

impl WindowFeatures {
    /// Size the window from the session (plus margin) and center it on screen.
    /// Without a configured width the popup is as wide as the screen.
    pub fn centered(session: &SessionConfig, screen: ScreenSize) -> Self {
        let width = session.width.unwrap_or(screen.width);
        let height = session.height;
        Self {
            width: width + FRAME_MARGIN,
            height: height + FRAME_MARGIN,
            top: screen.height.saturating_sub(height) / 2,
            left: screen.width.saturating_sub(width) / 2,
        }
    }
}

impl fmt::Display for WindowFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "width={}px,height={}px,top={},left={},resizable=yes,scrollbars=no,status=yes",
            self.width, self.height, self.top, self.left
        )
    }
}

pub trait PopupWindow {
    fn is_closed(&self) -> bool;
    fn focus(&self);
    fn context(&self) -> &ExecutionContext;
}

pub trait WindowOpener {
    type Window: PopupWindow;

    /// `None` when the window could not be opened (popup blocked).
    fn open(&self, name: &str, features: &WindowFeatures) -> Option<Self::Window>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupOpen {
    Created,
    Focused,
    Blocked,
}

/// Owns at most one popup. Opening again focuses it while it is alive and
/// replaces it once it reports itself closed.
pub struct PopupWindowManager<O: WindowOpener> {
    opener: O,
    window: Option<O::Window>,
}

impl<O: WindowOpener> PopupWindowManager<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            window: None,
        }
    }

    /// Open-or-focus. `prepare` runs on a freshly created window before it is
    /// stored. A window whose `prepare` fails is dropped, so the next call
    /// opens a new one.
    pub fn open_or_focus<F>(
        &mut self,
        name: &str,
        features: &WindowFeatures,
        prepare: F,
    ) -> Result<PopupOpen, ContextError>
    where
        F: FnOnce(&O::Window) -> Result<(), ContextError>,
    {
        if let Some(window) = self.window.as_ref().filter(|window| !window.is_closed()) {
            debug!(target: "popup", "popup already open; focusing");
            window.focus();
            return Ok(PopupOpen::Focused);
        }

        let Some(window) = self.opener.open(name, features) else {
            warn!(target: "popup", %name, "popup could not be opened");
            self.window = None;
            return Ok(PopupOpen::Blocked);
        };
        info!(target: "popup", %name, %features, "popup opened");
        if let Err(err) = prepare(&window) {
            warn!(target: "popup", %name, error = %err, "popup could not be prepared; discarding it");
            self.window = None;
            return Err(err);
        }
        self.window = Some(window);
        Ok(PopupOpen::Created)
    }

    pub fn is_open(&self) -> bool {
        self.window.as_ref().is_some_and(|window| !window.is_closed())
    }

    pub fn window(&self) -> Option<&O::Window> {
        self.window.as_ref()
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }
}

/// A window backed by its own execution context, with no UI attached.
pub struct HeadlessWindow {
    name: String,
    features: WindowFeatures,
    context: ExecutionContext,
    focus_count: Cell<usize>,
}

impl HeadlessWindow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> WindowFeatures {
        self.features
    }

    pub fn focus_count(&self) -> usize {
        self.focus_count.get()
    }
}

impl PopupWindow for HeadlessWindow {
    fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    fn focus(&self) {
        self.focus_count.set(self.focus_count.get() + 1);
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

pub struct HeadlessOpener {
    loader: Rc<dyn ContentLoader>,
    profile: EngineProfile,
    blocked: Cell<bool>,
    opened: Cell<usize>,
}

impl HeadlessOpener {
    pub fn new(loader: Rc<dyn ContentLoader>, profile: EngineProfile) -> Self {
        Self {
            loader,
            profile,
            blocked: Cell::new(false),
            opened: Cell::new(0),
        }
    }

    /// Simulate a popup blocker.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    pub fn opened_count(&self) -> usize {
        self.opened.get()
    }
}

impl WindowOpener for HeadlessOpener {
    type Window = HeadlessWindow;

    fn open(&self, name: &str, features: &WindowFeatures) -> Option<HeadlessWindow> {
        if self.blocked.get() {
            return None;
        }
        let context = match ExecutionContext::new(
            &format!("popup:{name}"),
            Rc::clone(&self.loader),
            self.profile,
        ) {
            Ok(context) => context,
            Err(err) => {
                warn!(target: "popup", error = %err, "failed to create popup context");
                return None;
            }
        };
        self.opened.set(self.opened.get() + 1);
        Some(HeadlessWindow {
            name: name.to_string(),
            features: *features,
            context,
            focus_count: Cell::new(0),
        })
    }
}

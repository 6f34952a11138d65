//! Cross-engine fullscreen enter/exit and the legacy media-player workaround.
//!
//! Older Gecko builds leave an embedded MediaElement.js player unable to go
//! fullscreen until the page itself has toggled fullscreen once. When that
//! engine and a player are both present, a one-shot capturing click listener
//! on the content document enters and immediately exits fullscreen, then
//! removes itself whatever the outcome. Players are usually built from load
//! handlers or timers, so the check runs a while after the document loads.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::js::{ExecutionContext, ListenerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FullscreenError {
    #[error("no fullscreen capability available")]
    Unsupported,
    #[error("{capability} failed: {reason}")]
    Rejected {
        capability: &'static str,
        reason: String,
    },
}

/// Which fullscreen API family an execution context exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineProfile {
    #[default]
    Standard,
    Gecko,
    Webkit,
    Trident,
    None,
}

impl EngineProfile {
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Trident/") || user_agent.contains("MSIE ") {
            Self::Trident
        } else if user_agent.contains("Firefox/") && user_agent.contains("Gecko/") {
            Self::Gecko
        } else if user_agent.contains("AppleWebKit/") && !user_agent.contains("Chrome/") {
            Self::Webkit
        } else {
            Self::Standard
        }
    }

    /// Engines that need the media-player workaround.
    pub fn is_legacy(self) -> bool {
        self == Self::Gecko
    }

    /// `(request on element, exit on document)` method names, if any.
    pub fn fullscreen_methods(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Standard => Some(("requestFullscreen", "exitFullscreen")),
            Self::Gecko => Some(("mozRequestFullScreen", "mozCancelFullScreen")),
            Self::Webkit => Some(("webkitRequestFullscreen", "webkitExitFullscreen")),
            Self::Trident => Some(("msRequestFullscreen", "msExitFullscreen")),
            Self::None => None,
        }
    }
}

/// Something that may expose vendor fullscreen methods on its root element
/// and its document.
pub trait FullscreenSurface {
    fn has_element_method(&self, name: &str) -> bool;
    fn call_element_method(&self, name: &str) -> Result<(), String>;
    fn has_document_method(&self, name: &str) -> bool;
    fn call_document_method(&self, name: &str) -> Result<(), String>;
}

type Detect = fn(&dyn FullscreenSurface, &str) -> bool;
type Invoke = fn(&dyn FullscreenSurface, &str) -> Result<(), String>;

pub struct Capability {
    pub name: &'static str,
    detect: Detect,
    invoke: Invoke,
}

fn detect_element(surface: &dyn FullscreenSurface, name: &str) -> bool {
    surface.has_element_method(name)
}

fn invoke_element(surface: &dyn FullscreenSurface, name: &str) -> Result<(), String> {
    surface.call_element_method(name)
}

fn detect_document(surface: &dyn FullscreenSurface, name: &str) -> bool {
    surface.has_document_method(name)
}

fn invoke_document(surface: &dyn FullscreenSurface, name: &str) -> Result<(), String> {
    surface.call_document_method(name)
}

const fn on_element(name: &'static str) -> Capability {
    Capability {
        name,
        detect: detect_element,
        invoke: invoke_element,
    }
}

const fn on_document(name: &'static str) -> Capability {
    Capability {
        name,
        detect: detect_document,
        invoke: invoke_document,
    }
}

/// Tried in order; the first capability present wins.
pub const ENTER_CAPABILITIES: [Capability; 4] = [
    on_element("requestFullscreen"),
    on_element("mozRequestFullScreen"),
    on_element("webkitRequestFullscreen"),
    on_element("msRequestFullscreen"),
];

pub const EXIT_CAPABILITIES: [Capability; 4] = [
    on_document("exitFullscreen"),
    on_document("mozCancelFullScreen"),
    on_document("webkitExitFullscreen"),
    on_document("msExitFullscreen"),
];

fn run_first_available(
    table: &[Capability],
    surface: &dyn FullscreenSurface,
) -> Result<&'static str, FullscreenError> {
    let capability = table
        .iter()
        .find(|capability| (capability.detect)(surface, capability.name))
        .ok_or(FullscreenError::Unsupported)?;
    (capability.invoke)(surface, capability.name).map_err(|reason| FullscreenError::Rejected {
        capability: capability.name,
        reason,
    })?;
    Ok(capability.name)
}

/// Returns the capability that was used.
pub fn request_fullscreen(surface: &dyn FullscreenSurface) -> Result<&'static str, FullscreenError> {
    run_first_available(&ENTER_CAPABILITIES, surface)
}

pub fn exit_fullscreen(surface: &dyn FullscreenSurface) -> Result<&'static str, FullscreenError> {
    run_first_available(&EXIT_CAPABILITIES, surface)
}

const MEDIA_PLAYER_CHECK: &str = "typeof mejs === 'object' && mejs !== null \
    && typeof mejs.players === 'object' && mejs.players !== null \
    && Object.keys(mejs.players).length > 0";

pub fn has_media_player(frame: &ExecutionContext) -> bool {
    frame
        .eval_with::<bool>(MEDIA_PLAYER_CHECK, "scorm-mejs-check.js")
        .unwrap_or(false)
}

/// Whether the workaround applies to this frame.
pub fn should_attach(profile: EngineProfile, frame: &ExecutionContext) -> bool {
    profile.is_legacy() && has_media_player(frame)
}

/// Observable state of an attached shim.
#[derive(Clone)]
pub struct ShimHandle {
    listener: Rc<Cell<Option<ListenerId>>>,
    detach_count: Rc<Cell<usize>>,
    outcome: Rc<RefCell<Option<Result<(), FullscreenError>>>>,
}

impl ShimHandle {
    pub fn is_attached(&self) -> bool {
        self.listener.get().is_some()
    }

    pub fn detach_count(&self) -> usize {
        self.detach_count.get()
    }

    pub fn outcome(&self) -> Option<Result<(), FullscreenError>> {
        self.outcome.borrow().clone()
    }
}

/// Register the one-shot toggle on the frame's document.
pub fn attach(frame: &ExecutionContext) -> ShimHandle {
    let handle = ShimHandle {
        listener: Rc::new(Cell::new(None)),
        detach_count: Rc::new(Cell::new(0)),
        outcome: Rc::new(RefCell::new(None)),
    };

    let state = handle.clone();
    let id = frame.add_click_listener(Rc::new(move |context: &ExecutionContext| {
        let result = request_fullscreen(context)
            .and_then(|_| exit_fullscreen(context))
            .map(|_| ());
        match &result {
            Ok(()) => info!(target: "fullscreen", "fullscreen toggle completed"),
            Err(err) => debug!(target: "fullscreen", error = %err, "fullscreen toggle failed"),
        }
        *state.outcome.borrow_mut() = Some(result);

        if let Some(id) = state.listener.take() {
            context.remove_click_listener(id);
            state.detach_count.set(state.detach_count.get() + 1);
        }
    }));
    handle.listener.set(Some(id));
    debug!(target: "fullscreen", "fullscreen shim attached");
    handle
}

/// Result of a media-player check scheduled by [`schedule_attach`].
#[derive(Clone, Default)]
pub struct PendingShim {
    checked: Rc<Cell<bool>>,
    shim: Rc<RefCell<Option<ShimHandle>>>,
}

impl PendingShim {
    pub fn is_checked(&self) -> bool {
        self.checked.get()
    }

    /// The attached shim, once the check found a player.
    pub fn shim(&self) -> Option<ShimHandle> {
        self.shim.borrow().clone()
    }
}

/// Check for a player on `frame` after `delay` and attach the shim if the
/// workaround applies. The check runs when the frame drains its timers.
pub fn schedule_attach(frame: &ExecutionContext, profile: EngineProfile, delay: Duration) -> PendingShim {
    let pending = PendingShim::default();
    let state = pending.clone();
    frame.set_host_timeout(
        delay,
        Box::new(move |frame: &ExecutionContext| {
            if should_attach(profile, frame) {
                *state.shim.borrow_mut() = Some(attach(frame));
            } else {
                debug!(target: "fullscreen", frame = %frame.name(), "no media player; shim not needed");
            }
            state.checked.set(true);
        }),
    );
    pending
}

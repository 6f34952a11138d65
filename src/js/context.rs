use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kuchiki::traits::*;
use kuchiki::NodeRef;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::globals::{self, MethodTarget};
use super::processor::{collect_scripts, run_scripts, ScriptExecutionSummary};
use super::runtime::QuickJsEngine;
use super::timers::{Expired, HostTask, TimerId, TimerRegistry};
use crate::api::RuntimeApi;
use crate::content::{is_blank, resolve_url, ContentError, ContentLoader};
use crate::fullscreen::{EngineProfile, FullscreenSurface};

/// Frames nested deeper than this are left empty.
pub const MAX_FRAME_DEPTH: usize = 4;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("script engine error: {0:#}")]
    Engine(anyhow::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("context {0} already holds a different API instance")]
    ApiAlreadyInjected(String),
}

impl From<anyhow::Error> for ContextError {
    fn from(err: anyhow::Error) -> Self {
        Self::Engine(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Capturing click listener on a context's document.
pub type ClickListener = Rc<dyn Fn(&ExecutionContext)>;

/// One browsing context: an iframe or a window with its own globals.
///
/// Every context owns a separate QuickJS engine. Child frames created by
/// writing a document see the API of every enclosing frame through
/// `window.parent`.
pub struct ExecutionContext {
    name: String,
    engine: QuickJsEngine,
    loader: Rc<dyn ContentLoader>,
    profile: EngineProfile,
    depth: usize,
    ancestors: Vec<Option<Rc<RuntimeApi>>>,
    api: RefCell<Option<Rc<RuntimeApi>>>,
    document: RefCell<Option<NodeRef>>,
    url: RefCell<Option<Url>>,
    frames: RefCell<Vec<Rc<ExecutionContext>>>,
    listeners: RefCell<Vec<(ListenerId, ClickListener)>>,
    timers: Rc<TimerRegistry>,
    closed: Rc<Cell<bool>>,
    fullscreen: Rc<Cell<bool>>,
}

impl ExecutionContext {
    /// A top-level context: an inline frame in the host page or a popup window.
    pub fn new(
        name: &str,
        loader: Rc<dyn ContentLoader>,
        profile: EngineProfile,
    ) -> Result<Self, ContextError> {
        Self::build(name, loader, profile, 0, Vec::new())
    }

    fn build(
        name: &str,
        loader: Rc<dyn ContentLoader>,
        profile: EngineProfile,
        depth: usize,
        ancestors: Vec<Option<Rc<RuntimeApi>>>,
    ) -> Result<Self, ContextError> {
        let engine = QuickJsEngine::new(name)?;
        let closed = Rc::new(Cell::new(false));
        let fullscreen = Rc::new(Cell::new(false));
        let timers = Rc::new(TimerRegistry::new());
        globals::install_frame_chain(&engine, &ancestors)?;
        globals::install_document(&engine, profile, Rc::clone(&closed), Rc::clone(&fullscreen))?;
        globals::install_timers(&engine, Rc::clone(&timers))?;

        Ok(Self {
            name: name.to_string(),
            engine,
            loader,
            profile,
            depth,
            ancestors,
            api: RefCell::new(None),
            document: RefCell::new(None),
            url: RefCell::new(None),
            frames: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            timers,
            closed,
            fullscreen,
        })
    }

    fn child(&self, index: usize) -> Result<Self, ContextError> {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(self.api.borrow().clone());
        ancestors.extend(self.ancestors.iter().cloned());
        Self::build(
            &format!("{}/frame[{}]", self.name, index),
            Rc::clone(&self.loader),
            self.profile,
            self.depth + 1,
            ancestors,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> EngineProfile {
        self.profile
    }

    /// Bind `api` as `API` and `API_1484_11`. Injecting the instance the
    /// context already holds is a no-op; a different one is refused.
    pub fn inject_api(&self, api: Rc<RuntimeApi>) -> Result<(), ContextError> {
        if let Some(current) = self.api.borrow().as_ref() {
            if Rc::ptr_eq(current, &api) {
                return Ok(());
            }
            return Err(ContextError::ApiAlreadyInjected(self.name.clone()));
        }
        globals::inject_api(&self.engine, &api)?;
        debug!(target: "quickjs", context = %self.name, dialect = ?api.dialect(), "API injected");
        *self.api.borrow_mut() = Some(api);
        Ok(())
    }

    pub fn api(&self) -> Option<Rc<RuntimeApi>> {
        self.api.borrow().clone()
    }

    /// `document.open(); document.write(html); document.close()`.
    ///
    /// Replaces the current document and runs its scripts. `DOMContentLoaded`
    /// fires once they finish, then frames load, then `load` fires.
    pub fn write_document(
        &self,
        html: &str,
        base: Option<&Url>,
    ) -> Result<ScriptExecutionSummary, ContextError> {
        self.frames.borrow_mut().clear();
        self.listeners.borrow_mut().clear();
        self.timers.clear_all();
        globals::reset_document(&self.engine)?;

        let document = kuchiki::parse_html().one(html);
        *self.document.borrow_mut() = Some(document.clone());
        *self.url.borrow_mut() = base.cloned();

        let scripts = collect_scripts(&document);
        let summary = run_scripts(&self.engine, &scripts, self.loader.as_ref(), base);
        self.advance_ready_state("interactive");
        self.load_frames(&document, base);
        self.advance_ready_state("complete");
        Ok(summary)
    }

    fn advance_ready_state(&self, state: &str) {
        if let Err(err) = globals::set_ready_state(&self.engine, state) {
            warn!(target: "quickjs", context = %self.name, state, error = %format!("{err:#}"), "ready state change failed");
        }
    }

    /// Load `url` into this context.
    pub fn navigate(&self, url: &Url) -> Result<ScriptExecutionSummary, ContextError> {
        debug!(target: "content", context = %self.name, %url, "navigating");
        let html = self.loader.load(url)?;
        self.write_document(&html, Some(url))
    }

    fn load_frames(&self, document: &NodeRef, base: Option<&Url>) {
        let Ok(iframes) = document.select("iframe") else {
            return;
        };
        let sources: Vec<String> = iframes
            .map(|iframe| {
                iframe
                    .attributes
                    .borrow()
                    .get("src")
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        for (index, src) in sources.into_iter().enumerate() {
            if self.depth + 1 > MAX_FRAME_DEPTH {
                warn!(target: "content", context = %self.name, "frame nesting too deep; leaving frame empty");
                continue;
            }
            let frame = match self.child(index) {
                Ok(frame) => Rc::new(frame),
                Err(err) => {
                    warn!(target: "quickjs", context = %self.name, error = %err, "failed to create frame context");
                    continue;
                }
            };
            self.frames.borrow_mut().push(Rc::clone(&frame));

            if is_blank(&src) {
                continue;
            }
            let loaded = resolve_url(&src, base)
                .map_err(ContextError::from)
                .and_then(|url| frame.navigate(&url));
            if let Err(err) = loaded {
                warn!(target: "content", frame = %frame.name, %src, error = %err, "frame failed to load");
            }
        }
    }

    pub fn frames(&self) -> Vec<Rc<ExecutionContext>> {
        self.frames.borrow().clone()
    }

    pub fn frame(&self, index: usize) -> Option<Rc<ExecutionContext>> {
        self.frames.borrow().get(index).cloned()
    }

    pub fn url(&self) -> Option<Url> {
        self.url.borrow().clone()
    }

    pub fn document_html(&self) -> Option<String> {
        self.document.borrow().as_ref().map(|document| document.to_string())
    }

    pub fn eval(&self, source: &str, filename: &str) -> anyhow::Result<()> {
        self.engine.eval(source, filename)
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> anyhow::Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.engine.eval_with(source, filename)
    }

    /// Run `task` on this context once `delay` has passed and the context
    /// drains its timers.
    pub fn set_host_timeout(&self, delay: Duration, task: HostTask) -> TimerId {
        self.timers.set_host_timeout(delay, task)
    }

    /// Timers scheduled here and not yet expired or cleared. Frames are not
    /// counted.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Run every expired timer in this context and then in its frames.
    /// Returns how many callbacks ran.
    pub fn run_due_timers(&self) -> usize {
        let mut ran = 0;
        for expired in self.timers.take_expired() {
            match expired {
                Expired::Script(id) => {
                    if let Err(err) = globals::invoke_timer(&self.engine, id) {
                        warn!(target: "quickjs", context = %self.name, timer = id, error = %format!("{err:#}"), "timer callback threw");
                    }
                }
                Expired::Host(task) => task(self),
            }
            ran += 1;
        }
        for frame in self.frames() {
            ran += frame.run_due_timers();
        }
        ran
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.get()
    }

    pub fn add_click_listener(&self, listener: ClickListener) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst));
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn remove_click_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn click_listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver a click on the document to every registered listener.
    /// Listeners may remove themselves while running.
    pub fn dispatch_click(&self) -> usize {
        let listeners: Vec<ClickListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in &listeners {
            listener(self);
        }
        listeners.len()
    }
}

impl FullscreenSurface for ExecutionContext {
    fn has_element_method(&self, name: &str) -> bool {
        globals::has_method(&self.engine, MethodTarget::RootElement, name)
    }

    fn call_element_method(&self, name: &str) -> Result<(), String> {
        globals::invoke_method(&self.engine, MethodTarget::RootElement, name)
    }

    fn has_document_method(&self, name: &str) -> bool {
        globals::has_method(&self.engine, MethodTarget::Document, name)
    }

    fn call_document_method(&self, name: &str) -> Result<(), String> {
        globals::invoke_method(&self.engine, MethodTarget::Document, name)
    }
}

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object};

use super::runtime::QuickJsEngine;
use super::timers::TimerRegistry;
use crate::api::{RuntimeApi, CURRENT_GLOBAL, LEGACY_GLOBAL};
use crate::fullscreen::EngineProfile;

/// Where a fullscreen method is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MethodTarget {
    RootElement,
    Document,
}

impl MethodTarget {
    fn expression(self) -> &'static str {
        match self {
            Self::RootElement => "globalThis.document && globalThis.document.documentElement",
            Self::Document => "globalThis.document",
        }
    }
}

/// Build the JS object for one API instance. Every method forwards to the
/// same Rust instance, whichever context the object lives in.
fn build_api_object<'js>(ctx: &Ctx<'js>, api: &Rc<RuntimeApi>) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    for (name, method) in api.dialect().methods() {
        let api = Rc::clone(api);
        let method = *method;
        let func = Function::new(
            ctx.clone(),
            move |args: Rest<Coerced<String>>| -> rquickjs::Result<String> {
                let args: Vec<String> = args.0.into_iter().map(|arg| arg.0).collect();
                Ok(api.call(method, &args))
            },
        )?
        .with_name(*name)?;
        object.set(*name, func)?;
    }
    Ok(object)
}

/// Bind one API object under both well-known global names.
fn bind_api<'js>(ctx: &Ctx<'js>, target: &Object<'js>, api: &Rc<RuntimeApi>) -> rquickjs::Result<()> {
    let api_object = build_api_object(ctx, api)?;
    target.set(LEGACY_GLOBAL, api_object.clone())?;
    target.set(CURRENT_GLOBAL, api_object)
}

pub(super) fn inject_api(engine: &QuickJsEngine, api: &Rc<RuntimeApi>) -> Result<()> {
    engine.with_context(|ctx| {
        let global = ctx.globals();
        bind_api(&ctx, &global, api)
    })
}

/// Install `window`, `self`, `parent` and `top`.
///
/// `ancestors` lists the API bound at each enclosing frame, nearest first.
/// Content discovering the API by walking `window.parent` finds the instance
/// injected into the frame that wrote its document.
pub(super) fn install_frame_chain(
    engine: &QuickJsEngine,
    ancestors: &[Option<Rc<RuntimeApi>>],
) -> Result<()> {
    engine.with_context(|ctx| {
        let global = ctx.globals();
        global.set("window", global.clone())?;
        global.set("self", global.clone())?;

        let mut frames = Vec::with_capacity(ancestors.len());
        for api in ancestors {
            let frame = Object::new(ctx.clone())?;
            if let Some(api) = api {
                bind_api(&ctx, &frame, api)?;
            }
            frames.push(frame);
        }

        let Some(top) = frames.last().cloned() else {
            global.set("parent", global.clone())?;
            return global.set("top", global.clone());
        };

        for (index, frame) in frames.iter().enumerate() {
            let parent = frames.get(index + 1).unwrap_or(&top);
            frame.set("parent", parent.clone())?;
            frame.set("top", top.clone())?;
            frame.set("window", frame.clone())?;
            frame.set("self", frame.clone())?;
        }

        global.set("parent", frames[0].clone())?;
        global.set("top", top)
    })
}

/// Install the minimal `document`, `window.close()` and the fullscreen
/// methods the engine profile exposes.
pub(super) fn install_document(
    engine: &QuickJsEngine,
    profile: EngineProfile,
    closed: Rc<Cell<bool>>,
    fullscreen: Rc<Cell<bool>>,
) -> Result<()> {
    engine.with_context(|ctx| {
        let global = ctx.globals();
        let close_fn = Function::new(ctx.clone(), move || closed.set(true))?
            .with_name("__scorm_close")?;
        global.set("__scorm_close", close_fn)?;
        let fullscreen_fn =
            Function::new(ctx.clone(), move |active: bool| fullscreen.set(active))?
                .with_name("__scorm_fullscreen")?;
        global.set("__scorm_fullscreen", fullscreen_fn)?;
        ctx.eval::<(), _>(DOCUMENT_BOOTSTRAP.as_bytes())
    })?;

    if let Some((request, exit)) = profile.fullscreen_methods() {
        let script = format!(
            "globalThis.__scorm_install_fullscreen({}, {});",
            quote(request),
            quote(exit)
        );
        engine.eval(&script, "scorm-fullscreen-bootstrap.js")?;
    }
    Ok(())
}

/// Install `setTimeout`, `setInterval` and their `clear*` counterparts.
/// Callbacks are kept on the JS side; `registry` only tracks delays.
pub(super) fn install_timers(engine: &QuickJsEngine, registry: Rc<TimerRegistry>) -> Result<()> {
    engine.with_context(|ctx| {
        let global = ctx.globals();
        let scheduler = Rc::clone(&registry);
        let schedule_fn = Function::new(ctx.clone(), move |delay_ms: f64, repeating: bool| {
            scheduler.set_script_timer(timer_delay(delay_ms), repeating)
        })?
        .with_name("__scorm_schedule_timer")?;
        global.set("__scorm_schedule_timer", schedule_fn)?;

        let cancel_fn = Function::new(ctx.clone(), move |id: f64| {
            if id.is_finite() && id >= 1.0 && id <= f64::from(u32::MAX) {
                registry.clear(id as u32);
            }
        })?
        .with_name("__scorm_cancel_timer")?;
        global.set("__scorm_cancel_timer", cancel_fn)?;
        ctx.eval::<(), _>(TIMER_BOOTSTRAP.as_bytes())
    })
}

/// Negative, non-finite and missing delays run as soon as possible.
fn timer_delay(delay_ms: f64) -> Duration {
    if delay_ms.is_finite() && delay_ms > 0.0 {
        Duration::from_millis(delay_ms as u64)
    } else {
        Duration::ZERO
    }
}

pub(super) fn invoke_timer(engine: &QuickJsEngine, id: u32) -> Result<()> {
    engine.eval(&format!("globalThis.__scorm_invoke_timer({id});"), "scorm-timer.js")
}

/// Forget listeners and pending callbacks left by the previous document.
pub(super) fn reset_document(engine: &QuickJsEngine) -> Result<()> {
    engine.eval(
        "globalThis.__scorm_clear_timers(); globalThis.__scorm_reset_document();",
        "scorm-document-reset.js",
    )
}

/// Move `document.readyState` forward and fire the matching events.
pub(super) fn set_ready_state(engine: &QuickJsEngine, state: &str) -> Result<()> {
    engine.eval(
        &format!("globalThis.__scorm_set_ready_state({});", quote(state)),
        "scorm-ready-state.js",
    )
}

pub(super) fn has_method(engine: &QuickJsEngine, target: MethodTarget, name: &str) -> bool {
    let script = format!(
        "(() => {{ const target = {}; return !!target && typeof target[{}] === 'function'; }})()",
        target.expression(),
        quote(name)
    );
    engine
        .eval_with::<bool>(&script, "scorm-has-method.js")
        .unwrap_or(false)
}

/// Call a method; a throw or a rejected returned promise is a failure.
pub(super) fn invoke_method(
    engine: &QuickJsEngine,
    target: MethodTarget,
    name: &str,
) -> Result<(), String> {
    let script = format!(
        r#"(() => {{
            globalThis.__scorm_call_rejected = false;
            const target = {};
            const result = target[{}]();
            if (result && typeof result.then === 'function') {{
                result.then(undefined, () => {{ globalThis.__scorm_call_rejected = true; }});
            }}
        }})()"#,
        target.expression(),
        quote(name)
    );
    engine
        .eval(&script, "scorm-invoke.js")
        .map_err(|err| err.to_string())?;
    let rejected = engine
        .eval_with::<bool>("globalThis.__scorm_call_rejected === true", "scorm-invoke-result.js")
        .map_err(|err| err.to_string())?;
    if rejected {
        return Err(format!("{name} was rejected"));
    }
    Ok(())
}

fn quote(name: &str) -> String {
    serde_json::Value::String(name.to_string()).to_string()
}

const DOCUMENT_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const noop = function () {};
    const report = (type, err) => {
        console.error(`${type} listener threw: ${(err && err.stack) || err}`);
    };

    const targets = [];
    const eventTarget = (target) => {
        const store = new Map();
        target.addEventListener = function (type, listener) {
            if (!listener) return;
            const list = store.get(type) || [];
            if (!list.includes(listener)) list.push(listener);
            store.set(type, list);
        };
        target.removeEventListener = function (type, listener) {
            const list = store.get(type);
            const index = list ? list.indexOf(listener) : -1;
            if (index >= 0) list.splice(index, 1);
        };
        target.dispatchEvent = function (event) {
            event.target = event.target || target;
            event.currentTarget = target;
            const handler = target['on' + event.type];
            const list = (store.get(event.type) || []).slice();
            if (typeof handler === 'function') list.push(handler);
            for (const listener of list) {
                try {
                    if (typeof listener === 'function') listener.call(target, event);
                    else if (typeof listener.handleEvent === 'function') listener.handleEvent(event);
                } catch (err) {
                    report(event.type, err);
                }
            }
            return !event.defaultPrevented;
        };
        target.__scorm_clear_listeners = () => {
            store.clear();
            target.onload = null;
            target.onreadystatechange = null;
        };
        targets.push(target);
        return target;
    };

    const event = (type) => ({
        type,
        bubbles: false,
        cancelable: false,
        defaultPrevented: false,
        preventDefault() { this.defaultPrevented = true; },
        stopPropagation: noop,
    });

    const element = (tagName) => eventTarget({ tagName, style: {} });

    const document = element('#document');
    document.readyState = 'complete';
    document.title = '';
    document.documentElement = element('HTML');
    document.body = element('BODY');
    document.defaultView = global;
    global.document = document;

    eventTarget(global);
    global.close = function () { global.__scorm_close(); };
    global.focus = noop;

    global.__scorm_reset_document = () => {
        for (const target of targets) target.__scorm_clear_listeners();
        document.readyState = 'loading';
    };

    global.__scorm_set_ready_state = (state) => {
        document.readyState = state;
        document.dispatchEvent(event('readystatechange'));
        if (state === 'interactive') {
            document.dispatchEvent(event('DOMContentLoaded'));
            global.dispatchEvent(event('DOMContentLoaded'));
        } else if (state === 'complete') {
            global.dispatchEvent(event('load'));
        }
    };

    global.__scorm_install_fullscreen = (request, exit) => {
        document.documentElement[request] = function () {
            global.__scorm_fullscreen(true);
            return Promise.resolve();
        };
        document[exit] = function () {
            global.__scorm_fullscreen(false);
            return Promise.resolve();
        };
    };
})();
"#;

const TIMER_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const timers = new Map();
    const schedule = (callback, delay, args, repeating) => {
        const id = global.__scorm_schedule_timer(Number(delay) || 0, repeating);
        timers.set(id, { callback, args, repeating });
        return id;
    };
    const cancel = (id) => {
        if (typeof id !== 'number') return;
        timers.delete(id);
        global.__scorm_cancel_timer(id);
    };

    global.setTimeout = (callback, delay, ...args) => schedule(callback, delay, args, false);
    global.setInterval = (callback, delay, ...args) => schedule(callback, delay, args, true);
    global.clearTimeout = cancel;
    global.clearInterval = cancel;

    global.__scorm_clear_timers = () => timers.clear();
    global.__scorm_invoke_timer = (id) => {
        const timer = timers.get(id);
        if (!timer) return;
        if (!timer.repeating) timers.delete(id);
        if (typeof timer.callback === 'function') {
            timer.callback.apply(global, timer.args);
        } else if (typeof timer.callback === 'string') {
            (0, eval)(timer.callback);
        }
    };
})();
"#;

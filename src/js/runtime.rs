use anyhow::{anyhow, Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};
use tracing::{debug, error, info, warn};

/// Upper bound on promise jobs drained after a single evaluation.
const JOB_BUDGET: usize = 1000;

/// QuickJS runtime and context owned by one execution context.
///
/// Nothing is shared between engines, so globals installed in one frame are
/// invisible to every other frame. `console.*` is routed to `tracing` at the
/// matching level, tagged with the engine's label.
pub struct QuickJsEngine {
    label: String,
    runtime: Runtime,
    context: Context,
}

impl QuickJsEngine {
    pub fn new(label: &str) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self {
            label: label.to_string(),
            runtime,
            context,
        };
        engine.install_console()?;
        Ok(engine)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate `source` and convert its completion value into `V`.
    ///
    /// Promise jobs queued by the script are drained before returning.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = tag_source(source, filename);
        let outcome = self.context.with(|ctx| match ctx.eval::<V, _>(script) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => Err(anyhow!(describe_exception(&ctx))),
            Err(err) => Err(anyhow::Error::from(err)),
        });
        self.execute_pending_jobs();
        outcome.with_context(|| format!("{filename} failed in {}", self.label))
    }

    /// Run queued promise jobs. Returns how many ran.
    pub fn execute_pending_jobs(&self) -> usize {
        let mut executed = 0;
        while executed < JOB_BUDGET && self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => executed += 1,
                Ok(false) => break,
                Err(job_error) => {
                    error!(target: "quickjs", engine = %self.label, error = ?job_error, "promise job threw");
                    break;
                }
            }
        }
        if executed == JOB_BUDGET {
            warn!(target: "quickjs", engine = %self.label, "job budget exhausted; leaving remaining jobs queued");
        } else if executed > 0 {
            debug!(target: "quickjs", engine = %self.label, executed, "drained promise jobs");
        }
        executed
    }

    /// Run `f` inside the engine's context, for installing bindings.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(f).map_err(anyhow::Error::from)
    }

    fn install_console(&self) -> Result<()> {
        let label = self.label.clone();
        self.with_context(move |ctx| {
            let sink = Function::new(ctx.clone(), move |level: String, message: String| {
                forward_console(&label, &level, &message);
            })?
            .with_name("__scorm_log")?;
            ctx.globals().set("__scorm_log", sink)?;
            ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
        })
    }
}

fn forward_console(label: &str, level: &str, message: &str) {
    match level {
        "error" => error!(target: "quickjs", engine = %label, "{message}"),
        "warn" => warn!(target: "quickjs", engine = %label, "{message}"),
        "debug" => debug!(target: "quickjs", engine = %label, "{message}"),
        _ => info!(target: "quickjs", engine = %label, "{message}"),
    }
}

/// Append a `sourceURL` pragma so exception stacks name the script.
fn tag_source(source: &str, filename: &str) -> Vec<u8> {
    let separator = if source.ends_with('\n') { "" } else { "\n" };
    format!("{source}{separator}//# sourceURL={filename}\n").into_bytes()
}

fn describe_exception(ctx: &Ctx<'_>) -> String {
    let exception: Value = ctx.catch();
    let Some(object) = exception.as_object() else {
        return format!("uncaught {exception:?}");
    };
    match (
        object.get::<_, String>("message"),
        object.get::<_, String>("stack"),
    ) {
        (Ok(message), Ok(stack)) if !stack.is_empty() => format!("{message}\n{stack}"),
        (Ok(message), _) => message,
        _ => format!("uncaught {exception:?}"),
    }
}

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const render = (value) => {
        if (typeof value === 'string') return value;
        try { return String(value); } catch (err) { return '[unprintable]'; }
    };
    const console = (typeof global.console === 'object' && global.console) || {};
    for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
        console[level] = function (...args) {
            try { global.__scorm_log(level, args.map(render).join(' ')); } catch (err) {}
        };
    }
    global.console = console;
})();
"#;

use kuchiki::NodeRef;
use tracing::{debug, error};
use url::Url;

use super::runtime::QuickJsEngine;
use super::script::{ScriptDescriptor, ScriptExecution, ScriptKind, ScriptSource};
use crate::content::{resolve_url, ContentLoader};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptExecutionSummary {
    pub executed_scripts: usize,
    pub failed_scripts: usize,
}

pub fn collect_scripts(document: &NodeRef) -> Vec<ScriptDescriptor> {
    let Ok(selector) = document.select("script") else {
        return Vec::new();
    };
    let mut collected = Vec::new();

    for (index, script) in selector.enumerate() {
        let attributes = script.attributes.borrow();
        let kind = classify_kind(attributes.get("type"));
        let execution = determine_execution(&attributes, kind);

        if let Some(src) = attributes
            .get("src")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            collected.push(ScriptDescriptor {
                index,
                kind,
                execution,
                source: ScriptSource::External {
                    src: src.to_string(),
                },
            });
            continue;
        }

        drop(attributes);
        let code = script.text_contents();
        if code.trim().is_empty() {
            continue;
        }
        collected.push(ScriptDescriptor::inline(index, code, kind));
    }

    collected
}

fn classify_kind(script_type: Option<&str>) -> ScriptKind {
    let Some(value) = script_type else {
        return ScriptKind::Classic;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "text/javascript" | "application/javascript" | "text/ecmascript"
        | "application/ecmascript" | "application/x-javascript" => ScriptKind::Classic,
        "module" => ScriptKind::Module,
        _ => ScriptKind::Unknown,
    }
}

fn determine_execution(attributes: &kuchiki::Attributes, kind: ScriptKind) -> ScriptExecution {
    // `async`/`defer` only apply to external scripts, as in browsers.
    let external = attributes.get("src").is_some();
    if external && attributes.get("async").is_some() {
        return ScriptExecution::Async;
    }
    if external && attributes.get("defer").is_some() {
        return ScriptExecution::Defer;
    }
    match kind {
        ScriptKind::Module => ScriptExecution::Defer,
        _ => ScriptExecution::Blocking,
    }
}

/// Blocking scripts first in document order, then async and deferred ones.
pub(super) fn execution_order(scripts: &[ScriptDescriptor]) -> Vec<&ScriptDescriptor> {
    let runnable = scripts.iter().filter(|descriptor| descriptor.is_runnable());
    let (mut ordered, later): (Vec<_>, Vec<_>) =
        runnable.partition(|descriptor| descriptor.execution == ScriptExecution::Blocking);
    ordered.extend(later);
    ordered
}

/// Run a document's scripts. Failures are logged and skipped so one broken
/// script never stops the rest of the content.
pub(super) fn run_scripts(
    engine: &QuickJsEngine,
    scripts: &[ScriptDescriptor],
    loader: &dyn ContentLoader,
    base: Option<&Url>,
) -> ScriptExecutionSummary {
    let mut summary = ScriptExecutionSummary::default();

    for descriptor in execution_order(scripts) {
        let filename = descriptor.filename();
        let source = match &descriptor.source {
            ScriptSource::Inline { code } => code.clone(),
            ScriptSource::External { src } => {
                match resolve_url(src, base).and_then(|url| loader.load(&url)) {
                    Ok(code) => code,
                    Err(err) => {
                        error!(target: "content", src = %src, error = %err, "failed to fetch external script");
                        summary.failed_scripts += 1;
                        continue;
                    }
                }
            }
        };

        match engine.eval(&source, &filename) {
            Ok(()) => summary.executed_scripts += 1,
            Err(err) => {
                error!(target: "quickjs", %filename, error = %err, "script execution failed");
                summary.failed_scripts += 1;
            }
        }
    }

    debug!(
        target: "quickjs",
        executed = summary.executed_scripts,
        failed = summary.failed_scripts,
        "document scripts finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuchiki::traits::*;

    fn parse(html: &str) -> NodeRef {
        kuchiki::parse_html().one(html)
    }

    #[test]
    fn collects_inline_and_external_scripts() {
        let document = parse(
            r#"<html><head>
                <script src="scormdriver.js"></script>
                <script>var loaded = true;</script>
                <script type="text/template"><p>{{ name }}</p></script>
                <script></script>
            </head></html>"#,
        );
        let scripts = collect_scripts(&document);
        assert_eq!(scripts.len(), 3);
        assert_eq!(
            scripts[0].source,
            ScriptSource::External {
                src: "scormdriver.js".into()
            }
        );
        assert_eq!(scripts[1].kind, ScriptKind::Classic);
        assert_eq!(scripts[2].kind, ScriptKind::Unknown);
    }

    #[test]
    fn deferred_scripts_run_after_blocking_ones() {
        let document = parse(
            r#"<script defer src="late.js"></script>
               <script>var first = 1;</script>
               <script type="module">import x from './x.js';</script>
               <script>var second = 2;</script>"#,
        );
        let scripts = collect_scripts(&document);
        let order: Vec<usize> = execution_order(&scripts).iter().map(|s| s.index).collect();
        assert_eq!(order, vec![1, 3, 0]);
    }

    #[test]
    fn runs_scripts_and_skips_failures() {
        let engine = QuickJsEngine::new("processor-test").unwrap();
        let document = parse(
            r#"<script>var total = 1;</script>
               <script>throw new Error('broken content');</script>
               <script src="missing.js"></script>
               <script>total += 41;</script>"#,
        );
        let scripts = collect_scripts(&document);
        let loader = crate::content::StaticContentLoader::new();
        let base = Url::parse("https://lms.example/pkg/index.html").unwrap();
        let summary = run_scripts(&engine, &scripts, &loader, Some(&base));
        assert_eq!(summary.executed_scripts, 2);
        assert_eq!(summary.failed_scripts, 2);
        let total: i32 = engine.eval_with("total", "read.js").unwrap();
        assert_eq!(total, 42);
    }
}

/// When a content script runs relative to the rest of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptExecution {
    /// Classic scripts run in document order as the document is written.
    #[default]
    Blocking,
    /// `async` scripts; run after the blocking pass.
    Async,
    /// `defer` scripts and modules; run after the blocking pass, in order.
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptKind {
    #[default]
    Classic,
    Module,
    /// Data blocks and templates (`type="text/template"` and friends).
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline { code: String },
    External { src: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub index: usize,
    pub kind: ScriptKind,
    pub execution: ScriptExecution,
    pub source: ScriptSource,
}

impl ScriptDescriptor {
    pub fn inline(index: usize, code: String, kind: ScriptKind) -> Self {
        Self {
            index,
            kind,
            execution: ScriptExecution::Blocking,
            source: ScriptSource::Inline { code },
        }
    }

    /// Name reported in stack traces and logs.
    pub fn filename(&self) -> String {
        match &self.source {
            ScriptSource::Inline { .. } => format!("inline-script-{}.js", self.index),
            ScriptSource::External { src } => src.clone(),
        }
    }

    /// Only classic scripts are evaluated; QuickJS module loading is not wired up.
    pub fn is_runnable(&self) -> bool {
        self.kind == ScriptKind::Classic
    }
}

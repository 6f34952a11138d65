//! SCORM runtime API surfaces.
//!
//! Both dialects share one implementation; they only differ in the method
//! names content calls. Lifecycle and error methods are deliberately trivial:
//! the host models no error taxonomy.

use std::sync::Arc;

use crate::bridge::ElementBridge;
use crate::config::SessionConfig;

/// Global name SCORM 1.2 content looks for.
pub const LEGACY_GLOBAL: &str = "API";
/// Global name SCORM 2004 content looks for.
pub const CURRENT_GLOBAL: &str = "API_1484_11";

pub const SUCCESS: &str = "true";
pub const NO_ERROR: &str = "0";
pub const ERROR_STRING_PLACEHOLDER: &str = "Some Error";
pub const DIAGNOSTIC_PLACEHOLDER: &str = "Some Diagnostic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SCORM 1.2 (`LMSInitialize`, `LMSGetValue`, ...).
    Legacy,
    /// SCORM 2004 (`Initialize`, `GetValue`, ...).
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Initialize,
    Finish,
    GetValue,
    SetValue,
    Commit,
    GetLastError,
    GetErrorString,
    GetDiagnostic,
}

const LEGACY_METHODS: &[(&str, ApiMethod)] = &[
    ("LMSInitialize", ApiMethod::Initialize),
    ("LMSFinish", ApiMethod::Finish),
    ("LMSGetValue", ApiMethod::GetValue),
    ("LMSSetValue", ApiMethod::SetValue),
    ("LMSCommit", ApiMethod::Commit),
    ("LMSGetLastError", ApiMethod::GetLastError),
    ("LMSGetErrorString", ApiMethod::GetErrorString),
    ("LMSGetDiagnostic", ApiMethod::GetDiagnostic),
];

const CURRENT_METHODS: &[(&str, ApiMethod)] = &[
    ("Initialize", ApiMethod::Initialize),
    ("Terminate", ApiMethod::Finish),
    ("GetValue", ApiMethod::GetValue),
    ("SetValue", ApiMethod::SetValue),
    ("Commit", ApiMethod::Commit),
    ("GetLastError", ApiMethod::GetLastError),
    ("GetErrorString", ApiMethod::GetErrorString),
    ("GetDiagnostic", ApiMethod::GetDiagnostic),
];

impl Dialect {
    /// Method names content calls, paired with the operation they map to.
    pub fn methods(self) -> &'static [(&'static str, ApiMethod)] {
        match self {
            Self::Legacy => LEGACY_METHODS,
            Self::Current => CURRENT_METHODS,
        }
    }

    pub fn resolve(self, name: &str) -> Option<ApiMethod> {
        self.methods()
            .iter()
            .find(|(method_name, _)| *method_name == name)
            .map(|(_, method)| *method)
    }
}

/// One API instance, created per execution context load.
pub struct RuntimeApi {
    dialect: Dialect,
    bridge: Arc<ElementBridge>,
}

impl RuntimeApi {
    pub fn new(dialect: Dialect, bridge: Arc<ElementBridge>) -> Self {
        Self { dialect, bridge }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn initialize(&self) -> String {
        SUCCESS.to_string()
    }

    /// `LMSFinish` / `Terminate`.
    pub fn finish(&self) -> String {
        SUCCESS.to_string()
    }

    pub fn commit(&self) -> String {
        SUCCESS.to_string()
    }

    pub fn get_value(&self, element: &str) -> String {
        self.bridge.read(element)
    }

    pub fn set_value(&self, element: &str, value: &str) -> String {
        self.bridge.write(element, value);
        SUCCESS.to_string()
    }

    pub fn get_last_error(&self) -> String {
        NO_ERROR.to_string()
    }

    pub fn get_error_string(&self, _code: &str) -> String {
        ERROR_STRING_PLACEHOLDER.to_string()
    }

    pub fn get_diagnostic(&self, _code: &str) -> String {
        DIAGNOSTIC_PLACEHOLDER.to_string()
    }

    /// Dispatch a call coming from content. Missing arguments read as empty
    /// strings; extra arguments are ignored.
    pub fn call(&self, method: ApiMethod, args: &[String]) -> String {
        let arg = |index: usize| args.get(index).map(String::as_str).unwrap_or("");
        match method {
            ApiMethod::Initialize => self.initialize(),
            ApiMethod::Finish => self.finish(),
            ApiMethod::GetValue => self.get_value(arg(0)),
            ApiMethod::SetValue => self.set_value(arg(0), arg(1)),
            ApiMethod::Commit => self.commit(),
            ApiMethod::GetLastError => self.get_last_error(),
            ApiMethod::GetErrorString => self.get_error_string(arg(0)),
            ApiMethod::GetDiagnostic => self.get_diagnostic(arg(0)),
        }
    }
}

/// Build the API instance matching the session's content version.
pub fn api_for(config: &SessionConfig, bridge: Arc<ElementBridge>) -> RuntimeApi {
    RuntimeApi::new(config.content_version.dialect(), bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::RecordingTransport;
    use crate::config::ContentVersion;

    fn instance(version: &str) -> (RuntimeApi, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let (bridge, _updates) = ElementBridge::new(transport.clone());
        let config = SessionConfig {
            content_version: ContentVersion::parse(version),
            ..SessionConfig::default()
        };
        (api_for(&config, Arc::new(bridge)), transport)
    }

    #[test]
    fn factory_selects_dialect_from_version() {
        assert_eq!(instance("1.2").0.dialect(), Dialect::Legacy);
        for version in ["CAM 1.3", "2004 3rd Edition", "2004 4th Edition", "", "bogus"] {
            assert_eq!(instance(version).0.dialect(), Dialect::Current, "{version}");
        }
    }

    #[test]
    fn lifecycle_calls_always_succeed() {
        for dialect in [Dialect::Legacy, Dialect::Current] {
            let (api, _) = instance(if dialect == Dialect::Legacy { "1.2" } else { "x" });
            for (name, method) in dialect.methods() {
                if matches!(
                    method,
                    ApiMethod::Initialize | ApiMethod::Finish | ApiMethod::Commit
                ) {
                    assert_eq!(api.call(*method, &[]), SUCCESS, "{name}");
                    assert_eq!(api.call(*method, &["junk".into()]), SUCCESS, "{name}");
                }
            }
            // Order does not matter: finish before initialize still succeeds.
            assert_eq!(api.finish(), SUCCESS);
            assert_eq!(api.commit(), SUCCESS);
            assert_eq!(api.initialize(), SUCCESS);
            assert_eq!(api.initialize(), SUCCESS);
        }
    }

    #[test]
    fn error_methods_are_fixed() {
        let (api, _) = instance("1.2");
        assert_eq!(api.get_last_error(), NO_ERROR);
        for code in ["0", "101", "-1", "99999", "", "not a number"] {
            assert_eq!(api.get_error_string(code), ERROR_STRING_PLACEHOLDER);
            assert_eq!(api.get_diagnostic(code), DIAGNOSTIC_PLACEHOLDER);
        }
        assert_eq!(api.call(ApiMethod::GetErrorString, &[]), ERROR_STRING_PLACEHOLDER);
    }

    #[test]
    fn dialect_names_resolve_to_shared_operations() {
        assert_eq!(Dialect::Legacy.resolve("LMSFinish"), Some(ApiMethod::Finish));
        assert_eq!(Dialect::Current.resolve("Terminate"), Some(ApiMethod::Finish));
        assert_eq!(Dialect::Current.resolve("LMSFinish"), None);
        assert_eq!(Dialect::Legacy.methods().len(), Dialect::Current.methods().len());
    }

    #[test]
    fn values_flow_through_the_bridge() {
        let (api, transport) = instance("2004 4th Edition");
        transport.set_stored("cmi.location", "page-3");
        assert_eq!(api.call(ApiMethod::GetValue, &["cmi.location".into()]), "page-3");
        assert_eq!(api.get_value("cmi.suspend_data"), "");
        assert_eq!(
            api.call(
                ApiMethod::SetValue,
                &["cmi.completion_status".into(), "completed".into()]
            ),
            SUCCESS
        );
        assert_eq!(
            transport.writes(),
            vec![("cmi.completion_status".to_string(), "completed".to_string())]
        );
    }
}

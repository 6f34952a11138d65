//! Moves single data-model element values between content and the backend.
//!
//! Reads block the calling execution context until the backend answers.
//! Writes are fire-and-forget: their completion is posted as a
//! [`ScoreUpdate`] that the host thread applies to the page. Transport
//! failures are absorbed (reads yield `""`, writes are dropped) and only
//! reported through `tracing`.

mod transport;

pub use transport::{ElementTransport, HttpTransport, TransportError, WriteCallback};

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Score/status the backend reported after a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub lesson_score: Option<String>,
    pub completion_status: Option<String>,
}

impl ScoreUpdate {
    pub fn is_empty(&self) -> bool {
        self.lesson_score.is_none() && self.completion_status.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    lesson_score: Option<JsonValue>,
    #[serde(default)]
    completion_status: Option<JsonValue>,
}

pub struct ElementBridge {
    transport: Arc<dyn ElementTransport>,
    updates: UnboundedSender<ScoreUpdate>,
}

impl ElementBridge {
    pub fn new(transport: Arc<dyn ElementTransport>) -> (Self, UnboundedReceiver<ScoreUpdate>) {
        let (updates, receiver) = unbounded_channel();
        (Self { transport, updates }, receiver)
    }

    /// Blocking read. Missing values and transport errors both read as `""`.
    pub fn read(&self, element: &str) -> String {
        match self.transport.fetch_value(element) {
            Ok(body) => decode_read_body(&body),
            Err(err) => {
                warn!(target: "element_bridge", element, error = %err, "read failed; returning empty value");
                String::new()
            }
        }
    }

    /// Non-blocking write. Returns as soon as the request is issued.
    pub fn write(&self, element: &str, value: &str) {
        let updates = self.updates.clone();
        let element_owned = element.to_string();
        self.transport.store_value(
            element,
            value,
            Box::new(move |result| match result {
                Ok(body) => {
                    let update = decode_write_body(&body);
                    if update.is_empty() {
                        return;
                    }
                    if updates.send(update).is_err() {
                        debug!(target: "element_bridge", element = %element_owned, "host page gone; dropping update");
                    }
                }
                Err(err) => {
                    warn!(target: "element_bridge", element = %element_owned, error = %err, "write dropped");
                }
            }),
        );
    }
}

/// Accept either a JSON object carrying `value` or a bare value body.
pub fn decode_read_body(body: &str) -> String {
    match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => map.get("value").map(json_to_text).unwrap_or_default(),
        _ => body.to_string(),
    }
}

pub fn decode_write_body(body: &str) -> ScoreUpdate {
    match serde_json::from_str::<WriteResponse>(body) {
        Ok(response) => ScoreUpdate {
            lesson_score: response.lesson_score.as_ref().and_then(present_text),
            completion_status: response.completion_status.as_ref().and_then(present_text),
        },
        Err(err) => {
            debug!(target: "element_bridge", error = %err, "write response carried no update");
            ScoreUpdate::default()
        }
    }
}

fn present_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        other => Some(json_to_text(other)),
    }
}

/// Render a JSON scalar the way JavaScript's `String(value)` would.
pub fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => text.clone(),
        JsonValue::Bool(flag) => flag.to_string(),
        JsonValue::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else if let Some(uint) = number.as_u64() {
                uint.to_string()
            } else {
                js_number_text(number.as_f64().unwrap_or_default())
            }
        }
        other => other.to_string(),
    }
}

/// `Number.prototype.toString()` for a double: plain decimals between 1e-6
/// and 1e21, exponent notation with an explicit sign outside that range.
pub fn js_number_text(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if number == 0.0 {
        return "0".to_string();
    }
    if (1e-6..1e21).contains(&number.abs()) {
        return number.to_string();
    }
    let formatted = format!("{number:e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
        _ => formatted,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    #[test]
    fn decodes_structured_and_bare_read_bodies() {
        assert_eq!(decode_read_body(r#"{"value": "incomplete"}"#), "incomplete");
        assert_eq!(decode_read_body(r#"{"value": 85.0}"#), "85");
        assert_eq!(decode_read_body(r#"{"value": 0.5}"#), "0.5");
        assert_eq!(decode_read_body(r#"{"value": null}"#), "");
        assert_eq!(decode_read_body(r#"{"result": "ok"}"#), "");
        assert_eq!(decode_read_body("passed"), "passed");
        assert_eq!(decode_read_body("42"), "42");
        assert_eq!(decode_read_body(""), "");
    }

    #[test]
    fn decodes_write_responses() {
        let update = decode_write_body(
            r#"{"result": "success", "lesson_score": 0.75, "completion_status": "passed"}"#,
        );
        assert_eq!(update.lesson_score.as_deref(), Some("0.75"));
        assert_eq!(update.completion_status.as_deref(), Some("passed"));

        let status_only = decode_write_body(r#"{"completion_status": "incomplete"}"#);
        assert_eq!(status_only.lesson_score, None);
        assert_eq!(status_only.completion_status.as_deref(), Some("incomplete"));

        assert!(decode_write_body("<html>oops</html>").is_empty());
    }

    #[test]
    fn numbers_render_like_javascript() {
        assert_eq!(js_number_text(0.85), "0.85");
        assert_eq!(js_number_text(85.0), "85");
        assert_eq!(js_number_text(-0.0), "0");
        assert_eq!(js_number_text(0.000001), "0.000001");
        assert_eq!(js_number_text(1e-7), "1e-7");
        assert_eq!(js_number_text(2.5e-8), "2.5e-8");
        assert_eq!(js_number_text(123456789012345680000.0), "123456789012345680000");
        assert_eq!(js_number_text(1e21), "1e+21");
        assert_eq!(js_number_text(-1.5e300), "-1.5e+300");
        assert_eq!(js_number_text(f64::NAN), "NaN");
        assert_eq!(js_number_text(f64::NEG_INFINITY), "-Infinity");

        let update = decode_write_body(r#"{"lesson_score": 1e-7, "completion_status": 2e21}"#);
        assert_eq!(update.lesson_score.as_deref(), Some("1e-7"));
        assert_eq!(update.completion_status.as_deref(), Some("2e+21"));
    }

    #[test]
    fn missing_value_reads_empty() {
        let transport = Arc::new(RecordingTransport::default());
        let (bridge, _rx) = ElementBridge::new(transport);
        assert_eq!(bridge.read("cmi.core.lesson_location"), "");
    }

    #[test]
    fn transport_failures_are_absorbed() {
        let transport = Arc::new(RecordingTransport::default());
        transport.set_stored("cmi.core.lesson_status", "completed");
        transport.fail();
        let (bridge, mut rx) = ElementBridge::new(transport.clone());

        assert_eq!(bridge.read("cmi.core.lesson_status"), "");
        bridge.write("cmi.core.lesson_status", "passed");
        assert_eq!(transport.writes().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn write_completion_posts_update() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond_to_writes_with(r#"{"lesson_score": 1, "completion_status": "completed"}"#);
        let (bridge, mut rx) = ElementBridge::new(transport);

        bridge.write("cmi.core.score.raw", "100");
        let update = rx.try_recv().unwrap();
        assert_eq!(update.lesson_score.as_deref(), Some("1"));
        assert_eq!(update.completion_status.as_deref(), Some("completed"));
    }

    #[test]
    fn write_without_update_fields_posts_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let (bridge, mut rx) = ElementBridge::new(transport);
        bridge.write("cmi.suspend_data", "abc");
        assert!(rx.try_recv().is_err());
    }
}

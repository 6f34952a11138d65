/// End-to-end: content running in an inline frame talks to a mock block
/// backend over HTTP.
///
/// The backend runs on its own tokio runtime; the test thread plays the host
/// page thread and never enters that runtime, so blocking reads work.
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use scorm_bridge::config::{HandlerEndpoints, SessionConfig};
use scorm_bridge::content::ContentLoader;
use scorm_bridge::host::{COMPLETION_STATUS, LESSON_SCORE};
use scorm_bridge::{
    BridgeConfig, ContentVersion, DisplayController, DisplayMode, ElementTransport, HeadlessOpener,
    HostPage, HttpTransport, StaticContentLoader,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use url::Url;

const CONTENT_URL: &str = "https://lms.example/scorm/fire-safety/index.html";

const HOST_BLOCK: &str = r#"<div class="scorm_block">
    <div class="scorm_window"></div>
    <span class="lesson_score">0</span>
    <span class="completion_status">not attempted</span>
</div>"#;

const CONTENT: &str = r#"<html><head><script>
    var win = window;
    while (!win.API && win.parent && win.parent !== win) { win = win.parent; }
    var api = win.API;
    var started = api.LMSInitialize('');
    var learner = api.LMSGetValue('cmi.core.student_name');
    var suspended = api.LMSGetValue('cmi.suspend_data');
    var broken = api.LMSGetValue('cmi.broken');
    var stored = api.LMSSetValue('cmi.core.score.raw', 85);
</script></head><body>unit</body></html>"#;

#[derive(Clone, Default)]
struct Backend {
    values: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<Vec<(String, String)>>>,
}

#[derive(Deserialize)]
struct GetValueRequest {
    name: String,
}

#[derive(Deserialize)]
struct SetValueRequest {
    name: String,
    value: String,
}

async fn get_value(
    State(backend): State<Backend>,
    Json(request): Json<GetValueRequest>,
) -> Result<Json<Value>, StatusCode> {
    if request.name == "cmi.broken" {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let values = backend.values.lock().unwrap();
    Ok(match values.get(&request.name) {
        Some(value) => Json(json!({ "value": value })),
        None => Json(json!({})),
    })
}

async fn set_value(
    State(backend): State<Backend>,
    Json(request): Json<SetValueRequest>,
) -> Json<Value> {
    backend
        .writes
        .lock()
        .unwrap()
        .push((request.name.clone(), request.value.clone()));
    let mut values = backend.values.lock().unwrap();
    values.insert(request.name.clone(), request.value.clone());

    if request.name == "cmi.core.lesson_status" {
        return Json(json!({ "result": "success", "completion_status": request.value }));
    }
    if request.name == "cmi.core.score.raw" {
        let raw: f64 = request.value.parse().unwrap_or(0.0);
        return Json(json!({
            "result": "success",
            "lesson_score": raw / 100.0,
            "completion_status": "incomplete",
        }));
    }
    Json(json!({ "result": "success" }))
}

struct MockBackend {
    runtime: Runtime,
    backend: Backend,
    base: Url,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let backend = Backend::default();
        backend
            .values
            .lock()
            .unwrap()
            .insert("cmi.core.student_name".into(), "Ada Lovelace".into());

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new()
            .route("/handler/block/scorm_get_value", post(get_value))
            .route("/handler/block/scorm_set_value", post(set_value))
            .with_state(backend.clone());
        runtime.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        let base = Url::parse(&format!("http://{addr}/handler/block/")).unwrap();
        Self {
            runtime,
            backend,
            base,
            shutdown: Some(shutdown_tx),
        }
    }

    fn transport(&self, timeout: Option<Duration>) -> HttpTransport {
        let endpoints = HandlerEndpoints::from_base(&self.base).unwrap();
        HttpTransport::new(&endpoints, self.runtime.handle().clone(), timeout).unwrap()
    }

    fn writes(&self) -> Vec<(String, String)> {
        self.backend.writes.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn pump_until<O, F>(controller: &mut DisplayController<O>, mut done: F)
where
    O: scorm_bridge::popup::WindowOpener,
    F: FnMut(&HostPage) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        controller.pump();
        if done(controller.host()) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("host page never reached the expected state:\n{}", controller.host().to_html());
}

#[test]
fn http_transport_reads_and_writes() {
    let backend = MockBackend::start();
    let transport = backend.transport(Some(Duration::from_secs(5)));

    let body = transport.fetch_value("cmi.core.student_name").unwrap();
    assert_eq!(body, r#"{"value":"Ada Lovelace"}"#);
    assert!(transport.fetch_value("cmi.broken").is_err());

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    transport.store_value(
        "cmi.core.lesson_status",
        "passed",
        Box::new(move |result| {
            done_tx.send(result.map_err(|err| err.to_string())).unwrap();
        }),
    );
    let body = done_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert!(body.contains(r#""completion_status":"passed""#));
    assert_eq!(
        backend.writes(),
        vec![("cmi.core.lesson_status".to_string(), "passed".to_string())]
    );
}

#[test]
fn inline_content_round_trips_through_the_backend() {
    let backend = MockBackend::start();
    let session = SessionConfig {
        content_version: ContentVersion::parse("SCORM_12"),
        content_url: "/scorm/fire-safety/index.html".into(),
        ..SessionConfig::default()
    };
    let mut config = BridgeConfig::new(session, HandlerEndpoints::from_base(&backend.base).unwrap());
    config.site_url = Some(Url::parse("https://lms.example/").unwrap());

    let loader: Rc<dyn ContentLoader> =
        Rc::new(StaticContentLoader::new().with_page(CONTENT_URL, CONTENT));
    let transport: Arc<dyn ElementTransport> = Arc::new(backend.transport(None));
    let opener = HeadlessOpener::new(Rc::clone(&loader), config.engine);
    let mut controller =
        DisplayController::new(&config, HostPage::parse(HOST_BLOCK), transport, loader, opener);

    assert_eq!(controller.load().unwrap(), DisplayMode::Inline);
    let content = controller
        .inline_frame()
        .and_then(|frame| frame.frame(0))
        .expect("content frame");
    assert_eq!(content.url().unwrap().as_str(), CONTENT_URL);

    let read = |expr: &str| -> String { content.eval_with(expr, "read.js").unwrap() };
    assert_eq!(read("started"), "true");
    assert_eq!(read("learner"), "Ada Lovelace");
    assert_eq!(read("suspended"), "");
    assert_eq!(read("broken"), "");
    assert_eq!(read("stored"), "true");

    pump_until(&mut controller, |host| {
        host.text(LESSON_SCORE).as_deref() == Some("0.85")
    });
    assert_eq!(controller.host().text(COMPLETION_STATUS).as_deref(), Some("incomplete"));

    content
        .eval("api.LMSSetValue('cmi.core.lesson_status', 'completed')", "status.js")
        .unwrap();
    pump_until(&mut controller, |host| {
        host.text(COMPLETION_STATUS).as_deref() == Some("completed")
    });
    assert_eq!(controller.host().text(LESSON_SCORE).as_deref(), Some("0.85"));

    assert_eq!(
        backend.writes(),
        vec![
            ("cmi.core.score.raw".to_string(), "85".to_string()),
            ("cmi.core.lesson_status".to_string(), "completed".to_string()),
        ]
    );
}

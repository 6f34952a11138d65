use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use scorm_bridge::content::ContentLoader;
use scorm_bridge::{
    BridgeConfig, DisplayController, HeadlessOpener, HostPage, HttpTransport,
    NetworkContentLoader, UserAction,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Host block used when the configuration does not supply one.
const DEFAULT_HOST_PAGE: &str = r#"<div class="scorm_block">
  <div class="scorm_window"><button class="scorm_launch">Launch</button></div>
  <button class="scorm_show">Open here</button>
  <p class="scorm_popup_warning" style="display: none">The unit opened in a new window.</p>
  <p>Score: <span class="lesson_score"></span></p>
  <p>Status: <span class="completion_status"></span></p>
</div>"#;

const DEFAULT_SETTLE_MS: u64 = 2000;

fn main() -> anyhow::Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: scorm-bridge <config.yaml> [scorm_launch|scorm_show]...")?;
    let actions: Vec<String> = args.collect();

    let config = BridgeConfig::load(&config_path).unwrap_or_else(|err| {
        eprintln!("Failed to load {}: {err}", config_path.display());
        std::process::exit(1);
    });
    let settle = std::env::var("SCORM_BRIDGE_SETTLE_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(DEFAULT_SETTLE_MS));

    // Writes complete on this runtime. The main thread stays outside it so
    // blocking reads can run here.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let transport = Arc::new(HttpTransport::new(
        &config.handlers,
        rt.handle().clone(),
        config.write_timeout,
    )?);
    let loader: Rc<dyn ContentLoader> = Rc::new(NetworkContentLoader::new()?);
    let host = HostPage::parse(config.host_page.as_deref().unwrap_or(DEFAULT_HOST_PAGE));
    let opener = HeadlessOpener::new(Rc::clone(&loader), config.engine);
    let mut controller = DisplayController::new(&config, host, transport, loader, opener);

    let mode = controller.load()?;
    info!(?mode, engine = ?config.engine, version = %config.session.content_version, "unit loaded");

    for action in &actions {
        let Some(action) = UserAction::from_class(action) else {
            warn!(%action, "unknown action; skipping");
            continue;
        };
        match controller.dispatch(action) {
            Ok(mode) => info!(?action, ?mode, "action applied"),
            Err(err) => warn!(?action, error = %err, "action refused"),
        }
    }

    let applied = controller.pump_for(settle);
    info!(applied, "score updates applied");
    println!("{}", controller.host().to_html());

    drop(controller);
    rt.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

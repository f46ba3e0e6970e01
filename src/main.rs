use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scribed::audio::AudioRecorder;
use scribed::config::Config;
use scribed::server::{create_router, AppState, ControlHooks, Hub};
use scribed::session::{self, Detector, Manager, SessionError};
use scribed::storage::{LoggedStore, SqliteStore, TranscriptLog};
use scribed::summary::{ClientFactory, Summarizer};
use scribed::llm;

/// Bound on the durable work of the shutdown force-end; the summary task
/// it spawns is detached and unaffected.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Paused flag shared between the HTTP control surface and whatever owns
/// the capture stream.
#[derive(Default)]
struct PauseState {
    paused: RwLock<bool>,
}

impl PauseState {
    fn set(&self, paused: bool) {
        *self
            .paused
            .write()
            .unwrap_or_else(PoisonError::into_inner) = paused;
    }

    fn get(&self) -> bool {
        *self.paused.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("scribed starting");

    let config_path =
        std::env::var("SCRIBED_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let (config, warnings) = Config::load(&config_path)?;
    for warning in &warnings {
        warn!("{warning}");
    }

    let store = Arc::new(SqliteStore::open(&config.db_path).context("storage init")?);
    let hub = Arc::new(Hub::new());
    let detector = Arc::new(Detector::new(config.silence_timeout()));

    let recorder = AudioRecorder::new(&config.audio_dir);
    let sample_rate = config
        .sample_rate_candidates()
        .into_iter()
        .next()
        .unwrap_or(16000);
    recorder.set_sample_rate(sample_rate);

    let summarizer = build_summarizer(&config);
    if summarizer.is_none() {
        warn!("summarization disabled: no usable model/API key configuration");
    }

    // The database is authoritative; the markdown mirror is optional.
    let session_store: Arc<dyn session::Store> = if config.transcript_dir.is_empty() {
        Arc::clone(&store) as Arc<dyn session::Store>
    } else {
        Arc::new(LoggedStore::new(
            Arc::clone(&store),
            Arc::new(TranscriptLog::new(&config.transcript_dir)),
        ))
    };

    let manager = Manager::new(
        session_store,
        Some(Arc::clone(&recorder) as Arc<dyn session::Recorder>),
        summarizer,
        Some(Arc::clone(&hub) as Arc<dyn session::EventBroadcaster>),
        Arc::clone(&detector),
    );

    let pause_state = Arc::new(PauseState::default());

    let controls = ControlHooks {
        pause: Some({
            let pause_state = Arc::clone(&pause_state);
            Arc::new(move || pause_state.set(true))
        }),
        resume: Some({
            let pause_state = Arc::clone(&pause_state);
            Arc::new(move || pause_state.set(false))
        }),
        is_paused: Some({
            let pause_state = Arc::clone(&pause_state);
            Arc::new(move || pause_state.get())
        }),
        warnings: Some({
            let warnings = warnings.clone();
            Arc::new(move || warnings.clone())
        }),
        presets: Some({
            let descriptions: BTreeMap<String, String> = config
                .summarization
                .presets
                .iter()
                .map(|(name, preset)| (name.clone(), preset.description.clone()))
                .collect();
            Arc::new(move || descriptions.clone())
        }),
        end_session: Some({
            let manager = Arc::clone(&manager);
            Arc::new(move || {
                let manager = Arc::clone(&manager);
                async move { manager.force_end_session().await }.boxed()
            })
        }),
        resummarize: Some({
            let manager = Arc::clone(&manager);
            Arc::new(move |session_id: String, preset: String| {
                let manager = Arc::clone(&manager);
                async move { manager.resummarize(&session_id, &preset).await }.boxed()
            })
        }),
    };

    let app = create_router(AppState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
        controls,
    });

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("bind {}", config.http_addr))?;
    info!("web API on http://{}", config.http_addr);

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    info!("scribed shutting down");

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.force_end_session()).await {
        Ok(Ok(())) | Ok(Err(SessionError::NoActiveSession)) => {}
        Ok(Err(err)) => warn!("force end session failed: {err:#}"),
        Err(_) => warn!("force end session timed out"),
    }

    server.abort();
    Ok(())
}

fn build_summarizer(config: &Config) -> Option<Arc<dyn session::Summarizer>> {
    if config.summarization.presets.is_empty() {
        return None;
    }

    let (provider, _) = match llm::parse_model(&config.summarization.model) {
        Ok(parts) => parts,
        Err(err) => {
            warn!("invalid summarization model: {err}");
            return None;
        }
    };
    if config.llm_api_key(provider).is_empty() {
        return None;
    }

    let cfg = config.clone();
    let factory: ClientFactory = Arc::new(move |provider, model| {
        let api_key = cfg.llm_api_key(provider);
        anyhow::ensure!(
            !api_key.is_empty(),
            "no API key configured for provider {provider:?}"
        );
        let base_url = (provider == "openai" && !cfg.summarization.base_url.is_empty())
            .then_some(cfg.summarization.base_url.as_str());
        llm::new_client(provider, api_key, model, base_url)
    });

    Some(Arc::new(Summarizer::new(
        config.summarization.clone(),
        factory,
    )))
}

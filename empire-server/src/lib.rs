//! empire-server library
//!
//! Growth engines (forum, viral challenges, newsletter, UGC video), API key
//! management and the boot/maintenance services, served over HTTP.

use axum::Router;
use chrono::{DateTime, Utc};
use empire_common::config::{EmpireConfig, EngineToggles};
use empire_common::engine::{Engine, EngineHost, JobScheduler, PeriodicJob};
use empire_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod api_keys;
pub mod db;
pub mod engines;
pub mod error;
pub mod mailer;
pub mod system;

use api_keys::{ApiKeyStore, KeyCipher};
use engines::{ChallengeEngine, ForumEngine, NewsletterEngine, UgcVideoEngine};
use mailer::Mailer;
use system::{BootEnvironment, BootSequence, PerformanceOptimizer};

const EVENT_BUS_CAPACITY: usize = 1000;
const OPTIMIZE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: EventBus,
    pub scheduler: JobScheduler,
    pub forum: Arc<ForumEngine>,
    pub challenges: Arc<ChallengeEngine>,
    pub newsletter: Arc<NewsletterEngine>,
    pub videos: Arc<UgcVideoEngine>,
    pub api_keys: Arc<ApiKeyStore>,
    /// Hosts of the enabled engines
    pub engines: Arc<Vec<Arc<EngineHost>>>,
    pub boot: Arc<BootSequence>,
    pub optimizer: Arc<PerformanceOptimizer>,
    pub toggles: EngineToggles,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire engines, hosts and system services around an open pool
    ///
    /// Nothing is initialized here; run [`BootSequence::run`] on `boot` to
    /// verify the schema, seed and start the enabled engines.
    pub fn new(config: &EmpireConfig, db: SqlitePool, mailer: Arc<dyn Mailer>) -> Self {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let scheduler = JobScheduler::new(events.clone());

        let forum = Arc::new(ForumEngine::new(db.clone(), events.clone()));
        let challenges = Arc::new(ChallengeEngine::new(db.clone(), events.clone(), &config.base_url));
        let newsletter = Arc::new(NewsletterEngine::new(
            db.clone(),
            events.clone(),
            mailer,
            &config.base_url,
        ));
        let videos = Arc::new(UgcVideoEngine::new(db.clone(), events.clone(), &config.base_url));

        let toggles = config.engines.clone();
        let candidates: [(bool, Arc<dyn Engine>); 4] = [
            (toggles.forum, forum.clone() as Arc<dyn Engine>),
            (toggles.challenges, challenges.clone() as Arc<dyn Engine>),
            (toggles.newsletter, newsletter.clone() as Arc<dyn Engine>),
            (toggles.ugc_video, videos.clone() as Arc<dyn Engine>),
        ];
        let engines: Vec<Arc<EngineHost>> = candidates
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, engine)| {
                Arc::new(EngineHost::new(engine, db.clone(), scheduler.clone(), events.clone()))
            })
            .collect();

        let cipher = match &config.encryption_secret {
            Some(secret) => KeyCipher::from_secret(secret),
            None => KeyCipher::ephemeral(),
        };
        let api_keys = Arc::new(ApiKeyStore::new(db.clone(), cipher));

        let optimizer = Arc::new(PerformanceOptimizer::new(db.clone()));
        let boot = Arc::new(
            BootSequence::new(
                db.clone(),
                optimizer.clone(),
                BootEnvironment::detect(config.encryption_secret.is_some()),
                events.clone(),
            )
            .with_engines(engines.clone(), toggles.run_jobs)
            .with_tables(crate::db::all_table_names()),
        );

        Self {
            db,
            events,
            scheduler,
            forum,
            challenges,
            newsletter,
            videos,
            api_keys,
            engines: Arc::new(engines),
            boot,
            optimizer,
            toggles,
            started_at: Utc::now(),
        }
    }

    /// Periodic database maintenance, registered alongside the engine jobs
    pub fn start_maintenance(&self) {
        let optimizer = self.optimizer.clone();
        self.scheduler.spawn(PeriodicJob::new("system.optimize", OPTIMIZE_INTERVAL, move || {
            let optimizer = Arc::clone(&optimizer);
            async move { optimizer.run().await.map(|_| ()) }
        }));
        info!("Database maintenance scheduled every {}h", OPTIMIZE_INTERVAL.as_secs() / 3600);
    }
}

/// Build application router
///
/// Route groups of disabled engines are not mounted.
pub fn build_router(state: AppState) -> Router {
    let toggles = state.toggles.clone();

    let mut router = Router::new()
        .merge(api::health_routes())
        .merge(api::system_routes())
        .merge(api::api_key_routes());

    if toggles.forum {
        router = router.merge(api::forum_routes());
    }
    if toggles.challenges {
        router = router.merge(api::challenge_routes());
    }
    if toggles.newsletter {
        router = router.merge(api::newsletter_routes());
    }
    if toggles.ugc_video {
        router = router.merge(api::video_routes());
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

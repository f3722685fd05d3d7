//! Application state: the singleton services wired at boot and shut down in
//! reverse order. Everything is injected through this context; nothing is a
//! process global.

use std::sync::Arc;
use std::time::Instant;

use reelscript_breaker::{BreakerMirror, BreakerRegistry};
use reelscript_messaging::MessagingClient;
use reelscript_queue::{JobQueue, KvStore, QuotaStore, SessionStore};
use reelscript_storage::R2Client;
use reelscript_store::{
    AnalysisRepository, DatasetRepository, JobRepository, MemoryRepository, ScriptRepository,
    StoreClient, UserRepository,
};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,

    pub scripts: ScriptRepository,
    pub jobs: JobRepository,
    pub users: UserRepository,
    pub analyses: AnalysisRepository,
    pub dataset: DatasetRepository,
    pub memory: MemoryRepository,

    pub kv: KvStore,
    pub sessions: SessionStore,
    pub quota: QuotaStore,
    pub queue: Arc<JobQueue>,

    pub storage: Arc<R2Client>,
    pub breakers: Arc<BreakerRegistry>,
    pub messaging: Arc<MessagingClient>,

    pub started_at: Instant,
}

impl AppState {
    /// Create new application state. Connection establishment retries with
    /// bounded backoff inside the store client.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = StoreClient::from_env().await?;
        let kv = KvStore::from_env()?;
        let queue = JobQueue::from_env()?;
        let storage = R2Client::from_env()?;
        let messaging = MessagingClient::from_env()?;

        let breakers = Arc::new(
            BreakerRegistry::with_default_services().with_mirror(BreakerMirror::new(kv.clone())),
        );
        breakers.hydrate_from_mirror().await;

        Ok(Self {
            config,
            scripts: ScriptRepository::new(store.clone()),
            jobs: JobRepository::new(store.clone()),
            users: UserRepository::new(store.clone()),
            analyses: AnalysisRepository::new(store.clone()),
            dataset: DatasetRepository::new(store.clone()),
            memory: MemoryRepository::new(store),
            sessions: SessionStore::new(kv.clone()),
            quota: QuotaStore::new(kv.clone()),
            kv,
            queue: Arc::new(queue),
            storage: Arc::new(storage),
            breakers,
            messaging: Arc::new(messaging),
            started_at: Instant::now(),
        })
    }
}

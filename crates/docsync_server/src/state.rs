use std::sync::Arc;

use docsync::{ConnectionGateway, HotStateReader, PersistenceBridge, RoomRegistry};

use crate::auth::SessionGate;
use crate::config::Config;
use crate::db::DocRepo;
use crate::persistence::SqlitePersistence;
use crate::projection::{ContentProjector, TextProjector};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<DocRepo>,
    pub gate: Arc<SessionGate>,
    pub registry: RoomRegistry,
    pub gateway: ConnectionGateway,
    pub reader: HotStateReader,
    pub projector: Arc<dyn ContentProjector>,
}

impl AppState {
    /// Wire the engine to SQLite. Spawns the room registry, so it must be
    /// called inside a Tokio runtime.
    pub fn new(repo: Arc<DocRepo>, config: &Config) -> Self {
        let persistence: Arc<dyn PersistenceBridge> =
            Arc::new(SqlitePersistence::new(repo.clone()));
        let registry = RoomRegistry::new(persistence.clone(), config.registry_config());
        let gate = Arc::new(SessionGate::new(
            repo.clone(),
            config.session_cookie_name.clone(),
        ));
        let gateway = ConnectionGateway::new(gate.clone(), registry.clone());
        let reader = HotStateReader::new(registry.clone(), persistence);
        Self {
            repo,
            gate,
            registry,
            gateway,
            reader,
            projector: Arc::new(TextProjector::new(config.projection_root.clone())),
        }
    }
}

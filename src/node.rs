use crate::blockchain::Ledger;
use crate::config::{load_config, Config};
use crate::crypto::RecoverableVerifier;
use crate::notary::NotaryWorkflow;
use crate::persistence::{BlockStore, Database, InMemoryPersistence};
use std::fs;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Ready,
    Degraded,
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides
/// `default_level`. Later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Opens the configured SQLite file, creating its parent directory first.
pub fn open_store(path: &str) -> Result<Box<dyn BlockStore>, Box<dyn std::error::Error>> {
    let db_path = std::path::Path::new(path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create data dir {:?}: {}", parent, e))?;
        }
    }
    Ok(Box::new(Database::open(path)?))
}

pub struct Node {
    pub config: Config,
    pub ledger: Arc<Ledger>,
    pub notary: Arc<NotaryWorkflow>,
    pub state: Arc<RwLock<NodeState>>,
}

impl Node {
    pub async fn init() -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config()?;
        init_tracing(&config.logging.level);
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!(db = %config.database.path, "Starting StarNotary node");

        let mut degraded = false;
        let store: Box<dyn BlockStore> = match open_store(&config.database.path) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                    config.database.path, e
                );
                degraded = true;
                Box::new(InMemoryPersistence::new())
            }
        };

        let ledger = Arc::new(Ledger::open(store)?);
        let notary = Arc::new(NotaryWorkflow::with_window(
            ledger.clone(),
            Box::new(RecoverableVerifier),
            config.notary.validation_window_secs,
        ));

        let initial = if degraded {
            NodeState::Degraded
        } else {
            NodeState::Booting
        };

        Ok(Self {
            config,
            ledger,
            notary,
            state: Arc::new(RwLock::new(initial)),
        })
    }

    /// Checks the chain once and serves the API until the listener fails.
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error>> {
        let defects = self.ledger.validate_chain()?;
        {
            let mut s = self.state.write().await;
            if !defects.is_empty() {
                warn!(defects = defects.len(), "Chain failed startup validation");
                *s = NodeState::Degraded;
            } else if *s == NodeState::Booting {
                *s = NodeState::Ready;
            }
        }

        let state = self.state.read().await.clone();
        info!(height = self.ledger.get_height(), state = ?state, "Node ready");

        Node::start_api(self.clone(), self.config.network.api_port).await
    }

    #[cfg(feature = "api")]
    async fn start_api(node: Arc<Self>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let api_node = crate::api::Node::new_shared(
            node.notary.clone(),
            Some(node.state.clone()),
            node.config.notary.story_word_limit,
        );

        info!("Starting axum API server on 0.0.0.0:{}", port);

        crate::api::run_api_server(Arc::new(api_node), port).await
    }

    #[cfg(not(feature = "api"))]
    async fn start_api(_node: Arc<Self>, _port: u16) -> Result<(), Box<dyn std::error::Error>> {
        Err("API feature not enabled in this build".into())
    }
}

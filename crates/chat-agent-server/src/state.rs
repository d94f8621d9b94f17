use chat_agent::agent::{AgentContext, AgentRegistry};
use chat_agent::clock::system_clock;
use chat_agent::providers::factory;
use chat_agent::store::{JsonlStore, MemoryStore, MessageStore};
use chat_agent::tools::ToolSet;
use std::sync::Arc;
use tracing::info;

use crate::configuration::Settings;
use crate::routes::assets::{AssetFetcher, DirAssets};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    /// `None` when no asset layer is bound
    pub assets: Option<Arc<dyn AssetFetcher>>,
}

impl AppState {
    pub fn new(registry: AgentRegistry, assets: Option<Arc<dyn AssetFetcher>>) -> Self {
        Self {
            registry: Arc::new(registry),
            assets,
        }
    }

    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let provider_config = settings.provider.into_config();
        info!(provider = provider_config.provider_name(), "using model provider");
        let provider = factory::get_provider(provider_config)?;

        let store: Arc<dyn MessageStore> = match settings.store.dir {
            Some(dir) => {
                info!("storing conversations in {}", dir.display());
                Arc::new(JsonlStore::new(dir))
            }
            None => Arc::new(MemoryStore::new()),
        };

        let assets = settings.assets.dir.map(|dir| {
            info!("serving assets from {}", dir.display());
            Arc::new(DirAssets::new(dir)) as Arc<dyn AssetFetcher>
        });

        let registry = AgentRegistry::new(AgentContext {
            provider,
            store,
            clock: system_clock(),
            extra_tools: ToolSet::new(),
        });
        Ok(Self::new(registry, assets))
    }
}

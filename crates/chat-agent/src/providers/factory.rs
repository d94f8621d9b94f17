use super::{base::Provider, configs::ProviderConfig, openai::OpenAiProvider};
use anyhow::Result;
use std::sync::Arc;

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::WorkersAi(workers_config) => {
            Ok(Arc::new(OpenAiProvider::workers_ai(workers_config)?))
        }
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
    }
}

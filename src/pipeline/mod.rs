mod crawler;
mod enumerator;
mod orchestrator;
mod pool;
mod resolver;
mod retry;
#[cfg(test)]
mod testing;

pub use crawler::CrawlerConfig;
pub use enumerator::EnumeratorConfig;
pub use orchestrator::{Orchestrator, PipelineConfig};
pub use pool::{PoolConfig, Tools};
pub use retry::RetryPolicy;

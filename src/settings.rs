use std::{path::Path, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use miette::{miette, Context, IntoDiagnostic};
use serde::Deserialize;

use crate::{
    cli::Args,
    outside::DEFAULT_MODEL,
    pipeline::{CrawlerConfig, EnumeratorConfig, PipelineConfig, PoolConfig, RetryPolicy},
    result::Result,
};

/// Prefix of the environment variables overriding the configuration file,
/// e.g. `TUBESCRIBE__POOL__QUEUE_CAPACITY=32`
const ENV_PREFIX: &str = "TUBESCRIBE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub enumerator: EnumeratorSettings,
    pub crawler: CrawlerSettings,
    pub retry: RetrySettings,
    pub pool: PoolSettings,
    pub transcription: TranscriptionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumeratorSettings {
    pub queue_capacity: usize,
    pub put_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerSettings {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    pub capacity: usize,
    pub queue_capacity: usize,
    pub put_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSettings {
    pub model: String,
    pub retries: u32,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("enumerator.queue_capacity", 10_000)?
        .set_default("enumerator.put_timeout_secs", 60 * 60)?
        .set_default("crawler.batch_size", 5)?
        .set_default("crawler.poll_interval_ms", 100)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.base_delay_ms", 1000)?
        .set_default("pool.capacity", 3)?
        .set_default("pool.queue_capacity", 16)?
        .set_default("pool.put_timeout_secs", 60 * 60)?
        .set_default("transcription.model", DEFAULT_MODEL)?
        .set_default("transcription.retries", 2)
}

impl Settings {
    /// Load the settings, by increasing priority, from:
    /// the defaults, the configuration file, the environment, the command line
    pub fn load(args: &Args) -> Result<Self> {
        Self::load_from(args.config.as_deref(), args, true)
    }

    fn load_from(file: Option<&Path>, args: &Args, read_env: bool) -> Result<Self> {
        let mut builder = with_defaults(Config::builder())
            .into_diagnostic()
            .wrap_err("Invalid default settings")?;

        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        if read_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let settings: Settings = builder
            .set_override_option("crawler.batch_size", args.batch.map(|v| v as i64))
            .and_then(|b| {
                let capacity = args.background_processes.map(|v| v as i64);
                b.set_override_option("pool.capacity", capacity)
            })
            .and_then(|b| b.set_override_option("transcription.model", args.model.clone()))
            .and_then(|b| b.build())
            .and_then(Config::try_deserialize)
            .into_diagnostic()
            .wrap_err("Could not load the settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("enumerator.queue_capacity", self.enumerator.queue_capacity),
            ("crawler.batch_size", self.crawler.batch_size),
            ("retry.max_attempts", self.retry.max_attempts as usize),
            ("pool.capacity", self.pool.capacity),
            ("pool.queue_capacity", self.pool.queue_capacity),
        ];

        for (key, value) in positive {
            if value == 0 {
                return Err(miette!("Setting {key} must be at least 1").into());
            }
        }

        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            crawler: CrawlerConfig {
                batch_size: self.crawler.batch_size,
                poll_interval: Duration::from_millis(self.crawler.poll_interval_ms),
                enumerator: EnumeratorConfig {
                    queue_capacity: self.enumerator.queue_capacity,
                    put_timeout: Duration::from_secs(self.enumerator.put_timeout_secs),
                },
            },
            resolve_retry: RetryPolicy::new(
                self.retry.max_attempts,
                Duration::from_millis(self.retry.base_delay_ms),
            ),
            pool: PoolConfig {
                capacity: self.pool.capacity,
                queue_capacity: self.pool.queue_capacity,
                put_timeout: Duration::from_secs(self.pool.put_timeout_secs),
                // The transcription is retried right away
                transcription_retry: RetryPolicy::new(
                    self.transcription.retries + 1,
                    Duration::ZERO,
                ),
            },
        }
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use morph_providers::{
    HttpGatewayProvider, ProviderAdapter, ProviderRegistry, SimulatedBehavior, SimulatedProvider,
    VendorProfile, vendor_profiles,
};
use morph_runtime::{ChunkPacing, OrchestrationPolicy};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "morph-api")]
#[command(about = "Batch and parallel image-generation orchestration API")]
pub struct Cli {
    #[arg(long, env = "MORPH_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,
    /// Iterations running concurrently inside one batch chunk.
    #[arg(long, env = "MORPH_PARALLEL_CHUNK", default_value_t = 10)]
    pub parallel_chunk: usize,
    #[arg(long, env = "MORPH_CHUNK_PAUSE_MS", default_value_t = 3000)]
    pub chunk_pause_ms: u64,
    /// Extra pause per iteration of the finished chunk.
    #[arg(long, env = "MORPH_CHUNK_PAUSE_PER_ITERATION_MS", default_value_t = 0)]
    pub chunk_pause_per_iteration_ms: u64,
    #[arg(long, env = "MORPH_GENERATION_DEADLINE_SECS", default_value_t = 300)]
    pub generation_deadline_secs: u64,
    /// Headroom over the slowest provider timeout before a batch chunk counts as stuck.
    #[arg(long, env = "MORPH_CHUNK_SLACK_SECS", default_value_t = 30)]
    pub chunk_slack_secs: u64,
    #[arg(long, env = "MORPH_MAX_ITERATIONS", default_value_t = 1000)]
    pub max_iterations: u32,
    /// JSON theme catalog; built-in variations are used when absent or unreadable.
    #[arg(long, env = "MORPH_THEMES")]
    pub themes: Option<PathBuf>,
    /// Register in-process simulated providers instead of the gateway.
    #[arg(long)]
    pub simulate: bool,
    #[arg(long, env = "MORPH_SIMULATED_LATENCY_MS", default_value_t = 250)]
    pub simulated_latency_ms: u64,
    /// Base URL of the gateway wrapping the hosted vendors.
    #[arg(long, env = "MORPH_GATEWAY_URL")]
    pub gateway_url: Option<String>,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "STABILITY_API_KEY", hide_env_values = true)]
    pub stability_api_key: Option<String>,
    /// Local inference backend; speaks the gateway contract directly.
    #[arg(long, env = "COMFYUI_URL", default_value = "http://127.0.0.1:8188")]
    pub comfyui_url: String,
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn policy(&self) -> OrchestrationPolicy {
        OrchestrationPolicy {
            parallel_chunk: self.parallel_chunk,
            pacing: ChunkPacing {
                base: Duration::from_millis(self.chunk_pause_ms),
                per_iteration: Duration::from_millis(self.chunk_pause_per_iteration_ms),
            },
            generation_deadline: Duration::from_secs(self.generation_deadline_secs),
            chunk_slack: Duration::from_secs(self.chunk_slack_secs),
            max_iterations: self.max_iterations,
        }
    }

    fn credential(&self, env: &str) -> Option<&str> {
        let value = match env {
            "GEMINI_API_KEY" => self.gemini_api_key.as_deref(),
            "OPENAI_API_KEY" => self.openai_api_key.as_deref(),
            "STABILITY_API_KEY" => self.stability_api_key.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|key| !key.is_empty())
    }

    pub fn registry(&self) -> Result<ProviderRegistry> {
        if self.simulate {
            return Ok(self.simulated_registry());
        }
        let client = reqwest::Client::builder()
            .build()
            .context("failed building HTTP client")?;
        let mut registry = ProviderRegistry::new();
        for vendor in vendor_profiles() {
            registry.register(self.gateway_adapter(&client, vendor));
        }
        Ok(registry)
    }

    fn gateway_adapter(&self, client: &reqwest::Client, vendor: &VendorProfile) -> ProviderAdapter {
        let Some(env) = vendor.credential_env else {
            let provider =
                HttpGatewayProvider::new(client.clone(), &self.comfyui_url, vendor.name, vendor.kind, None);
            info!(provider = vendor.name, endpoint = provider.endpoint(), "local provider registered");
            return ProviderAdapter::new(vendor.profile(), Arc::new(provider));
        };
        let (Some(key), Some(gateway)) = (self.credential(env), self.gateway_url.as_deref()) else {
            warn!(provider = vendor.name, credential = env, "provider disabled: missing credentials or gateway url");
            return ProviderAdapter::disabled(vendor.profile());
        };
        let provider = HttpGatewayProvider::new(
            client.clone(),
            gateway,
            vendor.name,
            vendor.kind,
            Some(key.to_owned()),
        );
        info!(provider = vendor.name, endpoint = provider.endpoint(), "provider registered");
        ProviderAdapter::new(vendor.profile(), Arc::new(provider))
    }

    fn simulated_registry(&self) -> ProviderRegistry {
        let latency = Duration::from_millis(self.simulated_latency_ms);
        let mut registry = ProviderRegistry::new();
        for vendor in vendor_profiles() {
            let provider = SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_kind(vendor.kind)
                .with_latency(latency);
            registry.register(ProviderAdapter::new(vendor.profile(), Arc::new(provider)));
        }
        info!(providers = registry.len(), "simulated providers registered");
        registry
    }
}

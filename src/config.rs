use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use concierge_core::chunk::ChunkParams;
use concierge_core::retrieval::RetrievalSettings;
use concierge_core::search::RerankWeights;
use concierge_core::store::SearchOptions;
use concierge_core::tools::FeatureFlags;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub knowledge: Option<KnowledgeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            min_chars: default_min_chars(),
            context_chars: default_context_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
            min_chars: self.min_chars,
            context_chars: self.context_chars,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}
fn default_min_chars() -> usize {
    150
}
fn default_context_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_overfetch_threshold")]
    pub overfetch_threshold: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_exact_match_bonus")]
    pub exact_match_bonus: f32,
    #[serde(default = "default_exact_match_cap")]
    pub exact_match_cap: f32,
    #[serde(default = "default_max_boost")]
    pub max_boost: f32,
    #[serde(default = "default_true")]
    pub translate: bool,
    #[serde(default = "default_true")]
    pub hyde: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            overfetch_factor: default_overfetch_factor(),
            overfetch_threshold: default_overfetch_threshold(),
            keyword_weight: default_keyword_weight(),
            exact_match_bonus: default_exact_match_bonus(),
            exact_match_cap: default_exact_match_cap(),
            max_boost: default_max_boost(),
            translate: true,
            hyde: true,
        }
    }
}

impl RetrievalConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit,
            threshold: self.threshold,
        }
    }

    pub fn settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            overfetch_factor: self.overfetch_factor,
            overfetch_threshold: self.overfetch_threshold,
            translate: self.translate,
            hyde: self.hyde,
            weights: RerankWeights {
                keyword_weight: self.keyword_weight,
                exact_match_bonus: self.exact_match_bonus,
                exact_match_cap: self.exact_match_cap,
                max_boost: self.max_boost,
            },
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.35
}
fn default_overfetch_factor() -> usize {
    3
}
fn default_overfetch_threshold() -> f32 {
    0.25
}
fn default_keyword_weight() -> f32 {
    0.15
}
fn default_exact_match_bonus() -> f32 {
    0.05
}
fn default_exact_match_cap() -> f32 {
    0.10
}
fn default_max_boost() -> f32 {
    0.25
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DialogueConfig {
    /// LLM rounds per turn before giving up.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_guests")]
    pub default_guests: u32,
    /// Extra attempts per round when the model answers in plain text.
    #[serde(default = "default_plain_text_retries")]
    pub plain_text_retries: u32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            history_window: default_history_window(),
            default_guests: default_guests(),
            plain_text_retries: default_plain_text_retries(),
        }
    }
}

fn default_max_rounds() -> u32 {
    4
}
fn default_history_window() -> usize {
    20
}
fn default_guests() -> u32 {
    2
}
fn default_plain_text_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_true")]
    pub enable_booking: bool,
    #[serde(default = "default_true")]
    pub enable_availability: bool,
    #[serde(default = "default_true")]
    pub enable_recommendations: bool,
    /// Operator system prompt template; the built-in default when absent.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_hotel_name")]
    pub hotel_name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enable_booking: true,
            enable_availability: true,
            enable_recommendations: true,
            system_prompt: None,
            hotel_name: default_hotel_name(),
        }
    }
}

impl BotConfig {
    pub fn flags(&self) -> FeatureFlags {
        FeatureFlags {
            enable_booking: self.enable_booking,
            enable_availability: self.enable_availability,
            enable_recommendations: self.enable_recommendations,
        }
    }
}

fn default_hotel_name() -> String {
    "Villa Limone".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let chunking = &config.chunking;
    if chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if chunking.overlap_chars >= chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    if chunking.min_chars > chunking.max_chars {
        anyhow::bail!("chunking.min_chars must be <= chunking.max_chars");
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if retrieval.overfetch_factor < 1 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 1");
    }
    for (name, value) in [
        ("threshold", retrieval.threshold),
        ("overfetch_threshold", retrieval.overfetch_threshold),
    ] {
        if !(-1.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [-1.0, 1.0]", name);
        }
    }
    if !(0.0..=1.0).contains(&retrieval.max_boost) {
        anyhow::bail!("retrieval.max_boost must be in [0.0, 1.0]");
    }

    // Validate dialogue
    if config.dialogue.max_rounds < 1 {
        anyhow::bail!("dialogue.max_rounds must be >= 1");
    }

    // Validate providers
    for (section, provider) in [
        ("embedding", config.embedding.provider.as_str()),
        ("chat", config.chat.provider.as_str()),
    ] {
        match provider {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                section,
                other
            ),
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}

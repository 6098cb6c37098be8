//! Content generation: scripts, social copy and topic suggestions
//!
//! Each operation is a [`ProviderChain`] (language models in priority order,
//! then deterministic templates) wrapped by the shared [`Cache`]. Cache keys
//! are derived from the semantically relevant request fields only, so the
//! same theme asked twice with different wording of free text still hits.
//!
//! When every remote provider fails, an expired cache entry is preferred over
//! the template output, and served once.

mod llm;
mod local;

pub use llm::LlmContentProvider;
pub use local::TemplateContent;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheOutcome};
use crate::config::ContentConfig;
use crate::error::{Result, ValidationError};
use crate::llm::LlmClient;
use crate::provider::{AttemptRecorder, FallbackResult, Provider, ProviderChain};

/// Operation names, used as chain names and cache namespaces
pub const OP_SCRIPT: &str = "script";
pub const OP_SOCIAL: &str = "social_copy";
pub const OP_TOPICS: &str = "topics";

/// Longest accepted script
pub const MAX_SCRIPT_SECS: u32 = 600;

/// Most topic suggestions returned at once
pub const MAX_TOPICS: usize = 20;

// ============================================================================
// Requests and outputs
// ============================================================================

/// Request for a narrated short-video script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub theme: String,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_secs: u32,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_duration() -> u32 {
    60
}

fn default_language() -> String {
    "en".to_string()
}

impl ScriptRequest {
    /// Minimal request for a theme
    pub fn new(theme: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            target_audience: None,
            duration_secs: default_duration(),
            tone: None,
            language: default_language(),
            keywords: Vec::new(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.theme.trim().is_empty() {
            return Err(ValidationError::missing("theme"));
        }
        if !(1..=MAX_SCRIPT_SECS).contains(&self.duration_secs) {
            return Err(ValidationError::invalid(
                "duration_secs",
                format!("must be between 1 and {MAX_SCRIPT_SECS} seconds"),
            ));
        }
        Ok(())
    }

    fn cache_key(&self) -> String {
        let mut keywords: Vec<String> = self.keywords.iter().map(|k| k.to_lowercase()).collect();
        keywords.sort();
        let keywords = keywords.join(",");
        let duration = self.duration_secs.to_string();
        Cache::hash_key(
            OP_SCRIPT,
            &[
                &self.theme,
                self.target_audience.as_deref().unwrap_or(""),
                &duration,
                self.tone.as_deref().unwrap_or(""),
                &self.language,
                &keywords,
            ],
        )
    }
}

/// One narrated section of a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSection {
    pub heading: String,
    pub narration: String,
    #[serde(default)]
    pub visual_hint: Option<String>,
    pub duration_secs: u32,
}

/// A generated script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub hook: String,
    pub sections: Vec<ScriptSection>,
    pub call_to_action: String,
    pub hashtags: Vec<String>,
    pub estimated_duration_secs: u32,
}

impl Script {
    /// Everything a narrator reads, in order
    pub fn narration_text(&self) -> String {
        std::iter::once(self.hook.as_str())
            .chain(self.sections.iter().map(|s| s.narration.as_str()))
            .chain(std::iter::once(self.call_to_action.as_str()))
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Request for a platform caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialCopyRequest {
    pub platform: String,
    pub topic: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

impl SocialCopyRequest {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.platform.trim().is_empty() {
            return Err(ValidationError::missing("platform"));
        }
        if self.topic.trim().is_empty() {
            return Err(ValidationError::missing("topic"));
        }
        Ok(())
    }

    // summary is free text and stays out of the key
    fn cache_key(&self) -> String {
        Cache::hash_key(
            OP_SOCIAL,
            &[
                &self.platform,
                &self.topic,
                self.tone.as_deref().unwrap_or(""),
            ],
        )
    }
}

/// A generated caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialCopy {
    pub platform: String,
    pub caption: String,
    pub hashtags: Vec<String>,
}

/// Request for trending topic ideas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRequest {
    pub theme: String,
    #[serde(default = "default_topic_count")]
    pub count: usize,
}

fn default_topic_count() -> usize {
    5
}

impl TopicRequest {
    pub fn new(theme: impl Into<String>, count: usize) -> Self {
        Self {
            theme: theme.into(),
            count,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.theme.trim().is_empty() {
            return Err(ValidationError::missing("theme"));
        }
        if !(1..=MAX_TOPICS).contains(&self.count) {
            return Err(ValidationError::invalid(
                "count",
                format!("must be between 1 and {MAX_TOPICS}"),
            ));
        }
        Ok(())
    }

    fn cache_key(&self) -> String {
        let count = self.count.to_string();
        Cache::hash_key(OP_TOPICS, &[&self.theme, &count])
    }
}

/// One topic idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSuggestion {
    pub title: String,
    pub angle: String,
    /// Relevance in 0.0..=1.0
    pub score: f32,
}

/// Output of a content operation with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResult<O> {
    pub value: O,
    /// Quality may be degraded (lower-priority provider, template or stale cache)
    pub used_fallback: bool,
    pub used_provider: String,
    pub from_cache: bool,
    /// Error message per failed provider
    pub errors: BTreeMap<String, String>,
}

impl<O> From<FallbackResult<O>> for ContentResult<O> {
    fn from(result: FallbackResult<O>) -> Self {
        Self {
            value: result.value,
            used_fallback: result.used_fallback,
            used_provider: result.used_provider,
            from_cache: false,
            errors: result.errors,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Uniform entry point for the three content operations
pub struct ContentOrchestrator {
    cache: Arc<Cache>,
    config: ContentConfig,
    script_chain: ProviderChain<ScriptRequest, Script>,
    social_chain: ProviderChain<SocialCopyRequest, SocialCopy>,
    topics_chain: ProviderChain<TopicRequest, Vec<TopicSuggestion>>,
}

impl ContentOrchestrator {
    /// Build the three chains over the given language models (highest priority first)
    pub fn new(
        cache: Arc<Cache>,
        config: ContentConfig,
        llms: &[Arc<LlmClient>],
        recorder: Option<Arc<dyn AttemptRecorder>>,
    ) -> Result<Self> {
        let templates = Arc::new(TemplateContent::new()?);
        let providers: Vec<Arc<LlmContentProvider>> = llms
            .iter()
            .map(|client| Arc::new(LlmContentProvider::new(Arc::clone(client))))
            .collect();

        let script_chain = chain_for(
            OP_SCRIPT,
            &providers,
            templates.clone(),
            Duration::from_secs(config.script_timeout_secs),
            recorder.clone(),
        )?;
        let social_chain = chain_for(
            OP_SOCIAL,
            &providers,
            templates.clone(),
            Duration::from_secs(config.social_timeout_secs),
            recorder.clone(),
        )?;
        let topics_chain = chain_for(
            OP_TOPICS,
            &providers,
            templates,
            Duration::from_secs(config.topics_timeout_secs),
            recorder,
        )?;

        Ok(Self::from_chains(
            cache,
            config,
            script_chain,
            social_chain,
            topics_chain,
        ))
    }

    /// Assemble from prebuilt chains
    pub fn from_chains(
        cache: Arc<Cache>,
        config: ContentConfig,
        script_chain: ProviderChain<ScriptRequest, Script>,
        social_chain: ProviderChain<SocialCopyRequest, SocialCopy>,
        topics_chain: ProviderChain<TopicRequest, Vec<TopicSuggestion>>,
    ) -> Self {
        Self {
            cache,
            config,
            script_chain,
            social_chain,
            topics_chain,
        }
    }

    /// Generate a narrated script
    pub async fn generate_script(
        &self,
        request: &ScriptRequest,
    ) -> std::result::Result<ContentResult<Script>, ValidationError> {
        request.validate()?;
        let ttl = Duration::from_secs(self.config.script_ttl_secs);
        Ok(self
            .run(&self.script_chain, request.cache_key(), ttl, request)
            .await)
    }

    /// Generate a caption for one platform
    pub async fn generate_social_copy(
        &self,
        request: &SocialCopyRequest,
    ) -> std::result::Result<ContentResult<SocialCopy>, ValidationError> {
        request.validate()?;
        let ttl = Duration::from_secs(self.config.social_ttl_secs);
        Ok(self
            .run(&self.social_chain, request.cache_key(), ttl, request)
            .await)
    }

    /// Suggest topics around a theme
    pub async fn suggest_topics(
        &self,
        request: &TopicRequest,
    ) -> std::result::Result<ContentResult<Vec<TopicSuggestion>>, ValidationError> {
        request.validate()?;
        let ttl = Duration::from_secs(self.config.topics_ttl_secs);
        let mut result = self
            .run(&self.topics_chain, request.cache_key(), ttl, request)
            .await;
        result.value.truncate(request.count);
        Ok(result)
    }

    async fn run<I, O>(
        &self,
        chain: &ProviderChain<I, O>,
        key: String,
        ttl: Duration,
        input: &I,
    ) -> ContentResult<O>
    where
        I: Sync,
        O: Serialize + DeserializeOwned + Send,
    {
        if !self.config.cache_enabled {
            return chain.invoke(input).await.into();
        }

        let mut provenance: Option<FallbackResult<()>> = None;
        let slot = &mut provenance;

        // Template output is returned through Err so that a stale entry wins over it
        let outcome = self
            .cache
            .wrap_typed(&key, ttl, move || async move {
                let (value, meta) = chain.invoke(input).await.into_parts();
                let used_local = meta.used_local;
                *slot = Some(meta);
                if used_local {
                    Err(value)
                } else {
                    Ok(value)
                }
            })
            .await;

        let meta = provenance.unwrap_or_else(|| FallbackResult {
            value: (),
            used_provider: "cache".to_string(),
            used_fallback: false,
            used_local: false,
            errors: BTreeMap::new(),
            attempts: Vec::new(),
        });

        match outcome {
            Ok(cached) => match cached.outcome {
                CacheOutcome::Hit => ContentResult {
                    value: cached.value,
                    used_fallback: false,
                    used_provider: "cache".to_string(),
                    from_cache: true,
                    errors: BTreeMap::new(),
                },
                CacheOutcome::Computed => ContentResult::from(meta.map(|()| cached.value)),
                CacheOutcome::Stale => ContentResult {
                    value: cached.value,
                    used_fallback: true,
                    used_provider: "cache:stale".to_string(),
                    from_cache: true,
                    errors: meta.errors,
                },
            },
            Err(local_value) => ContentResult::from(meta.map(|()| local_value)),
        }
    }
}

fn chain_for<I, O>(
    operation: &str,
    providers: &[Arc<LlmContentProvider>],
    templates: Arc<TemplateContent>,
    timeout: Duration,
    recorder: Option<Arc<dyn AttemptRecorder>>,
) -> Result<ProviderChain<I, O>>
where
    LlmContentProvider: Provider<I, O>,
    TemplateContent: crate::provider::LocalProvider<I, O>,
    I: 'static,
    O: 'static,
{
    let mut builder = ProviderChain::builder(operation)
        .local(templates)
        .timeout(timeout);
    for provider in providers {
        builder = builder.provider(Arc::clone(provider) as Arc<dyn Provider<I, O>>);
    }
    if let Some(recorder) = recorder {
        builder = builder.recorder(recorder);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FnProvider, ProviderError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator_with(
        script_provider: Option<Arc<dyn Provider<ScriptRequest, Script>>>,
        config: ContentConfig,
    ) -> ContentOrchestrator {
        let templates = Arc::new(TemplateContent::new().unwrap());
        let script_chain = ProviderChain::<ScriptRequest, Script>::builder(OP_SCRIPT)
            .provider_opt(script_provider)
            .local(templates.clone())
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let social_chain = ProviderChain::<SocialCopyRequest, SocialCopy>::builder(OP_SOCIAL)
            .local(templates.clone())
            .build()
            .unwrap();
        let topics_chain = ProviderChain::<TopicRequest, Vec<TopicSuggestion>>::builder(OP_TOPICS)
            .local(templates)
            .build()
            .unwrap();
        ContentOrchestrator::from_chains(
            Arc::new(Cache::new()),
            config,
            script_chain,
            social_chain,
            topics_chain,
        )
    }

    fn canned_script(title: &str) -> Script {
        Script {
            title: title.to_string(),
            hook: "hook".to_string(),
            sections: vec![],
            call_to_action: "follow".to_string(),
            hashtags: vec![],
            estimated_duration_secs: 30,
        }
    }

    #[test]
    fn test_script_validation() {
        let mut request = ScriptRequest::new("  ");
        assert_eq!(request.validate().unwrap_err().field, "theme");

        request.theme = "rust".to_string();
        request.duration_secs = 0;
        assert_eq!(request.validate().unwrap_err().field, "duration_secs");
    }

    #[test]
    fn test_cache_key_ignores_keyword_order_and_case() {
        let mut a = ScriptRequest::new("Rust Tips");
        a.keywords = vec!["Async".to_string(), "tokio".to_string()];
        let mut b = ScriptRequest::new("rust  tips");
        b.keywords = vec!["TOKIO".to_string(), "async".to_string()];
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_social_key_ignores_summary() {
        let a = SocialCopyRequest {
            platform: "instagram".to_string(),
            topic: "rust".to_string(),
            summary: Some("one".to_string()),
            tone: None,
        };
        let b = SocialCopyRequest {
            summary: Some("two".to_string()),
            ..a.clone()
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_narration_text() {
        let mut script = canned_script("t");
        script.sections.push(ScriptSection {
            heading: "h".to_string(),
            narration: "middle".to_string(),
            visual_hint: None,
            duration_secs: 10,
        });
        assert_eq!(script.narration_text(), "hook middle follow");
    }

    #[tokio::test]
    async fn test_no_providers_uses_templates() {
        let orchestrator = orchestrator_with(None, ContentConfig::default());
        let result = orchestrator
            .generate_script(&ScriptRequest::new("rust ownership"))
            .await
            .unwrap();

        assert!(result.used_fallback);
        assert_eq!(result.used_provider, "template");
        assert!(!result.from_cache);
        assert!(!result.value.sections.is_empty());
    }

    #[tokio::test]
    async fn test_provider_result_is_cached() {
        let provider: Arc<dyn Provider<ScriptRequest, Script>> =
            Arc::new(FnProvider::new("fake-llm", |_: &ScriptRequest| async {
                Ok::<_, ProviderError>(canned_script("from llm"))
            }));
        let orchestrator = orchestrator_with(Some(provider), ContentConfig::default());
        let request = ScriptRequest::new("rust");

        let first = orchestrator.generate_script(&request).await.unwrap();
        assert_eq!(first.used_provider, "fake-llm");
        assert!(!first.from_cache);

        let second = orchestrator.generate_script(&request).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.value.title, "from llm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_beats_templates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider: Arc<dyn Provider<ScriptRequest, Script>> =
            Arc::new(FnProvider::new("flaky-llm", move |_: &ScriptRequest| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Ok(canned_script("from llm"))
                    } else {
                        Err(ProviderError::other("llm down"))
                    }
                }
            }));
        let config = ContentConfig {
            script_ttl_secs: 60,
            ..Default::default()
        };
        let orchestrator = orchestrator_with(Some(provider), config);
        let request = ScriptRequest::new("espresso");

        let fresh = orchestrator.generate_script(&request).await.unwrap();
        assert_eq!(fresh.used_provider, "flaky-llm");

        tokio::time::advance(Duration::from_secs(61)).await;

        let stale = orchestrator.generate_script(&request).await.unwrap();
        assert_eq!(stale.used_provider, "cache:stale");
        assert!(stale.used_fallback);
        assert!(stale.from_cache);
        assert_eq!(stale.value.title, "from llm");
        assert!(stale.errors.contains_key("flaky-llm"));

        let again = orchestrator.generate_script(&request).await.unwrap();
        assert_eq!(again.used_provider, "template");
        assert!(!again.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_template_output_is_not_cached() {
        let orchestrator = orchestrator_with(None, ContentConfig::default());
        let request = ScriptRequest::new("rust");

        orchestrator.generate_script(&request).await.unwrap();
        let second = orchestrator.generate_script(&request).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(orchestrator.cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_invokes() {
        let config = ContentConfig {
            cache_enabled: false,
            ..Default::default()
        };
        let provider: Arc<dyn Provider<ScriptRequest, Script>> =
            Arc::new(FnProvider::new("fake-llm", |_: &ScriptRequest| async {
                Ok::<_, ProviderError>(canned_script("x"))
            }));
        let orchestrator = orchestrator_with(Some(provider), config);
        let request = ScriptRequest::new("rust");

        orchestrator.generate_script(&request).await.unwrap();
        let second = orchestrator.generate_script(&request).await.unwrap();
        assert!(!second.from_cache);
    }

    #[tokio::test]
    async fn test_topics_truncated_to_count() {
        let orchestrator = orchestrator_with(None, ContentConfig::default());
        let result = orchestrator
            .suggest_topics(&TopicRequest::new("cooking", 3))
            .await
            .unwrap();
        assert_eq!(result.value.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let orchestrator = orchestrator_with(None, ContentConfig::default());
        let err = orchestrator
            .suggest_topics(&TopicRequest::new("cooking", 0))
            .await
            .unwrap_err();
        assert_eq!(err.field, "count");
    }
}

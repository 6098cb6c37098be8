//! Language-model backed content providers

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::local::hashtags;
use super::{
    Script, ScriptRequest, ScriptSection, SocialCopy, SocialCopyRequest, TopicRequest,
    TopicSuggestion,
};
use crate::llm::LlmClient;
use crate::provider::{Provider, ProviderError};

/// Adapts an [`LlmClient`] to the three content operations
pub struct LlmContentProvider {
    client: Arc<LlmClient>,
}

impl LlmContentProvider {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn script_prompt(request: &ScriptRequest) -> String {
    let audience = request.target_audience.as_deref().unwrap_or("a general audience");
    let tone = request.tone.as_deref().unwrap_or("engaging");
    let keywords = if request.keywords.is_empty() {
        "none".to_string()
    } else {
        request.keywords.join(", ")
    };

    format!(
        r##"You write scripts for short vertical videos.

Write a {duration}-second script about "{theme}" for {audience}.
Tone: {tone}. Language: {language}. Keywords to include: {keywords}.

Rules:
1. Open with a hook that grabs attention in the first 3 seconds
2. Split the body into sections; each has a heading, narration, a visual hint and a duration in seconds
3. Section durations should add up to about {duration} seconds
4. End with a call to action
5. Up to 5 hashtags

Answer with JSON only:
```json
{{
  "title": "...",
  "hook": "...",
  "sections": [{{"heading": "...", "narration": "...", "visual_hint": "...", "duration_secs": 15}}],
  "call_to_action": "...",
  "hashtags": ["#..."]
}}
```"##,
        duration = request.duration_secs,
        theme = request.theme.trim(),
        language = request.language,
    )
}

fn social_prompt(request: &SocialCopyRequest) -> String {
    let summary = request.summary.as_deref().unwrap_or("");
    let tone = request.tone.as_deref().unwrap_or("friendly");

    format!(
        r##"Write a {platform} caption about "{topic}".
Context: {summary}
Tone: {tone}. Respect the platform's length limits.

Answer with JSON only: {{"caption": "...", "hashtags": ["#..."]}}"##,
        platform = request.platform,
        topic = request.topic.trim(),
    )
}

fn topics_prompt(request: &TopicRequest) -> String {
    format!(
        r#"Suggest {count} trending short-video topics about "{theme}".
For each give a catchy title, the angle (e.g. tutorial, myth-busting, story) and a relevance score between 0 and 1.

Answer with a JSON array only: [{{"title": "...", "angle": "...", "score": 0.9}}]"#,
        count = request.count,
        theme = request.theme.trim(),
    )
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScriptDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    hook: String,
    #[serde(default)]
    sections: Vec<SectionDraft>,
    #[serde(default)]
    call_to_action: String,
    #[serde(default)]
    hashtags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SectionDraft {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    narration: String,
    #[serde(default)]
    visual_hint: Option<String>,
    #[serde(default)]
    duration_secs: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SocialDraft {
    #[serde(default)]
    caption: String,
    #[serde(default)]
    hashtags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopicsDraft {
    List(Vec<TopicDraft>),
    Wrapped { topics: Vec<TopicDraft> },
}

#[derive(Debug, Deserialize)]
struct TopicDraft {
    title: String,
    #[serde(default)]
    angle: String,
    #[serde(default)]
    score: Option<f32>,
}

fn normalize_tag(tag: &str) -> Option<String> {
    let body: String = tag
        .trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!body.is_empty()).then(|| format!("#{body}"))
}

impl ScriptDraft {
    fn into_script(self, request: &ScriptRequest) -> Result<Script, ProviderError> {
        let sections: Vec<ScriptSection> = self
            .sections
            .into_iter()
            .filter(|s| !s.narration.trim().is_empty())
            .map(|s| ScriptSection {
                heading: s.heading,
                narration: s.narration.trim().to_string(),
                visual_hint: s.visual_hint,
                duration_secs: s.duration_secs.unwrap_or(0),
            })
            .collect();

        if self.title.trim().is_empty() || sections.is_empty() {
            return Err(ProviderError::malformed("script without title or sections"));
        }

        // fill in missing durations evenly
        let declared: u32 = sections.iter().map(|s| s.duration_secs).sum();
        let sections = if declared == 0 {
            let even = (request.duration_secs / sections.len() as u32).max(1);
            sections
                .into_iter()
                .map(|s| ScriptSection {
                    duration_secs: even,
                    ..s
                })
                .collect()
        } else {
            sections
        };

        let mut tags: Vec<String> = self.hashtags.iter().filter_map(|t| normalize_tag(t)).collect();
        if tags.is_empty() {
            tags = hashtags(&request.theme, &request.keywords, 5);
        }
        tags.truncate(5);

        let estimated_duration_secs = sections.iter().map(|s| s.duration_secs).sum();
        Ok(Script {
            title: self.title.trim().to_string(),
            hook: self.hook.trim().to_string(),
            sections,
            call_to_action: self.call_to_action.trim().to_string(),
            hashtags: tags,
            estimated_duration_secs,
        })
    }
}

// ============================================================================
// Provider impls
// ============================================================================

#[async_trait]
impl Provider<ScriptRequest, Script> for LlmContentProvider {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn invoke(&self, input: &ScriptRequest) -> Result<Script, ProviderError> {
        let draft: ScriptDraft = self.client.complete_json(&script_prompt(input)).await?;
        draft.into_script(input)
    }
}

#[async_trait]
impl Provider<SocialCopyRequest, SocialCopy> for LlmContentProvider {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn invoke(&self, input: &SocialCopyRequest) -> Result<SocialCopy, ProviderError> {
        let draft: SocialDraft = self.client.complete_json(&social_prompt(input)).await?;
        if draft.caption.trim().is_empty() {
            return Err(ProviderError::malformed("empty caption"));
        }
        Ok(SocialCopy {
            platform: input.platform.clone(),
            caption: draft.caption.trim().to_string(),
            hashtags: draft.hashtags.iter().filter_map(|t| normalize_tag(t)).collect(),
        })
    }
}

#[async_trait]
impl Provider<TopicRequest, Vec<TopicSuggestion>> for LlmContentProvider {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn invoke(&self, input: &TopicRequest) -> Result<Vec<TopicSuggestion>, ProviderError> {
        let draft: TopicsDraft = self.client.complete_json(&topics_prompt(input)).await?;
        let drafts = match draft {
            TopicsDraft::List(list) | TopicsDraft::Wrapped { topics: list } => list,
        };

        let mut topics: Vec<TopicSuggestion> = drafts
            .into_iter()
            .filter(|t| !t.title.trim().is_empty())
            .map(|t| TopicSuggestion {
                title: t.title.trim().to_string(),
                angle: t.angle,
                score: t.score.unwrap_or(0.5).clamp(0.0, 1.0),
            })
            .collect();

        if topics.is_empty() {
            return Err(ProviderError::malformed("no topics in answer"));
        }
        topics.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_answering(answer: &str) -> (MockServer, LlmContentProvider) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": answer })))
            .mount(&server)
            .await;
        let client = LlmClient::with_config(LlmConfig::ollama(server.uri(), "m")).unwrap();
        (server, LlmContentProvider::new(Arc::new(client)))
    }

    #[test]
    fn test_prompts_show_hashtag_shape() {
        let script = script_prompt(&ScriptRequest::new("coffee"));
        assert!(script.contains(r##""hashtags": ["#..."]"##));
        assert!(script.trim_end().ends_with("```"));

        let social = social_prompt(&SocialCopyRequest {
            platform: "tiktok".to_string(),
            topic: "coffee".to_string(),
            summary: None,
            tone: None,
        });
        assert!(social.ends_with(r##"{"caption": "...", "hashtags": ["#..."]}"##));
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("#Rust Lang"), Some("#RustLang".to_string()));
        assert_eq!(normalize_tag("tips"), Some("#tips".to_string()));
        assert_eq!(normalize_tag("#"), None);
    }

    #[tokio::test]
    async fn test_script_from_llm() {
        let answer = r##"```json
{"title": "Ownership 101", "hook": "Ever lost a value?",
 "sections": [{"heading": "Move", "narration": "Values move."}, {"heading": "Borrow", "narration": "Or borrow."}],
 "call_to_action": "Follow!", "hashtags": ["#rust", "ownership"]}
```"##;
        let (_server, provider) = provider_answering(answer).await;
        let script = provider.invoke(&ScriptRequest::new("ownership")).await.unwrap();

        assert_eq!(script.title, "Ownership 101");
        assert_eq!(script.sections.len(), 2);
        assert_eq!(script.sections[0].duration_secs, 30);
        assert_eq!(script.estimated_duration_secs, 60);
        assert_eq!(script.hashtags, vec!["#rust", "#ownership"]);
    }

    #[tokio::test]
    async fn test_script_without_sections_is_malformed() {
        let (_server, provider) = provider_answering(r#"{"title": "x", "sections": []}"#).await;
        let err = provider.invoke(&ScriptRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_topics_wrapped_and_sorted() {
        let answer = r#"{"topics": [{"title": "a", "score": 0.2}, {"title": "b", "angle": "story", "score": 0.8}]}"#;
        let (_server, provider) = provider_answering(answer).await;
        let topics = provider.invoke(&TopicRequest::new("x", 2)).await.unwrap();
        assert_eq!(topics[0].title, "b");
        assert_eq!(topics[1].angle, "");
    }

    #[tokio::test]
    async fn test_social_copy() {
        let (_server, provider) =
            provider_answering(r#"{"caption": "Learn Rust today", "hashtags": ["rust"]}"#).await;
        let request = SocialCopyRequest {
            platform: "instagram".to_string(),
            topic: "rust".to_string(),
            summary: None,
            tone: None,
        };
        let copy = provider.invoke(&request).await.unwrap();
        assert_eq!(copy.platform, "instagram");
        assert_eq!(copy.hashtags, vec!["#rust"]);
    }
}

//! Deterministic content rendered from Handlebars templates
//!
//! The last stage of every content chain. Output depends only on the request,
//! so the same request always yields the same script, caption or topic list.

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::json;

use super::{
    Script, ScriptRequest, ScriptSection, SocialCopy, SocialCopyRequest, TopicRequest,
    TopicSuggestion,
};
use crate::provider::{LocalProvider, ProviderError};
use crate::utils::truncate_text;

const SECTION_COUNT_MIN: u32 = 2;
const SECTION_COUNT_MAX: u32 = 6;
const SECONDS_PER_SECTION: u32 = 15;

/// (name, template) per language
const EN_TEMPLATES: &[(&str, &str)] = &[
    ("title", "{{theme}}: what {{audience}} need to know"),
    ("hook", "Did you know most {{audience}} get {{theme}} wrong?"),
    ("cta", "Follow for more about {{theme}}!"),
    ("section0", "Most {{audience}} overlook {{theme}}, yet it shapes results every day."),
    ("section1", "At its core, {{theme}} comes down to one thing: {{keyword}}."),
    ("section2", "Picture this: you apply {{keyword}} to a real project and see the difference in minutes."),
    ("section3", "The most common mistake with {{theme}} is rushing past the basics."),
    ("section4", "Pro tip: start small with {{keyword}} and build the habit."),
    ("section5", "So remember: {{theme}} is simpler than it looks once you focus on {{keyword}}."),
    ("caption", "{{topic}}{{#if summary}} {{summary}}{{/if}} {{call}}"),
];

const PT_TEMPLATES: &[(&str, &str)] = &[
    ("title", "{{theme}}: o que {{audience}} precisam saber"),
    ("hook", "Sabia que a maioria das {{audience}} erra em {{theme}}?"),
    ("cta", "Siga para mais sobre {{theme}}!"),
    ("section0", "Muitas {{audience}} ignoram {{theme}}, mas isso muda resultados todos os dias."),
    ("section1", "No fundo, {{theme}} se resume a uma coisa: {{keyword}}."),
    ("section2", "Imagine aplicar {{keyword}} num projeto real e ver a diferença em minutos."),
    ("section3", "O erro mais comum com {{theme}} é pular o básico."),
    ("section4", "Dica de ouro: comece pequeno com {{keyword}} e crie o hábito."),
    ("section5", "Então lembre: {{theme}} é mais simples do que parece quando você foca em {{keyword}}."),
    ("caption", "{{topic}}{{#if summary}} {{summary}}{{/if}} {{call}}"),
];

const EN_HEADINGS: [&str; 6] = [
    "Why it matters",
    "The core idea",
    "A quick example",
    "Common mistake",
    "Pro tip",
    "Recap",
];

const PT_HEADINGS: [&str; 6] = [
    "Por que importa",
    "A ideia central",
    "Um exemplo rápido",
    "Erro comum",
    "Dica de ouro",
    "Resumo",
];

/// (title template, angle)
const TOPIC_ANGLES: [(&str, &str); 8] = [
    ("Beginner's guide to {{theme}}", "beginner"),
    ("{{theme}} myths debunked", "myth-busting"),
    ("5 mistakes people make with {{theme}}", "listicle"),
    ("{{theme}} in 60 seconds", "quick explainer"),
    ("How I would learn {{theme}} from scratch", "personal story"),
    ("{{theme}}: before and after", "transformation"),
    ("The future of {{theme}}", "trend"),
    ("{{theme}} tools you need", "resources"),
];

/// Template-backed local provider for all content operations
pub struct TemplateContent {
    handlebars: Handlebars<'static>,
}

impl TemplateContent {
    pub fn new() -> Result<Self, ProviderError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);

        for (lang, templates) in [("en", EN_TEMPLATES), ("pt", PT_TEMPLATES)] {
            for (name, template) in templates {
                handlebars
                    .register_template_string(&format!("{lang}.{name}"), template)
                    .map_err(|e| ProviderError::other(format!("template {lang}.{name}: {e}")))?;
            }
        }
        for (index, (template, _)) in TOPIC_ANGLES.iter().enumerate() {
            handlebars
                .register_template_string(&format!("topic{index}"), template)
                .map_err(|e| ProviderError::other(format!("template topic{index}: {e}")))?;
        }

        Ok(Self { handlebars })
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, ProviderError> {
        self.handlebars
            .render(name, data)
            .map(|text| crate::utils::normalize_whitespace(&text))
            .map_err(|e| ProviderError::other(format!("render {name}: {e}")))
    }
}

fn lang_of(language: &str) -> &'static str {
    if language.to_lowercase().starts_with("pt") {
        "pt"
    } else {
        "en"
    }
}

/// Hashtags from a theme and keywords, deduplicated, at most `max`
pub(crate) fn hashtags(theme: &str, keywords: &[String], max: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let candidates = std::iter::once(theme).chain(keywords.iter().map(String::as_str));

    for candidate in candidates {
        let tag: String = candidate
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if tag.is_empty() {
            continue;
        }
        let tag = format!("#{tag}");
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == max {
            break;
        }
    }
    tags
}

fn platform_call(platform: &str) -> &'static str {
    match platform.to_lowercase().as_str() {
        "instagram" => "Save this post for later!",
        "tiktok" => "Watch till the end!",
        "youtube" | "youtube_shorts" => "Subscribe for more!",
        "linkedin" => "What do you think? Share below.",
        _ => "",
    }
}

fn caption_limit(platform: &str) -> usize {
    match platform.to_lowercase().as_str() {
        "x" | "twitter" => 280,
        "tiktok" => 2200,
        "linkedin" => 3000,
        _ => 2200,
    }
}

#[async_trait]
impl LocalProvider<ScriptRequest, Script> for TemplateContent {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, input: &ScriptRequest) -> Result<Script, ProviderError> {
        let lang = lang_of(&input.language);
        let default_audience = if lang == "pt" { "pessoas" } else { "people" };
        let audience = input
            .target_audience
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(default_audience);
        let theme = input.theme.trim();

        let count = (input.duration_secs / SECONDS_PER_SECTION).clamp(SECTION_COUNT_MIN, SECTION_COUNT_MAX);
        let per_section = (input.duration_secs / count).max(1);
        let headings = if lang == "pt" { PT_HEADINGS } else { EN_HEADINGS };

        let mut sections = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let keyword = if input.keywords.is_empty() {
                theme
            } else {
                input.keywords[i % input.keywords.len()].as_str()
            };
            // last section is always the recap
            let slot = if i + 1 == count as usize { 5 } else { i };
            let data = json!({ "theme": theme, "audience": audience, "keyword": keyword });
            sections.push(ScriptSection {
                heading: headings[slot].to_string(),
                narration: self.render(&format!("{lang}.section{slot}"), &data)?,
                visual_hint: Some(keyword.to_string()),
                duration_secs: per_section,
            });
        }

        let data = json!({ "theme": theme, "audience": audience });
        Ok(Script {
            title: self.render(&format!("{lang}.title"), &data)?,
            hook: self.render(&format!("{lang}.hook"), &data)?,
            sections,
            call_to_action: self.render(&format!("{lang}.cta"), &data)?,
            hashtags: hashtags(theme, &input.keywords, 5),
            estimated_duration_secs: per_section * count,
        })
    }

    fn minimal(&self, input: &ScriptRequest) -> Script {
        let theme = input.theme.trim().to_string();
        Script {
            title: theme.clone(),
            hook: theme.clone(),
            sections: vec![ScriptSection {
                heading: theme.clone(),
                narration: theme.clone(),
                visual_hint: None,
                duration_secs: input.duration_secs,
            }],
            call_to_action: String::new(),
            hashtags: hashtags(&theme, &[], 1),
            estimated_duration_secs: input.duration_secs,
        }
    }
}

#[async_trait]
impl LocalProvider<SocialCopyRequest, SocialCopy> for TemplateContent {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, input: &SocialCopyRequest) -> Result<SocialCopy, ProviderError> {
        let tags = hashtags(&input.topic, &[input.platform.clone()], 5);
        let data = json!({
            "topic": input.topic.trim(),
            "summary": input.summary.as_deref().map(str::trim).unwrap_or(""),
            "call": platform_call(&input.platform),
        });
        let caption = self.render("en.caption", &data)?;
        let with_tags = format!("{caption} {}", tags.join(" "));

        Ok(SocialCopy {
            platform: input.platform.clone(),
            caption: truncate_text(&with_tags, caption_limit(&input.platform)),
            hashtags: tags,
        })
    }

    fn minimal(&self, input: &SocialCopyRequest) -> SocialCopy {
        SocialCopy {
            platform: input.platform.clone(),
            caption: truncate_text(input.topic.trim(), caption_limit(&input.platform)),
            hashtags: Vec::new(),
        }
    }
}

#[async_trait]
impl LocalProvider<TopicRequest, Vec<TopicSuggestion>> for TemplateContent {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, input: &TopicRequest) -> Result<Vec<TopicSuggestion>, ProviderError> {
        let data = json!({ "theme": input.theme.trim() });
        let mut topics = Vec::with_capacity(input.count);

        for i in 0..input.count {
            let index = i % TOPIC_ANGLES.len();
            let round = i / TOPIC_ANGLES.len();
            let mut title = self.render(&format!("topic{index}"), &data)?;
            if round > 0 {
                title = format!("{title} (part {})", round + 1);
            }
            topics.push(TopicSuggestion {
                title,
                angle: TOPIC_ANGLES[index].1.to_string(),
                score: (0.9 - 0.03 * i as f32).max(0.1),
            });
        }
        Ok(topics)
    }

    fn minimal(&self, input: &TopicRequest) -> Vec<TopicSuggestion> {
        vec![TopicSuggestion {
            title: input.theme.trim().to_string(),
            angle: "general".to_string(),
            score: 0.5,
        }]
    }
}

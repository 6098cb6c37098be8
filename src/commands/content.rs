use anyhow::Result;
use serde::Serialize;

use reelforge::app::AppContext;
use reelforge::content::{ContentResult, ScriptRequest, SocialCopyRequest, TopicRequest};

fn print_provenance<T>(result: &ContentResult<T>) {
    println!();
    println!("Provider: {}", result.used_provider);
    if result.from_cache {
        println!("Served from cache");
    }
    if result.used_fallback {
        println!("Fallback used");
        for (provider, error) in &result.errors {
            println!("  {provider}: {error}");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn script(app: &AppContext, request: ScriptRequest, json: bool) -> Result<()> {
    let result = app.content().generate_script(&request).await?;
    if json {
        return print_json(&result);
    }

    let script = &result.value;
    println!("{}", script.title);
    println!("{}", "=".repeat(script.title.chars().count().max(8)));
    println!("Hook: {}", script.hook);
    for (i, section) in script.sections.iter().enumerate() {
        println!();
        println!("[{}] {} ({}s)", i + 1, section.heading, section.duration_secs);
        println!("{}", section.narration);
        if let Some(hint) = &section.visual_hint {
            println!("  visual: {hint}");
        }
    }
    println!();
    println!("CTA: {}", script.call_to_action);
    println!("Hashtags: {}", script.hashtags.join(" "));
    println!("Estimated duration: {}s", script.estimated_duration_secs);
    print_provenance(&result);
    Ok(())
}

pub async fn social(app: &AppContext, request: SocialCopyRequest, json: bool) -> Result<()> {
    let result = app.content().generate_social_copy(&request).await?;
    if json {
        return print_json(&result);
    }

    println!("[{}]", result.value.platform);
    println!("{}", result.value.caption);
    println!("{}", result.value.hashtags.join(" "));
    print_provenance(&result);
    Ok(())
}

pub async fn topics(app: &AppContext, theme: String, count: usize, json: bool) -> Result<()> {
    let result = app
        .content()
        .suggest_topics(&TopicRequest::new(theme, count))
        .await?;
    if json {
        return print_json(&result);
    }

    for (i, topic) in result.value.iter().enumerate() {
        println!("{:>2}. {} [{}] score {:.2}", i + 1, topic.title, topic.angle, topic.score);
    }
    print_provenance(&result);
    Ok(())
}

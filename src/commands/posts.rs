use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use reelforge::app::AppContext;
use reelforge::posts::{AccountRef, PostContent, PostRequest, PostStatus};

#[allow(clippy::too_many_arguments)]
pub async fn schedule_post(
    app: &AppContext,
    text: String,
    accounts: Vec<String>,
    media: String,
    hashtags: Vec<String>,
    at: Option<String>,
    max_retries: Option<u32>,
) -> Result<()> {
    let accounts = accounts
        .iter()
        .map(|a| a.parse::<AccountRef>())
        .collect::<Result<Vec<_>, _>>()?;
    let scheduled_time = at
        .map(|at| {
            DateTime::parse_from_rfc3339(&at)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("'{at}' is not an RFC 3339 timestamp"))
        })
        .transpose()?;

    let request = PostRequest {
        content: PostContent {
            text,
            media_ref: media,
            hashtags,
            scheduled_time,
        },
        accounts,
        max_retries,
    };
    let id = app.posts().schedule(request).await?;
    app.posts().shutdown().await;

    println!("Post {id} scheduled");
    Ok(())
}

pub async fn list_posts(app: &AppContext, status: Option<String>) -> Result<()> {
    let status = status.map(|s| s.parse::<PostStatus>()).transpose()?;
    let posts = app.posts().list(status).await;
    if posts.is_empty() {
        println!("No posts");
        return Ok(());
    }

    for post in posts {
        let when = post
            .content
            .scheduled_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "now".to_string());
        println!(
            "{}  {:<10} at {}  retries {}/{}",
            post.id,
            post.status.as_str(),
            when,
            post.retries,
            post.max_retries
        );
        for account in &post.accounts {
            let key = account.key();
            match post.results.get(&key) {
                Some(result) if result.success => println!(
                    "    {key}: published {}",
                    result.post_url.as_deref().unwrap_or("")
                ),
                Some(result) => println!(
                    "    {key}: failed ({})",
                    result.error.as_deref().unwrap_or("unknown")
                ),
                None => println!("    {key}: pending"),
            }
        }
    }
    Ok(())
}

pub async fn cancel_post(app: &AppContext, id: String) -> Result<()> {
    app.posts().cancel(&id).await?;
    app.posts().shutdown().await;
    println!("Post {id} cancelled");
    Ok(())
}

//! Scheduled post records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::ValidationError;

/// `scheduled -> processing -> {completed, failed}`, with `processing -> scheduled` on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Processing,
    Completed,
    Failed,
    /// Withdrawn by the caller while still scheduled
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Processing => "processing",
            PostStatus::Completed => "completed",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Completed | PostStatus::Failed | PostStatus::Cancelled
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PostStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(PostStatus::Scheduled),
            "processing" => Ok(PostStatus::Processing),
            "completed" => Ok(PostStatus::Completed),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(ValidationError::invalid("status", format!("unknown status '{other}'"))),
        }
    }
}

/// One account on one platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub platform: String,
    pub account_id: String,
}

impl AccountRef {
    pub fn new(platform: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            account_id: account_id.into(),
        }
    }

    /// Key in [`ScheduledPost::results`]: `platform:account_id`
    pub fn key(&self) -> String {
        format!("{}:{}", self.platform, self.account_id)
    }
}

impl std::str::FromStr for AccountRef {
    type Err = ValidationError;

    /// Parse `platform:account_id`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((platform, account)) if !platform.trim().is_empty() && !account.trim().is_empty() => {
                Ok(Self::new(platform.trim().to_lowercase(), account.trim()))
            }
            _ => Err(ValidationError::invalid(
                "accounts",
                format!("'{s}' is not platform:account_id"),
            )),
        }
    }
}

/// What to publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub text: String,
    /// URL or local path of the video/image to attach
    pub media_ref: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Earliest publication time; immediately when absent
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
}

/// Caller input for [`PostScheduler::schedule`](super::PostScheduler::schedule)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRequest {
    pub content: PostContent,
    pub accounts: Vec<AccountRef>,
    /// Attempt budget; the scheduler default applies when absent
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl PostRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.accounts.is_empty() {
            return Err(ValidationError::invalid("accounts", "at least one account is required"));
        }
        if let Some(bad) = self
            .accounts
            .iter()
            .find(|a| a.platform.trim().is_empty() || a.account_id.trim().is_empty())
        {
            return Err(ValidationError::invalid(
                "accounts",
                format!("incomplete account '{}'", bad.key()),
            ));
        }
        if self.content.text.trim().is_empty() {
            return Err(ValidationError::missing("content.text"));
        }
        if !media_reachable(&self.content.media_ref) {
            return Err(ValidationError::invalid(
                "content.media_ref",
                format!("'{}' is neither an http(s) URL nor an existing file", self.content.media_ref),
            ));
        }
        if self.max_retries == Some(0) {
            return Err(ValidationError::invalid("max_retries", "must be at least 1"));
        }
        Ok(())
    }
}

fn media_reachable(media_ref: &str) -> bool {
    let media_ref = media_ref.trim();
    if media_ref.is_empty() {
        return false;
    }
    match url::Url::parse(media_ref) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.host().is_some(),
        Ok(url) if url.scheme() == "file" => url.to_file_path().is_ok_and(|p| p.is_file()),
        _ => Path::new(media_ref).is_file(),
    }
}

/// Outcome of the latest attempt for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResult {
    pub success: bool,
    pub post_url: Option<String>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl PostResult {
    pub fn published(post_url: Option<String>) -> Self {
        Self {
            success: true,
            post_url,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            post_url: None,
            error: Some(error.into()),
            attempted_at: Utc::now(),
        }
    }
}

/// A publication request tracked until every account succeeded or the budget ran out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub content: PostContent,
    pub accounts: Vec<AccountRef>,
    pub status: PostStatus,
    /// Latest result per `platform:account_id`
    #[serde(default)]
    pub results: BTreeMap<String, PostResult>,
    /// Failed attempts so far; never exceeds `max_retries`
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ScheduledPost {
    /// Scheduled and due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled
            && self.content.scheduled_time.map_or(true, |at| at <= now)
    }

    /// Accounts without a successful result yet
    pub fn pending_accounts(&self) -> Vec<AccountRef> {
        self.accounts
            .iter()
            .filter(|a| !self.results.get(&a.key()).is_some_and(|r| r.success))
            .cloned()
            .collect()
    }

    /// Settle the post after an attempt; returns the new status
    pub fn settle(&mut self, now: DateTime<Utc>) -> PostStatus {
        self.processed_at = Some(now);
        self.status = if self.pending_accounts().is_empty() {
            PostStatus::Completed
        } else {
            self.retries = (self.retries + 1).min(self.max_retries);
            if self.retries >= self.max_retries {
                PostStatus::Failed
            } else {
                PostStatus::Scheduled
            }
        };
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(max_retries: u32) -> ScheduledPost {
        ScheduledPost {
            id: "p1".into(),
            content: PostContent {
                text: "hi".into(),
                media_ref: "https://cdn.test/v.mp4".into(),
                hashtags: vec![],
                scheduled_time: None,
            },
            accounts: vec![AccountRef::new("x", "a"), AccountRef::new("x", "b")],
            status: PostStatus::Processing,
            results: BTreeMap::new(),
            retries: 0,
            max_retries,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn test_account_parse() {
        let account: AccountRef = "Instagram:brand".parse().unwrap();
        assert_eq!(account, AccountRef::new("instagram", "brand"));
        assert!("nocolon".parse::<AccountRef>().is_err());
        assert!(":x".parse::<AccountRef>().is_err());
    }

    #[test]
    fn test_settle_retry_then_fail() {
        let mut post = post(2);
        post.results.insert("x:a".into(), PostResult::published(None));
        post.results.insert("x:b".into(), PostResult::failed("down"));

        assert_eq!(post.settle(Utc::now()), PostStatus::Scheduled);
        assert_eq!(post.retries, 1);
        assert_eq!(post.pending_accounts(), vec![AccountRef::new("x", "b")]);

        post.status = PostStatus::Processing;
        assert_eq!(post.settle(Utc::now()), PostStatus::Failed);
        assert_eq!(post.retries, 2);
    }

    #[test]
    fn test_settle_complete() {
        let mut post = post(3);
        post.results.insert("x:a".into(), PostResult::published(None));
        post.results.insert("x:b".into(), PostResult::published(Some("u".into())));
        assert_eq!(post.settle(Utc::now()), PostStatus::Completed);
        assert_eq!(post.retries, 0);
    }

    #[test]
    fn test_due() {
        let mut post = post(3);
        post.status = PostStatus::Scheduled;
        let now = Utc::now();
        assert!(post.is_due(now));
        post.content.scheduled_time = Some(now + chrono::Duration::minutes(5));
        assert!(!post.is_due(now));
    }

    #[test]
    fn test_request_validation() {
        let mut request = PostRequest {
            content: post(3).content,
            accounts: vec![],
            max_retries: None,
        };
        assert_eq!(request.validate().unwrap_err().field, "accounts");

        request.accounts.push(AccountRef::new("x", "a"));
        assert!(request.validate().is_ok());

        request.content.media_ref = "/definitely/not/here.mp4".into();
        assert_eq!(request.validate().unwrap_err().field, "content.media_ref");

        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        request.content.media_ref = file.display().to_string();
        assert!(request.validate().is_ok());

        request.max_retries = Some(0);
        assert_eq!(request.validate().unwrap_err().field, "max_retries");
    }
}

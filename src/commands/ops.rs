use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reelforge::app::AppContext;
use reelforge::backup::BackupManager;
use reelforge::config::Config;
use reelforge::content::{ScriptRequest, SocialCopyRequest, TopicRequest};
use reelforge::resilience::{ServiceStatistics, SystemStatus};
use reelforge::soak::{self, FnTarget, SoakConfig, SoakRunner, SoakTarget, SoakVerdict};

// ============================================================================
// Health and statistics
// ============================================================================

fn print_status(status: &SystemStatus) {
    println!(
        "System: {}",
        if status.system_healthy {
            "healthy"
        } else {
            "UNHEALTHY"
        }
    );
    println!(
        "{:<22} {:>4} {:>8} {:>9} {:>10} {:>9}",
        "service", "crit", "attempts", "success", "avg ms", "fallback"
    );
    for s in &status.services {
        print_service(s);
    }
}

fn print_service(s: &ServiceStatistics) {
    println!(
        "{:<22} {:>4} {:>8} {:>8.1}% {:>10.0} {:>8.1}%{}",
        s.service,
        if s.critical { "yes" } else { "" },
        s.total_attempts,
        s.success_rate * 100.0,
        s.avg_response_time_ms,
        s.fallback_usage_rate * 100.0,
        s.last_error
            .as_deref()
            .filter(|_| !s.is_available)
            .map(|e| format!("  ({e})"))
            .unwrap_or_default(),
    );
}

/// Run probes now (all, or one service) and print the aggregate
pub async fn health(app: &AppContext, service: Option<String>, json: bool) -> Result<()> {
    match service {
        Some(service) => {
            if app.monitor().run(&service).await.is_none() {
                bail!(
                    "no probe registered for '{service}' (known: {})",
                    app.monitor().services().join(", ")
                );
            }
        }
        None => {
            app.monitor().run_all().await;
        }
    }

    let status = app.monitor().get_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    if !status.system_healthy {
        bail!("system unhealthy");
    }
    Ok(())
}

/// Print persisted statistics without probing
pub fn stats(app: &AppContext, soak_stats: bool) -> Result<()> {
    if !soak_stats {
        print_status(&app.monitor().get_status());
        return Ok(());
    }

    let path = app.config().storage.soak_stats();
    let Some(stats) = soak::load_statistics(&path)? else {
        println!("No soak statistics at {}", path.display());
        return Ok(());
    };
    println!(
        "{:<12} {:>8} {:>9} {:>8} {:>7} {:>6}",
        "module", "attempts", "success", "failures", "streak", "passed"
    );
    for (module, s) in &stats.modules {
        println!(
            "{:<12} {:>8} {:>8.1}% {:>8} {:>7} {:>6}",
            module,
            s.attempts,
            s.success_rate() * 100.0,
            s.failures,
            s.longest_streak,
            if s.passed { "yes" } else { "no" }
        );
        for (error, count) in &s.errors {
            println!("    {count:>5}x {error}");
        }
    }
    Ok(())
}

// ============================================================================
// Soak
// ============================================================================

const SOAK_MODULES: &[&str] = &["script", "social", "topics", "cache"];

fn soak_target(app: &AppContext, module: &str, theme: &str) -> Option<Box<dyn SoakTarget>> {
    let content = Arc::clone(app.content());
    let theme = theme.to_string();
    let target: Box<dyn SoakTarget> = match module {
        "script" => Box::new(FnTarget::new("script", move || {
            let content = Arc::clone(&content);
            let request = ScriptRequest::new(theme.clone());
            async move {
                let result = content
                    .generate_script(&request)
                    .await
                    .map_err(|e| e.to_string())?;
                if result.value.sections.is_empty() {
                    return Err("script without sections".to_string());
                }
                Ok(())
            }
        })),
        "social" => Box::new(FnTarget::new("social", move || {
            let content = Arc::clone(&content);
            let request = SocialCopyRequest {
                platform: "instagram".to_string(),
                topic: theme.clone(),
                summary: None,
                tone: None,
            };
            async move {
                let result = content
                    .generate_social_copy(&request)
                    .await
                    .map_err(|e| e.to_string())?;
                if result.value.caption.trim().is_empty() {
                    return Err("empty caption".to_string());
                }
                Ok(())
            }
        })),
        "topics" => Box::new(FnTarget::new("topics", move || {
            let content = Arc::clone(&content);
            let request = TopicRequest::new(theme.clone(), 5);
            async move {
                let result = content
                    .suggest_topics(&request)
                    .await
                    .map_err(|e| e.to_string())?;
                if result.value.is_empty() {
                    return Err("no topics".to_string());
                }
                Ok(())
            }
        })),
        "cache" => {
            let cache = Arc::clone(app.cache());
            Box::new(FnTarget::new("cache", move || {
                let cache = Arc::clone(&cache);
                async move {
                    let key = format!("soak:{}", uuid::Uuid::new_v4());
                    let value = serde_json::json!({ "key": key });
                    cache.set(&key, value.clone(), Duration::from_secs(60));
                    let found = cache.get(&key);
                    cache.remove(&key);
                    if found.as_ref() == Some(&value) {
                        Ok(())
                    } else {
                        Err("cache lost a fresh entry".to_string())
                    }
                }
            }))
        }
        _ => return None,
    };
    Some(target)
}

pub async fn soak(
    app: &AppContext,
    modules: Vec<String>,
    theme: String,
    target_consecutive: u32,
    max_consecutive_failures: u32,
    pause: Duration,
) -> Result<()> {
    let modules = if modules.is_empty() {
        SOAK_MODULES.iter().map(|m| m.to_string()).collect()
    } else {
        modules
    };
    let mut targets = Vec::with_capacity(modules.len());
    for module in &modules {
        match soak_target(app, module, &theme) {
            Some(target) => targets.push(target),
            None => bail!(
                "unknown soak module '{module}' (expected one of {})",
                SOAK_MODULES.join(", ")
            ),
        }
    }

    let mut runner = SoakRunner::new(SoakConfig {
        target_consecutive,
        max_consecutive_failures,
        pause,
        stats_path: Some(app.config().storage.soak_stats()),
    })?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut aborted = Vec::new();
    for target in &targets {
        let report = runner.run(target.as_ref(), &cancel).await;
        println!(
            "{:<8} {:?} after {} iterations ({} failures)",
            report.module, report.verdict, report.iterations, report.failures
        );
        match report.verdict {
            SoakVerdict::Passed => {}
            SoakVerdict::Aborted => aborted.push(report.module),
            SoakVerdict::Cancelled => break,
        }
    }

    if !aborted.is_empty() {
        bail!("soak aborted for: {}", aborted.join(", "));
    }
    Ok(())
}

// ============================================================================
// Backups
// ============================================================================

fn backups(config: &Config) -> BackupManager {
    BackupManager::new(&config.storage.data_dir, &config.storage.backup_dir)
}

pub fn backup_create(config: &Config, name: Option<String>) -> Result<()> {
    let info = backups(config).create(name.as_deref())?;
    println!("Backup '{}' created with {} files", info.name, info.files.len());
    Ok(())
}

pub fn backup_list(config: &Config) -> Result<()> {
    let list = backups(config).list()?;
    if list.is_empty() {
        println!("No backups found");
    }
    for (i, info) in list.iter().enumerate() {
        println!(
            "{:>3}. {} (created {}, {} files)",
            i + 1,
            info.name,
            info.created_at.format("%Y-%m-%d %H:%M:%S"),
            info.files.len()
        );
    }
    Ok(())
}

pub fn backup_restore(config: &Config, name: String) -> Result<()> {
    let info = backups(config).restore(&name)?;
    println!("Restored '{}' ({} files)", info.name, info.files.len());
    Ok(())
}

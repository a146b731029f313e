//! Cache command - inspect and clear the output cache

use crate::cache::OutputCache;
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::KilnResult;
use crate::service::GenerationService;
use crate::ui::{self, UiContext};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KilnResult<()> {
    match args.action {
        CacheAction::Stats { format } => {
            show_stats(&OutputCache::from_config(config), config, format).await
        }
        CacheAction::Clear { yes } => clear(config, yes).await,
    }
}

async fn show_stats(cache: &OutputCache, config: &Config, format: OutputFormat) -> KilnResult<()> {
    let stats = cache.stats().await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "dir": cache.dir().display().to_string(),
                "enabled": config.cache.enabled,
                "entries": stats.entries,
                "bytes": stats.bytes,
                "max_entries": config.cache.max_entries,
                "max_age_secs": config.cache.max_age_secs,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Plain => {
            let ctx = UiContext::detect();
            ui::section(&ctx, "Output cache");
            ui::key_value(&ctx, "Directory", &cache.dir().display().to_string());
            ui::key_value_status(
                &ctx,
                "Enabled",
                if config.cache.enabled { "yes" } else { "no" },
                config.cache.enabled,
            );
            ui::key_value(
                &ctx,
                "Entries",
                &format!("{} / {}", stats.entries, config.cache.max_entries),
            );
            ui::key_value(&ctx, "Size", &format_bytes(stats.bytes));
            ui::key_value(&ctx, "Max age", &format!("{}s", config.cache.max_age_secs));
        }
    }

    Ok(())
}

async fn clear(config: &Config, yes: bool) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let service = GenerationService::from_config(config);

    if !ui::confirm(&ctx, "Remove every cached output?", false).await? {
        ui::step_warn_hint(&ctx, "Cache not cleared", "Pass --yes to skip the prompt");
        return Ok(());
    }

    service.clear_cache().await?;
    ui::step_ok_detail(
        &ctx,
        "Output cache cleared",
        &service.cache().dir().display().to_string(),
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < KIB * KIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{:.1} MiB", bytes / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}

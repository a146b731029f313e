//! Template command - inspect, build and remove the dependency template

use crate::cache::TemplateState;
use crate::cli::args::{TemplateAction, TemplateArgs};
use crate::config::Config;
use crate::error::KilnResult;
use crate::service::GenerationService;
use crate::ui::{self, TaskSpinner, UiContext};
use tokio_util::sync::CancellationToken;

/// Execute the template command
pub async fn execute(args: TemplateArgs, config: &Config) -> KilnResult<()> {
    let service = GenerationService::from_config(config);
    let ctx = UiContext::detect();

    match args.action {
        TemplateAction::Status => {
            status(&ctx, &service, config);
            Ok(())
        }
        TemplateAction::Warm => warm(&ctx, &service, config).await,
        TemplateAction::Clear { yes } => clear(&ctx.with_auto_yes(yes), &service).await,
    }
}

fn status(ctx: &UiContext, service: &GenerationService, config: &Config) {
    let template = service.template();
    let state = template.state();

    ui::section(ctx, "Dependency template");
    ui::key_value(ctx, "Directory", &template.root().display().to_string());
    ui::key_value(ctx, "Dependency", &config.toolchain.dependency.name);
    ui::key_value_status(ctx, "State", &state.to_string(), state == TemplateState::Ready);

    if !config.template.enabled {
        ui::step_warn_hint(ctx, "Template disabled", "Set template.enabled = true");
    } else if state == TemplateState::Missing {
        ui::remark(ctx, "Run: kiln template warm");
    }
}

async fn warm(ctx: &UiContext, service: &GenerationService, config: &Config) -> KilnResult<()> {
    if !config.template.enabled {
        ui::step_warn_hint(ctx, "Template disabled", "Set template.enabled = true");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start(&format!(
        "Building {} template...",
        config.toolchain.dependency.name
    ));

    match service.warm_template(&cancel).await {
        Ok(true) => {
            spinner.stop("Template built");
            Ok(())
        }
        Ok(false) => {
            spinner.stop("Template already ready");
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Template build failed");
            Err(e)
        }
    }
}

async fn clear(ctx: &UiContext, service: &GenerationService) -> KilnResult<()> {
    if !ui::confirm(ctx, "Delete the dependency template?", false).await? {
        ui::step_warn_hint(ctx, "Template kept", "Pass --yes to skip the prompt");
        return Ok(());
    }

    service.clear_template().await?;
    ui::step_ok_detail(
        ctx,
        "Template removed",
        &service.template().root().display().to_string(),
    );
    Ok(())
}

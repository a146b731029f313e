//! Generate command - build and run one script

use crate::cli::args::{GenerateArgs, OutputFormat};
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::request::GenerateResponse;
use crate::service::GenerationService;
use crate::ui::{UiContext, WaitSpinner};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute the generate command
pub async fn execute(args: GenerateArgs, config: &Config) -> KilnResult<()> {
    let source = read_source(args.file.as_deref()).await?;
    let service = GenerationService::from_config(config);

    // ctrl-c kills the build instead of orphaning it
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let ctx = UiContext::detect();
    let spinner = WaitSpinner::new(&ctx, "Building and running");
    let outcome = service
        .generate_with_cancel(&source, args.timeout, &cancel)
        .await;
    spinner.finish();

    match args.format {
        OutputFormat::Plain => {
            let generated = outcome?;
            debug!(
                cached = generated.cached,
                elapsed_secs = generated.elapsed.as_secs_f64(),
                "Generated"
            );
            println!("{}", generated.output);
            Ok(())
        }
        OutputFormat::Json => {
            let (response, result) = match outcome {
                Ok(generated) => (GenerateResponse::success(generated.output), Ok(())),
                Err(e) => (GenerateResponse::failure(&e), Err(e)),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            result
        }
    }
}

async fn read_source(file: Option<&Path>) -> KilnResult<String> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading {}", path.display()), e)),
        _ => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .map_err(|e| KilnError::io("reading stdin", e))?;
            Ok(source)
        }
    }
}

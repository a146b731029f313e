//! Serve command - run the HTTP API

use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::KilnResult;
use crate::server;
use crate::service::GenerationService;
use std::sync::Arc;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> KilnResult<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let warm = config.template.enabled && config.template.warm_on_start && !args.no_warm;
    let service = Arc::new(GenerationService::from_config(config));

    server::serve(service, &bind, config.server.max_body_bytes, warm).await
}

//! The build-and-run pipeline
//!
//! [`GenerationService`] is the one entry point every transport talks to:
//!
//! 1. validate the input (size, timeout, deny-list)
//! 2. return a cached output when the content hash is known
//! 3. make sure the dependency template is usable, falling back to the remote
//!    dependency when it is not
//! 4. materialize a workspace, build it, run it
//! 5. extract the program's output, cache it
//!
//! Steps 3 and 4 share the request's deadline. A template build outlives the
//! request that started it, so a short request never throws away the work.
//! The workspace is dropped, and therefore deleted, on every exit path.

use crate::audit::{AuditEvent, AuditLog};
use crate::cache::{content_hash, OutputCache, TemplateCache};
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::metrics::PerformanceMetrics;
use crate::process::{CommandRunner, CommandSpec, ProcessResult, TokioRunner};
use crate::request::{GenerationRequest, RequestValidator};
use crate::workspace::{DependencyRef, WorkspaceBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Successful generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Trimmed text the program printed after the sentinel
    pub output: String,
    /// Served from the output cache without building
    pub cached: bool,
    /// Wall time of the whole call
    pub elapsed: Duration,
}

/// Sandboxed build-and-run service
pub struct GenerationService {
    validator: RequestValidator,
    cache: OutputCache,
    cache_enabled: bool,
    template: TemplateCache,
    template_enabled: bool,
    workspaces: WorkspaceBuilder,
    runner: Arc<dyn CommandRunner>,
    metrics: Arc<PerformanceMetrics>,
    audit: AuditLog,
    sentinel: String,
}

impl GenerationService {
    /// Create a service running commands as local processes
    pub fn from_config(config: &Config) -> Self {
        Self::with_runner(config, Arc::new(TokioRunner::new()))
    }

    /// Create a service with a custom command runner
    pub fn with_runner(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            validator: RequestValidator::new(&config.limits),
            cache: OutputCache::from_config(config),
            cache_enabled: config.cache.enabled,
            template: TemplateCache::from_config(config),
            template_enabled: config.template.enabled,
            workspaces: WorkspaceBuilder::from_config(config),
            runner,
            metrics: Arc::new(PerformanceMetrics::default()),
            audit: AuditLog::new(config),
            sentinel: config.toolchain.sentinel.clone(),
        }
    }

    /// Replace the audit log
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn metrics(&self) -> &Arc<PerformanceMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &OutputCache {
        &self.cache
    }

    pub fn template(&self) -> &TemplateCache {
        &self.template
    }

    /// Validate raw input and generate
    pub async fn generate(&self, source: &str, timeout_secs: Option<f64>) -> KilnResult<Generated> {
        let request = self.validator.validate(source, timeout_secs)?;
        self.generate_request(&request, &CancellationToken::new())
            .await
    }

    /// Validate raw input and generate, stopping early when `cancel` fires
    pub async fn generate_with_cancel(
        &self,
        source: &str,
        timeout_secs: Option<f64>,
        cancel: &CancellationToken,
    ) -> KilnResult<Generated> {
        let request = self.validator.validate(source, timeout_secs)?;
        self.generate_request(&request, cancel).await
    }

    /// Generate output for an already validated request
    pub async fn generate_request(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> KilnResult<Generated> {
        let started = Instant::now();
        let hash = content_hash(request.source());
        let short = &hash[..12];

        if self.cache_enabled {
            let lookup = Instant::now();
            let hit = self.cache.get(request.source()).await.log("cache lookup");
            self.metrics.record("cache_lookup", lookup.elapsed());

            if let Some(output) = hit {
                info!(hash = short, "Cache hit");
                let elapsed = started.elapsed();
                self.metrics.record("generate", elapsed);
                return Ok(Generated {
                    output,
                    cached: true,
                    elapsed,
                });
            }
        }

        let outcome = self.build_and_run(request, cancel).await;
        let elapsed = started.elapsed();
        self.metrics.record("generate", elapsed);

        match outcome {
            Ok(output) => {
                info!(
                    hash = short,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Generation succeeded"
                );
                if self.cache_enabled {
                    self.cache
                        .put(request.source(), &output)
                        .await
                        .log("cache store");
                }
                self.audit
                    .record(AuditEvent::GenerationCompleted {
                        hash,
                        elapsed_secs: elapsed.as_secs_f64(),
                    })
                    .await;
                Ok(Generated {
                    output,
                    cached: false,
                    elapsed,
                })
            }
            Err(e) => {
                warn!(hash = short, "Generation failed: {}", e);
                self.audit
                    .record(AuditEvent::GenerationFailed {
                        hash,
                        error: e.to_string(),
                        elapsed_secs: elapsed.as_secs_f64(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn build_and_run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> KilnResult<String> {
        // Template, build and run share one deadline
        let deadline = Instant::now() + request.timeout();

        let dependency = self.dependency_ref(request, deadline, cancel).await?;

        let step = Instant::now();
        let workspace = self
            .workspaces
            .create(request.source(), dependency)
            .await?
            .log("workspace hardening");
        self.metrics.record("workspace_create", step.elapsed());

        let build = self
            .run_stage(&self.workspaces.build_command(&workspace), request, deadline, cancel)
            .await?;
        if !build.success() {
            return Err(KilnError::Build {
                output: build.combined_output(),
            });
        }

        let run = self
            .run_stage(&self.workspaces.run_command(&workspace), request, deadline, cancel)
            .await?;
        if !run.success() {
            return Err(KilnError::Runtime {
                code: run.exit_code,
                stderr: run.stderr.unwrap_or_default().trim().to_string(),
            });
        }

        let stdout = run.stdout.ok_or(KilnError::NoOutput)?;
        Ok(extract_output(&stdout, &self.sentinel))
    }

    /// Run one stage with whatever is left of the deadline
    async fn run_stage(
        &self,
        spec: &CommandSpec,
        request: &GenerationRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> KilnResult<ProcessResult> {
        let total = request.timeout().as_secs_f64();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(KilnError::timeout(spec.stage, total));
        }

        let step = Instant::now();
        let result = self.runner.run(spec, remaining, cancel).await;
        self.metrics.record(spec.stage, step.elapsed());

        match result {
            Err(KilnError::Timeout { stage, .. }) => Err(KilnError::timeout(stage, total)),
            other => other,
        }
    }

    /// Pick the dependency reference for a new workspace
    ///
    /// Template problems only cost speed. Running out of time or being
    /// cancelled while waiting for the template fails the request, but the
    /// template build itself keeps going in the background.
    async fn dependency_ref(
        &self,
        request: &GenerationRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> KilnResult<DependencyRef> {
        if !self.template_enabled {
            return Ok(DependencyRef::Remote);
        }
        if self.template.is_ready() {
            return Ok(DependencyRef::Local);
        }

        let ensure = tokio::spawn(self.ensure_template());
        let outcome = tokio::select! {
            joined = ensure => joined
                .map_err(|e| KilnError::Internal(format!("template task failed: {}", e)))
                .and_then(|result| result),
            () = tokio::time::sleep_until(deadline) => {
                warn!("Template not ready within the request deadline");
                return Err(KilnError::timeout("template", request.timeout().as_secs_f64()));
            }
            () = cancel.cancelled() => return Err(KilnError::Cancelled),
        };

        match outcome {
            Ok(_) => Ok(DependencyRef::Local),
            Err(e) => {
                warn!("Dependency template unavailable, using remote dependency: {}", e);
                Ok(DependencyRef::Remote)
            }
        }
    }

    /// Detached template build, independent of any one request
    fn ensure_template(&self) -> impl Future<Output = KilnResult<bool>> + Send + 'static {
        let template = self.template.clone();
        let runner = Arc::clone(&self.runner);
        let metrics = Arc::clone(&self.metrics);
        let audit = self.audit.clone();

        async move {
            let step = Instant::now();
            let built = template
                .ensure(runner.as_ref(), &CancellationToken::new())
                .await?;
            metrics.record("template_ensure", step.elapsed());
            if built {
                audit_template_built(&audit, &template).await;
            }
            Ok(built)
        }
    }

    /// Build the template now if it is enabled and not built yet
    ///
    /// Returns whether a build happened.
    pub async fn warm_template(&self, cancel: &CancellationToken) -> KilnResult<bool> {
        if !self.template_enabled {
            debug!("Template disabled, nothing to warm");
            return Ok(false);
        }

        let step = Instant::now();
        let built = self.template.ensure(self.runner.as_ref(), cancel).await?;
        self.metrics.record("template_ensure", step.elapsed());
        if built {
            audit_template_built(&self.audit, &self.template).await;
        }
        Ok(built)
    }

    /// Delete the template so the next request rebuilds it
    pub async fn clear_template(&self) -> KilnResult<()> {
        self.template.clear().await?;
        self.audit
            .record(AuditEvent::TemplateCleared {
                root: self.template.root().to_path_buf(),
            })
            .await;
        Ok(())
    }

    /// Drop every cached output
    pub async fn clear_cache(&self) -> KilnResult<()> {
        self.cache.clear().await?;
        info!(dir = %self.cache.dir().display(), "Output cache cleared");
        self.audit
            .record(AuditEvent::CacheCleared {
                dir: self.cache.dir().to_path_buf(),
            })
            .await;
        Ok(())
    }
}

async fn audit_template_built(audit: &AuditLog, template: &TemplateCache) {
    audit
        .record(AuditEvent::TemplateBuilt {
            root: template.root().to_path_buf(),
        })
        .await;
}

/// Text after the last sentinel line, trimmed; all of stdout when absent
pub fn extract_output(stdout: &str, sentinel: &str) -> String {
    let mut result = stdout;
    let mut offset = 0;

    for line in stdout.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == sentinel {
            result = &stdout[offset..];
        }
    }

    result.trim().to_string()
}

//! Per-request workspaces
//!
//! Each request gets a freshly created directory holding exactly one manifest
//! and one source file. The directory is owned by the [`Workspace`] value and
//! removed when it is dropped, whichever way the request ends. So are the
//! build outputs matching `toolchain.artifacts`, which a toolchain sharing the
//! template's target dir leaves outside the workspace.

use crate::config::schema::DependencyConfig;
use crate::config::{Config, ConfigManager};
use crate::error::{BestEffort, KilnError, KilnResult};
use crate::process::CommandSpec;
use crate::render::{render, Vars};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which dependency reference the manifest gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyRef {
    /// Link against the prebuilt template
    Local,
    /// Fetch and build the dependency from its remote source
    Remote,
}

/// A materialized workspace; deleted on drop
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    manifest_file: PathBuf,
    source_file: PathBuf,
    package: String,
    artifacts: Vec<String>,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_file(&self) -> &Path {
        &self.manifest_file
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Unique package name, also the name of the built program
    pub fn package(&self) -> &str {
        &self.package
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(workspace = %self.root.display(), "Removed workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.root.display(), e),
        }

        for pattern in &self.artifacts {
            remove_matches(pattern);
        }
    }
}

fn remove_matches(pattern: &str) {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Invalid artifact pattern {}: {}", pattern, e);
            return;
        }
    };

    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to read build artifact: {}", e);
                continue;
            }
        };
        let removed = if path.is_dir() && !path.is_symlink() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => debug!(artifact = %path.display(), "Removed build artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove build artifact {}: {}", path.display(), e),
        }
    }
}

/// Materializes workspaces and the commands that build and run them
#[derive(Debug, Clone)]
pub struct WorkspaceBuilder {
    root: PathBuf,
    template_root: String,
    build_command: String,
    build_args: Vec<String>,
    run_command: String,
    run_args: Vec<String>,
    env: Vec<(String, String)>,
    manifest_file: String,
    manifest: String,
    source_file: String,
    source: String,
    sentinel: String,
    artifacts: Vec<String>,
    dependency: DependencyConfig,
}

impl WorkspaceBuilder {
    /// Create a builder from config
    pub fn from_config(config: &Config) -> Self {
        let toolchain = &config.toolchain;
        Self {
            root: ConfigManager::workspace_root(config),
            template_root: ConfigManager::template_dir(config).display().to_string(),
            build_command: toolchain.build_command.clone(),
            build_args: toolchain.build_args.clone(),
            run_command: toolchain.run_command.clone(),
            run_args: toolchain.run_args.clone(),
            env: toolchain
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            manifest_file: toolchain.manifest_file.clone(),
            manifest: toolchain.manifest.clone(),
            source_file: toolchain.source_file.clone(),
            source: toolchain.source.clone(),
            sentinel: toolchain.sentinel.clone(),
            artifacts: toolchain.artifacts.clone(),
            dependency: toolchain.dependency.clone(),
        }
    }

    /// Shared root all workspaces are created under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a workspace wrapping `source`
    ///
    /// Failing to restrict permissions is reported as a warning on the
    /// returned value; failing to create or write the workspace is an error.
    pub async fn create(
        &self,
        source: &str,
        dependency: DependencyRef,
    ) -> KilnResult<BestEffort<Workspace>> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| KilnError::WorkspaceCreate {
                path: self.root.clone(),
                source: e,
            })?;

        let id = Uuid::new_v4();
        let dir = self.root.join(format!("kiln-{}", id));
        fs::create_dir(&dir)
            .await
            .map_err(|e| KilnError::WorkspaceCreate {
                path: dir.clone(),
                source: e,
            })?;

        // From here on the directory is owned and cleaned up by `workspace`
        let package = format!("kiln_{}", id.simple());
        let workspace = Workspace {
            manifest_file: dir.join(&self.manifest_file),
            source_file: dir.join(&self.source_file),
            artifacts: self.artifact_patterns(&package, &dir),
            package,
            root: dir,
        };

        let hardening = restrict_permissions(&workspace.root).await;

        let root_str = workspace.root.display().to_string();
        let dependency_ref = self.dependency_ref(dependency);
        let vars = self
            .vars(&workspace, &root_str)
            .with("dependency", &dependency_ref)
            .with("sentinel", &self.sentinel)
            .with("source", source);

        write_file(&workspace.manifest_file, &render(&self.manifest, &vars)).await?;
        write_file(&workspace.source_file, &render(&self.source, &vars)).await?;

        debug!(
            workspace = %workspace.root.display(),
            dependency = ?dependency,
            "Created workspace"
        );

        Ok(BestEffort {
            value: workspace,
            warning: hardening.warning,
        })
    }

    /// Command that builds a workspace
    pub fn build_command(&self, workspace: &Workspace) -> CommandSpec {
        self.command("build", &self.build_command, &self.build_args, workspace)
    }

    /// Command that runs a built workspace
    pub fn run_command(&self, workspace: &Workspace) -> CommandSpec {
        self.command("run", &self.run_command, &self.run_args, workspace)
    }

    fn command(
        &self,
        stage: &'static str,
        program: &str,
        args: &[String],
        workspace: &Workspace,
    ) -> CommandSpec {
        let root_str = workspace.root.display().to_string();
        let vars = self.vars(workspace, &root_str);
        CommandSpec::new(stage, render(program, &vars), &workspace.root)
            .args(args.iter().map(|arg| render(arg, &vars)))
            .envs(self.env.iter().map(|(k, v)| (k.clone(), render(v, &vars))))
    }

    fn vars<'a>(&'a self, workspace: &'a Workspace, root_str: &'a str) -> Vars<'a> {
        Vars::new()
            .with("package", &workspace.package)
            .with("workspace", root_str)
            .with("template", &self.template_root)
            .with("dependency_name", &self.dependency.name)
            .with("dependency_remote", &self.dependency.remote)
    }

    /// Artifact globs for one workspace, with substituted paths escaped
    fn artifact_patterns(&self, package: &str, root: &Path) -> Vec<String> {
        let template = glob::Pattern::escape(&self.template_root);
        let workspace = glob::Pattern::escape(&root.display().to_string());
        let vars = Vars::new()
            .with("package", package)
            .with("workspace", &workspace)
            .with("template", &template);
        self.artifacts.iter().map(|p| render(p, &vars)).collect()
    }

    fn dependency_ref(&self, dependency: DependencyRef) -> String {
        match dependency {
            DependencyRef::Local => render(
                &self.dependency.local,
                &Vars::new().with("template", &self.template_root),
            ),
            DependencyRef::Remote => self.dependency.remote.clone(),
        }
    }
}

async fn write_file(path: &Path, contents: &str) -> KilnResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
}

/// Owner-only access to the workspace
async fn restrict_permissions(dir: &Path) -> BestEffort {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = fs::set_permissions(dir, perms).await {
            return BestEffort::degraded(
                (),
                format!("could not restrict permissions on {}: {}", dir.display(), e),
            );
        }
    }
    #[cfg(not(unix))]
    let _ = dir;

    BestEffort::ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sh_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_manifest_and_source() {
        let dir = TempDir::new().unwrap();
        let builder = WorkspaceBuilder::from_config(&sh_config(dir.path()));

        let workspace = builder
            .create("print the value 42", DependencyRef::Remote)
            .await
            .unwrap()
            .log("workspace");

        assert!(workspace.root().starts_with(builder.root()));
        let manifest = std::fs::read_to_string(workspace.manifest_file()).unwrap();
        assert!(manifest.contains(workspace.package()));
        assert!(manifest.contains("dependency = \"remote\""));

        let source = std::fs::read_to_string(workspace.source_file()).unwrap();
        assert!(source.contains("print the value 42"));
        assert!(source.contains("echo '=== KILN OUTPUT ==='"));

        let entries = std::fs::read_dir(workspace.root()).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[tokio::test]
    async fn local_dependency_points_at_template() {
        let dir = TempDir::new().unwrap();
        let config = sh_config(dir.path());
        let builder = WorkspaceBuilder::from_config(&config);

        let workspace = builder
            .create("print 1", DependencyRef::Local)
            .await
            .unwrap()
            .log("workspace");

        let manifest = std::fs::read_to_string(workspace.manifest_file()).unwrap();
        let template = ConfigManager::template_dir(&config);
        assert!(manifest.contains(&template.display().to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workspace_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let builder = WorkspaceBuilder::from_config(&sh_config(dir.path()));
        let created = builder.create("print 1", DependencyRef::Remote).await.unwrap();
        assert!(created.warning.is_none());

        let mode = std::fs::metadata(created.value.root())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn workspaces_are_unique_and_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let builder = WorkspaceBuilder::from_config(&sh_config(dir.path()));

        let a = builder.create("print 1", DependencyRef::Remote).await.unwrap().value;
        let b = builder.create("print 1", DependencyRef::Remote).await.unwrap().value;
        assert_ne!(a.root(), b.root());
        assert_ne!(a.package(), b.package());

        let a_root = a.root().to_path_buf();
        drop(a);
        assert!(!a_root.exists());
        assert!(b.root().exists());
    }

    #[tokio::test]
    async fn drop_removes_build_artifacts_outside_the_workspace() {
        let dir = TempDir::new().unwrap();
        let mut config = sh_config(dir.path());
        // Glob metacharacters in the template path must match literally
        config.template.dir = Some(dir.path().join("template[1]"));
        config.toolchain.artifacts = vec![
            "{{template}}/out/{{package}}*".to_string(),
            "{{template}}/out/deps/{{package}}-*".to_string(),
        ];
        let builder = WorkspaceBuilder::from_config(&config);
        let workspace = builder
            .create("print 1", DependencyRef::Local)
            .await
            .unwrap()
            .value;

        let out = ConfigManager::template_dir(&config).join("out");
        let package = workspace.package().to_string();
        std::fs::create_dir_all(out.join("deps").join(format!("{package}-1a2b"))).unwrap();
        std::fs::write(out.join(&package), "bin").unwrap();
        std::fs::write(out.join(format!("{package}.d")), "deps").unwrap();
        std::fs::write(out.join("shared.rlib"), "keep").unwrap();

        drop(workspace);

        assert!(!out.join(&package).exists());
        assert!(!out.join(format!("{package}.d")).exists());
        assert!(!out.join("deps").join(format!("{package}-1a2b")).exists());
        assert!(out.join("shared.rlib").exists());
    }

    #[tokio::test]
    async fn commands_are_rendered_for_the_workspace() {
        let dir = TempDir::new().unwrap();
        let mut config = sh_config(dir.path());
        config
            .toolchain
            .env
            .insert("KILN_PACKAGE".to_string(), "{{package}}".to_string());
        let builder = WorkspaceBuilder::from_config(&config);
        let workspace = builder
            .create("print 1", DependencyRef::Remote)
            .await
            .unwrap()
            .value;

        let build = builder.build_command(&workspace);
        assert_eq!(build.stage, "build");
        assert_eq!(build.to_string(), "sh -n main.sh");
        assert_eq!(build.cwd, workspace.root());
        assert!(build
            .env
            .contains(&("KILN_PACKAGE".to_string(), workspace.package().to_string())));

        let run = builder.run_command(&workspace);
        assert_eq!(run.stage, "run");
        assert_eq!(run.to_string(), "sh main.sh");
    }

    #[tokio::test]
    async fn placeholders_in_source_stay_literal() {
        let dir = TempDir::new().unwrap();
        let builder = WorkspaceBuilder::from_config(&sh_config(dir.path()));
        let workspace = builder
            .create("print {{sentinel}}", DependencyRef::Remote)
            .await
            .unwrap()
            .value;

        let source = std::fs::read_to_string(workspace.source_file()).unwrap();
        assert!(source.contains("print {{sentinel}}"));
    }
}

//! Configuration schema for Kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP transport settings
    pub server: ServerConfig,

    /// Request limits and the deny-list
    pub limits: LimitsConfig,

    /// Output cache settings
    pub cache: CacheConfig,

    /// Prebuilt dependency template settings
    pub template: TemplateConfig,

    /// Per-request workspace settings
    pub workspace: WorkspaceConfig,

    /// External build/run toolchain
    pub toolchain: ToolchainConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,

    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_body_bytes: 256 * 1024,
        }
    }
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum trimmed source size in bytes
    pub max_source_bytes: usize,

    /// Upper bound for a request timeout
    pub max_timeout_secs: f64,

    /// Timeout used when a request does not specify one
    pub default_timeout_secs: f64,

    /// Substrings that cause a request to be rejected outright.
    /// This is a coarse filter, not an isolation boundary.
    pub deny_patterns: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 100_000,
            max_timeout_secs: 240.0,
            default_timeout_secs: 240.0,
            deny_patterns: [
                "system(",
                "popen(",
                "fork(",
                "execv",
                "posix_spawn",
                "Process(",
                "NSTask",
                "std::process",
                "Command::new",
                "import Darwin",
                "import Glibc",
                "dlopen(",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Output cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable output caching (default: true)
    pub enabled: bool,

    /// Cache directory (defaults to the user cache dir)
    pub dir: Option<PathBuf>,

    /// Maximum number of cached outputs
    pub max_entries: usize,

    /// Entries older than this are treated as absent
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_entries: 100,
            max_age_secs: 3600,
        }
    }
}

/// Dependency template configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Use a prebuilt template to amortize dependency compilation
    pub enabled: bool,

    /// Template directory (defaults to the user cache dir)
    pub dir: Option<PathBuf>,

    /// Arguments passed to the toolchain build command
    pub build_args: Vec<String>,

    /// Template manifest contents
    pub manifest: String,

    /// Template source file, relative to the template root
    pub source_file: String,

    /// Template source contents
    pub source: String,

    /// Deadline for a template build
    pub build_timeout_secs: u64,

    /// How long to wait for another builder before building anyway
    pub lock_wait_secs: u64,

    /// Build the template in the background when the server starts
    pub warm_on_start: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            build_args: vec!["build".to_string(), "--release".to_string()],
            manifest: r#"[package]
name = "kiln-template"
version = "0.1.0"
edition = "2021"

[lib]
path = "src/lib.rs"

[dependencies]
{{dependency_name}} = {{dependency_remote}}
"#
            .to_string(),
            source_file: "src/lib.rs".to_string(),
            source: "pub use {{dependency_name}}::*;\n".to_string(),
            build_timeout_secs: 600,
            lock_wait_secs: 120,
            warm_on_start: true,
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root under which per-request workspaces are created
    pub root: Option<PathBuf>,
}

/// External toolchain description
///
/// Every string field is a template; see [`crate::render`] for the
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Build command
    pub build_command: String,

    /// Build command arguments
    pub build_args: Vec<String>,

    /// Command that runs the built program
    pub run_command: String,

    /// Run command arguments
    pub run_args: Vec<String>,

    /// Extra environment for both build and run
    pub env: BTreeMap<String, String>,

    /// Manifest file name, relative to the workspace root
    pub manifest_file: String,

    /// Manifest contents
    pub manifest: String,

    /// Source file name, relative to the workspace root
    pub source_file: String,

    /// Program skeleton wrapping the caller's statements
    pub source: String,

    /// Line printed between the caller's own output and the generated result
    pub sentinel: String,

    /// Glob patterns for per-request build outputs written outside the
    /// workspace, such as into a shared target dir; removed with the workspace
    pub artifacts: Vec<String>,

    /// The heavy dependency the template prebuilds
    pub dependency: DependencyConfig,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert(
            "CARGO_TARGET_DIR".to_string(),
            "{{template}}/target".to_string(),
        );

        Self {
            build_command: "cargo".to_string(),
            build_args: vec![
                "build".to_string(),
                "--release".to_string(),
                "--quiet".to_string(),
            ],
            run_command: "{{template}}/target/release/{{package}}".to_string(),
            run_args: vec![],
            env,
            manifest_file: "Cargo.toml".to_string(),
            manifest: r#"[package]
name = "{{package}}"
version = "0.1.0"
edition = "2021"

[dependencies]
{{dependency_name}} = {{dependency}}

[workspace]
"#
            .to_string(),
            source_file: "src/main.rs".to_string(),
            source: r#"#[allow(unused_imports)]
use {{dependency_name}}::*;

fn main() {
    let generated = {
{{source}}
    };
    println!("{{sentinel}}");
    println!("{}", generated);
}
"#
            .to_string(),
            sentinel: "=== KILN OUTPUT ===".to_string(),
            artifacts: vec![
                "{{template}}/target/release/{{package}}*".to_string(),
                "{{template}}/target/release/deps/{{package}}-*".to_string(),
                "{{template}}/target/release/.fingerprint/{{package}}-*".to_string(),
            ],
            dependency: DependencyConfig::default(),
        }
    }
}

/// How the workspace manifest refers to the heavy dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Name the generated source imports
    pub name: String,

    /// Reference used when no template is available
    pub remote: String,

    /// Reference used when the template is ready (`{{template}}` is its root)
    pub local: String,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            name: "syntaxkit".to_string(),
            remote: r#"{ version = "0.1" }"#.to_string(),
            local: r#"{ path = "{{template}}", package = "kiln-template" }"#.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[limits]"));
        assert!(toml.contains("[toolchain.dependency]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_source_bytes, 100_000);
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.toolchain.build_command, "cargo");
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [toolchain]
            build_command = "sh"
            build_args = ["-n", "main.sh"]

            [cache]
            max_entries = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.toolchain.build_command, "sh");
        assert_eq!(config.cache.max_entries, 5);
        assert_eq!(config.cache.max_age_secs, 3600); // default preserved
        assert_eq!(config.toolchain.sentinel, "=== KILN OUTPUT ===");
    }

    #[test]
    fn deny_list_covers_process_spawning() {
        let limits = LimitsConfig::default();
        assert!(limits.deny_patterns.iter().any(|p| p == "system("));
        assert!(limits.deny_patterns.iter().any(|p| p == "popen("));
    }
}

//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn kiln() -> Command {
        cargo_bin_cmd!("kiln")
    }

    /// Config for a POSIX sh toolchain rooted in `dir`
    fn write_sh_config(dir: &Path) -> std::path::PathBuf {
        let root = dir.display();
        let config = format!(
            r##"
[general]
audit_log = false

[cache]
dir = "{root}/outputs"

[workspace]
root = "{root}/workspaces"

[template]
dir = "{root}/template"
build_args = ["-c", "echo built > artifact"]
manifest = "dependency = {{{{dependency_remote}}}}\n"
source_file = "lib.sh"
source = "# kit\n"
warm_on_start = false

[toolchain]
build_command = "sh"
build_args = ["-n", "main.sh"]
run_command = "sh"
run_args = ["main.sh"]
env = {{}}
manifest_file = "manifest.txt"
manifest = "package = {{{{package}}}}\n"
source_file = "main.sh"
source = "print() {{ shift 2; RESULT=\"Generated: $*\"; }}\n{{{{source}}}}\necho '{{{{sentinel}}}}'\necho \"$RESULT\"\n"
"##
        );
        let path = dir.join("config.toml");
        std::fs::write(&path, config).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Sandboxed build-and-run service"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        kiln()
            .args(["--config", path.to_str().unwrap(), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["--config"])
            .arg(dir.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[limits]"))
            .stdout(predicate::str::contains("[toolchain.dependency]"));
    }

    #[test]
    fn config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.toml");
        kiln()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[cache]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, "[limits]\nmax_timeout_secs = \"soon\"\n").unwrap();

        kiln()
            .arg("--config")
            .arg(&path)
            .args(["cache", "stats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("kiln config init --force"));
    }

    #[test]
    fn generate_from_stdin() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["generate", "--timeout", "30"])
            .write_stdin("print the value 42\n")
            .assert()
            .success()
            .stdout("Generated: 42\n");
    }

    #[test]
    fn generate_json_from_file() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());
        let script = dir.path().join("script.txt");
        std::fs::write(&script, "print the value 7").unwrap();

        kiln()
            .arg("--config")
            .arg(&config)
            .arg("generate")
            .arg(&script)
            .args(["--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""generatedCode": "Generated: 7""#))
            .stdout(predicate::str::contains(r#""success": true"#));
    }

    #[test]
    fn generate_rejects_denied_pattern() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());

        kiln()
            .arg("--config")
            .arg(&config)
            .arg("generate")
            .write_stdin("system(\"id\")")
            .assert()
            .failure()
            .stderr(predicate::str::contains("forbidden pattern"));

        assert!(!dir.path().join("workspaces").exists());
    }

    #[test]
    fn generate_reports_build_failure() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());

        kiln()
            .arg("--config")
            .arg(&config)
            .arg("generate")
            .write_stdin("if then fi")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Build failed"));
    }

    #[test]
    fn cache_stats_and_clear() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());

        kiln()
            .arg("--config")
            .arg(&config)
            .arg("generate")
            .write_stdin("print the value 1")
            .assert()
            .success();

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""entries": 1"#));

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success();

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""entries": 0"#));
    }

    #[test]
    fn template_warm_then_status() {
        let dir = TempDir::new().unwrap();
        let config = write_sh_config(dir.path());

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["template", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("missing"));

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["template", "warm"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Template built"));

        kiln()
            .arg("--config")
            .arg(&config)
            .args(["template", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ready"));
    }
}

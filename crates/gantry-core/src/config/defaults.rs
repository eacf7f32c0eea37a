//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".gantry.toml",
        ".gantry.yaml",
    ]
}

/// Starter configuration written by documentation and tests
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry configuration

[settings]
shutdown_grace_ms = 5000
skip_dirs = ["target", "node_modules", "vendor"]

[tasks.fmt]
usage = "Format code"
run = ["cargo fmt --all"]
detect = ["Cargo.toml"]

[tasks.lint]
usage = "Lint code"
run = ["cargo clippy --all-targets"]
detect = ["Cargo.toml"]

[tasks.test]
usage = "Run tests"
run = ["cargo test"]
detect = ["Cargo.toml"]

[run]
parallel = ["fmt", { serial = ["lint", "test"] }]
"#;

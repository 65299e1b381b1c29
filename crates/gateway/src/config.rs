use anyhow::{Context, Result};
use shopguard_common::AppConfig;
use std::path::Path;
use tracing::info;

/// Load the YAML file at `path` (defaults when it does not exist), then
/// apply environment overrides and validate the result.
pub fn load(path: &str) -> Result<AppConfig> {
    let mut config = if Path::new(path).exists() {
        info!(path = path, "loading configuration");
        AppConfig::load(path).with_context(|| format!("failed to load {}", path))?
    } else {
        info!(path = path, "configuration file not found, using defaults");
        AppConfig::default()
    };

    config
        .apply_env()
        .context("invalid environment override")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load("/nonexistent/shopguard.yaml").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert!(config.waf.enabled);
    }

    #[test]
    fn test_yaml_file_is_read() {
        let path = std::env::temp_dir().join(format!("shopguard-gateway-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "server:\n  listen: 127.0.0.1:8181\nupstream:\n  servers:\n    - addr: 127.0.0.1:3001\n      weight: 2\n",
        )
        .unwrap();

        let config = load(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.listen, "127.0.0.1:8181");
        assert_eq!(config.upstream.servers[0].weight, 2);
    }
}

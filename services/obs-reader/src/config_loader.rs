//! Configuration loader for obs-reader
//!
//! Loads an observation space configuration from YAML, substituting
//! environment variables with `${VAR}` / `${VAR:-default}` syntax, then
//! applies the `OBS_*` overrides and validates the result.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use obs_frame::ObsSpaceConfig;

/// Load, expand, override and validate an observation space config.
pub fn load_obs_space_config<P: AsRef<Path>>(path: P) -> Result<ObsSpaceConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let expanded = expand_env_vars(&content)?;

    let config: ObsSpaceConfig = serde_yaml::from_str(&expanded)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    let config = config.with_env_overrides();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration in {}: {}", path.display(), e))?;
    Ok(config)
}

/// Substitute `${VAR}` and `${VAR:-default}` references in the config
/// text. Nested braces inside a default are kept as written.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let body = &rest[start + 2..];

        let mut depth = 1usize;
        let mut end = None;
        for (offset, ch) in body.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(offset);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            let line = content[..content.len() - rest.len() + start].lines().count().max(1);
            anyhow::bail!("Unterminated '${{' in observation config at line {}", line);
        };

        result.push_str(&resolve_var_expr(&body[..end])?);
        rest = &body[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Value of `VAR`, or of `VAR:-default` with the default used when the
/// variable is unset or empty.
fn resolve_var_expr(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => Ok(std::env::var(name.trim())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())),
        None => std::env::var(expr.trim()).with_context(|| {
            format!(
                "Observation config references '${{{}}}' but it is not set in the environment",
                expr.trim()
            )
        }),
    }
}

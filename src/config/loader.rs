//! Configuration and manifest loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::types::{PrerenderManifest, RoutesManifest};
use crate::routing::RoutingContext;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = read(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Read a JSON document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = read(path)?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the routing context from config and the manifests it points at.
/// Missing manifest paths mean empty tables.
pub fn load_routing_context(config: &GatewayConfig) -> Result<RoutingContext, ConfigError> {
    let routing = &config.routing;

    let routes: RoutesManifest = match &routing.routes_manifest {
        Some(path) => load_json(path)?,
        None => RoutesManifest::default(),
    };
    let prerender: PrerenderManifest = match &routing.prerender_manifest {
        Some(path) => load_json(path)?,
        None => PrerenderManifest::default(),
    };

    tracing::info!(
        build_id = %routing.build_id,
        headers = routes.headers.len(),
        rewrites = routes.rewrites.len(),
        redirects = routes.redirects.len(),
        prerendered = prerender.routes.len(),
        "Routing tables loaded"
    );

    Ok(RoutingContext::new(routing.build_id.clone())
        .with_base_path(routing.base_path.clone())
        .with_trailing_slash(routing.trailing_slash)
        .with_skip_trailing_slash_redirect(routing.skip_trailing_slash_redirect)
        .with_i18n(routing.i18n.clone())
        .with_routes(routes)
        .with_prerender(prerender))
}

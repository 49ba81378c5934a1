//! Immutable routing context.
//!
//! Built once at startup from the routing config and the two manifests, then
//! shared read-only (via `Arc`) by every request. Reloading means building a
//! new process.

use fancy_regex::Regex;

use crate::config::schema::I18nConfig;
use crate::routing::matcher::{CompiledHeaderRule, CompiledRule};
use crate::routing::types::{PrerenderManifest, RoutesManifest};

/// Everything the resolver and normalizer need, compiled.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub build_id: String,
    pub base_path: String,
    pub trailing_slash: bool,
    pub skip_trailing_slash_redirect: bool,
    pub i18n: Option<I18nConfig>,
    pub headers: Vec<CompiledHeaderRule>,
    pub rewrites: Vec<CompiledRule>,
    pub redirects: Vec<CompiledRule>,
    pub prerender: PrerenderManifest,
    fallback_false: Vec<Regex>,
}

impl RoutingContext {
    /// Empty context for `build_id`: no rules, no prerendered routes.
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            ..Self::default()
        }
    }

    /// Compile and install the rule tables.
    pub fn with_routes(mut self, manifest: RoutesManifest) -> Self {
        self.headers = manifest
            .headers
            .into_iter()
            .map(CompiledHeaderRule::compile)
            .collect();
        self.rewrites = manifest.rewrites.into_iter().map(CompiledRule::compile).collect();
        self.redirects = manifest.redirects.into_iter().map(CompiledRule::compile).collect();
        self
    }

    /// Install the prerender manifest and compile its `fallback: false` regexes.
    pub fn with_prerender(mut self, manifest: PrerenderManifest) -> Self {
        self.fallback_false = manifest
            .dynamic_routes
            .iter()
            .filter(|(_, route)| route.is_fallback_disabled())
            .filter_map(|(name, route)| match Regex::new(&route.route_regex) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(route = %name, regex = %route.route_regex, error = %e, "Ignoring dynamic route with invalid regex");
                    None
                }
            })
            .collect();
        self.prerender = manifest;
        self
    }

    pub fn with_trailing_slash(mut self, trailing_slash: bool) -> Self {
        self.trailing_slash = trailing_slash;
        self
    }

    pub fn with_skip_trailing_slash_redirect(mut self, skip: bool) -> Self {
        self.skip_trailing_slash_redirect = skip;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_i18n(mut self, i18n: Option<I18nConfig>) -> Self {
        self.i18n = i18n;
        self
    }

    /// Regexes of dynamic routes configured with `fallback: false`.
    pub fn fallback_false_routes(&self) -> &[Regex] {
        &self.fallback_false
    }

    /// Preview id expected on revalidation requests.
    pub fn preview_mode_id(&self) -> &str {
        &self.prerender.preview.preview_mode_id
    }

    /// Path prefix under which API routes live.
    pub fn api_prefix(&self) -> String {
        format!("{}/api/", self.base_path)
    }
}

//! Data-page normalization and `fallback: false` enforcement.

use axum::http::HeaderValue;

use crate::http::request::{InternalRequest, Query, QueryValue};
use crate::http::response::InternalResponse;
use crate::routing::context::RoutingContext;
use crate::routing::matcher::search;
use crate::routing::Flow;

/// Prefix of client-side data requests.
pub const DATA_PREFIX: &str = "/_next/data";

/// Query marker added to normalized data requests.
pub const DATA_REQUEST_MARKER: &str = "__nextDataReq";

/// Diagnostic header set when a request is forced to the 404 page.
pub const INVOKE_STATUS_HEADER: &str = "x-invoke-status";

/// Map `/_next/data/{build_id}/page.json` to `/page` with a data marker.
///
/// Data requests for any other build id get a JSON 404: the client is running
/// a stale build.
pub fn fix_data_page(req: &InternalRequest, build_id: &str) -> Flow<InternalRequest> {
    let data_pattern = format!("{}/{}", DATA_PREFIX, build_id);
    let path = req.raw_path.as_str();

    let is_current_build = path
        .strip_prefix(&data_pattern)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));

    if path.starts_with(DATA_PREFIX) && !is_current_build {
        tracing::debug!(path = %path, build_id = %build_id, "Data request for another build");
        return Flow::Respond(InternalResponse::not_found_json());
    }

    if !is_current_build || !path.ends_with(".json") {
        return Flow::Continue(req.clone());
    }

    let stripped = path
        .strip_prefix(&data_pattern)
        .and_then(|rest| rest.strip_suffix(".json"))
        .unwrap_or(path);
    let new_path = if stripped == "/index" { "/" } else { stripped };

    let mut query: Query = req.query.clone();
    query.insert(DATA_REQUEST_MARKER.to_string(), QueryValue::from("1"));
    Flow::Continue(req.with_query(query).with_path(new_path))
}

/// True when the request was normalized from a data route.
pub fn is_data_request(req: &InternalRequest) -> bool {
    req.query.contains_key(DATA_REQUEST_MARKER)
}

/// Serve `/404` for unknown paths of `fallback: false` dynamic routes.
pub fn handle_fallback_false(req: &InternalRequest, ctx: &RoutingContext) -> InternalRequest {
    let path = req.raw_path.as_str();
    let route_fallback = ctx.fallback_false_routes().iter().any(|re| search(re, path));
    if !route_fallback {
        return req.clone();
    }

    let localized = match &ctx.i18n {
        Some(i18n) => {
            let first_segment = path.split('/').nth(1).unwrap_or_default();
            if i18n.locales.iter().any(|l| l == first_segment) {
                path.to_string()
            } else if path == "/" {
                format!("/{}", i18n.default_locale)
            } else {
                format!("/{}{}", i18n.default_locale, path)
            }
        }
        None => path.to_string(),
    };

    if ctx.prerender.routes.contains_key(&localized) {
        return req.clone();
    }

    tracing::debug!(path = %path, localized = %localized, "Path not prerendered for fallback:false route");
    let mut not_found = req.with_query(Query::new()).with_path("/404");
    not_found
        .headers
        .insert(INVOKE_STATUS_HEADER, HeaderValue::from_static("404"));
    not_found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::I18nConfig;
    use crate::routing::types::{DynamicRoute, Fallback, PrerenderManifest};
    use axum::http::{Method, StatusCode};

    fn get(target: &str) -> InternalRequest {
        InternalRequest::new(Method::GET, target)
    }

    #[test]
    fn test_fix_data_page_current_build() {
        let req = get("/_next/data/build123/foo.json");
        let Flow::Continue(fixed) = fix_data_page(&req, "build123") else {
            panic!("expected continue");
        };
        assert_eq!(fixed.raw_path, "/foo");
        assert_eq!(
            fixed.query.get(DATA_REQUEST_MARKER),
            Some(&QueryValue::Single("1".into()))
        );
        assert_eq!(fixed.url, "/foo?__nextDataReq=1");
        assert!(is_data_request(&fixed));
    }

    #[test]
    fn test_fix_data_page_index_and_query() {
        let req = get("/_next/data/b1/index.json?ref=x");
        let Flow::Continue(fixed) = fix_data_page(&req, "b1") else {
            panic!("expected continue");
        };
        assert_eq!(fixed.raw_path, "/");
        assert_eq!(fixed.url, "/?__nextDataReq=1&ref=x");
    }

    #[test]
    fn test_fix_data_page_stale_build() {
        let req = get("/_next/data/build999/foo.json");
        let Flow::Respond(res) = fix_data_page(&req, "build123") else {
            panic!("expected 404");
        };
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_fix_data_page_build_id_prefix_is_not_a_match() {
        let req = get("/_next/data/build1234/foo.json");
        assert!(matches!(fix_data_page(&req, "build123"), Flow::Respond(_)));
    }

    #[test]
    fn test_fix_data_page_passthrough() {
        let req = get("/about");
        let Flow::Continue(same) = fix_data_page(&req, "b1") else {
            panic!("expected continue");
        };
        assert_eq!(same, req);
    }

    fn posts_ctx() -> RoutingContext {
        let mut manifest = PrerenderManifest::default();
        manifest.dynamic_routes.insert(
            "/posts/[id]".into(),
            DynamicRoute {
                fallback: Some(Fallback::Flag(false)),
                route_regex: "^/posts/([^/]+?)(?:/)?$".into(),
            },
        );
        manifest
            .routes
            .insert("/posts/known-id".into(), serde_json::json!({}));
        RoutingContext::new("b1").with_prerender(manifest)
    }

    #[test]
    fn test_fallback_false_unknown_path() {
        let ctx = posts_ctx();
        let out = handle_fallback_false(&get("/posts/unknown"), &ctx);
        assert_eq!(out.raw_path, "/404");
        assert_eq!(out.url, "/404");
        assert_eq!(out.header(INVOKE_STATUS_HEADER), Some("404"));
    }

    #[test]
    fn test_fallback_false_known_path() {
        let ctx = posts_ctx();
        let req = get("/posts/known-id");
        assert_eq!(handle_fallback_false(&req, &ctx), req);
    }

    #[test]
    fn test_fallback_false_other_routes_untouched() {
        let ctx = posts_ctx();
        let req = get("/about");
        assert_eq!(handle_fallback_false(&req, &ctx), req);
    }

    #[test]
    fn test_fallback_false_with_locales() {
        let mut manifest = PrerenderManifest::default();
        manifest.dynamic_routes.insert(
            "/[locale]/posts/[id]".into(),
            DynamicRoute {
                fallback: Some(Fallback::Flag(false)),
                route_regex: "^(?:/[^/]+)?/posts/([^/]+?)(?:/)?$".into(),
            },
        );
        manifest.routes.insert("/en/posts/1".into(), serde_json::json!({}));
        manifest.routes.insert("/fr/posts/2".into(), serde_json::json!({}));
        let ctx = RoutingContext::new("b1")
            .with_prerender(manifest)
            .with_i18n(Some(I18nConfig {
                locales: vec!["en".into(), "fr".into()],
                default_locale: "en".into(),
            }));

        // default locale is prepended for the lookup only
        let req = get("/posts/1");
        assert_eq!(handle_fallback_false(&req, &ctx), req);

        let req = get("/fr/posts/2");
        assert_eq!(handle_fallback_false(&req, &ctx), req);

        assert_eq!(handle_fallback_false(&get("/posts/2"), &ctx).raw_path, "/404");
    }
}

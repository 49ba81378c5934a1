//! End-to-end tests: client → gateway → mock render backend.

use std::time::Duration;

use isr_gateway::admin::{setup_admin_router, AdminState};
use isr_gateway::http::server::serve;
use serde_json::json;

mod common;

use common::{client, start_gateway, start_render_backend, test_config, write_temp, MockResponse};

const PREVIEW_ID: &str = "preview-secret";

fn prerender_manifest() -> String {
    json!({
        "dynamicRoutes": {
            "/posts/[id]": { "fallback": false, "routeRegex": "^/posts/([^/]+?)(?:/)?$" }
        },
        "routes": { "/posts/1": {} },
        "preview": { "previewModeId": PREVIEW_ID }
    })
    .to_string()
}

fn routes_manifest() -> String {
    json!({
        "headers": [
            { "source": "/blog", "regex": "^/blog$", "headers": [{ "key": "x-section", "value": "blog" }] }
        ],
        "redirects": [
            { "source": "/old-blog/:slug", "destination": "/blog/:slug", "regex": "^/old-blog(?:/([^/]+?))$", "statusCode": 308 }
        ],
        "rewrites": [
            { "source": "/docs/:path*", "destination": "/documentation/:path*", "regex": "^/docs(?:/((?:[^/]+?)(?:/(?:[^/]+?))*))?$" }
        ]
    })
    .to_string()
}

fn isr_page(req: &common::RecordedRequest, hit: usize) -> MockResponse {
    MockResponse::ok(format!("render {} {}", hit, req.target))
        .header("Cache-Control", "s-maxage=3600, stale-while-revalidate")
        .header("x-next-cache-tags", "posts")
}

#[tokio::test]
async fn test_redirect_rule() {
    let backend = start_render_backend(isr_page).await;
    let mut config = test_config(backend.addr);
    config.routing.routes_manifest = Some(write_temp("routes.json", &routes_manifest()));
    let gateway = start_gateway(config).await;

    let res = client().get(gateway.url("/old-blog/hello")).send().await.unwrap();
    assert_eq!(res.status(), 308);
    assert_eq!(res.headers()["location"], "/blog/hello");
    assert_eq!(backend.hit_count(), 0);
}

#[tokio::test]
async fn test_rewrite_and_header_rules_reach_backend() {
    let backend = start_render_backend(|req, _| MockResponse::ok(req.target.clone())).await;
    let mut config = test_config(backend.addr);
    config.routing.routes_manifest = Some(write_temp("routes.json", &routes_manifest()));
    let gateway = start_gateway(config).await;

    let res = client().get(gateway.url("/docs/a/b")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "/documentation/a/b");

    client().get(gateway.url("/blog")).send().await.unwrap();
    let recorded = backend.recorded();
    let blog = recorded.iter().find(|r| r.target == "/blog").unwrap();
    assert_eq!(blog.header("x-section"), Some("blog"));
    assert!(blog.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_data_requests() {
    let backend = start_render_backend(|req, _| MockResponse::ok(req.target.clone())).await;
    let gateway = start_gateway(test_config(backend.addr)).await;

    let res = client()
        .get(gateway.url("/_next/data/test-build/blog.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "/blog?__nextDataReq=1");

    let stale = client()
        .get(gateway.url("/_next/data/old-build/blog.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status(), 404);
    assert_eq!(stale.text().await.unwrap(), "{}");
    assert_eq!(backend.hit_count(), 1);
}

#[tokio::test]
async fn test_fallback_false_serves_404_page() {
    let backend = start_render_backend(|req, _| MockResponse::ok(req.target.clone())).await;
    let mut config = test_config(backend.addr);
    config.routing.prerender_manifest = Some(write_temp("prerender.json", &prerender_manifest()));
    let gateway = start_gateway(config).await;

    let res = client().get(gateway.url("/posts/999?ref=x")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "/404");
    let recorded = backend.recorded();
    assert_eq!(recorded[0].header("x-invoke-status"), Some("404"));

    let known = client().get(gateway.url("/posts/1")).send().await.unwrap();
    assert_eq!(known.text().await.unwrap(), "/posts/1");
}

#[tokio::test]
async fn test_isr_miss_then_hit() {
    let backend = start_render_backend(isr_page).await;
    let gateway = start_gateway(test_config(backend.addr)).await;

    let first = client().get(gateway.url("/blog")).send().await.unwrap();
    assert_eq!(first.headers()["x-nextjs-cache"], "MISS");
    assert_eq!(first.text().await.unwrap(), "render 1 /blog");

    let second = client().get(gateway.url("/blog")).send().await.unwrap();
    assert_eq!(second.headers()["x-nextjs-cache"], "HIT");
    assert_eq!(second.text().await.unwrap(), "render 1 /blog");
    assert_eq!(backend.hit_count(), 1);
}

/// Serve the admin API for `gateway` on an ephemeral port.
async fn start_admin(gateway: &common::TestGateway) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = setup_admin_router(AdminState::new(&gateway.gateway));
    tokio::spawn(serve(listener, router, gateway.shutdown.subscribe(), "admin"));
    addr
}

/// Poll `url` until the cache serves a HIT other than `first_body`.
async fn wait_for_rerendered_hit(url: &str, first_body: &str) -> String {
    // A read racing the store may see STALE first.
    for _ in 0..50 {
        let res = client().get(url).send().await.unwrap();
        let status = res.headers()["x-nextjs-cache"].to_str().unwrap().to_string();
        let body = res.text().await.unwrap();
        if status == "HIT" && body != first_body {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("re-rendered page was never served from cache");
}

#[tokio::test]
async fn test_admin_revalidation_rerenders_in_background() {
    let backend = start_render_backend(isr_page).await;
    let mut config = test_config(backend.addr);
    config.routing.prerender_manifest = Some(write_temp("prerender.json", &prerender_manifest()));
    config.admin.api_key = "it-key".into();
    let gateway = start_gateway(config).await;
    let admin_addr = start_admin(&gateway).await;

    let page = gateway.url("/blog");
    client().get(&page).send().await.unwrap();
    assert_eq!(backend.hit_count(), 1);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let res = client()
        .post(format!("http://{}/admin/revalidate/tag/posts", admin_addr))
        .bearer_auth("it-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let summary: serde_json::Value = res.json().await.unwrap();
    assert_eq!(summary["paths"], json!(["/blog"]));

    backend.wait_for_hits(2).await;
    assert_eq!(backend.hit_count(), 2);
    let revalidation = &backend.recorded()[1];
    assert_eq!(revalidation.method, "GET");
    assert_eq!(revalidation.header("x-prerender-revalidate"), Some(PREVIEW_ID));

    let served = wait_for_rerendered_hit(&page, "render 1 /blog").await;
    assert!(served.starts_with("render ") && served.ends_with(" /blog"));

    let unauthorized = client()
        .get(format!("http://{}/admin/status", admin_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);
}

#[tokio::test]
async fn test_default_config_revalidates_without_manifest_preview_id() {
    let backend = start_render_backend(isr_page).await;
    let gateway = start_gateway(test_config(backend.addr)).await;
    assert!(gateway.gateway.config.revalidation.origin.is_none());

    let page = gateway.url("/blog");
    client().get(&page).send().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(gateway.gateway.cache.revalidate_tag("posts").await, vec!["/blog"]);

    backend.wait_for_hits(2).await;
    let revalidation = &backend.recorded()[1];
    assert_eq!(
        revalidation.header("x-prerender-revalidate"),
        Some(gateway.gateway.preview_mode_id.as_ref())
    );
    wait_for_rerendered_hit(&page, "render 1 /blog").await;
}

#[tokio::test]
async fn test_stale_read_with_foreign_host_revalidates_locally() {
    let backend = start_render_backend(|req, hit| {
        MockResponse::ok(format!("render {} {}", hit, req.target))
            .header("Cache-Control", "s-maxage=1, stale-while-revalidate")
    })
    .await;
    let gateway = start_gateway(test_config(backend.addr)).await;

    let page = gateway.url("/blog");
    client().get(&page).send().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let stale = client()
        .get(&page)
        .header("host", "evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(stale.headers()["x-nextjs-cache"], "STALE");

    backend.wait_for_hits(2).await;
    assert_eq!(backend.hit_count(), 2);
    let revalidation = &backend.recorded()[1];
    assert_eq!(
        revalidation.header("x-prerender-revalidate"),
        Some(gateway.gateway.preview_mode_id.as_ref())
    );
    assert_ne!(revalidation.header("host"), Some("evil.example"));
}

#[tokio::test]
async fn test_render_backend_down_is_bad_gateway() {
    let addr: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
    let mut config = test_config(addr);
    config.timeouts.connect_secs = 1;
    let gateway = start_gateway(config).await;

    let res = client().get(gateway.url("/anything")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_concurrent_requests() {
    let backend = start_render_backend(|req, _| MockResponse::ok(req.target.clone())).await;
    let gateway = start_gateway(test_config(backend.addr)).await;
    let client = client();

    let requests = (0..20).map(|i| {
        let client = client.clone();
        let url = gateway.url(&format!("/page/{}", i));
        async move { client.get(url).send().await.unwrap().status() }
    });
    let statuses = futures_util::future::join_all(requests).await;

    assert!(statuses.iter().all(|s| *s == 200));
    assert_eq!(backend.hit_count(), 20);
}

//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! InternalRequest
//!     → routing::resolve        (redirect? respond)
//!     → normalizer::fix_data_page (stale build? JSON 404)
//!     → normalizer::handle_fallback_false
//!     → merge header-rule headers
//!     → external rewrite? render::ExternalProxy : Renderer (isr.rs around render.rs)
//!     → InternalResponse
//! ```
//!
//! # Design Decisions
//! - Routing is synchronous and pure, rendering is the only await point
//! - Render failures become a response here; the server never sees an error

pub mod isr;
pub mod render;

use std::sync::Arc;

use crate::http::request::{InternalRequest, X_REQUEST_ID};
use crate::http::response::InternalResponse;
use crate::routing::normalizer::{fix_data_page, handle_fallback_false};
use crate::routing::{resolve, Flow, RoutingContext};

pub use isr::IsrRenderer;
pub use render::{ExternalProxy, RenderError, Renderer, UpstreamRenderer};

/// Runs one request through routing and rendering.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: Arc<RoutingContext>,
    renderer: Arc<dyn Renderer>,
    proxy: ExternalProxy,
}

impl Dispatcher {
    pub fn new(ctx: Arc<RoutingContext>, renderer: Arc<dyn Renderer>, proxy: ExternalProxy) -> Self {
        Self { ctx, renderer, proxy }
    }

    pub fn context(&self) -> &RoutingContext {
        &self.ctx
    }

    pub async fn handle(&self, req: InternalRequest) -> InternalResponse {
        let request_id = req.header(X_REQUEST_ID).unwrap_or("unknown").to_string();

        let resolved = match resolve(&self.ctx, &req) {
            Flow::Respond(response) => {
                tracing::debug!(request_id = %request_id, status = %response.status, "Redirected");
                return response;
            }
            Flow::Continue(resolved) => resolved,
        };

        let request = match fix_data_page(&resolved.request, &self.ctx.build_id) {
            Flow::Respond(response) => return response,
            Flow::Continue(request) => request,
        };
        let mut request = handle_fallback_false(&request, &self.ctx);
        request.headers.extend(resolved.request_headers.clone());

        if let Some(target) = resolved.external_target.as_ref().filter(|_| resolved.should_proxy()) {
            return match self.proxy.proxy(&request, target).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, target = %target, error = %e, "External rewrite failed");
                    e.into_response()
                }
            };
        }

        match self.renderer.render(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id = %request_id, url = %request.url, error = %e, "Render failed");
                e.into_response()
            }
        }
    }
}

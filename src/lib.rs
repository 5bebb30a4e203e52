//! Blog-post backend: accounts, admin-authored posts, member comments, and
//! the authorization-scoped storage layer underneath them.

pub mod api;
pub mod comments;
pub mod config;
pub mod entities;
pub mod error;
pub mod gate;
pub mod identity;
pub mod posts;
pub mod storage;
pub mod token;

use std::sync::Arc;

use poem::{
    Endpoint, EndpointExt, Route,
    middleware::{CookieJarManager, Cors},
};
use poem_openapi::OpenApiService;

pub use api::{Api, AppState};
pub use error::{BlogError, Result};

/// Prefix every API route is nested under.
pub const API_PREFIX: &str = "/blogpost/v1";

/// Assemble the HTTP application: API routes, Swagger UI, CORS and cookies.
pub fn build_app(state: Arc<AppState>) -> impl Endpoint {
    let api = OpenApiService::new(Api::new(state), "Blog Post API", env!("CARGO_PKG_VERSION"))
        .server(API_PREFIX);
    let ui = api.swagger_ui();

    Route::new()
        .nest(API_PREFIX, api)
        .nest("/", ui)
        .with(CookieJarManager::new())
        .with(Cors::new())
}

//! The HTTP surface: index page, state API, assets, websocket, plugin trees,
//! translator states, and the layered static fallback.

pub mod mqhub;
pub mod objects;
pub mod pages;
pub mod statics;
pub mod ws;

use crate::plugins::{Builtin, PluginRegistry};
use crate::visualizer::Visualizer;
use crate::webfs::LayeredFs;
use axum::routing::get;
use axum::Router;
use see_schema::Schema;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Everything the page-serving side needs: the layered filesystem, the
/// plugin list, built-in page extensions, and the page title.
pub struct WebContent {
    pub fs: LayeredFs,
    pub plugins: PluginRegistry,
    pub builtins: Vec<Builtin>,
    pub title: String,
}

#[derive(Clone)]
pub struct AppState {
    pub vis: Arc<Visualizer>,
    pub web: Arc<WebContent>,
    /// Present only while the schema-translator source is active; gates the
    /// `/mqhub/states/…` route.
    pub schema: Option<Arc<Schema>>,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(pages::index))
        .route("/index.html", get(pages::index))
        .route(
            "/objects",
            get(objects::get_objects)
                .post(objects::post_objects)
                .put(objects::post_objects),
        )
        .route("/assets/{id}", get(objects::get_asset))
        .route("/ws", get(ws::ws_handler));

    if state.schema.is_some() {
        router = router.route("/mqhub/states/{*path}", get(mqhub::get_state));
    }
    for plugin in state.web.plugins.iter() {
        router = router.nest_service(
            &format!("/plugins/{}", plugin.name),
            ServeDir::new(&plugin.full_dir),
        );
    }

    router
        .fallback(statics::serve)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

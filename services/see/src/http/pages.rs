//! The composed index page.

use super::{AppState, WebContent};
use crate::plugins::load_manifest;
use crate::webfs::WebFsError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use minijinja::{context, Environment};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index.html not found")]
    NotFound,
    #[error("failed to read index.html: {0}")]
    Fs(WebFsError),
    #[error("index.html is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("failed to render index.html: {0}")]
    Template(#[from] minijinja::Error),
}

pub async fn index(State(state): State<AppState>) -> Response {
    match compose_index(&state.web).await {
        Ok(html) => Html(html).into_response(),
        Err(IndexError::NotFound) => {
            (StatusCode::NOT_FOUND, IndexError::NotFound.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Renders the `index.html` template from the layered filesystem with the
/// asset lists: built-in entries first, then each plugin's manifest entries
/// prefixed `plugins/<name>/`, in registration order. A manifest that fails
/// to parse here is warned about and skipped, not fatal.
pub async fn compose_index(web: &WebContent) -> Result<String, IndexError> {
    let (bytes, _) = web.fs.open("index.html").await.map_err(|e| match e {
        WebFsError::NotFound => IndexError::NotFound,
        other => IndexError::Fs(other),
    })?;
    let source = String::from_utf8(bytes)?;

    let mut stylesheets = Vec::new();
    let mut scripts = Vec::new();
    for builtin in &web.builtins {
        for entry in &builtin.visualizer.stylesheets {
            stylesheets.push(join_web_path(&builtin.path, entry));
        }
        for entry in &builtin.visualizer.scripts {
            scripts.push(join_web_path(&builtin.path, entry));
        }
    }
    for plugin in web.plugins.iter() {
        match load_manifest(&plugin.full_dir) {
            Ok(manifest) => {
                for entry in &manifest.visualizer.stylesheets {
                    stylesheets.push(format!("plugins/{}/{}", plugin.name, entry));
                }
                for entry in &manifest.visualizer.scripts {
                    scripts.push(format!("plugins/{}/{}", plugin.name, entry));
                }
            }
            Err(e) => {
                warn!(plugin = %plugin.name, dir = %plugin.dir, error = %e, "skipping unreadable plugin manifest");
            }
        }
    }

    let env = Environment::new();
    let html = env.render_str(
        &source,
        context! {
            title => &web.title,
            stylesheets => stylesheets,
            scripts => scripts,
        },
    )?;
    Ok(html)
}

fn join_web_path(prefix: &str, entry: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        entry.to_owned()
    } else {
        format!("{prefix}/{entry}")
    }
}

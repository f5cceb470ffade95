// see-schema: declarative schema for the bus translator source.
//
// A schema maps a generic pub/sub topic tree onto the visualizer's object
// view. Four sections:
//
//   objects:  template producing a JSON array of objects from the context
//   states:   raw endpoint payloads exposed over HTTP
//   mute:     endpoint updates that change the context without re-rendering
//   actions:  browser envelopes translated into bus commands
//
// Templates are minijinja with three extra functions: `object(ctx, id)` looks
// up a previously ingested object, `scalef(v, f)` multiplies as float,
// `scalei(v, f)` multiplies and floors to integer.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use minijinja::value::Value as TmplValue;
use minijinja::{Environment, context};
use see_protocol::{Envelope, Object, object_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Schema document
// ---------------------------------------------------------------------------

/// An endpoint whose raw payload is served over HTTP.
///
/// The payload is addressed either at `<component>/<endpoint>` or at the
/// explicit `api-path`.
#[derive(Debug, Clone, Deserialize)]
pub struct StateSchema {
    pub component: String,
    pub endpoint: String,
    #[serde(default, rename = "api-path")]
    pub api_path: Option<String>,
    #[serde(default, rename = "content-type")]
    pub content_type: Option<String>,
}

/// An endpoint whose updates must not trigger a re-render.
#[derive(Debug, Clone, Deserialize)]
pub struct MuteSchema {
    pub component: String,
    pub endpoint: String,
}

/// One condition of an action schema: the value reached by descending the
/// envelope through `keys` must stringify equal to `value`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionMatcher {
    pub keys: Vec<String>,
    pub value: String,
}

/// Maps a browser envelope onto a bus command.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSchema {
    pub action: String,
    #[serde(default)]
    pub matches: Vec<ActionMatcher>,
    pub component: String,
    pub endpoint: String,
    /// Template rendered with `{action, ctx}`; the output bytes are the
    /// published payload.
    pub data: String,
}

impl ActionSchema {
    /// True when the envelope's action name and every matcher agree.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if envelope.action() != Some(self.action.as_str()) {
            return false;
        }
        self.matches.iter().all(|m| {
            envelope
                .by_keys(&m.keys)
                .is_some_and(|v| stringify(v) == m.value)
        })
    }
}

/// The parsed schema document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDoc {
    #[serde(default)]
    pub objects: String,
    #[serde(default)]
    pub states: Vec<StateSchema>,
    #[serde(default)]
    pub mute: Vec<MuteSchema>,
    #[serde(default)]
    pub actions: Vec<ActionSchema>,
}

/// Stringification used for action matching: JSON strings compare by their
/// content, everything else by its JSON text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse schema document: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse schema document: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("invalid template: {0}")]
    Template(#[from] minijinja::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template execution failed: {0}")]
    Template(#[from] minijinja::Error),
    #[error("objects template did not produce a JSON array of objects: {0}")]
    BadOutput(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Rendering context
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ContextInner {
    /// Decoded property view per object id, fed to templates.
    objects: HashMap<String, Object>,
    /// Raw bytes of each property's last payload, served over HTTP.
    states: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// The translator's accumulated view of the bus.
///
/// Each property update stores the raw payload bytes unconditionally; the
/// decoded object view only carries properties whose payload is valid JSON.
/// A binary payload (an image, say) therefore stays fetchable over HTTP
/// while the template keeps seeing a consistent object.
#[derive(Debug, Default)]
pub struct Context {
    inner: RwLock<ContextInner>,
}

impl Context {
    /// Updates one property of one object from a raw bus payload.
    pub fn update_property(&self, id: &str, property: &str, payload: &[u8]) {
        let parsed: Option<Value> = serde_json::from_slice(payload).ok();

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let obj = inner.objects.entry(id.to_owned()).or_default();
        match parsed {
            Some(value) => {
                obj.insert(property.to_owned(), value);
            }
            None => {
                obj.remove(property);
            }
        }
        inner
            .states
            .entry(id.to_owned())
            .or_default()
            .insert(property.to_owned(), payload.to_vec());
    }

    /// The raw bytes last received for `id`/`property`, if any.
    pub fn find_state(&self, id: &str, property: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.states.get(id)?.get(property).cloned()
    }

    /// Snapshot of the decoded object view for template rendering. Copied
    /// out under the shared lock so the render never holds it.
    fn template_value(&self) -> TmplValue {
        #[derive(Serialize)]
        struct TemplateCtx<'a> {
            objects: &'a HashMap<String, Object>,
        }
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        TmplValue::from_serialize(&TemplateCtx {
            objects: &inner.objects,
        })
    }
}

// ---------------------------------------------------------------------------
// Template environment
// ---------------------------------------------------------------------------

fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_function("scalef", |v: f64, f: f64| v * f);
    env.add_function("scalei", |v: f64, f: f64| (v * f).floor() as i64);
    env.add_function("object", |ctx: TmplValue, id: String| -> TmplValue {
        ctx.get_attr("objects")
            .and_then(|objs| objs.get_attr(&id))
            .unwrap_or(TmplValue::UNDEFINED)
    });
    env
}

fn validate_template(source: &str) -> Result<(), minijinja::Error> {
    // Shorten the environment's source lifetime to the borrowed template.
    let env: Environment<'_> = template_env();
    env.template_from_str(source).map(|_| ())
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A loaded schema plus its live context and the baseline of the last
/// rendering (for remove diffs).
pub struct Schema {
    doc: SchemaDoc,
    context: Context,
    current: Mutex<Vec<Object>>,
}

impl Schema {
    /// Loads a schema from JSON or YAML; a leading `{` selects JSON.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDoc = if raw.trim_start().starts_with('{') {
            serde_json::from_str(raw)?
        } else {
            serde_yaml::from_str(raw)?
        };
        validate_template(&doc.objects)?;
        for action in &doc.actions {
            validate_template(&action.data)?;
        }
        Ok(Schema {
            doc,
            context: Context::default(),
            current: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// True when updates to `component`/`endpoint` must not re-render.
    pub fn is_muted(&self, component: &str, endpoint: &str) -> bool {
        self.doc
            .mute
            .iter()
            .any(|m| m.component == component && m.endpoint == endpoint)
    }

    /// Renders the objects template and diffs against the previous
    /// rendering: one `object` envelope per rendered object, one `remove`
    /// per id that disappeared. The new rendering becomes the baseline.
    ///
    /// A render failure is logged and yields no envelopes; the baseline is
    /// left untouched.
    pub fn refresh(&self) -> Vec<Envelope> {
        let objs = match self.render_objects() {
            Ok(objs) => objs,
            Err(e) => {
                warn!(error = %e, "objects template render failed");
                return Vec::new();
            }
        };

        let mut msgs: Vec<Envelope> = Vec::with_capacity(objs.len());
        let mut active: HashSet<String> = HashSet::with_capacity(objs.len());
        for obj in &objs {
            active.insert(object_id(obj).unwrap_or_default().to_owned());
            msgs.push(Envelope::for_object(obj.clone()));
        }

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        for obj in current.iter() {
            let id = object_id(obj).unwrap_or_default();
            if !active.contains(id) {
                msgs.push(Envelope::for_remove(id));
            }
        }
        *current = objs;
        msgs
    }

    /// Applies one endpoint update and returns the envelopes to emit: the
    /// refresh diff, or nothing when the endpoint is muted.
    pub fn update_object(&self, component: &str, endpoint: &str, payload: &[u8]) -> Vec<Envelope> {
        self.context.update_property(component, endpoint, payload);
        if self.is_muted(component, endpoint) {
            Vec::new()
        } else {
            self.refresh()
        }
    }

    /// Looks up the state entry matching an HTTP request path (no leading
    /// slash). An explicit `api-path` matches the whole path; otherwise the
    /// last segment is the endpoint and the rest is the component.
    pub fn find_state_schema(&self, request_path: &str) -> Option<&StateSchema> {
        let (component, endpoint) = match request_path.rsplit_once('/') {
            Some((c, e)) => (c.trim_matches('/'), e),
            None => ("", request_path),
        };
        self.doc.states.iter().find(|s| match &s.api_path {
            Some(api_path) if !api_path.is_empty() => api_path == request_path,
            _ => s.component == component && s.endpoint == endpoint,
        })
    }

    /// The raw bytes for a configured state, if any payload has arrived.
    pub fn find_state(&self, component: &str, endpoint: &str) -> Option<Vec<u8>> {
        self.context.find_state(component, endpoint)
    }

    /// First action schema matching the envelope, if any.
    pub fn find_action(&self, envelope: &Envelope) -> Option<&ActionSchema> {
        self.doc.actions.iter().find(|a| a.matches(envelope))
    }

    /// Renders an action's data template against `{action, ctx}`.
    pub fn render_action(
        &self,
        action: &ActionSchema,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, RenderError> {
        let env = template_env();
        let rendered = env.render_str(
            &action.data,
            context! {
                action => TmplValue::from_serialize(envelope),
                ctx => self.context.template_value(),
            },
        )?;
        Ok(rendered.into_bytes())
    }

    fn render_objects(&self) -> Result<Vec<Object>, RenderError> {
        let env = template_env();
        let rendered = env.render_str(
            &self.doc.objects,
            context! { ctx => self.context.template_value() },
        )?;
        let objs: Vec<Object> = serde_json::from_str(&rendered)?;
        Ok(objs)
    }
}

// see: visualization bridge. Keeps browser clients synchronized with a
// world model driven by a pluggable message source.

use clap::{Arg, ArgAction, ArgMatches, Command};
use see::http::{build_router, AppState, WebContent};
use see::plugins::{Builtin, PageContext, PluginError, PluginRegistry};
use see::sources::exec::ExecSource;
use see::sources::mqhub::TranslatorSource;
use see::sources::mqtt::{BusSource, BusUrl, DEFAULT_CLIENT_ID};
use see::sources::stream::StreamSource;
use see::sources::{Source, SourceError};
use see::webfs::LayeredFs;
use see::Visualizer;
use see_schema::{Schema, SchemaError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Development web root, layered ahead of `SEE_WEB_ROOT` and the bundle.
const LOCAL_WEB_DIR: &str = ".vis.www";
/// Per-user plugin directory probed at startup.
const HOME_PLUGIN_DIR: &str = ".robotalks";

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("mqhub source expects a schema file as the second argument")]
    MissingSchemaFile,
}

fn cli() -> Command {
    Command::new("see")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Visualization Engine")
        .arg(
            Arg::new("port")
                .help("Listening port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .default_value("3500"),
        )
        .arg(
            Arg::new("quiet")
                .help("Turn off the logs")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("plugin-dir")
                .help("Visualize plugin directory for object renders")
                .short('I')
                .long("plugin-dir")
                .value_name("DIR")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("title")
                .help("Title for web page")
                .long("title")
                .default_value("Visualizer"),
        )
        .arg(
            Arg::new("source")
                .help(
                    "Message source, can be a program or a URL\n\
                     Supported protocols:\n\
                     \u{20} MQHUB: mqhub://server[:port]/topic-prefix SCHEMA-FILE\n\
                     \u{20} MQTT:  mqtt://server[:port]/topic-prefix [CLIENT-ID]\n",
                )
                .value_name("SOURCE")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let default_level = if matches.get_flag("quiet") {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "see starting");

    if let Err(e) = run(&matches).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> Result<(), AppError> {
    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let title = matches
        .get_one::<String>("title")
        .expect("title has a default")
        .clone();
    let source_args: Vec<String> = matches
        .get_many::<String>("source")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let mut plugins = PluginRegistry::default();
    load_default_plugins(&mut plugins);
    if let Some(dirs) = matches.get_many::<String>("plugin-dir") {
        for dir in dirs {
            plugins.load(dir)?;
            info!(dir = %dir, "plugin loaded");
        }
    }

    let (vis, mut client_rx) = Visualizer::new();
    let (source, schema) = select_source(&source_args)?;
    let source = Arc::new(source);

    let fs = LayeredFs::new(
        Some(PathBuf::from(LOCAL_WEB_DIR)),
        std::env::var_os("SEE_WEB_ROOT").map(PathBuf::from),
    );
    let web = Arc::new(WebContent {
        fs,
        plugins,
        builtins: vec![Builtin {
            path: String::new(),
            visualizer: PageContext {
                stylesheets: vec!["visualizer.css".to_owned()],
                scripts: vec!["visualizer.js".to_owned()],
            },
        }],
        title,
    });

    let state = AppState {
        vis: Arc::clone(&vis),
        web,
        schema,
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| AppError::Bind { port, source })?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "http server failed");
        }
    });

    // Pump browser-originated batches into the source's accept path. The
    // channel closes with the engine; the task ends with it.
    {
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            while let Some(batch) = client_rx.recv().await {
                source.accept(&batch).await;
            }
        });
    }

    source.run(&vis).await?;
    info!("message source ended, shutting down");
    Ok(())
}

/// Startup plugin probing: `$HOME/.robotalks`, the working directory, then
/// every `SEE_PLUGIN_PATH` entry. None of these are required to be plugins,
/// so failures here are not fatal; only `-I` directories are (the caller
/// handles those).
fn load_default_plugins(plugins: &mut PluginRegistry) {
    if let Some(home) = std::env::var_os("HOME") {
        let dir = PathBuf::from(home).join(HOME_PLUGIN_DIR);
        let _ = plugins.load(&dir.display().to_string());
    }
    if let Ok(cwd) = std::env::current_dir() {
        let _ = plugins.load(&cwd.display().to_string());
    }
    if let Some(paths) = std::env::var_os("SEE_PLUGIN_PATH") {
        for dir in std::env::split_paths(&paths) {
            let spec = dir.display().to_string();
            if plugins.load(&spec).is_ok() {
                info!(dir = %spec, "plugin loaded");
            }
        }
    }
}

/// Maps the `SOURCE` positionals onto a source: nothing means stdio, the
/// two URL schemes select the bus variants, anything else is a program to
/// spawn with the remaining arguments.
fn select_source(args: &[String]) -> Result<(Source, Option<Arc<Schema>>), AppError> {
    match args.first().map(String::as_str) {
        None | Some("") => Ok((
            Source::Stdio(StreamSource::new(tokio::io::stdin(), tokio::io::stdout())),
            None,
        )),
        Some(raw) if raw.starts_with("mqhub://") => {
            let schema_file = args.get(1).ok_or(AppError::MissingSchemaFile)?;
            let url = BusUrl::parse(raw)?;
            let schema = Arc::new(Schema::load_file(schema_file)?);
            let source = TranslatorSource::new(&url, Arc::clone(&schema), DEFAULT_CLIENT_ID);
            Ok((Source::Translator(source), Some(schema)))
        }
        Some(raw) if raw.starts_with("mqtt://") => {
            let url = BusUrl::parse(raw)?;
            let client_id = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CLIENT_ID);
            Ok((Source::Bus(BusSource::new(&url, client_id)), None))
        }
        Some(program) => {
            let source = ExecSource::spawn(program, &args[1..])?;
            Ok((Source::Exec(source), None))
        }
    }
}

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use scoreview_core::{Marker, ViewState, Viewer, ViewerConfig, ViewerInput};
use scoreview_render::{FileFetcher, MeiEngineLoader};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "scoreview",
    version,
    about = "Render and navigate MEI scores from the command line"
)]
struct Args {
    /// MEI file or file:// URL; overrides `source-url` from the config
    source: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(short = 'z', long = "zoom")]
    zoom: Option<String>,

    /// Page to show (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<String>,

    /// Movement label or id used to scope --measure
    #[arg(long = "movement")]
    movement: Option<String>,

    #[arg(short = 'm', long = "measure")]
    measure: Option<String>,

    #[arg(short = 'e', long = "element")]
    element: Option<String>,

    /// Display width, e.g. 800 or 800px
    #[arg(long = "width")]
    width: Option<String>,

    #[arg(long = "height")]
    height: Option<String>,

    /// Raw property write, applied in order (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// Playback position in milliseconds (repeatable)
    #[arg(long = "play-at", value_name = "MS")]
    play_at: Vec<u64>,

    /// Write the final page's SVG here
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Write the score as a Standard MIDI File here
    #[arg(long = "audio")]
    audio: Option<PathBuf>,
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    state: &'a ViewState,
    page: Option<u32>,
    highlighted: Option<&'a BTreeSet<String>>,
    markers: &'a [Marker],
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("org", "scoreview", "scoreview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("scoreview.toml"));
    let mut config = ViewerConfig::load_or_default(&config_path)?;
    if let Some(source) = &args.source {
        config.source_url = Some(source.clone());
    }
    if config.source_url.is_none() {
        return Err(anyhow!("no score given; pass a path or set source-url in {:?}", config_path));
    }

    let mut viewer = Viewer::new(&config, Arc::new(FileFetcher::new()));
    viewer
        .initialize_engine(&MeiEngineLoader)
        .await
        .context("failed to start rendering engine")?;
    if viewer.document().is_none() {
        return Err(anyhow!("failed to load {:?}", config.source_url));
    }

    let inputs = collect_inputs(&args);
    let (tx, rx) = mpsc::channel(inputs.len().max(1));
    for input in inputs {
        tx.send(input)
            .await
            .map_err(|_| anyhow!("viewer inbox closed early"))?;
    }
    drop(tx);
    let viewer = viewer.run(rx).await;

    let mut stdout = io::stdout().lock();
    for event in viewer.events().lock().iter() {
        writeln!(stdout, "{}", serde_json::to_string(event)?)?;
    }

    let page = viewer.page();
    let report = Report {
        state: viewer.state(),
        page: page.map(|page| page.number),
        highlighted: page.map(|page| page.highlighted()),
        markers: page.map(|page| page.markers()).unwrap_or_default(),
    };
    writeln!(stdout, "{}", serde_json::to_string(&report)?)?;

    if let Some(path) = &args.output {
        match page {
            Some(page) => {
                fs::write(path, &page.markup)
                    .with_context(|| format!("failed to write {:?}", path))?;
                info!(path = %path.display(), page = page.number, "page written");
            }
            None => warn!("nothing rendered, skipping svg output"),
        }
    }
    if let Some(path) = &args.audio {
        let bytes = viewer.render_audio()?;
        fs::write(path, bytes).with_context(|| format!("failed to write {:?}", path))?;
        info!(path = %path.display(), "audio written");
    }

    Ok(())
}

/// Turns the command line into viewer inputs: layout first, then raw
/// writes, then navigation, then playback.
fn collect_inputs(args: &Args) -> Vec<ViewerInput> {
    let property = |name: &str, value: &Option<String>| {
        value.as_ref().map(|value| ViewerInput::Property {
            name: name.to_string(),
            value: value.clone(),
        })
    };

    let mut inputs: Vec<ViewerInput> = [
        property("mdivname", &args.movement),
        property("zoom", &args.zoom),
        property("width", &args.width),
        property("height", &args.height),
    ]
    .into_iter()
    .flatten()
    .collect();

    inputs.extend(args.set.iter().map(|(name, value)| ViewerInput::Property {
        name: name.clone(),
        value: value.clone(),
    }));

    inputs.extend(
        [
            property("pagenumber", &args.page),
            property("measurenumber", &args.measure),
            property("elementid", &args.element),
        ]
        .into_iter()
        .flatten(),
    );

    inputs.extend(
        args.play_at
            .iter()
            .map(|&millis| ViewerInput::PlaybackTick { millis }),
    );
    inputs
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "scoreview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the JSON event stream
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(
            parse_assignment("verovio-options={\"a\":1}"),
            Ok(("verovio-options".into(), "{\"a\":1}".into()))
        );
        assert!(parse_assignment("zoom").is_err());
    }

    #[test]
    fn inputs_follow_layout_then_navigation_order() {
        let args = Args::parse_from([
            "scoreview",
            "score.mei",
            "--measure",
            "12",
            "--movement",
            "Adagio",
            "--width",
            "800px",
            "--set",
            "pageheight=3000",
            "--play-at",
            "1500",
        ]);
        let names: Vec<String> = collect_inputs(&args)
            .into_iter()
            .map(|input| match input {
                ViewerInput::Property { name, .. } => name,
                ViewerInput::PlaybackTick { millis } => format!("tick@{millis}"),
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(
            names,
            ["mdivname", "width", "pageheight", "measurenumber", "tick@1500"]
        );
    }
}

pub mod config;
pub mod emitter;
pub mod resolver;
pub mod sources;
pub mod tokens;

pub use emitter::{emit_css, wrap_style_tag};
pub use resolver::{ResolutionConfig, parse_exclude_filters};
pub use tokens::{ConversionError, CssVariables, convert, try_convert};

use clap::{Args, Parser, Subcommand};
use globset::GlobSet;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_CONFIG_FILE: &str = "dtb.toml";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const REBUILD_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(
    name = "dtb",
    version,
    about = "Convert design-token JSON into CSS custom properties"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Convert token files into a single `:root` block.
    Build(BuildOptions),
    /// Build once, then rebuild whenever token files or the config change.
    Watch {
        #[command(flatten)]
        options: BuildOptions,
        /// Use a polling watcher instead of native file events.
        #[arg(long)]
        poll: bool,
        /// Polling interval in milliseconds; implies --poll.
        #[arg(long = "poll-interval", value_name = "MS")]
        poll_interval_ms: Option<u64>,
    },
    /// Report how many variables each token file produces.
    Check {
        #[arg(required = true, value_name = "PATH_OR_GLOB")]
        inputs: Vec<String>,
        #[arg(short = 'I', long = "ignore", value_name = "GLOB")]
        ignore: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct BuildOptions {
    /// Token files, directories or glob patterns.
    #[arg(required = true, value_name = "PATH_OR_GLOB")]
    pub inputs: Vec<String>,
    #[arg(short = 'o', long = "output", visible_alias = "out", value_name = "PATH")]
    pub out: Option<String>,
    /// Config file; `dtb.toml` in the working directory is used when present.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<String>,
    #[arg(short = 'I', long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,
    /// Wrap the output in `<style id="dtb-tokens">`.
    #[arg(long, conflicts_with = "no_style_tag")]
    pub style_tag: bool,
    /// Emit a bare `:root` block even when the config asks for a style tag.
    #[arg(long)]
    pub no_style_tag: bool,
    /// Emit `px` instead of converting number tokens to `rem`.
    #[arg(long)]
    pub no_rem: bool,
    #[arg(long = "rem-base", value_name = "PX")]
    pub rem_base: Option<f64>,
    /// Comma-separated substrings of variable names that skip unit conversion.
    #[arg(long, value_name = "LIST")]
    pub exclude: Option<String>,
    /// Also read token files that `.gitignore` excludes.
    #[arg(long)]
    pub no_gitignore: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
}

impl From<config::ConfigError> for CliError {
    fn from(err: config::ConfigError) -> Self {
        Self {
            message: err.message,
        }
    }
}

impl From<sources::SourceError> for CliError {
    fn from(err: sources::SourceError) -> Self {
        Self {
            message: err.message,
        }
    }
}

/// Effective settings for one build: config file merged with CLI overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub resolution: ResolutionConfig,
    pub style_tag: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub css: String,
    pub files: usize,
    pub variables: usize,
}

pub fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Build(options) => run_build(&options),
        Command::Watch {
            options,
            poll,
            poll_interval_ms,
        } => run_watch(
            &options,
            poll || poll_interval_ms.is_some(),
            poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        ),
        Command::Check { inputs, ignore } => run_check(&inputs, &ignore),
    }
}

pub fn run_from_env() -> Result<(), CliError> {
    let cli = Cli::parse();
    run(cli.command)
}

pub fn parse_args<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let args = std::iter::once("dtb".to_string()).chain(args);
    Cli::try_parse_from(args)
        .map(|cli| cli.command)
        .map_err(|err| CliError {
            message: err.to_string(),
        })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn load_settings(options: &BuildOptions) -> Result<Settings, CliError> {
    let config_path = match options.config.as_ref() {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|path| path.is_file()),
    };
    let config = match config_path.as_deref() {
        Some(path) => config::load(path)?,
        None => config::Config::default(),
    };

    let mut resolution = config::resolve_resolution(&config);
    if options.no_rem {
        resolution.convert_px_to_rem = false;
    }
    if let Some(base) = options.rem_base {
        resolution.rem_base_size =
            config::validate_rem_base_size(base).map_err(|message| CliError {
                message: format!("--rem-base: {}", message),
            })?;
    }
    if let Some(raw) = options.exclude.as_deref() {
        resolution.exclude_filters = parse_exclude_filters(raw);
    }

    Ok(Settings {
        resolution,
        style_tag: !options.no_style_tag && (options.style_tag || config.output.style_tag),
        config_path,
    })
}

/// Converts every matched token file and merges the results in path order.
pub fn render(options: &BuildOptions) -> Result<Rendered, CliError> {
    let settings = load_settings(options)?;
    let mut ignore = options.ignore.clone();
    if let Some(out_path) = options.out.as_ref() {
        ignore.push(globset::escape(out_path));
    }

    let discover_options = sources::DiscoverOptions {
        respect_gitignore: !options.no_gitignore,
        ..sources::DiscoverOptions::default()
    };
    let paths = sources::discover_with_options(&options.inputs, &ignore, &discover_options)?;
    let documents = sources::read_sources(&paths)?;
    let mut variables = CssVariables::new();
    for document in &documents {
        let converted =
            try_convert(&document.text, &settings.resolution).map_err(|err| CliError {
                message: format!("{}: {}", document.path.display(), err),
            })?;
        debug!(
            path = %document.path.display(),
            variables = converted.len(),
            "converted token file"
        );
        variables.extend(converted);
    }

    let mut css = emit_css(&variables);
    if settings.style_tag {
        css = wrap_style_tag(&css);
    }

    Ok(Rendered {
        css,
        files: documents.len(),
        variables: variables.len(),
    })
}

fn run_build(options: &BuildOptions) -> Result<(), CliError> {
    let rendered = render(options)?;

    if let Some(out_path) = options.out.as_ref() {
        let mut css = rendered.css.clone();
        if !css.is_empty() {
            css.push('\n');
        }
        fs::write(out_path, css).map_err(|err| CliError {
            message: format!("failed to write output {}: {}", out_path, err),
        })?;
    } else if !rendered.css.is_empty() {
        println!("{}", rendered.css);
    }

    info!(
        "converted {} token files, generated {} variables",
        rendered.files, rendered.variables
    );
    Ok(())
}

fn run_check(inputs: &[String], ignore: &[String]) -> Result<(), CliError> {
    let settings = ResolutionConfig::default();
    let paths = sources::discover(inputs, ignore)?;
    let mut failures = 0usize;

    for document in sources::read_sources(&paths)? {
        match try_convert(&document.text, &settings) {
            Ok(variables) => println!("{}: {} variables", document.path.display(), variables.len()),
            Err(err) => {
                failures += 1;
                println!("{}: {}", document.path.display(), err);
            }
        }
    }

    if failures > 0 {
        return Err(CliError {
            message: format!("{} of {} token files could not be parsed", failures, paths.len()),
        });
    }
    Ok(())
}

fn run_watch(options: &BuildOptions, poll: bool, poll_interval_ms: u64) -> Result<(), CliError> {
    run_build(options)?;

    let (tx, rx) = channel();
    let filter = WatchFilter::new(options)?;
    let mut watcher: Box<dyn notify::Watcher> = if poll {
        Box::new(
            notify::PollWatcher::new(
                tx,
                notify::Config::default()
                    .with_poll_interval(Duration::from_millis(poll_interval_ms)),
            )
            .map_err(|err| CliError {
                message: format!("failed to start poll watcher: {}", err),
            })?,
        )
    } else {
        Box::new(notify::recommended_watcher(tx).map_err(|err| CliError {
            message: format!("failed to start watcher: {}", err),
        })?)
    };

    let config_path = load_settings(options)?.config_path;
    for root in watch_roots(&options.inputs, config_path.as_deref()) {
        watcher
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|err| CliError {
                message: format!("failed to watch {}: {}", root.display(), err),
            })?;
    }

    if poll {
        info!("watching for changes (polling, press Ctrl+C to stop)...");
    } else {
        info!("watching for changes (press Ctrl+C to stop)...");
    }

    let mut debounce = RebuildDebounce::default();
    loop {
        match rx.recv_timeout(REBUILD_DEBOUNCE) {
            Ok(Ok(event)) => {
                if !filter.ignores(&event) {
                    debounce.record(Instant::now());
                }
            }
            Ok(Err(err)) => warn!("watch error: {}", err),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if debounce.take_due(Instant::now()) {
            info!("change detected, rebuilding...");
            if let Err(err) = run_build(options) {
                warn!("build failed: {}", err.message);
            }
        }
    }

    Ok(())
}

/// Holds a rebuild back until events have been quiet for `REBUILD_DEBOUNCE`,
/// so a burst of writes ends in one build that sees the final file contents.
#[derive(Debug, Default)]
struct RebuildDebounce {
    last_change: Option<Instant>,
}

impl RebuildDebounce {
    fn record(&mut self, at: Instant) {
        self.last_change = Some(at);
    }

    fn take_due(&mut self, now: Instant) -> bool {
        match self.last_change {
            Some(changed) if now.saturating_duration_since(changed) >= REBUILD_DEBOUNCE => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }
}

fn watch_roots(patterns: &[String], config: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let mut seen = HashSet::new();
    let config_pattern = config.map(|path| path.display().to_string());

    for pattern in patterns.iter().chain(config_pattern.iter()) {
        let root = sources::glob_root(pattern);
        let normalized = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        if seen.insert(normalized.clone()) {
            roots.push(normalized);
        }
    }

    roots
}

/// Decides which watcher events lead to a rebuild.
///
/// Event paths may be absolute, so ignore globs and the output path are
/// compared relative to `base` (the working directory).
#[derive(Debug)]
struct WatchFilter {
    base: PathBuf,
    ignore: GlobSet,
    output: Option<PathBuf>,
}

impl WatchFilter {
    fn new(options: &BuildOptions) -> Result<Self, CliError> {
        let base = std::env::current_dir().map_err(|err| CliError {
            message: format!("failed to read working directory: {}", err),
        })?;
        Self::with_base(base, options)
    }

    fn with_base(base: PathBuf, options: &BuildOptions) -> Result<Self, CliError> {
        let ignore = sources::build_globset(&options.ignore)?;
        let output = options
            .out
            .as_ref()
            .map(|out| relative_to(Path::new(out), &base).to_path_buf());
        Ok(Self {
            base,
            ignore,
            output,
        })
    }

    /// Only token (`.json`) and config (`.toml`) changes count; the written
    /// output never does.
    fn ignores(&self, event: &notify::Event) -> bool {
        if event.paths.is_empty() {
            return false;
        }
        event.paths.iter().all(|path| {
            let relevant = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("json") | Some("toml")
            );
            let relative = relative_to(path, &self.base);
            !relevant
                || self.output.as_deref() == Some(relative)
                || self.ignore.is_match(path)
                || self.ignore.is_match(relative)
        })
    }
}

fn relative_to<'a>(path: &'a Path, base: &Path) -> &'a Path {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative.strip_prefix(".").unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::{
        BuildOptions, Command, REBUILD_DEBOUNCE, RebuildDebounce, WatchFilter, load_settings,
        parse_args, render, watch_roots,
    };
    use crate::resolver::ResolutionConfig;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn options(inputs: Vec<String>) -> BuildOptions {
        BuildOptions {
            inputs,
            out: None,
            config: None,
            ignore: vec![],
            style_tag: false,
            no_style_tag: false,
            no_rem: false,
            rem_base: None,
            exclude: None,
            no_gitignore: false,
        }
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("fixture should be written");
        path.display().to_string()
    }

    #[test]
    fn parse_build_supports_output_and_config_flags() {
        let command = parse_args(args(&[
            "build",
            "--config",
            "dtb.toml",
            "--out",
            "dist/tokens.css",
            "--exclude",
            "weight",
            "tokens/**/*.json",
        ]))
        .expect("build args should parse");

        let mut expected = options(vec!["tokens/**/*.json".to_string()]);
        expected.out = Some("dist/tokens.css".to_string());
        expected.config = Some("dtb.toml".to_string());
        expected.exclude = Some("weight".to_string());
        assert_eq!(command, Command::Build(expected));
    }

    #[test]
    fn parse_watch_supports_poll_interval() {
        let command = parse_args(args(&[
            "watch",
            "-o",
            "dist/tokens.css",
            "--poll-interval",
            "250",
            "tokens.json",
        ]))
        .expect("watch args should parse");

        let mut expected = options(vec!["tokens.json".to_string()]);
        expected.out = Some("dist/tokens.css".to_string());
        assert_eq!(
            command,
            Command::Watch {
                options: expected,
                poll: false,
                poll_interval_ms: Some(250),
            }
        );
    }

    #[test]
    fn parse_rejects_missing_inputs_and_unknown_commands() {
        assert!(parse_args(args(&["build"])).is_err());
        assert!(parse_args(args(&["serve", "tokens.json"])).is_err());
        assert!(parse_args(args(&["build", "--poll-interval", "abc", "x.json"])).is_err());
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = TempDir::new().expect("temp dir");
        let config = write(
            &dir,
            "dtb.toml",
            "[resolution]\nrem_base_size = 10\nexclude_filters = \"weight\"\n[output]\nstyle_tag = true\n",
        );

        let mut opts = options(vec!["tokens.json".to_string()]);
        opts.config = Some(config.clone());
        let settings = load_settings(&opts).expect("settings");
        assert!(settings.style_tag);
        assert_eq!(settings.resolution.rem_base_size, 10.0);
        assert_eq!(settings.resolution.exclude_filters, vec!["weight".to_string()]);

        opts.no_rem = true;
        opts.rem_base = Some(20.0);
        opts.exclude = Some("".to_string());
        let settings = load_settings(&opts).expect("settings");
        assert_eq!(
            settings.resolution,
            ResolutionConfig {
                convert_px_to_rem: false,
                rem_base_size: 20.0,
                exclude_filters: vec![],
            }
        );
        assert_eq!(settings.config_path, Some(PathBuf::from(config)));
    }

    #[test]
    fn no_style_tag_flag_overrides_config() {
        let dir = TempDir::new().expect("temp dir");
        let config = write(&dir, "dtb.toml", "[output]\nstyle_tag = true\n");

        let mut opts = options(vec!["tokens.json".to_string()]);
        opts.config = Some(config);
        assert!(load_settings(&opts).expect("settings").style_tag);

        opts.no_style_tag = true;
        assert!(!load_settings(&opts).expect("settings").style_tag);

        assert!(parse_args(args(&["build", "--no-style-tag", "tokens.json"])).is_ok());
        assert!(
            parse_args(args(&["build", "--style-tag", "--no-style-tag", "tokens.json"])).is_err()
        );
    }

    #[test]
    fn rejects_non_positive_rem_base_flag() {
        let mut opts = options(vec!["tokens.json".to_string()]);
        opts.config = Some("/nonexistent/dtb.toml".to_string());
        assert!(load_settings(&opts).is_err());

        opts.config = None;
        opts.rem_base = Some(-4.0);
        let err = load_settings(&opts).expect_err("negative base");
        assert!(err.message.starts_with("--rem-base"));
    }

    #[test]
    fn renders_merged_files_in_path_order() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "a.json", r#"{"space":{"sm":{"$value":16,"$type":"number"}}}"#);
        write(
            &dir,
            "b.json",
            r#"{"space":{"sm":{"$value":"{space.base}"}},"color":{"fg":{"$value":"black"}}}"#,
        );

        let rendered = render(&options(vec![format!("{}/*.json", dir.path().display())]))
            .expect("render");
        assert_eq!(rendered.files, 2);
        assert_eq!(rendered.variables, 2);
        assert_eq!(
            rendered.css,
            ":root {\n  --space-sm: var(--space-base);\n  --color-fg: black;\n}"
        );
    }

    #[test]
    fn renders_style_tag_when_requested() {
        let dir = TempDir::new().expect("temp dir");
        let tokens = write(&dir, "tokens.json", r#"{"gap":{"$value":8,"$type":"number"}}"#);

        let mut opts = options(vec![tokens]);
        opts.style_tag = true;
        let rendered = render(&opts).expect("render");
        assert_eq!(
            rendered.css,
            "<style id=\"dtb-tokens\">:root {\n  --gap: 0.5rem;\n}</style>"
        );
    }

    #[test]
    fn output_paths_with_glob_characters_are_ignored_literally() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "tokens.json", r#"{"gap":{"$value":"4px"}}"#);
        write(&dir, "out[1].json", r#"{"stale":{"$value":"1px"}}"#);

        let mut opts = options(vec![format!("{}/*.json", dir.path().display())]);
        opts.out = Some(dir.path().join("out[1].json").display().to_string());
        let rendered = render(&opts).expect("render");
        assert_eq!(rendered.files, 1);
        assert_eq!(rendered.css, ":root {\n  --gap: 4px;\n}");
    }

    #[test]
    fn render_can_read_gitignored_token_files() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join(".git")).expect("git dir");
        write(&dir, ".gitignore", "draft.json\n");
        write(&dir, "core.json", r#"{"gap":{"$value":"4px"}}"#);
        write(&dir, "draft.json", r#"{"wip":{"$value":"2px"}}"#);

        let mut opts = options(vec![format!("{}/*.json", dir.path().display())]);
        assert_eq!(render(&opts).expect("render").files, 1);

        opts.no_gitignore = true;
        let rendered = render(&opts).expect("render");
        assert_eq!(rendered.files, 2);
        assert!(rendered.css.contains("--wip: 2px;"));
    }

    #[test]
    fn render_reports_invalid_json_with_path() {
        let dir = TempDir::new().expect("temp dir");
        let tokens = write(&dir, "broken.json", "{not valid");

        let err = render(&options(vec![tokens])).expect_err("invalid json");
        assert!(err.message.contains("broken.json"));
        assert!(err.message.contains("invalid token JSON"));
    }

    #[test]
    fn watch_roots_include_config_path() {
        let roots = watch_roots(
            &["design/tokens/**/*.json".to_string(), "design/tokens/*.json".to_string()],
            Some(Path::new("config/dtb.toml")),
        );
        assert_eq!(
            roots,
            vec![PathBuf::from("design/tokens"), PathBuf::from("config")]
        );
    }

    fn event(path: &str) -> notify::Event {
        notify::Event::new(notify::EventKind::Any).add_path(PathBuf::from(path))
    }

    #[test]
    fn ignores_events_for_unrelated_files() {
        let filter = WatchFilter::with_base(PathBuf::from("/work"), &options(vec![]))
            .expect("filter");
        assert!(filter.ignores(&event("/work/dist/tokens.css")));
        assert!(!filter.ignores(&event("/work/tokens/core.json")));
        assert!(!filter.ignores(&event("/work/dtb.toml")));
    }

    #[test]
    fn relative_ignore_globs_match_absolute_event_paths() {
        let mut opts = options(vec![]);
        opts.ignore = vec!["tokens/draft/**".to_string()];
        let filter = WatchFilter::with_base(PathBuf::from("/work"), &opts).expect("filter");
        assert!(filter.ignores(&event("/work/tokens/draft/wip.json")));
        assert!(filter.ignores(&event("tokens/draft/wip.json")));
        assert!(!filter.ignores(&event("/work/tokens/core.json")));
    }

    #[test]
    fn written_output_never_triggers_a_rebuild() {
        let mut opts = options(vec![]);
        opts.out = Some("./tokens/out.json".to_string());
        let filter = WatchFilter::with_base(PathBuf::from("/work"), &opts).expect("filter");
        assert!(filter.ignores(&event("/work/tokens/out.json")));
        assert!(!filter.ignores(&event("/work/tokens/core.json")));
    }

    #[test]
    fn rebuild_waits_for_events_to_settle() {
        let start = Instant::now();
        let mut debounce = RebuildDebounce::default();
        assert!(!debounce.take_due(start + REBUILD_DEBOUNCE));

        debounce.record(start);
        debounce.record(start + Duration::from_millis(50));
        assert!(!debounce.take_due(start + REBUILD_DEBOUNCE));
        assert!(debounce.take_due(start + Duration::from_millis(50) + REBUILD_DEBOUNCE));
        assert!(!debounce.take_due(start + REBUILD_DEBOUNCE * 4));
    }
}

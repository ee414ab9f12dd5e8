//! Binary entry point for the keyscope keyspace browser.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use keyscope::{
    GeneratedKeyspace, IndexConfig, KeyKind, KeyPath, MemoryStore, Notification, PipelineState,
    PipelineStatus, Row, Session, Ttl,
};
use serde::Serialize;
use tracing::{debug, info, trace};
use tracing_subscriber::EnvFilter;

use config::{CliConfig, ConfigError, Profile, ProfileUpdate};
use ui::{format_duration, Progress, Theme, Ui};

const TICK: Duration = Duration::from_millis(50);
const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SEED: u64 = 0x6b65_7973;

#[derive(Parser, Debug)]
#[command(
    name = "keyscope",
    version,
    about = "Browse very large keyspaces as a namespace tree",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "KEYSCOPE_CONFIG",
        value_name = "FILE",
        help = "CLI config file holding saved profiles"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "KEYSCOPE_PROFILE",
        help = "Profile supplying source defaults"
    )]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto, help = "Color theme")]
    theme: Theme,

    #[arg(short, long, global = true, help = "Plain output without icons or spinners")]
    quiet: bool,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Log more to stderr (repeatable); KEYSCOPE_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct SourceArgs {
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with = "simulate",
        help = "Key list to browse, one name per line with an optional tab-separated type"
    )]
    keys_file: Option<PathBuf>,

    #[arg(long, value_name = "KEYS", help = "Browse a generated keyspace of this many keys")]
    simulate: Option<usize>,

    #[arg(long, help = "Seed of the generated keyspace")]
    seed: Option<u64>,

    #[arg(long, value_name = "GLOB", help = "Store-side glob restricting the scan")]
    pattern: Option<String>,

    #[arg(long, help = "Separator deriving the hierarchy from key names")]
    delimiter: Option<String>,

    #[arg(long, value_enum, help = "Tuning preset")]
    preset: Option<PresetArg>,

    #[arg(long, help = "Children listed per node before a load-more row")]
    page_size: Option<usize>,

    #[arg(long, help = "Keys requested per scan batch")]
    scan_count: Option<usize>,
}

#[derive(Args, Debug)]
struct TreeCmd {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, default_value_t = 1, help = "Prefix levels expanded automatically")]
    depth: usize,

    #[arg(long, default_value_t = 40, help = "Rows to print")]
    height: usize,

    #[arg(long, default_value_t = 0, help = "First row to print")]
    offset: usize,

    #[arg(
        long = "expand",
        value_name = "PREFIX",
        action = ArgAction::Append,
        help = "Prefix to expand in addition to --depth (repeatable)"
    )]
    expand: Vec<String>,

    #[arg(long, help = "Fetch type and TTL of the printed keys")]
    describe: bool,
}

#[derive(Args, Debug)]
struct SearchCmd {
    #[arg(value_name = "QUERY")]
    query: String,

    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, default_value_t = 20, help = "Best matches to print")]
    limit: usize,

    #[arg(long, help = "Print the filtered tree instead of a ranked list")]
    tree: bool,

    #[arg(long, default_value_t = 40, help = "Rows to print with --tree")]
    height: usize,
}

#[derive(Args, Debug)]
struct ProfileSetCmd {
    #[arg(value_name = "NAME")]
    name: String,

    #[arg(long, value_name = "FILE", conflicts_with = "simulate")]
    keys_file: Option<PathBuf>,

    #[arg(long, value_name = "KEYS")]
    simulate: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    delimiter: Option<String>,

    #[arg(long, value_name = "GLOB")]
    pattern: Option<String>,

    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long)]
    scan_count: Option<usize>,

    #[arg(long, help = "Also make this the default profile")]
    default: bool,
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    #[command(about = "List saved profiles")]
    List,

    #[command(about = "Print one profile")]
    Show {
        #[arg(value_name = "NAME")]
        name: String,
    },

    #[command(about = "Create or update a profile")]
    Set(ProfileSetCmd),

    #[command(about = "Delete a profile")]
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    #[command(about = "Print, set or clear the default profile")]
    Default {
        #[arg(value_name = "NAME", conflicts_with = "clear")]
        name: Option<String>,

        #[arg(long, help = "Unset the default profile")]
        clear: bool,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Scan the keyspace and summarize it")]
    Scan {
        #[command(flatten)]
        source: SourceArgs,
    },

    #[command(about = "Print a window of the namespace tree")]
    Tree(TreeCmd),

    #[command(about = "Fuzzy-search key names")]
    Search(SearchCmd),

    #[command(about = "Manage saved source profiles")]
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    #[command(about = "Print shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum PresetArg {
    Default,
    Interactive,
    Large,
}

impl PresetArg {
    fn base(self) -> IndexConfig {
        match self {
            PresetArg::Default => IndexConfig::default(),
            PresetArg::Interactive => IndexConfig::interactive(),
            PresetArg::Large => IndexConfig::large_keyspace(),
        }
    }
}

/// Key source and index configuration after merging flags with a profile.
struct Source {
    description: String,
    store: MemoryStore,
    config: IndexConfig,
    pattern: Option<String>,
}

enum Outcome {
    Settled,
    Interrupted,
}

#[derive(Serialize)]
struct ScanReport {
    source: String,
    status: PipelineStatus,
    keys: u64,
    elapsed_ms: u128,
    prefixes: Vec<PrefixCount>,
}

#[derive(Serialize)]
struct PrefixCount {
    prefix: String,
    keys: u64,
}

#[derive(Serialize)]
struct TreeReport {
    source: String,
    keys: u64,
    offset: usize,
    rows: Vec<RowReport>,
}

#[derive(Serialize)]
struct RowReport {
    kind: &'static str,
    path: String,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_secs: Option<i64>,
}

#[derive(Serialize)]
struct SearchReport {
    query: String,
    generation: String,
    matches: usize,
    top: Vec<MatchEntry>,
}

#[derive(Serialize)]
struct MatchEntry {
    key: String,
    score: u32,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.format == OutputFormat::Json;
    let ui = Ui::new(cli.theme, cli.quiet || json);

    match cli.command {
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keyscope", &mut io::stdout());
        }
        Command::Profile { action } => {
            let mut config = CliConfig::load(cli.config)?;
            run_profile(&mut config, action, &cli.format, &ui)?;
        }
        Command::Scan { source } => {
            let config = CliConfig::load(cli.config)?;
            let profile = config.select(cli.profile.as_deref())?;
            let mut source = resolve_source(&source, profile, &config)?;
            source.config.view.auto_expand_depth = 0;
            run_scan(source, &cli.format, &ui).await?;
        }
        Command::Tree(cmd) => {
            let config = CliConfig::load(cli.config)?;
            let profile = config.select(cli.profile.as_deref())?;
            let mut source = resolve_source(&cmd.source, profile, &config)?;
            source.config.view.auto_expand_depth = cmd.depth;
            run_tree(source, &cmd, &cli.format, &ui).await?;
        }
        Command::Search(cmd) => {
            if cmd.query.is_empty() {
                return Err("search query must not be empty".into());
            }
            let config = CliConfig::load(cli.config)?;
            let profile = config.select(cli.profile.as_deref())?;
            let source = resolve_source(&cmd.source, profile, &config)?;
            run_search(source, &cmd, &cli.format, &ui).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("KEYSCOPE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("keyscope={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn resolve_source(
    args: &SourceArgs,
    profile: Option<&Profile>,
    cli_config: &CliConfig,
) -> Result<Source, Box<dyn Error>> {
    let preset = args.preset.or(profile.and_then(|p| p.preset));
    let mut config = preset.map(PresetArg::base).unwrap_or_default();
    if let Some(delimiter) = args
        .delimiter
        .clone()
        .or_else(|| profile.and_then(|p| p.delimiter.clone()))
    {
        if delimiter.is_empty() {
            return Err("delimiter must not be empty".into());
        }
        config = config.with_delimiter(delimiter);
    }
    if let Some(page_size) = args.page_size.or(profile.and_then(|p| p.page_size)) {
        config.page_size = page_size;
    }
    if let Some(scan_count) = args.scan_count.or(profile.and_then(|p| p.scan_count)) {
        config.scan_count = scan_count;
    }
    let pattern = args
        .pattern
        .clone()
        .or_else(|| profile.and_then(|p| p.pattern.clone()));
    let seed = args
        .seed
        .or(profile.and_then(|p| p.seed))
        .unwrap_or(DEFAULT_SEED);

    // Flags win over the profile, the profile over the config file default.
    let (description, store) = if let Some(path) = &args.keys_file {
        (format!("file {}", path.display()), MemoryStore::load_lines(path)?)
    } else if let Some(count) = args.simulate {
        (format!("simulated {count} keys"), simulated(count, seed))
    } else if let Some(path) = profile.and_then(|p| p.keys_file.as_ref()) {
        (format!("file {}", path.display()), MemoryStore::load_lines(path)?)
    } else if let Some(count) = profile.and_then(|p| p.simulate) {
        (format!("simulated {count} keys"), simulated(count, seed))
    } else if let Some(path) = cli_config.default_keys_file() {
        (format!("file {}", path.display()), MemoryStore::load_lines(path)?)
    } else {
        return Err("no key source; pass --keys-file or --simulate, or select a profile".into());
    };
    if let Some(profile) = profile {
        debug!(profile = %profile.name, "cli.profile.applied");
    }
    Ok(Source {
        description,
        store,
        config,
        pattern,
    })
}

fn simulated(count: usize, seed: u64) -> MemoryStore {
    MemoryStore::generated(&GeneratedKeyspace::new(count, seed))
}

/// Opens a session over `source` and scans it to completion or Ctrl-C.
async fn open_and_scan(
    source: Source,
    ui: &Ui,
) -> Result<(Session, Receiver<Notification>, Duration), Box<dyn Error>> {
    let (mut session, notifications) = Session::open(Box::new(source.store), source.config)?;
    let token = session.refresh_matching(source.pattern.as_deref())?;
    info!(%token, source = %source.description, "cli.scan.start");
    let task = ui.progress(format!("scanning {}", source.description));
    let outcome = drive(&mut session, &notifications, Some(&task), |session| {
        scan_finished(&session.status())
    })
    .await?;
    let elapsed = match outcome {
        Outcome::Settled => task.finish(),
        Outcome::Interrupted => {
            drop(task);
            session.cancel_scan()?;
            drive(&mut session, &notifications, None, |session| {
                !session.status().state.is_scanning()
            })
            .await?;
            ui.warn(&format!(
                "scan interrupted; {} keys indexed",
                session.key_count()
            ));
            Duration::ZERO
        }
    };
    Ok((session, notifications, elapsed))
}

fn scan_finished(status: &PipelineStatus) -> bool {
    !matches!(status.state, PipelineState::Idle | PipelineState::Scanning)
}

/// Folds notifications into `session` on every tick until `settled` holds.
async fn drive<F>(
    session: &mut Session,
    notifications: &Receiver<Notification>,
    task: Option<&Progress<'_>>,
    mut settled: F,
) -> Result<Outcome, Box<dyn Error>>
where
    F: FnMut(&mut Session) -> bool,
{
    let mut ticker = tokio::time::interval(TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("cli.interrupt");
                return Ok(Outcome::Interrupted);
            }
            _ = ticker.tick() => {
                drain(session, notifications)?;
                if let Some(task) = task {
                    task.scan(&session.status());
                }
                if settled(session) {
                    return Ok(Outcome::Settled);
                }
            }
        }
    }
}

fn drain(
    session: &mut Session,
    notifications: &Receiver<Notification>,
) -> Result<usize, Box<dyn Error>> {
    let mut applied = 0;
    loop {
        match notifications.try_recv() {
            Ok(notification) => {
                if session.handle(&notification) {
                    applied += 1;
                } else {
                    trace!(generation = %notification.generation, "cli.notification.stale");
                }
            }
            Err(TryRecvError::Empty) => return Ok(applied),
            Err(TryRecvError::Disconnected) => return Err("notification stream closed".into()),
        }
    }
}

async fn run_scan(source: Source, format: &OutputFormat, ui: &Ui) -> Result<(), Box<dyn Error>> {
    let description = source.description.clone();
    let page_size = source.config.page_size;
    let (mut session, _notifications, elapsed) = open_and_scan(source, ui).await?;
    let prefixes = session
        .visible_rows(page_size)
        .into_iter()
        .filter_map(|row| match row {
            Row::Node { label, count, .. } => Some(PrefixCount {
                prefix: label,
                keys: count,
            }),
            Row::Leaf { label, .. } => Some(PrefixCount {
                prefix: label,
                keys: 1,
            }),
            _ => None,
        })
        .collect();
    let report = ScanReport {
        source: description,
        status: session.status(),
        keys: session.key_count(),
        elapsed_ms: elapsed.as_millis(),
        prefixes,
    };
    session.teardown();
    emit(format, &report, |_| print_scan_text(ui, &report))
}

fn print_scan_text(ui: &Ui, report: &ScanReport) {
    let status = &report.status;
    let mut rows = vec![
        ("source", report.source.clone()),
        ("state", status.state.to_string()),
        ("keys", report.keys.to_string()),
        ("batches", status.batches.to_string()),
        ("names seen", status.keys_seen.to_string()),
        ("elapsed", format_duration(Duration::from_millis(report.elapsed_ms as u64))),
    ];
    if let Some(pattern) = &status.pattern {
        rows.push(("pattern", pattern.clone()));
    }
    if status.malformed > 0 {
        rows.push(("malformed", status.malformed.to_string()));
    }
    if let Some(error) = &status.last_error {
        rows.push(("last error", error.clone()));
    }
    ui.facts("Scan", &rows);
    ui.bullets(
        "Top-level prefixes",
        report
            .prefixes
            .iter()
            .map(|entry| format!("{} ({})", entry.prefix, entry.keys)),
    );
    if status.state == PipelineState::Complete {
        ui.done(&format!("indexed {} keys", report.keys));
    }
}

async fn run_tree(
    source: Source,
    cmd: &TreeCmd,
    format: &OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    let description = source.description.clone();
    let delimiter = source.config.delimiter.clone();
    let (mut session, notifications, _) = open_and_scan(source, ui).await?;
    for prefix in &cmd.expand {
        let path = KeyPath::parse(prefix, &delimiter);
        if !path.is_root() {
            session.expand(&path);
        }
    }
    session.scroll_to(cmd.offset);
    let mut rows = session.visible_rows(cmd.height);
    if cmd.describe && session.inspect_visible(&rows)? > 0 {
        let height = cmd.height;
        let described = tokio::time::timeout(
            DESCRIBE_TIMEOUT,
            drive(&mut session, &notifications, None, |session| {
                session
                    .visible_rows(height)
                    .iter()
                    .all(|row| !row.needs_description())
            }),
        )
        .await;
        if described.is_err() {
            ui.warn("timed out describing keys");
        }
        rows = session.visible_rows(cmd.height);
    }
    let report = TreeReport {
        source: description,
        keys: session.key_count(),
        offset: cmd.offset,
        rows: rows.iter().map(|row| row_report(row, &delimiter)).collect(),
    };
    session.teardown();
    emit(format, &report, |_| {
        ui.title(&format!("{} ({} keys)", report.source, report.keys));
        rows.iter().for_each(|row| ui.row(row));
    })
}

async fn run_search(
    source: Source,
    cmd: &SearchCmd,
    format: &OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    let (mut session, notifications, _) = open_and_scan(source, ui).await?;
    let token = session.set_query(&cmd.query)?;
    debug!(%token, query = %cmd.query, "cli.search.query");
    let task = ui.progress(format!("matching '{}'", cmd.query));
    match drive(&mut session, &notifications, None, |session| {
        session.is_filter_settled()
    })
    .await?
    {
        Outcome::Settled => {
            task.finish();
        }
        Outcome::Interrupted => {
            drop(task);
            session.teardown();
            return Err("search interrupted".into());
        }
    }
    let snapshot = session.current_matches();
    let rows = if cmd.tree {
        session.visible_rows(cmd.height)
    } else {
        Vec::new()
    };
    let report = SearchReport {
        query: snapshot.query.clone(),
        generation: snapshot.generation.to_string(),
        matches: snapshot.len(),
        top: snapshot
            .top(cmd.limit)
            .into_iter()
            .map(|(key, score)| MatchEntry {
                key: key.as_str().to_string(),
                score,
            })
            .collect(),
    };
    session.teardown();
    emit(format, &report, |_| {
        if cmd.tree {
            rows.iter().for_each(|row| ui.row(row));
        } else {
            ui.bullets(
                &format!("{} matches for '{}'", report.matches, report.query),
                report
                    .top
                    .iter()
                    .map(|entry| format!("{} [{}]", entry.key, entry.score)),
            );
        }
        if report.matches == 0 {
            ui.warn(&format!("no keys match '{}'", report.query));
        }
    })
}

fn run_profile(
    config: &mut CliConfig,
    action: ProfileAction,
    format: &OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    match action {
        ProfileAction::List => {
            let default = config.default_profile_name().map(str::to_string);
            let profiles = config.profiles();
            emit(format, &profiles, |_| {
                if profiles.is_empty() {
                    ui.note("no profiles saved");
                    return;
                }
                ui.bullets(
                    "Profiles",
                    profiles.iter().map(|profile| {
                        if default.as_deref() == Some(profile.name.as_str()) {
                            format!("{} (default)", profile.name)
                        } else {
                            profile.name.clone()
                        }
                    }),
                );
            })?;
        }
        ProfileAction::Show { name } => {
            let profile = config
                .profile(&name)
                .ok_or_else(|| ConfigError::ProfileNotFound { name: name.clone() })?;
            emit(format, profile, |_| print_profile(ui, profile))?;
        }
        ProfileAction::Set(cmd) => {
            let update = ProfileUpdate {
                keys_file: cmd.keys_file,
                simulate: cmd.simulate,
                seed: cmd.seed,
                delimiter: cmd.delimiter,
                pattern: cmd.pattern,
                preset: cmd.preset,
                page_size: cmd.page_size,
                scan_count: cmd.scan_count,
            };
            config.upsert_profile(&cmd.name, update)?;
            if cmd.default {
                config.set_default_profile(Some(&cmd.name))?;
            }
            let path = config.persist()?;
            ui.done(&format!("saved profile '{}' to {}", cmd.name, path.display()));
        }
        ProfileAction::Delete { name } => {
            config.delete_profile(&name)?;
            let path = config.persist()?;
            ui.done(&format!("deleted profile '{name}' from {}", path.display()));
        }
        ProfileAction::Default { name, clear } => {
            if clear {
                config.set_default_profile(None)?;
                config.persist()?;
                ui.done("cleared default profile");
            } else if let Some(name) = name {
                config.set_default_profile(Some(&name))?;
                config.persist()?;
                ui.done(&format!("default profile is now '{name}'"));
            } else {
                match config.default_profile_name() {
                    Some(name) => println!("{name}"),
                    None => ui.note("no default profile"),
                }
            }
        }
    }
    Ok(())
}

fn print_profile(ui: &Ui, profile: &Profile) {
    let mut rows: Vec<(&str, String)> = Vec::new();
    if let Some(path) = &profile.keys_file {
        rows.push(("keys file", path.display().to_string()));
    }
    if let Some(count) = profile.simulate {
        rows.push(("simulate", count.to_string()));
    }
    if let Some(seed) = profile.seed {
        rows.push(("seed", seed.to_string()));
    }
    if let Some(delimiter) = &profile.delimiter {
        rows.push(("delimiter", delimiter.clone()));
    }
    if let Some(pattern) = &profile.pattern {
        rows.push(("pattern", pattern.clone()));
    }
    if let Some(preset) = profile.preset {
        rows.push(("preset", format!("{preset:?}").to_lowercase()));
    }
    if let Some(page_size) = profile.page_size {
        rows.push(("page size", page_size.to_string()));
    }
    if let Some(scan_count) = profile.scan_count {
        rows.push(("scan count", scan_count.to_string()));
    }
    if rows.is_empty() {
        ui.note(&format!("profile '{}' has no settings", profile.name));
    } else {
        ui.facts(&profile.name, &rows);
    }
}

fn row_report(row: &Row, delimiter: &str) -> RowReport {
    let mut report = RowReport {
        kind: "",
        path: row.path().join(delimiter),
        depth: row.depth(),
        label: None,
        count: None,
        key: row.key().map(|key| key.as_str().to_string()),
        data_type: None,
        ttl_secs: None,
    };
    match row {
        Row::Node {
            label,
            count,
            kind,
            ttl,
            ..
        } => {
            report.kind = "node";
            report.label = Some(label.clone());
            report.count = Some(*count);
            describe_into(&mut report, kind.as_ref(), *ttl);
        }
        Row::Leaf {
            label, kind, ttl, ..
        } => {
            report.kind = "leaf";
            report.label = Some(label.clone());
            describe_into(&mut report, kind.as_ref(), *ttl);
        }
        Row::LoadMore { total, .. } => {
            report.kind = "load_more";
            report.count = Some(*total as u64);
        }
        Row::Scanning { .. } => report.kind = "scanning",
    }
    report
}

fn describe_into(report: &mut RowReport, kind: Option<&KeyKind>, ttl: Option<Ttl>) {
    report.data_type = kind.map(KeyKind::to_string);
    report.ttl_secs = ttl.map(|ttl| match ttl {
        Ttl::Persistent => -1,
        Ttl::Missing => -2,
        Ttl::Expires(left) => left.as_secs() as i64,
    });
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize + ?Sized,
    F: FnOnce(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

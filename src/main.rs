//! CLI entry point for `minimail`.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

use minimail::config::{self, Config};
use minimail::fetch::{EmlFiles, ImapSource};
use minimail::parser::mime::decode_message;
use minimail::poller::Poller;
use minimail::rules::{self, RuleOptions};
use minimail::sensors;
use minimail::state::State;

#[derive(Parser)]
#[command(
    name = "minimail",
    version,
    about = "Track Amazon and USPS deliveries from an IMAP mailbox"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to $MINIMAIL_CONFIG or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mailbox every update_interval seconds (default)
    Poll {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Write the state as JSON here after every cycle
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
    /// Run a single poll cycle and print the result
    Once {
        #[arg(long)]
        json: bool,
    },
    /// Run .eml files (or directories of them) through the rules
    Parse {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Only route senders containing this text (repeatable)
        #[arg(long = "filter", value_name = "TEXT")]
        filters: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show how one .eml file decodes and which records it yields
    Inspect { path: PathBuf },
    /// List the registered sensors
    Sensors {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config::Loaded { config, problem } = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    if let Some(e) = problem {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
    }

    match cli.command {
        None => cmd_poll(&config, None, None),
        Some(Commands::Poll { cycles, snapshot }) => cmd_poll(&config, cycles, snapshot),
        Some(Commands::Once { json }) => cmd_once(&config, json),
        Some(Commands::Parse {
            paths,
            filters,
            json,
        }) => cmd_parse(&config, paths, filters, json),
        Some(Commands::Inspect { path }) => cmd_inspect(&config, &path),
        Some(Commands::Sensors { json }) => cmd_sensors(json),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "minimail.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn imap_poller(config: &Config) -> anyhow::Result<Poller<ImapSource>> {
    let source = ImapSource::new(config.imap.clone())?;
    Ok(Poller::new(
        source,
        config.imap.sender_filters.clone(),
        RuleOptions::from(&config.usps),
        State::new(config.state.history_limit),
    ))
}

/// Poll until interrupted (or for `cycles` cycles).
fn cmd_poll(config: &Config, cycles: Option<u64>, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    let snapshot = snapshot.or_else(|| config.state.snapshot_file.clone());
    let mut poller = imap_poller(config)?.with_snapshot_file(snapshot);

    tracing::info!(
        host = %config.imap.host,
        folder = %config.imap.folder,
        interval_secs = config.imap.interval().as_secs(),
        "Starting poller"
    );
    poller.run(config.imap.interval(), cycles, |report, state| {
        tracing::debug!(
            merged = report.merged,
            got_amazon = state.flag("got_amazon"),
            got_usps_digest = state.flag("got_usps_digest"),
            got_usps_delivered = state.flag("got_usps_delivered"),
            "State updated"
        );
    });
    Ok(())
}

/// One cycle against the real mailbox.
fn cmd_once(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut poller = imap_poller(config)?.with_snapshot_file(config.state.snapshot_file.clone());
    let report = poller.run_cycle()?;
    if !json {
        println!();
        println!(
            "  Fetched {} message(s), {} matched, {} record(s) merged",
            report.fetched, report.matched, report.merged
        );
    }
    print_state(poller.state(), json)
}

/// One cycle over local files.
fn cmd_parse(
    config: &Config,
    paths: Vec<PathBuf>,
    filters: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    for path in &paths {
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
    }

    let mut poller = Poller::new(
        EmlFiles::new(paths),
        filters,
        RuleOptions::from(&config.usps),
        State::new(config.state.history_limit),
    );
    let report = poller.run_cycle()?;
    if !json {
        println!();
        println!(
            "  Read {} message(s), {} matched, {} record(s) merged",
            report.fetched, report.matched, report.merged
        );
    }
    print_state(poller.state(), json)
}

/// Decode one file and print the records each rule produces.
fn cmd_inspect(config: &Config, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read(path)?;
    let message = decode_message(&raw)?;
    let records = rules::route(&message, &[], &RuleOptions::from(&config.usps));

    let output = serde_json::json!({
        "from": message.from.display(),
        "subject": message.subject,
        "date": message.date.map(|d| d.to_rfc3339()),
        "message_id": message.message_id,
        "text_chars": message.text.chars().count(),
        "html_chars": message.html.chars().count(),
        "attachments": message.attachments.iter().map(|a| serde_json::json!({
            "filename": a.filename,
            "content_type": a.content_type,
            "content_id": a.content_id,
            "inline": a.is_inline,
            "size": a.data.len(),
        })).collect::<Vec<_>>(),
        "rules": rules::Rule::ALL
            .iter()
            .filter(|r| r.applies_to(&message))
            .map(|r| r.name())
            .collect::<Vec<_>>(),
        "records": records,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print the sensor registry.
fn cmd_sensors(json: bool) -> anyhow::Result<()> {
    if json {
        let items: Vec<serde_json::Value> = sensors::SENSORS
            .iter()
            .map(|s| {
                serde_json::json!({
                    "unique_id": s.unique_id(),
                    "name": s.name,
                    "namespace": s.namespace,
                    "field": s.field,
                    "attributes": s.attributes,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    println!();
    println!("  {:<32} {}", "Unique ID", "Name");
    println!("  {}", "-".repeat(64));
    for sensor in sensors::SENSORS {
        println!("  {:<32} {}", sensor.unique_id(), sensor.name);
    }
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "minimail", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Print the state as JSON, or as sensor readings and flags.
fn print_state(state: &State, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!();
    for reading in sensors::read_all(state) {
        let value = match &reading.state {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let value: String = value.chars().take(60).collect();
        println!("  {:<40} {}", reading.name, value);
    }

    if !state.flags.is_empty() {
        println!();
        for (flag, value) in &state.flags {
            println!("  {:<40} {}", flag, value);
        }
    }
    println!();
    Ok(())
}

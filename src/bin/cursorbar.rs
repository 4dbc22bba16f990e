use std::sync::Arc;

use chrono::{Local, Utc};
use cursorbar_lib::billing::{self, BILLING_DAY};
use cursorbar_lib::display::{LineFormat, StatusLineDisplay};
use cursorbar_lib::notifier::LogPrompt;
use cursorbar_lib::providers::cursor::{parse_credential, CursorCredentials, CursorProvider, KEYCHAIN_TOKEN_KEY};
use cursorbar_lib::settings::AppSettings;
use cursorbar_lib::stats::{CycleOutcome, StatsEvent, StatsOrchestrator};
use cursorbar_lib::storage::{status_snapshot, SecureStorage};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug)]
struct CliArgs {
    command: String,
    format: OutputFormat,
    pretty: bool,
    verbose: bool,
    cached: bool,
    positional: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeriodPayload {
    billing_day: u32,
    today: String,
    current: PeriodEntry,
    previous: PeriodEntry,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeriodEntry {
    month: u32,
    year: i32,
    start: String,
    end: String,
    label: String,
    progress: f64,
}

#[tokio::main]
async fn main() {
    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("cursorbar {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let settings = AppSettings::load();
    cursorbar_lib::init_logging(settings.debug_logging);

    let result = match args.command.as_str() {
        "watch" => run_watch(args, settings).await,
        "status" => run_status(args, settings).await,
        "period" => run_period(args),
        "login" => run_login(args),
        "logout" => run_logout(),
        _ => Err(format!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut format = OutputFormat::Text;
    let mut pretty = false;
    let mut verbose = false;
    let mut cached = false;
    let mut command = String::new();
    let mut positional = Vec::new();

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }

    if command.is_empty() {
        command = "watch".to_string();
    }

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                if let Some(value) = iter.next() {
                    if value == "json" {
                        format = OutputFormat::Json;
                    } else if value == "text" {
                        format = OutputFormat::Text;
                    }
                }
            }
            "--json" => format = OutputFormat::Json,
            "--pretty" => pretty = true,
            "--verbose" | "-v" => verbose = true,
            "--cached" => cached = true,
            "--help" | "-h" | "--version" | "-V" => {
                command = arg;
                break;
            }
            _ if !arg.starts_with('-') => positional.push(arg),
            _ => {}
        }
    }

    CliArgs {
        command,
        format,
        pretty,
        verbose,
        cached,
        positional,
    }
}

fn line_format(args: &CliArgs) -> LineFormat {
    match (args.format, args.pretty) {
        (OutputFormat::Text, _) => LineFormat::Text,
        (OutputFormat::Json, false) => LineFormat::Json,
        (OutputFormat::Json, true) => LineFormat::PrettyJson,
    }
}

fn build_orchestrator(args: &CliArgs, settings: AppSettings) -> StatsOrchestrator {
    let display = StatusLineDisplay::new()
        .with_tooltip(args.verbose)
        .with_format(line_format(args));

    StatsOrchestrator::new(
        settings,
        Box::new(CursorProvider::new()),
        Box::new(CursorCredentials::new()),
        Box::new(display),
        Arc::new(LogPrompt),
    )
}

async fn run_watch(args: CliArgs, settings: AppSettings) -> Result<(), String> {
    let orchestrator = build_orchestrator(&args, settings);
    let (tx, rx) = mpsc::channel(16);

    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(StatsEvent::Shutdown).await;
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(event) = parse_watch_command(&line) else {
                if !line.trim().is_empty() {
                    eprintln!("Unknown command: {}. Try refresh, focus, blur, reload, reset or quit.", line.trim());
                }
                continue;
            };
            let stop = event == StatsEvent::Shutdown;
            if tx.send(event).await.is_err() || stop {
                break;
            }
        }
    });

    orchestrator.run(rx).await;
    Ok(())
}

fn parse_watch_command(line: &str) -> Option<StatsEvent> {
    match line.trim() {
        "r" | "refresh" => Some(StatsEvent::RefreshRequested),
        "focus" => Some(StatsEvent::FocusGained),
        "blur" => Some(StatsEvent::FocusLost),
        "reload" => Some(StatsEvent::SettingsChanged(AppSettings::load())),
        "reset" => Some(StatsEvent::ResetNotifications),
        "q" | "quit" | "exit" => Some(StatsEvent::Shutdown),
        _ => None,
    }
}

async fn run_status(args: CliArgs, settings: AppSettings) -> Result<(), String> {
    if args.cached {
        return print_cached_status(&args);
    }

    let mut orchestrator = build_orchestrator(&args, settings);
    match orchestrator.poll_cycle(Utc::now()).await {
        CycleOutcome::Updated { .. } => Ok(()),
        CycleOutcome::NoCredential => Err("No Cursor session found".to_string()),
        CycleOutcome::Failed { .. } => Err("Failed to refresh Cursor usage".to_string()),
    }
}

fn print_cached_status(args: &CliArgs) -> Result<(), String> {
    let path = status_snapshot::snapshot_path().map_err(|err| err.to_string())?;
    let cached = status_snapshot::read_status_snapshot(&path)
        .ok_or_else(|| format!("No cached status at {}", path.display()))?;

    match args.format {
        OutputFormat::Text => {
            println!("{}", cached.status.text);
            if args.verbose {
                for line in &cached.status.tooltip {
                    println!("  {line}");
                }
            }
            println!("Updated: {}", cached.written_at);
        }
        OutputFormat::Json => {
            let contents = std::fs::read_to_string(&path).map_err(|err| err.to_string())?;
            let value: serde_json::Value =
                serde_json::from_str(&contents).map_err(|err| err.to_string())?;
            print_json(&value, args.pretty)?;
        }
    }
    Ok(())
}

fn run_period(args: CliArgs) -> Result<(), String> {
    let today = Local::now().date_naive();
    let current = billing::current_billing_period(&today, BILLING_DAY);
    let previous = billing::previous_billing_period(&today, BILLING_DAY);

    let entry = |month: billing::BillingMonth| {
        let period = month.period(BILLING_DAY);
        PeriodEntry {
            month: month.month,
            year: month.year,
            start: period.start.to_string(),
            end: period.end.to_string(),
            label: period.label(),
            progress: period.progress(today),
        }
    };
    let payload = PeriodPayload {
        billing_day: BILLING_DAY,
        today: today.to_string(),
        current: entry(current),
        previous: entry(previous),
    };

    match args.format {
        OutputFormat::Text => {
            println!(
                "Current period: {} ({:.0}% elapsed)",
                payload.current.label, payload.current.progress
            );
            println!("Previous period: {}", payload.previous.label);
        }
        OutputFormat::Json => print_json(&payload, args.pretty)?,
    }
    Ok(())
}

fn run_login(args: CliArgs) -> Result<(), String> {
    let raw = args
        .positional
        .first()
        .ok_or_else(|| "Usage: cursorbar login <session token>".to_string())?;
    let credential = parse_credential(raw).map_err(|err| err.to_string())?;

    SecureStorage::new()
        .store(KEYCHAIN_TOKEN_KEY, raw.trim())
        .map_err(|err| err.to_string())?;
    tracing::info!("Stored Cursor session in keychain");
    println!("Saved Cursor session for {}", credential.user_id);
    Ok(())
}

fn run_logout() -> Result<(), String> {
    SecureStorage::new()
        .delete(KEYCHAIN_TOKEN_KEY)
        .map_err(|err| err.to_string())?;
    println!("Removed stored Cursor session");
    Ok(())
}

fn print_json<T: Serialize>(payload: &T, pretty: bool) -> Result<(), String> {
    let output = if pretty {
        serde_json::to_string_pretty(payload)
    } else {
        serde_json::to_string(payload)
    }
    .map_err(|err| err.to_string())?;
    println!("{output}");
    Ok(())
}

fn print_help() {
    println!(
        "cursorbar {}\n\nUsage:\n  cursorbar watch [--verbose] [--format text|json] [--pretty]\n  cursorbar status [--format text|json] [--pretty] [--cached] [--verbose]\n  cursorbar period [--format text|json] [--pretty]\n  cursorbar login <session token>\n  cursorbar logout\n\nCommands:\n  watch   Poll Cursor usage until interrupted (default)\n  status  Fetch usage once and print it\n  period  Print the current usage-based billing period\n  login   Store a Cursor session token in the keychain\n  logout  Remove the stored session token\n\nWhile watching, type refresh, focus, blur, reload, reset or quit.\n\nFlags:\n  --format <text|json>  Output format\n  --json                Shortcut for --format json\n  --pretty              Pretty-print JSON output\n  --cached              Print the last written status instead of fetching\n  -v, --verbose         Include tooltip details\n  -h, --help            Show help\n  -V, --version         Show version",
        env!("CARGO_PKG_VERSION")
    );
}

#![forbid(unsafe_code)]

mod chat_client;
mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use studydeck_core::catalog::Catalog;
use studydeck_core::chat::ChatError;
use studydeck_core::config::{EffectiveConfig, resolve_config};
use studydeck_core::error::{ErrorCode, SyncError};
use studydeck_core::store::FileStore;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "sd: local study progress with portable backups",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Store directory (overrides STUDYDECK_STORE and config).
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Backup",
        about = "Export all records to a backup file",
        long_about = "Write every stored record into a portable snapshot document.",
        after_help = "EXAMPLES:\n    # Export to studydeck-backup-<date>.json in the current directory\n    sd export\n\n    # Export to a chosen path\n    sd export --output ~/backups/phone.json\n\n    # Print the document instead of saving it\n    sd export --output -"
    )]
    Export(cmd::export::ExportArgs),

    #[command(
        next_help_heading = "Backup",
        about = "Merge a backup file into the store",
        long_about = "Validate a snapshot document and smart-merge it into the current records. Nothing already stored is lost.",
        after_help = "EXAMPLES:\n    # Merge a backup from another device\n    sd import studydeck-backup-2024-06-01.json\n\n    # Emit the merge report as JSON\n    sd import backup.json --json"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        next_help_heading = "Backup",
        about = "Replace all records with the bundled baseline",
        long_about = "Discard every stored record and install the bundled baseline profile. This cannot be undone; export first.",
        after_help = "EXAMPLES:\n    # Restore after an interactive confirmation\n    sd restore-seed\n\n    # Restore without prompting\n    sd restore-seed --yes"
    )]
    RestoreSeed(cmd::restore::RestoreArgs),

    #[command(
        next_help_heading = "Records",
        about = "Print one record",
        after_help = "EXAMPLES:\n    sd get practiceSeconds\n    sd get chat.maria"
    )]
    Get(cmd::record::GetArgs),

    #[command(
        next_help_heading = "Records",
        about = "Overwrite one record",
        long_about = "Write a JSON value to a record. Known record types must have the expected shape.",
        after_help = "EXAMPLES:\n    sd set practiceSeconds 3600\n    sd set completedLessons '[\"es-a1-01\"]'"
    )]
    Set(cmd::record::SetArgs),

    #[command(
        next_help_heading = "Records",
        about = "List stored record keys",
        after_help = "EXAMPLES:\n    sd keys\n    sd keys --json"
    )]
    Keys,

    #[command(
        next_help_heading = "Progress",
        about = "Show the dashboard summary",
        after_help = "EXAMPLES:\n    sd status\n    sd status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Progress",
        about = "Send one message to a tutor contact",
        long_about = "Send a message to a contact and append both sides to their transcript.",
        after_help = "EXAMPLES:\n    sd chat maria \"¿Qué tal el fin de semana?\"\n\n    # Also get a correction and save the reply as audio\n    sd chat maria \"Yo soy cansado\" --check --speak reply.mp3"
    )]
    Chat(cmd::chat::ChatArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    sd completions bash\n    sd completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

/// Everything a store-backed command needs.
pub struct Context {
    pub store: FileStore,
    pub catalog: Catalog,
    pub output: OutputMode,
    pub config: EffectiveConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STUDYDECK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "studydeck=debug,info"
        } else {
            "studydeck=info,warn"
        })
    });

    let format = env::var("STUDYDECK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_context(cli: &Cli) -> anyhow::Result<Context> {
    let config = resolve_config(cli.json, cli.store.as_deref())
        .map_err(|err| anyhow::Error::new(ConfigError(err.to_string())))?;
    let output = OutputMode::from_resolved(&config.resolved_output);
    debug!(store = %config.store_dir.display(), ?output, "opening store");
    let store = FileStore::open(&config.store_dir).map_err(|source| SyncError::StorageRead {
        key: "*".to_string(),
        source,
    })?;
    Ok(Context {
        store,
        catalog: Catalog::standard(),
        output,
        config,
    })
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConfigError(String);

/// Map a failed command to what the learner sees.
fn cli_error(err: &anyhow::Error, verbose: bool) -> CliError {
    let code = if let Some(sync) = err.downcast_ref::<SyncError>() {
        Some(sync.code())
    } else if let Some(chat) = err.downcast_ref::<ChatError>() {
        Some(chat.code())
    } else if err.downcast_ref::<ConfigError>().is_some() {
        Some(ErrorCode::ConfigParseError)
    } else {
        None
    };

    let mut error = match code {
        Some(code) => CliError::from(code),
        None => CliError::new(err.to_string()),
    };
    if verbose {
        error.detail = Some(format!("{err:#}"));
    }
    error
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let result = match &cli.command {
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
        command => open_context(&cli).and_then(|ctx| match command {
            Commands::Export(args) => cmd::export::run_export(args, &ctx),
            Commands::Import(args) => cmd::import::run_import(args, &ctx),
            Commands::RestoreSeed(args) => cmd::restore::run_restore(args, &ctx),
            Commands::Get(args) => cmd::record::run_get(args, &ctx),
            Commands::Set(args) => cmd::record::run_set(args, &ctx),
            Commands::Keys => cmd::record::run_keys(&ctx),
            Commands::Status => cmd::status::run_status(&ctx),
            Commands::Chat(args) => cmd::chat::run_chat(args, &ctx),
            Commands::Completions(_) => Ok(()),
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "command failed");
            let mode = if cli.json { OutputMode::Json } else { OutputMode::Pretty };
            let _ = output::render_error(mode, &cli_error(&err, cli.verbose));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_before_and_after_subcommand() {
        assert!(Cli::parse_from(["sd", "--json", "status"]).json);
        assert!(Cli::parse_from(["sd", "status", "--json"]).json);
    }

    #[test]
    fn store_flag_is_global() {
        let cli = Cli::parse_from(["sd", "keys", "--store", "/tmp/deck"]);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/deck")));
    }

    #[test]
    fn restore_requires_flag_for_yes() {
        let cli = Cli::parse_from(["sd", "restore-seed", "--yes"]);
        assert!(matches!(
            cli.command,
            Commands::RestoreSeed(cmd::restore::RestoreArgs { yes: true })
        ));
    }

    #[test]
    fn import_takes_a_file() {
        let cli = Cli::parse_from(["sd", "import", "backup.json"]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert_eq!(args.file, PathBuf::from("backup.json"));
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["sd", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            })
        ));
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["sd", "export"],
            vec!["sd", "export", "--output", "-"],
            vec!["sd", "import", "x.json"],
            vec!["sd", "restore-seed"],
            vec!["sd", "get", "notes"],
            vec!["sd", "set", "notes", "\"hola\""],
            vec!["sd", "keys"],
            vec!["sd", "status"],
            vec!["sd", "chat", "maria", "hola"],
            vec!["sd", "chat", "maria", "hola", "--check", "--speak", "out.mp3"],
            vec!["sd", "completions", "zsh"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "Failed to parse: {args:?}: {:?}", result.err());
        }
    }

    #[test]
    fn sync_errors_render_without_raw_text() {
        let err = anyhow::Error::new(SyncError::RestoreDeclined).context("restore failed");
        let rendered = cli_error(&err, false);
        assert_eq!(rendered.error_code.as_deref(), Some("E4001"));
        assert!(rendered.detail.is_none());
        assert!(!rendered.message.contains("restore failed"));
    }

    #[test]
    fn verbose_adds_error_chain() {
        let err = anyhow::Error::new(SyncError::RestoreDeclined).context("restore failed");
        let rendered = cli_error(&err, true);
        assert!(rendered.detail.as_deref().is_some_and(|d| d.contains("restore failed")));
    }
}

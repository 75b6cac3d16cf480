//! CLI entry point for `mboxck`.

use std::path::{Path, PathBuf};

use clap::Parser;
use humansize::{format_size, BINARY};

use mboxck::check::StdinPrompter;
use mboxck::config::{self, CoreConfig};
use mboxck::error::{exit, MboxckError};
use mboxck::model::mailbox::Mailbox;
use mboxck::report::Reporter;
use mboxck::source::signals;
use mboxck::{shell, writer};

#[derive(Parser)]
#[command(
    name = "mboxck",
    version,
    about = "Check, repair, and inspect mbox mailbox files",
    after_help = "Any unrecognized long option is run as a command, e.g. --unique.\n\
                  With no mailbox operands, $MAIL (then /var/mail/$LOGNAME) is used."
)]
struct Cli {
    /// Back up each mailbox to <mailbox>~ before changing it
    #[arg(short = 'b')]
    backup: bool,

    /// Check the mailboxes for consistency
    #[arg(short = 'c')]
    check: bool,

    /// Debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Process mailbox FILE (may be repeated)
    #[arg(short = 'f', value_name = "FILE")]
    file: Vec<PathBuf>,

    /// Enter interactive mode
    #[arg(short = 'i')]
    interactive: bool,

    /// List each mailbox's messages
    #[arg(short = 'l')]
    list: bool,

    /// Dry run: no file is created, changed, or removed
    #[arg(short = 'n')]
    dry_run: bool,

    /// Concatenate all messages into FILE
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Suppress warnings and notices
    #[arg(short = 'q')]
    quiet: bool,

    /// Repair the mailboxes
    #[arg(short = 'r')]
    repair: bool,

    /// Strict checking: report more indiscretions than otherwise
    #[arg(short = 's')]
    strict: bool,

    /// Remove duplicate messages from each mailbox
    #[arg(short = 'u')]
    unique: bool,

    /// Print more progress information
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Write changes back without asking
    #[arg(short = 'w')]
    auto_write: bool,

    /// Show a few lines of context around parse errors
    #[arg(short = 'C')]
    show_context: bool,

    /// Do not memory-map mailbox files
    #[arg(short = 'N', long = "nomap")]
    no_mmap: bool,

    /// Mailbox files or directories of mailbox files
    #[arg(value_name = "MBOX")]
    mailboxes: Vec<PathBuf>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    signals::install();

    // Unknown long options become commands for the command loop.
    let (args, mut commands) = split_command_options(std::env::args().collect());

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit::OK,
                _ => exit::USAGE,
            };
            let _ = e.print();
            return code;
        }
    };

    let file_config = config::load_file_config();
    setup_logging(&cli, &file_config);

    let mut config = CoreConfig::from_file_config(&file_config);
    config.quiet = cli.quiet;
    config.verbose = cli.verbose;
    config.dry_run = cli.dry_run;
    config.interactive = cli.interactive;
    config.auto_write = cli.auto_write;
    config.show_context = cli.show_context;
    config.strict = config.strict || cli.strict;
    config.backup = config.backup || cli.backup;
    config.use_mmap = !cli.no_mmap;

    // Flag-style commands run before any long-option commands.
    let mut flagged = Vec::new();
    if cli.check {
        flagged.push("check".to_string());
    }
    if cli.list {
        flagged.push("list".to_string());
    }
    if cli.repair {
        flagged.push("repair".to_string());
    }
    if cli.unique {
        flagged.push("unique".to_string());
    }
    flagged.append(&mut commands);
    let commands = flagged;

    let mut files = Vec::new();
    let mut errors = 0;
    for path in cli.file.iter().chain(cli.mailboxes.iter()) {
        errors += add_files(&mut files, path);
    }
    if cli.file.is_empty() && cli.mailboxes.is_empty() {
        errors += add_files(&mut files, &default_mailbox());
    }

    let mut output = match &cli.output {
        Some(path) if !config.dry_run => match std::fs::File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("mboxck: can't create {}: {e}", path.display());
                return exit::CANTCREAT;
            }
        },
        _ => None,
    };

    let mut reporter = Reporter::new(config.quiet, config.verbose, config.show_context);
    let mut prompter = StdinPrompter;
    let mut first_error: Option<i32> = None;

    for path in &files {
        if let Err(e) = process_file(
            path,
            &commands,
            output.as_mut(),
            &mut config,
            &mut prompter,
            &mut reporter,
        ) {
            eprintln!("mboxck: {e}");
            errors += 1;
            first_error.get_or_insert(e.exit_code());
            if matches!(e, MboxckError::Cancelled) {
                break;
            }
        }
        reporter.flush_summary();
    }

    if errors > 0 {
        first_error.unwrap_or(exit::NOINPUT)
    } else {
        exit::OK
    }
}

/// Open one mailbox, run the commands over it, and append it to the
/// concatenation output when one was requested.
fn process_file(
    path: &Path,
    commands: &[String],
    output: Option<&mut std::fs::File>,
    config: &mut CoreConfig,
    prompter: &mut StdinPrompter,
    reporter: &mut Reporter,
) -> mboxck::error::Result<()> {
    let mut mbox = Mailbox::open(path, config, reporter)?;

    let size = mbox.data().map(|d| d.len()).unwrap_or(0);
    reporter.note(format!(
        "{}: {} message{}, {}",
        path.display(),
        mbox.count(),
        if mbox.count() == 1 { "" } else { "s" },
        format_size(size as u64, BINARY)
    ));

    if config.interactive || !commands.is_empty() {
        shell::run(&mut mbox, commands, config, prompter, reporter)?;
    }

    if let Some(out) = output {
        writer::write_mailbox_to(out, &mut mbox, true).map_err(|e| MboxckError::io(path, e))?;
    }

    Ok(())
}

/// Separate unrecognized `--long` options out of the argv so the rest
/// can go to clap. Recognized long options and everything after `--`
/// pass through untouched.
fn split_command_options(argv: Vec<String>) -> (Vec<String>, Vec<String>) {
    const KNOWN_LONG: [&str; 5] = ["--debug", "--nomap", "--verbose", "--help", "--version"];

    let mut args = Vec::with_capacity(argv.len());
    let mut commands = Vec::new();
    let mut passthrough = false;

    for (i, arg) in argv.into_iter().enumerate() {
        if i == 0 || passthrough || !arg.starts_with("--") {
            args.push(arg);
        } else if arg == "--" {
            passthrough = true;
            args.push(arg);
        } else if KNOWN_LONG.contains(&arg.as_str()) {
            args.push(arg);
        } else {
            commands.push(arg.trim_start_matches("--").replace('=', " "));
        }
    }

    (args, commands)
}

/// `$MAIL`, else `/var/mail/$LOGNAME`.
fn default_mailbox() -> PathBuf {
    if let Ok(mail) = std::env::var("MAIL") {
        return PathBuf::from(mail);
    }
    let user = std::env::var("LOGNAME").unwrap_or_default();
    PathBuf::from(format!("/var/mail/{user}"))
}

/// Collect `path` or, for a directory, its non-dotfile contents
/// recursively. Returns the number of errors hit.
fn add_files(files: &mut Vec<PathBuf>, path: &Path) -> usize {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("mboxck: {}: {e}", path.display());
            return 1;
        }
    };

    if !meta.is_dir() {
        files.push(path.to_path_buf());
        return 0;
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("mboxck: {}: {e}", path.display());
            return 1;
        }
    };

    let mut errors = 0;
    let mut children: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            !p.file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
        })
        .collect();
    children.sort();
    for child in children {
        errors += add_files(files, &child);
    }
    errors
}

/// Tracing goes to stderr, and to a log file under the cache directory
/// when one can be created.
fn setup_logging(cli: &Cli, file_config: &config::FileConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        file_config.general.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = dirs::cache_dir().map(|d| d.join("mboxck"));
    let file_layer = log_dir
        .filter(|d| std::fs::create_dir_all(d).is_ok())
        .map(|d| {
            let appender = tracing_appender::rolling::never(d, "mboxck.log");
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

//! Command-line interface for RAR archives.
//!
//! Lists, extracts and reads comments from RAR archives through the UnRAR
//! shared library.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use unrardll::{extract, probe, ExtractOptions, LibraryConfig, OpenMode, UnrarLibrary};

#[derive(Parser)]
#[command(name = "unrardll")]
#[command(version, about = "List and extract RAR archives with the UnRAR library", long_about = None)]
struct Cli {
    /// Path to the UnRAR shared library (defaults to UNRAR_LIBRARY or
    /// the platform's usual names)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of an archive
    List {
        /// Archive file to list
        archive: PathBuf,

        /// Password for archives with encrypted headers
        #[arg(long)]
        password: Option<String>,

        /// Leave out directories and links
        #[arg(long)]
        only_useful: bool,

        /// Output full headers as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract one or more archives
    Extract {
        /// Archive files to extract
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Password for encrypted archives
        #[arg(long)]
        password: Option<String>,

        /// Check CRCs of the extracted data against the archive
        #[arg(long)]
        verify: bool,
    },

    /// Print the archive comment
    Comment {
        /// Archive file
        archive: PathBuf,
    },

    /// Write a single member to standard output
    Cat {
        /// Archive file
        archive: PathBuf,

        /// Name of the member, with `/` as the separator
        member: String,

        /// Password for encrypted archives
        #[arg(long)]
        password: Option<String>,

        /// Check the member's CRC against the archive
        #[arg(long)]
        verify: bool,
    },

    /// Print the API version of the loaded library
    Version,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_library(cli.library).and_then(|library| match cli.command {
        Commands::List {
            archive,
            password,
            only_useful,
            json,
        } => handle_list(&library, &archive, password.as_deref(), only_useful, json),
        Commands::Extract {
            archives,
            out,
            password,
            verify,
        } => handle_extract(&library, archives, out, password, verify),
        Commands::Comment { archive } => handle_comment(&library, &archive),
        Commands::Cat {
            archive,
            member,
            password,
            verify,
        } => handle_cat(&library, &archive, &member, password, verify),
        Commands::Version => {
            println!("{}", library.dll_version());
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_library(path: Option<PathBuf>) -> Result<Arc<UnrarLibrary>, Box<dyn std::error::Error>> {
    let library = match path {
        Some(path) => Arc::new(UnrarLibrary::load(&LibraryConfig { path: Some(path) })?),
        None => UnrarLibrary::global()?,
    };
    Ok(library)
}

fn handle_list(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    password: Option<&str>,
    only_useful: bool,
    json: bool,
) -> CliResult {
    if json {
        let headers: Vec<_> = probe::headers(library, archive, password, OpenMode::List)?
            .into_iter()
            .filter(|h| !only_useful || h.is_useful())
            .collect();
        println!("{}", serde_json::to_string_pretty(&headers)?);
        return Ok(());
    }

    for name in probe::names(library, archive, only_useful, password)? {
        println!("{}", name);
    }
    Ok(())
}

fn handle_extract(
    library: &Arc<UnrarLibrary>,
    archives: Vec<PathBuf>,
    out: PathBuf,
    password: Option<String>,
    verify: bool,
) -> CliResult {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let options = ExtractOptions {
        password,
        verify_data: verify,
    };

    for archive in archives {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {pos} files {msg}",
        )?);

        let pb_clone = pb.clone();
        let progress_cb = move |file: &str, _bytes: u64, _total: Option<u64>| {
            pb_clone.inc(1);
            pb_clone.set_message(file.to_string());
            true
        };

        let result = extract(
            library,
            &archive,
            &out,
            &options,
            &progress_cb,
            Arc::clone(&cancel_flag),
        );
        pb.finish_and_clear();
        let stats = result.inspect_err(|e| {
            warn!(archive = %archive.display(), error = %e, "extraction failed");
        })?;

        info!(
            archive = %archive.display(),
            files = stats.files_extracted,
            bytes = stats.bytes_written,
            duration_ms = stats.duration.as_millis() as u64,
            "extracted"
        );
    }
    Ok(())
}

fn handle_comment(library: &Arc<UnrarLibrary>, archive: &Path) -> CliResult {
    print!("{}", probe::comment(library, archive)?);
    Ok(())
}

fn handle_cat(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    member: &str,
    password: Option<String>,
    verify: bool,
) -> CliResult {
    let options = ExtractOptions {
        password,
        verify_data: verify,
    };
    let wanted = member.replace('\\', "/");
    let found = extract::extract_member(
        library,
        archive,
        |h| h.filename.replace(std::path::MAIN_SEPARATOR, "/") == wanted,
        &options,
    )?;

    match found {
        Some((_, data)) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
            Ok(())
        }
        None => Err(format!("{} not found in {}", member, archive.display()).into()),
    }
}

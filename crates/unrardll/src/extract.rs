//! Archive extraction with path safety and optional CRC verification.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{ExtractError, SecurityError};
use crate::library::UnrarLibrary;
use crate::probe;
use crate::safety::{is_safe_symlink, safe_path, stays_within};
use crate::session::{Session, Sink};
use crate::types::{EntryHeader, ExtractOptions, ExtractStats, OpenMode, Operation, REDIR_UNIX_SYMLINK};
use crate::ProgressCallback;

/// Extract every entry of `archive` below `location`.
///
/// This function performs extraction with the following behavior:
/// - Entry paths that would escape `location` are skipped
/// - Unix symbolic links are recreated only when their target stays inside
///   `location`; other links are skipped
/// - Entries split across volumes are reassembled
/// - Modification times are restored
/// - With `verify_data`, data is routed through the callback and every CRC
///   is checked after extraction
///
/// # Arguments
///
/// * `library` - The loaded UnRAR library
/// * `archive` - Path to the archive (the first volume of a multi-volume set)
/// * `location` - Directory where files will be extracted; created if missing
/// * `options` - Extraction options
/// * `progress_cb` - Called after each file; return `false` to cancel
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Returns
///
/// Returns `ExtractStats` with extraction statistics on success.
pub fn extract_archive(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    location: &Path,
    options: &ExtractOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractStats, ExtractError> {
    let start_time = Instant::now();

    // Create output directory if it doesn't exist
    fs::create_dir_all(location)?;
    let location = std::path::absolute(location)?;

    let mut stats = ExtractStats::default();
    let mut session = Session::open(
        library,
        archive,
        options.password.as_deref(),
        OpenMode::Extract,
        options.verify_data,
        Some(cancel_flag.clone()),
    )?;

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut crc_map: HashMap<String, u32> = HashMap::new();

    while let Some(header) = session.next_header()? {
        if cancel_flag.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        if header.filename.is_empty() {
            continue;
        }
        let dest = match destination(&location, &header.filename) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(error = %e, "skipping entry");
                session.process(Operation::Skip, None)?;
                continue;
            }
        };

        let previous_crc = crc_map.get(&header.filename).copied().unwrap_or(0);
        session.state().reset(Sink::Discard, previous_crc);

        if header.is_dir {
            // Missing empty directories are not worth failing over
            let _ = fs::create_dir_all(&dest);
            crc_map.remove(&header.filename);
            session.process(Operation::Skip, None)?;
        } else if header.redir_type != 0 {
            if let Err(e) = create_link(&location, &dest, &header) {
                let ExtractError::Security(e) = e else {
                    return Err(e);
                };
                warn!(error = %e, "skipping link");
            }
            crc_map.remove(&header.filename);
            session.process(Operation::Skip, None)?;
        } else {
            let appending = seen.contains(&dest);
            let bytes = extract_file(&mut session, &dest, appending, options.verify_data, &header)?;
            crc_map.insert(header.filename.clone(), session.state().crc());
            if !appending {
                stats.files_extracted += 1;
            }
            stats.bytes_written += bytes;

            if !progress_cb(&header.filename, stats.bytes_written, Some(header.unpack_size)) {
                return Err(ExtractError::Cancelled);
            }
        }
        seen.insert(dest);
    }
    drop(session);

    if options.verify_data {
        verify(library, archive, &crc_map, options.password.as_deref())?;
    }

    stats.duration = start_time.elapsed();
    debug!(
        archive = %archive.display(),
        files = stats.files_extracted,
        bytes = stats.bytes_written,
        "extraction finished"
    );
    Ok(stats)
}

/// Where an entry lands below `location`, following links extracted so far.
fn destination(location: &Path, filename: &str) -> Result<PathBuf, SecurityError> {
    match safe_path(location, filename) {
        Some(dest) if stays_within(location, &dest) => Ok(dest),
        _ => Err(SecurityError::PathTraversal(filename.to_string())),
    }
}

/// Write one regular entry to `dest`, returning the number of bytes written.
fn extract_file(
    session: &mut Session,
    dest: &Path,
    appending: bool,
    verify_data: bool,
    header: &EntryHeader,
) -> Result<u64, ExtractError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(appending)
        .truncate(!appending)
        .open(dest)?;
    let before = file.metadata()?.len();

    if verify_data {
        session.state().set_sink(Sink::File(file.try_clone()?));
        let result = session.process(Operation::Test, None);
        session.state().take_sink();
        result?;
    } else {
        session.process(Operation::Test, Some(&file))?;
    }

    if let Some(modified) = header.modified() {
        if let Err(e) = file.set_modified(modified) {
            warn!(path = %dest.display(), error = %e, "failed to set modification time");
        }
    }
    Ok(file.metadata()?.len().saturating_sub(before))
}

#[cfg(unix)]
fn create_link(location: &Path, dest: &Path, header: &EntryHeader) -> Result<(), ExtractError> {
    let target = match (&header.redir_name, header.redir_type) {
        (Some(target), REDIR_UNIX_SYMLINK) => target,
        _ => {
            debug!(filename = %header.filename, redir_type = header.redir_type, "skipping redirection");
            return Ok(());
        }
    };
    let link_dir = dest.parent().unwrap_or(location);
    let resolved = link_dir.join(target);
    if !is_safe_symlink(location, &resolved) || !stays_within(location, &resolved) {
        let link = format!("{} -> {}", header.filename, target);
        return Err(SecurityError::UnsafeSymlink(link).into());
    }
    fs::create_dir_all(link_dir)?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_link(_location: &Path, _dest: &Path, header: &EntryHeader) -> Result<(), ExtractError> {
    debug!(filename = %header.filename, "links are not recreated on this platform");
    Ok(())
}

/// Extract the first regular entry accepted by `predicate` into memory.
///
/// Returns the entry name and its data, or `None` when nothing matches.
pub fn extract_member<F>(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    mut predicate: F,
    options: &ExtractOptions,
) -> Result<Option<(String, Vec<u8>)>, ExtractError>
where
    F: FnMut(&EntryHeader) -> bool,
{
    let mut session = Session::open(
        library,
        archive,
        options.password.as_deref(),
        OpenMode::Extract,
        options.verify_data,
        None,
    )?;

    let (filename, data, crc) = loop {
        let Some(header) = session.next_header()? else {
            return Ok(None);
        };
        if !header.is_useful() || !predicate(&header) {
            session.process(Operation::Skip, None)?;
            continue;
        }
        session.state().reset(Sink::Memory(Vec::new()), 0);
        session.process(Operation::Test, None)?;
        let mut state = session.state();
        let data = match state.take_sink() {
            Sink::Memory(data) => data,
            _ => Vec::new(),
        };
        break (header.filename, data, state.crc());
    };
    drop(session);

    if options.verify_data {
        let crc_map = HashMap::from([(filename.clone(), crc)]);
        verify(library, archive, &crc_map, options.password.as_deref())?;
    }
    Ok(Some((filename, data)))
}

/// Compare CRCs computed during extraction with the ones recorded in the
/// archive. For entries split across volumes the last part's CRC, which
/// covers the whole file, is used.
pub fn verify(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    crc_map: &HashMap<String, u32>,
    password: Option<&str>,
) -> Result<(), ExtractError> {
    let recorded: HashMap<String, u32> =
        probe::headers(library, archive, password, OpenMode::ListIncludingSplitFiles)?
            .into_iter()
            .map(|h| (h.filename, h.file_crc))
            .collect();

    for (name, &actual) in crc_map {
        let expected = recorded.get(name).copied().unwrap_or(0);
        if expected != actual {
            return Err(ExtractError::FileCorrupt {
                name: name.clone(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

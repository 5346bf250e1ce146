//! Listing archive contents without extracting.

use std::path::{Path, MAIN_SEPARATOR};
use std::sync::Arc;

use tracing::debug;

use crate::error::ExtractError;
use crate::library::UnrarLibrary;
use crate::session::Session;
use crate::types::{EntryHeader, OpenMode, Operation};

/// Read the header of every entry in the archive.
///
/// With [`OpenMode::ListIncludingSplitFiles`], entries continued across
/// volumes are reported once per part.
pub fn headers(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    password: Option<&str>,
    mode: OpenMode,
) -> Result<Vec<EntryHeader>, ExtractError> {
    let mut session = Session::open(library, archive, password, mode, false, None)?;
    let mut headers = Vec::new();
    while let Some(header) = session.next_header()? {
        session.process(Operation::Skip, None)?;
        headers.push(header);
    }
    debug!(archive = %archive.display(), entries = headers.len(), "listed archive");
    Ok(headers)
}

/// Names of the entries in the archive, using `/` as the separator.
///
/// With `only_useful`, directories and links are left out.
pub fn names(
    library: &Arc<UnrarLibrary>,
    archive: &Path,
    only_useful: bool,
    password: Option<&str>,
) -> Result<Vec<String>, ExtractError> {
    Ok(headers(library, archive, password, OpenMode::List)?
        .into_iter()
        .filter(|h| !only_useful || h.is_useful())
        .map(|h| h.filename.replace(MAIN_SEPARATOR, "/"))
        .collect())
}

/// The archive comment, or an empty string when there is none.
///
/// Comments are expected to be UTF-8; invalid sequences are replaced.
pub fn comment(library: &Arc<UnrarLibrary>, archive: &Path) -> Result<String, ExtractError> {
    let raw = Session::comment(library, archive)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

//! Remove a file from the package.

use log::info;

use crate::error::{Error, Result};
use crate::ops::check_for_conflict;
use crate::ovf::Ovf;
use crate::session::Session;

/// Options for the remove-file operation. At least one of the two lookups
/// must be given; when both are, they must refer to the same file.
#[derive(Debug, Clone, Default)]
pub struct RemoveFileOptions {
    /// Stored filename (File href).
    pub file_path: Option<String>,
    /// File ID.
    pub file_id: Option<String>,
}

/// Remove the file, its Disk entry, and its drive mapping.
pub fn run(ovf: &mut Ovf, options: &RemoveFileOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    if options.file_path.is_none() && options.file_id.is_none() {
        return Err(Error::invalid_input(
            "remove-file needs a filename or a file ID",
        ));
    }

    let by_path = options
        .file_path
        .as_ref()
        .map(|path| ovf.search_from_filename(path));
    let by_id = options
        .file_id
        .as_ref()
        .map(|id| ovf.search_from_file_id(id));

    let file_id = check_for_conflict(
        "file to remove",
        &[
            by_path.as_ref().and_then(|s| s.file_id.clone()),
            by_id.as_ref().and_then(|s| s.file_id.clone()),
        ],
    )?
    .ok_or_else(|| Error::not_found("no such file found in the package"))?;
    let disk_id = check_for_conflict(
        "disk associated with the file",
        &[
            by_path.as_ref().and_then(|s| s.disk_id.clone()),
            by_id.as_ref().and_then(|s| s.disk_id.clone()),
        ],
    )?;
    let disk_index = check_for_conflict(
        "drive device mapping the file",
        &[
            by_path.as_ref().and_then(|s| s.disk_index),
            by_id.as_ref().and_then(|s| s.disk_index),
        ],
    )?;

    let href = ovf.file_href_of(&file_id).unwrap_or_default();
    let mut prompt = format!("Remove file '{}' (ID '{}')", href, file_id);
    if let Some(disk_id) = &disk_id {
        prompt.push_str(&format!(" and disk '{}'", disk_id));
    }
    if disk_index.is_some() {
        prompt.push_str(" and its drive device");
    }
    prompt.push('?');
    session.confirm_or_fail(&prompt)?;

    ovf.remove_file_entry(&file_id, disk_id.as_deref(), disk_index)?;
    info!("Removed file '{}'", href);
    Ok(())
}

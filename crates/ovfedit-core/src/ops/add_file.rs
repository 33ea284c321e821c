//! Add or replace a plain file in the package.

use std::path::PathBuf;

use log::info;

use crate::error::{Error, Result};
use crate::ops::check_for_conflict;
use crate::ovf::Ovf;
use crate::session::Session;

/// Options for the add-file operation.
#[derive(Debug, Clone)]
pub struct AddFileOptions {
    /// Local file to copy into the package at write time.
    pub file: PathBuf,
    /// File ID to use; defaults to the file's basename.
    pub file_id: Option<String>,
}

/// Add the file to the package's References.
pub fn run(ovf: &mut Ovf, options: &AddFileOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    if !options.file.is_file() {
        return Err(Error::invalid_input(format!(
            "'{}' is not a file",
            options.file.display()
        )));
    }
    let filename = options
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            Error::invalid_input(format!("'{}' has no file name", options.file.display()))
        })?;

    // The same entry may be found by name or by ID; they must agree.
    let by_name = ovf.file_id_of_href(&filename);
    let by_id = options
        .file_id
        .as_ref()
        .filter(|id| ovf.find_file_by_id(id).is_some())
        .cloned();
    let existing = check_for_conflict("file to overwrite", &[by_name, by_id])?;

    let file_id = options
        .file_id
        .clone()
        .or_else(|| existing.clone())
        .unwrap_or_else(|| filename.clone());

    if let Some(existing) = existing {
        session.confirm_or_fail(&format!(
            "Replace existing file '{}' (ID '{}') with '{}'?",
            filename,
            existing,
            options.file.display()
        ))?;
    }

    let href = ovf.add_file_entry(&options.file, &file_id, None)?;
    info!("Added file '{}' with ID '{}'", href, file_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ovf() -> Ovf {
        Ovf::parse(include_str!("../../tests/data/csr1000v.ovf").as_bytes()).unwrap()
    }

    #[test]
    fn test_add_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README.txt");
        std::fs::write(&path, b"read me").unwrap();

        let mut ovf = ovf();
        let session = Session::new().unwrap();
        run(
            &mut ovf,
            &AddFileOptions {
                file: path,
                file_id: None,
            },
            &session,
        )
        .unwrap();
        assert!(ovf.find_file_by_href("README.txt").is_some());
        assert_eq!(ovf.file_id_of_href("README.txt").as_deref(), Some("README.txt"));
    }

    #[test]
    fn test_replace_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.iso");
        std::fs::write(&path, b"new iso").unwrap();

        let mut ovf = ovf();
        let options = AddFileOptions {
            file: path,
            file_id: None,
        };
        let session = Session::new().unwrap();
        assert!(run(&mut ovf, &options, &session).is_err());

        let session = Session::new().unwrap().with_force(true);
        run(&mut ovf, &options, &session).unwrap();
        // Replaced in place, keeping the original ID.
        assert_eq!(ovf.file_id_of_href("config.iso").as_deref(), Some("file2"));
        let uri = crate::names::OVF_1_URI;
        let file = ovf.find_file_by_href("config.iso").unwrap();
        assert_eq!(file.attr(uri, "size"), Some("7"));
    }

    #[test]
    fn test_missing_source_file() {
        let mut ovf = ovf();
        let session = Session::new().unwrap();
        let err = run(
            &mut ovf,
            &AddFileOptions {
                file: PathBuf::from("/nonexistent/nothing.bin"),
                file_id: None,
            },
            &session,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }
}

//! High-level edit operations.
//!
//! Each operation is an options struct plus a `run` function taking the
//! descriptor and the session. Clients (such as the CLI) fill the options
//! from their own argument handling, run the operation, then write the
//! package out.

pub mod add_disk;
pub mod add_file;
pub mod edit_hardware;
pub mod edit_product;
pub mod edit_properties;
pub mod info;
pub mod inject_config;
pub mod remove_file;

use std::path::Path;

use log::warn;

use crate::error::{Error, Result};
use crate::ovf::Ovf;
use crate::package::Package;

/// Open a package and parse its descriptor.
///
/// Manifest problems are reported as warnings, per the format's checksum
/// semantics: a stale manifest should not block an edit whose whole point
/// may be to regenerate it.
pub fn open_package(path: &Path) -> Result<(Package, Ovf)> {
    let package = Package::open(path)?;
    for issue in package.verify_manifest()? {
        warn!("{}", issue);
    }
    let ovf = Ovf::load(&package)?;
    Ok((package, ovf))
}

/// Merge candidate lookups that must agree.
///
/// Multiple search paths (by filename, by file ID, by address) may each
/// find a candidate; all non-empty ones must be the same entity.
pub(crate) fn check_for_conflict<T>(label: &str, candidates: &[Option<T>]) -> Result<Option<T>>
where
    T: PartialEq + Clone + std::fmt::Debug,
{
    let mut winner: Option<T> = None;
    for candidate in candidates.iter().flatten() {
        match &winner {
            None => winner = Some(candidate.clone()),
            Some(existing) if existing == candidate => {}
            Some(existing) => {
                return Err(Error::invalid_input(format!(
                    "found conflicting {}: {:?} and {:?}",
                    label, existing, candidate
                )))
            }
        }
    }
    Ok(winner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_for_conflict() {
        assert_eq!(
            check_for_conflict("file", &[None, Some(1), Some(1)]).unwrap(),
            Some(1)
        );
        assert_eq!(check_for_conflict::<u32>("file", &[None, None]).unwrap(), None);
        assert!(check_for_conflict("file", &[Some(1), Some(2)]).is_err());
    }
}

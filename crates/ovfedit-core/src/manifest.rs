//! OVF manifest (`.mf`) parsing and generation.
//!
//! A manifest holds one line per package member:
//!
//! ```text
//! SHA1(descriptor.ovf)= 6cf2e0f0b5dc...
//! SHA1(disk1.vmdk)= 01fa64e0b242...
//! ```
//!
//! SHA1 is used for OVF 0.x/1.x packages and SHA256 for 2.x. Verification
//! reports mismatches rather than failing; the caller decides whether to
//! surface them as warnings.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};

/// One line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub algorithm: ChecksumAlgorithm,
    pub filename: String,
    pub digest: String,
}

impl ManifestEntry {
    pub fn new(
        algorithm: ChecksumAlgorithm,
        filename: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            filename: filename.into(),
            digest: digest.into(),
        }
    }
}

/// A problem detected while verifying a manifest against package contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestIssue {
    /// The stored digest does not match the member's current contents.
    Mismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    /// The manifest names a member the package does not contain.
    MissingMember { filename: String },
    /// The manifest uses a digest algorithm this tool does not know.
    UnknownAlgorithm { filename: String, algorithm: String },
}

impl std::fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestIssue::Mismatch {
                filename,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch for '{}': manifest has {}, actual is {}",
                filename, expected, actual
            ),
            ManifestIssue::MissingMember { filename } => {
                write!(f, "manifest references missing member '{}'", filename)
            }
            ManifestIssue::UnknownAlgorithm {
                filename,
                algorithm,
            } => write!(
                f,
                "manifest entry for '{}' uses unsupported algorithm {}",
                filename, algorithm
            ),
        }
    }
}

/// Parse manifest text into entries.
///
/// Lines must match `ALGO(filename)= hex`; whitespace around the digest is
/// tolerated, as are blank lines. Entries with unrecognized algorithms are
/// returned as issues rather than failing the parse.
pub fn parse_manifest(text: &str) -> Result<(Vec<ManifestEntry>, Vec<ManifestIssue>)> {
    let mut entries = Vec::new();
    let mut issues = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (algo_str, rest) = line.split_once('(').ok_or_else(|| {
            Error::invalid_package(format!("malformed manifest line {}: '{}'", lineno + 1, line))
        })?;
        let (filename, rest) = rest.split_once(')').ok_or_else(|| {
            Error::invalid_package(format!("malformed manifest line {}: '{}'", lineno + 1, line))
        })?;
        let digest = rest
            .trim_start()
            .strip_prefix('=')
            .map(str::trim)
            .ok_or_else(|| {
                Error::invalid_package(format!(
                    "malformed manifest line {}: '{}'",
                    lineno + 1,
                    line
                ))
            })?;
        match ChecksumAlgorithm::from_token(algo_str.trim()) {
            Some(algorithm) => entries.push(ManifestEntry::new(algorithm, filename, digest)),
            None => issues.push(ManifestIssue::UnknownAlgorithm {
                filename: filename.to_string(),
                algorithm: algo_str.trim().to_string(),
            }),
        }
    }
    Ok((entries, issues))
}

/// Render entries as manifest text.
pub fn generate_manifest(entries: &[ManifestEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}({})= {}\n", e.algorithm.token(), e.filename, e.digest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let text = "SHA1(x.ovf)= 0123abcd\nSHA1(y.vmdk)= 4567ef01\n";
        let (entries, issues) = parse_manifest(text).unwrap();
        assert!(issues.is_empty());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].filename, "x.ovf");
        assert_eq!(entries[0].digest, "0123abcd");
        assert_eq!(entries[0].algorithm, ChecksumAlgorithm::Sha1);
    }

    #[test]
    fn test_parse_tolerates_spacing_and_blank_lines() {
        let text = "SHA256(a.ovf) = ff00\n\nSHA256(b.vmdk)=aa11\n";
        let (entries, _) = parse_manifest(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].digest, "ff00");
        assert_eq!(entries[1].digest, "aa11");
    }

    #[test]
    fn test_parse_unknown_algorithm_is_issue_not_error() {
        let text = "MD5(a.ovf)= ff00\nSHA1(b.ovf)= aa11\n";
        let (entries, issues) = parse_manifest(text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            &issues[0],
            ManifestIssue::UnknownAlgorithm { algorithm, .. } if algorithm == "MD5"
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_manifest("not a manifest line").is_err());
        assert!(parse_manifest("SHA1(unclosed= ff").is_err());
    }

    #[test]
    fn test_generate_round_trip() {
        let entries = vec![
            ManifestEntry::new(ChecksumAlgorithm::Sha1, "pkg.ovf", "00ff"),
            ManifestEntry::new(ChecksumAlgorithm::Sha1, "disk1.vmdk", "11ee"),
        ];
        let text = generate_manifest(&entries);
        assert_eq!(text, "SHA1(pkg.ovf)= 00ff\nSHA1(disk1.vmdk)= 11ee\n");
        let (parsed, issues) = parse_manifest(&text).unwrap();
        assert!(issues.is_empty());
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_filename_with_parenthesis_in_name() {
        // Only the first ')' closes the filename; odd names still parse.
        let text = "SHA1(weird)= ff\n";
        let (entries, _) = parse_manifest(text).unwrap();
        assert_eq!(entries[0].filename, "weird");
    }
}

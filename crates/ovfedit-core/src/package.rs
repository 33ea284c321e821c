//! OVF package container handling.
//!
//! A package is either a directory holding an `.ovf` descriptor plus its
//! referenced files, or an OVA: an uncompressed ustar TAR with a mandated
//! member order (descriptor, manifest, then referenced files in References
//! order). Reading from TAR is streaming: member offsets are recorded at
//! open time and `read_member` hands out bounded readers over the archive
//! file, so nothing is extracted to disk.
//!
//! Output always goes through a temporary file in the target's directory
//! followed by an atomic rename, which also makes overwriting the open
//! input safe.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};
use crate::manifest::{self, ManifestEntry, ManifestIssue};
use crate::session::Session;

/// On-disk form of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageForm {
    /// A descriptor file with sibling resource files.
    Directory,
    /// A single uncompressed TAR archive (OVA).
    Tar,
}

/// One member of an opened package.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    /// Byte offset of the member body within the archive (TAR form only).
    offset: Option<u64>,
}

/// Where the bytes of an output member come from.
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Copy from a member of the input package.
    PackageMember(String),
    /// Copy from a local file outside the package.
    LocalFile(PathBuf),
}

/// One member of a package being written, in output order.
#[derive(Debug, Clone)]
pub struct MemberSource {
    pub name: String,
    pub source: SourceKind,
}

/// An opened OVF/OVA package.
#[derive(Debug)]
pub struct Package {
    path: PathBuf,
    form: PackageForm,
    members: Vec<MemberInfo>,
    descriptor_name: String,
}

impl Package {
    /// Open a package, probing its form.
    ///
    /// A directory or a plain XML file is DIRECTORY form; anything else is
    /// treated as TAR. Extensions like `foo.ovf.20150101` are accepted with
    /// a warning, since some file distribution channels mangle names.
    pub fn open(path: &Path) -> Result<Package> {
        let meta = fs::metadata(path).map_err(|e| Error::io(e, path))?;
        if meta.is_dir() {
            return Self::open_directory_root(path);
        }
        match detect_extension(path) {
            Some(".ovf") => Self::open_descriptor(path),
            Some(".ova") | Some(".box") => Self::open_tar(path),
            _ => {
                // No recognizable extension: sniff the content.
                let mut start = [0u8; 16];
                let mut file = File::open(path).map_err(|e| Error::io(e, path))?;
                let n = file.read(&mut start).map_err(|e| Error::io(e, path))?;
                let text = String::from_utf8_lossy(&start[..n]);
                if text.trim_start().starts_with('<') {
                    Self::open_descriptor(path)
                } else {
                    Self::open_tar(path)
                }
            }
        }
    }

    /// Open a directory by locating the single `.ovf` descriptor inside it.
    fn open_directory_root(dir: &Path) -> Result<Package> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir))? {
            let entry = entry.map_err(|e| Error::io(e, dir))?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "ovf") {
                candidates.push(path);
            }
        }
        match candidates.len() {
            0 => Err(Error::invalid_package(format!(
                "no .ovf descriptor found in directory '{}'",
                dir.display()
            ))),
            1 => Self::open_descriptor(&candidates[0]),
            n => Err(Error::invalid_package(format!(
                "directory '{}' contains {} .ovf files; specify one directly",
                dir.display(),
                n
            ))),
        }
    }

    fn open_descriptor(path: &Path) -> Result<Package> {
        let meta = fs::metadata(path).map_err(|e| Error::io(e, path))?;
        let name = file_name_string(path)?;
        let mut members = vec![MemberInfo {
            name: name.clone(),
            size: meta.len(),
            offset: None,
        }];
        // A sibling manifest is part of the package if present.
        let mf_name = manifest_name_for(&name);
        if let Some(parent) = path.parent() {
            if let Ok(meta) = fs::metadata(parent.join(&mf_name)) {
                members.push(MemberInfo {
                    name: mf_name,
                    size: meta.len(),
                    offset: None,
                });
            }
        }
        Ok(Package {
            path: path.to_path_buf(),
            form: PackageForm::Directory,
            members,
            descriptor_name: name,
        })
    }

    fn open_tar(path: &Path) -> Result<Package> {
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let mut archive = tar::Archive::new(file);
        let mut members = Vec::new();
        let entries = archive
            .entries()
            .map_err(|e| Error::invalid_package(format!("could not read TAR: {}", e)))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::invalid_package(format!("could not read TAR entry: {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| Error::invalid_package(format!("bad TAR member path: {}", e)))?
                .to_string_lossy()
                .to_string();
            validate_member_name(&name)?;
            members.push(MemberInfo {
                name,
                size: entry.size(),
                offset: Some(entry.raw_file_position()),
            });
        }
        if members.is_empty() {
            return Err(Error::invalid_package(format!(
                "'{}' contains no TAR members",
                path.display()
            )));
        }
        let descriptor_index = members
            .iter()
            .position(|m| m.name.ends_with(".ovf"))
            .ok_or_else(|| {
                Error::invalid_package(format!(
                    "'{}' does not contain any .ovf descriptor",
                    path.display()
                ))
            })?;
        if descriptor_index != 0 {
            warn!(
                "Descriptor '{}' is not the first member of '{}'; \
                 the OVA is not standard-compliant but will be loaded anyway",
                members[descriptor_index].name,
                path.display()
            );
        }
        let descriptor_name = members[descriptor_index].name.clone();
        debug!(
            "Opened OVA '{}' with {} members, descriptor '{}'",
            path.display(),
            members.len(),
            descriptor_name
        );
        Ok(Package {
            path: path.to_path_buf(),
            form: PackageForm::Tar,
            members,
            descriptor_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn form(&self) -> PackageForm {
        self.form
    }

    /// Name of the descriptor member.
    pub fn descriptor_name(&self) -> &str {
        &self.descriptor_name
    }

    /// For DIRECTORY form, the directory holding the descriptor.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Member names in package order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Name of the manifest member, if the package has one.
    pub fn manifest_member(&self) -> Option<String> {
        match self.form {
            PackageForm::Tar => self
                .members
                .iter()
                .find(|m| m.name.ends_with(".mf"))
                .map(|m| m.name.clone()),
            PackageForm::Directory => {
                let name = manifest_name_for(&self.descriptor_name);
                self.has_member(&name).then_some(name)
            }
        }
    }

    /// Whether a member with this name exists.
    pub fn has_member(&self, name: &str) -> bool {
        match self.form {
            PackageForm::Tar => self.members.iter().any(|m| m.name == name),
            PackageForm::Directory => {
                validate_member_name(name).is_ok() && self.base_dir().join(name).is_file()
            }
        }
    }

    /// Size in bytes of a member.
    pub fn member_size(&self, name: &str) -> Result<u64> {
        match self.form {
            PackageForm::Tar => self
                .members
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.size)
                .ok_or_else(|| Error::not_found(format!("no member '{}' in package", name))),
            PackageForm::Directory => {
                validate_member_name(name)?;
                let path = self.base_dir().join(name);
                fs::metadata(&path)
                    .map(|m| m.len())
                    .map_err(|e| Error::io(e, path))
            }
        }
    }

    /// Open a streaming reader over a member's bytes.
    ///
    /// For TAR form this seeks to the recorded offset and bounds the
    /// reader to the entry size; the archive is never extracted.
    pub fn read_member(&self, name: &str) -> Result<Box<dyn Read>> {
        match self.form {
            PackageForm::Directory => {
                validate_member_name(name)?;
                let path = self.base_dir().join(name);
                let file = File::open(&path).map_err(|e| Error::io(e, path))?;
                Ok(Box::new(file))
            }
            PackageForm::Tar => {
                let member = self
                    .members
                    .iter()
                    .find(|m| m.name == name)
                    .ok_or_else(|| Error::not_found(format!("no member '{}' in package", name)))?;
                let mut file = File::open(&self.path).map_err(|e| Error::io(e, &self.path))?;
                file.seek(SeekFrom::Start(member.offset.expect("tar member has offset")))
                    .map_err(|e| Error::io(e, &self.path))?;
                Ok(Box::new(file.take(member.size)))
            }
        }
    }

    /// Read a member fully into memory. Intended for the descriptor and
    /// manifest, which are small.
    pub fn read_member_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.read_member(name)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(Error::io_simple)?;
        Ok(buf)
    }

    /// Verify the manifest, if one is present.
    ///
    /// Returns the list of problems found (empty when everything matches,
    /// or when there is no manifest). Mismatches are reported, not fatal.
    pub fn verify_manifest(&self) -> Result<Vec<ManifestIssue>> {
        let Some(mf_name) = self.manifest_member() else {
            debug!("Package has no manifest; nothing to verify");
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&self.read_member_bytes(&mf_name)?).to_string();
        let (entries, mut issues) = manifest::parse_manifest(&text)?;
        for entry in entries {
            if !self.has_member(&entry.filename) {
                issues.push(ManifestIssue::MissingMember {
                    filename: entry.filename,
                });
                continue;
            }
            let mut reader = self.read_member(&entry.filename)?;
            let (actual, _) = entry.algorithm.digest_reader(&mut reader)?;
            if !actual.eq_ignore_ascii_case(&entry.digest) {
                issues.push(ManifestIssue::Mismatch {
                    filename: entry.filename,
                    expected: entry.digest.to_ascii_lowercase(),
                    actual,
                });
            }
        }
        Ok(issues)
    }

    fn open_source(&self, source: &SourceKind) -> Result<Box<dyn Read>> {
        match source {
            SourceKind::PackageMember(name) => self.read_member(name),
            SourceKind::LocalFile(path) => {
                let file = File::open(path).map_err(|e| Error::io(e, path))?;
                Ok(Box::new(file))
            }
        }
    }

    fn source_path(&self, source: &SourceKind) -> Option<PathBuf> {
        match source {
            SourceKind::LocalFile(path) => Some(path.clone()),
            SourceKind::PackageMember(name) => match self.form {
                PackageForm::Directory => Some(self.base_dir().join(name)),
                PackageForm::Tar => None,
            },
        }
    }

    /// Write the package out.
    ///
    /// `descriptor` is the serialized descriptor XML, `members` the
    /// referenced files in the order they appear in the descriptor's
    /// References section. The manifest is regenerated with the given
    /// algorithm. For TAR output the member order is descriptor, manifest,
    /// then `members`; directory output writes siblings of `target`.
    pub fn write(
        &self,
        target: &Path,
        form: PackageForm,
        descriptor_name: &str,
        descriptor: &[u8],
        members: &[MemberSource],
        algorithm: ChecksumAlgorithm,
        session: &Session,
    ) -> Result<()> {
        session.check_cancelled()?;
        for member in members {
            validate_member_name(&member.name)?;
        }
        if same_file(&self.path, target) {
            info!(
                "Output '{}' will overwrite the open input package; \
                 writing through a temporary file",
                target.display()
            );
        }

        // First pass: digest every member so the manifest can be emitted
        // ahead of the file bodies.
        let mut entries = vec![ManifestEntry::new(
            algorithm,
            descriptor_name,
            algorithm.digest_bytes(descriptor),
        )];
        let mut sizes: Vec<u64> = Vec::with_capacity(members.len());
        for member in members {
            session.check_cancelled()?;
            let mut reader = self.open_source(&member.source)?;
            let (digest, size) = algorithm.digest_reader(&mut reader)?;
            entries.push(ManifestEntry::new(algorithm, &member.name, digest));
            sizes.push(size);
        }
        let manifest_name = manifest_name_for(descriptor_name);
        let manifest_text = manifest::generate_manifest(&entries);

        // Space check before any bytes move.
        let needed = match form {
            PackageForm::Tar => {
                predicted_tar_size(descriptor.len() as u64, manifest_text.len() as u64, &sizes)
            }
            PackageForm::Directory => {
                descriptor.len() as u64 + manifest_text.len() as u64 + sizes.iter().sum::<u64>()
            }
        };
        let target_dir = target.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(free) = target_dir.and_then(free_space) {
            if free < needed {
                session.confirm_or_fail(&format!(
                    "Writing '{}' needs about {} bytes but only {} appear to be free. \
                     Proceed anyway?",
                    target.display(),
                    needed,
                    free
                ))?;
            }
        }

        match form {
            PackageForm::Tar => self.write_tar(
                target,
                descriptor_name,
                descriptor,
                &manifest_name,
                manifest_text.as_bytes(),
                members,
                &sizes,
                session,
            ),
            PackageForm::Directory => self.write_directory(
                target,
                descriptor,
                &manifest_name,
                manifest_text.as_bytes(),
                members,
                session,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_tar(
        &self,
        target: &Path,
        descriptor_name: &str,
        descriptor: &[u8],
        manifest_name: &str,
        manifest_text: &[u8],
        members: &[MemberSource],
        sizes: &[u64],
        session: &Session,
    ) -> Result<()> {
        let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = match dir {
            Some(d) => tempfile::NamedTempFile::new_in(d),
            None => tempfile::NamedTempFile::new(),
        }
        .map_err(Error::io_simple)?;

        {
            let mut writer = TarWriter::new(BufWriter::new(temp.as_file()));
            writer.add_bytes(descriptor_name, descriptor)?;
            writer.add_bytes(manifest_name, manifest_text)?;
            for (member, size) in members.iter().zip(sizes.iter()) {
                session.check_cancelled()?;
                debug!("Adding member '{}' ({} bytes) to OVA", member.name, size);
                let mut reader = self.open_source(&member.source)?;
                writer.add_stream(&member.name, *size, &mut reader)?;
            }
            let mut inner = writer.finish()?;
            inner.flush().map_err(Error::io_simple)?;
        }

        persist_temp(temp, target)?;
        info!("Wrote OVA '{}'", target.display());
        Ok(())
    }

    fn write_directory(
        &self,
        target: &Path,
        descriptor: &[u8],
        manifest_name: &str,
        manifest_text: &[u8],
        members: &[MemberSource],
        session: &Session,
    ) -> Result<()> {
        let dest_dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        fs::create_dir_all(&dest_dir).map_err(|e| Error::io(e, &dest_dir))?;

        write_file_atomic(target, descriptor)?;
        write_file_atomic(&dest_dir.join(manifest_name), manifest_text)?;

        for member in members {
            session.check_cancelled()?;
            let dest = dest_dir.join(&member.name);
            if let Some(src) = self.source_path(&member.source) {
                if same_file(&src, &dest) {
                    debug!(
                        "Member '{}' is already in place at '{}'",
                        member.name,
                        dest.display()
                    );
                    continue;
                }
            }
            let temp =
                tempfile::NamedTempFile::new_in(&dest_dir).map_err(Error::io_simple)?;
            {
                let mut reader = self.open_source(&member.source)?;
                let mut writer = BufWriter::new(temp.as_file());
                io::copy(&mut reader, &mut writer).map_err(Error::io_simple)?;
                writer.flush().map_err(Error::io_simple)?;
            }
            persist_temp(temp, &dest)?;
        }
        info!("Wrote OVF package '{}'", target.display());
        Ok(())
    }
}

/// Move a temp file into its final place and give it normal permissions.
fn persist_temp(temp: tempfile::NamedTempFile, target: &Path) -> Result<()> {
    temp.persist(target)
        .map_err(|e| Error::io(e.error, target))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(target, fs::Permissions::from_mode(0o644));
    }
    Ok(())
}

fn write_file_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(Error::io_simple)?;
    temp.write_all(data).map_err(Error::io_simple)?;
    temp.flush().map_err(Error::io_simple)?;
    persist_temp(temp, target)
}

/// Whether two paths refer to the same file, resolving links.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Derive the manifest filename for a descriptor name.
fn manifest_name_for(descriptor_name: &str) -> String {
    match descriptor_name.rsplit_once('.') {
        Some((stem, _)) => format!("{}.mf", stem),
        None => format!("{}.mf", descriptor_name),
    }
}

fn file_name_string(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::invalid_input(format!("'{}' has no file name", path.display())))
}

/// Recognize `.ovf`/`.ova`/`.box`, tolerating appended suffixes such as
/// `foo.ovf.20150101`.
fn detect_extension(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy();
    for ext in [".ovf", ".ova", ".box"] {
        if name.ends_with(ext) {
            return Some(match ext {
                ".ovf" => ".ovf",
                ".ova" => ".ova",
                _ => ".box",
            });
        }
    }
    // Look for ".ovf"/".ova" mid-name followed by a non-alphanumeric byte.
    let bytes = name.as_bytes();
    for (pos, window) in bytes.windows(4).enumerate() {
        if (window == b".ovf" || window == b".ova")
            && bytes
                .get(pos + 4)
                .is_some_and(|b| !b.is_ascii_alphanumeric())
        {
            let ext = if window == b".ovf" { ".ovf" } else { ".ova" };
            warn!(
                "Filename '{}' does not end in '.ovf' or '.ova', but found '{}' \
                 mid-filename; treating it as such",
                name, ext
            );
            return Some(ext);
        }
    }
    None
}

/// Reject member names that would escape the package directory.
fn validate_member_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_package("empty member name"));
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(Error::invalid_package(format!(
            "member name '{}' is an absolute path",
            name
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::invalid_package(format!(
            "member name '{}' contains an unsafe path",
            name
        )));
    }
    Ok(())
}

/// Space taken by one TAR entry: 512-byte header plus the body rounded up
/// to a 512-byte boundary.
fn tar_entry_size(body: u64) -> u64 {
    512 + body.div_ceil(512) * 512
}

/// Estimate the size of an OVA: entries, two-zero-block trailer, and the
/// overall 10 KiB blocking factor.
fn predicted_tar_size(descriptor: u64, manifest: u64, member_sizes: &[u64]) -> u64 {
    let mut needed = tar_entry_size(descriptor) + tar_entry_size(manifest);
    for size in member_sizes {
        needed += tar_entry_size(*size);
    }
    needed += 1024;
    needed += (10240 - needed % 10240) % 10240;
    needed
}

/// Free bytes available to unprivileged users at the given path.
#[cfg(unix)]
fn free_space(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> Option<u64> {
    None
}

/// Create a ustar TAR header for a regular file with mode 0644, owned by
/// uid/gid 0, as the OVF specification expects for OVA members.
fn create_tar_header(name: &str, size: u64, mtime: u64) -> Result<[u8; 512]> {
    let mut header = [0u8; 512];

    // Name at offset 0 (100 bytes, null-terminated)
    let name_bytes = name.as_bytes();
    if name_bytes.len() > 99 {
        return Err(Error::invalid_input(format!(
            "member name '{}' exceeds the 99-byte ustar limit",
            name
        )));
    }
    header[..name_bytes.len()].copy_from_slice(name_bytes);

    // Mode at offset 100 (8 bytes, octal "0000644\0")
    header[100..107].copy_from_slice(b"0000644");

    // UID at offset 108, GID at offset 116 (8 bytes each, octal zero)
    header[108..115].copy_from_slice(b"0000000");
    header[116..123].copy_from_slice(b"0000000");

    // Size at offset 124 (12 bytes, octal)
    let size_str = format!("{:011o}", size);
    header[124..135].copy_from_slice(size_str.as_bytes());

    // Mtime at offset 136 (12 bytes, octal unix timestamp)
    let mtime_str = format!("{:011o}", mtime);
    header[136..147].copy_from_slice(mtime_str.as_bytes());

    // Checksum placeholder at offset 148 (spaces for the calculation)
    header[148..156].copy_from_slice(b"        ");

    // Type flag at offset 156 ('0' = regular file)
    header[156] = b'0';

    // USTAR indicator at offset 257 ("ustar\0" + version "00")
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");

    // User and group names
    header[265..269].copy_from_slice(b"root");
    header[297..301].copy_from_slice(b"root");

    // Checksum: sum of all bytes with the checksum field as spaces
    let checksum: u32 = header.iter().map(|&b| b as u32).sum();
    let checksum_str = format!("{:06o}\0 ", checksum);
    header[148..156].copy_from_slice(checksum_str.as_bytes());

    Ok(header)
}

/// Streaming ustar writer for OVA output.
///
/// Members are written in the order added; `finish` emits the TAR
/// end-of-archive marker (two 512-byte zero blocks).
pub struct TarWriter<W: Write> {
    writer: W,
    mtime: u64,
}

impl<W: Write> TarWriter<W> {
    pub fn new(writer: W) -> Self {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self { writer, mtime }
    }

    /// Add a member from an in-memory buffer.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let header = create_tar_header(name, data.len() as u64, self.mtime)?;
        self.writer
            .write_all(&header)
            .map_err(Error::io_simple)?;
        self.writer.write_all(data).map_err(Error::io_simple)?;
        self.pad(data.len() as u64)
    }

    /// Add a member by streaming `size` bytes from a reader.
    pub fn add_stream(&mut self, name: &str, size: u64, reader: &mut dyn Read) -> Result<()> {
        let header = create_tar_header(name, size, self.mtime)?;
        self.writer
            .write_all(&header)
            .map_err(Error::io_simple)?;
        let copied = io::copy(&mut reader.take(size), &mut self.writer)
            .map_err(Error::io_simple)?;
        if copied != size {
            return Err(Error::io_simple(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "expected {} bytes but read {} bytes for member '{}'",
                    size, copied, name
                ),
            )));
        }
        self.pad(size)
    }

    fn pad(&mut self, body: u64) -> Result<()> {
        let padding = (512 - (body % 512) as usize) % 512;
        if padding > 0 {
            self.writer
                .write_all(&vec![0u8; padding])
                .map_err(Error::io_simple)?;
        }
        Ok(())
    }

    /// Write the end-of-archive marker and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let end_marker = [0u8; 1024];
        self.writer
            .write_all(&end_marker)
            .map_err(Error::io_simple)?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tar_header_fields() {
        let header = create_tar_header("test.ovf", 1234, 1_600_000_000).unwrap();
        assert_eq!(&header[0..8], b"test.ovf");
        assert_eq!(header[8], 0);
        assert_eq!(&header[100..107], b"0000644");
        assert_eq!(&header[108..115], b"0000000");
        assert_eq!(&header[116..123], b"0000000");
        assert_eq!(&header[124..135], b"00000002322"); // 1234 octal
        assert_eq!(header[156], b'0');
        assert_eq!(&header[257..263], b"ustar\0");
        assert_eq!(&header[263..265], b"00");
    }

    #[test]
    fn test_tar_header_name_too_long() {
        let name = "x".repeat(120);
        assert!(create_tar_header(&name, 0, 0).is_err());
    }

    #[test]
    fn test_tar_writer_structure() {
        let mut writer = TarWriter::new(Cursor::new(Vec::new()));
        writer.add_bytes("first.ovf", b"<Envelope/>").unwrap();
        writer.add_bytes("second.mf", b"SHA1(first.ovf)= 00\n").unwrap();
        let data = writer.finish().unwrap().into_inner();

        assert_eq!(&data[0..9], b"first.ovf");
        assert_eq!(&data[512..523], b"<Envelope/>");
        assert_eq!(&data[1024..1033], b"second.mf");
        // Everything 512-aligned, ending in two zero blocks.
        assert_eq!(data.len() % 512, 0);
        assert!(data[data.len() - 1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tar_writer_readable_by_tar_crate() {
        let mut writer = TarWriter::new(Cursor::new(Vec::new()));
        writer.add_bytes("pkg.ovf", b"hello").unwrap();
        writer.add_bytes("disk1.vmdk", &[0xaa; 700]).unwrap();
        let data = writer.finish().unwrap().into_inner();

        let mut archive = tar::Archive::new(Cursor::new(&data));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().to_string());
            assert_eq!(entry.header().mode().unwrap() & 0o777, 0o644);
            assert_eq!(entry.header().uid().unwrap(), 0);
            assert_eq!(entry.header().gid().unwrap(), 0);
        }
        assert_eq!(names, vec!["pkg.ovf", "disk1.vmdk"]);
    }

    #[test]
    fn test_tar_stream_size_mismatch() {
        let mut writer = TarWriter::new(Cursor::new(Vec::new()));
        let mut short = Cursor::new(b"abc".to_vec());
        assert!(writer.add_stream("x.bin", 100, &mut short).is_err());
    }

    #[test]
    fn test_tar_entry_size() {
        assert_eq!(tar_entry_size(0), 512);
        assert_eq!(tar_entry_size(1), 1024);
        assert_eq!(tar_entry_size(512), 1024);
        assert_eq!(tar_entry_size(513), 1536);
    }

    #[test]
    fn test_predicted_tar_size_blocking() {
        let size = predicted_tar_size(100, 50, &[1000]);
        assert_eq!(size % 10240, 0);
        assert!(size >= 512 + 512 + 512 + 512 + 1024 + 1024);
    }

    #[test]
    fn test_detect_extension() {
        assert_eq!(detect_extension(Path::new("a/b/pkg.ova")), Some(".ova"));
        assert_eq!(detect_extension(Path::new("pkg.ovf")), Some(".ovf"));
        assert_eq!(detect_extension(Path::new("pkg.box")), Some(".box"));
        assert_eq!(detect_extension(Path::new("pkg.ovf.20150101")), Some(".ovf"));
        assert_eq!(detect_extension(Path::new("pkg.ova.bak")), Some(".ova"));
        assert_eq!(detect_extension(Path::new("pkg.zip")), None);
    }

    #[test]
    fn test_validate_member_name() {
        assert!(validate_member_name("disk1.vmdk").is_ok());
        assert!(validate_member_name("sub/disk1.vmdk").is_ok());
        assert!(validate_member_name("").is_err());
        assert!(validate_member_name("/etc/passwd").is_err());
        assert!(validate_member_name("../escape.txt").is_err());
    }

    #[test]
    fn test_manifest_name_for() {
        assert_eq!(manifest_name_for("pkg.ovf"), "pkg.mf");
        assert_eq!(manifest_name_for("noext"), "noext.mf");
    }

    #[test]
    fn test_open_tar_package() {
        let dir = tempfile::tempdir().unwrap();
        let ova_path = dir.path().join("pkg.ova");
        {
            let file = File::create(&ova_path).unwrap();
            let mut writer = TarWriter::new(BufWriter::new(file));
            writer.add_bytes("pkg.ovf", b"<Envelope/>").unwrap();
            writer.add_bytes("pkg.mf", b"SHA1(pkg.ovf)= 00\n").unwrap();
            writer.add_bytes("disk1.vmdk", &[7u8; 1000]).unwrap();
            writer.finish().unwrap().flush().unwrap();
        }
        let pkg = Package::open(&ova_path).unwrap();
        assert_eq!(pkg.form(), PackageForm::Tar);
        assert_eq!(pkg.descriptor_name(), "pkg.ovf");
        assert_eq!(pkg.member_names(), vec!["pkg.ovf", "pkg.mf", "disk1.vmdk"]);
        assert_eq!(pkg.manifest_member().as_deref(), Some("pkg.mf"));
        assert_eq!(pkg.member_size("disk1.vmdk").unwrap(), 1000);

        let bytes = pkg.read_member_bytes("pkg.ovf").unwrap();
        assert_eq!(bytes, b"<Envelope/>");
        let disk = pkg.read_member_bytes("disk1.vmdk").unwrap();
        assert_eq!(disk.len(), 1000);
        assert!(disk.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_open_tar_descriptor_not_first() {
        let dir = tempfile::tempdir().unwrap();
        let ova_path = dir.path().join("odd.ova");
        {
            let file = File::create(&ova_path).unwrap();
            let mut writer = TarWriter::new(BufWriter::new(file));
            writer.add_bytes("disk1.vmdk", &[1u8; 100]).unwrap();
            writer.add_bytes("other.txt", b"hi").unwrap();
            writer.add_bytes("odd.ovf", b"<Envelope/>").unwrap();
            writer.finish().unwrap().flush().unwrap();
        }
        // Loads with a warning; descriptor still found.
        let pkg = Package::open(&ova_path).unwrap();
        assert_eq!(pkg.descriptor_name(), "odd.ovf");
    }

    #[test]
    fn test_open_tar_without_descriptor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ova_path = dir.path().join("bad.ova");
        {
            let file = File::create(&ova_path).unwrap();
            let mut writer = TarWriter::new(BufWriter::new(file));
            writer.add_bytes("disk1.vmdk", &[1u8; 100]).unwrap();
            writer.finish().unwrap().flush().unwrap();
        }
        let err = Package::open(&ova_path).unwrap_err();
        assert!(matches!(err, Error::InvalidPackage { .. }));
    }

    #[test]
    fn test_open_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.ova");
        fs::write(&path, b"this is not a tar archive at all").unwrap();
        assert!(Package::open(&path).is_err());
    }

    #[test]
    fn test_open_directory_package() {
        let dir = tempfile::tempdir().unwrap();
        let ovf_path = dir.path().join("vm.ovf");
        fs::write(&ovf_path, b"<Envelope/>").unwrap();
        fs::write(dir.path().join("disk1.vmdk"), [2u8; 64]).unwrap();

        let pkg = Package::open(&ovf_path).unwrap();
        assert_eq!(pkg.form(), PackageForm::Directory);
        assert_eq!(pkg.descriptor_name(), "vm.ovf");
        assert!(pkg.has_member("disk1.vmdk"));
        assert!(!pkg.has_member("missing.vmdk"));
        assert_eq!(pkg.read_member_bytes("disk1.vmdk").unwrap().len(), 64);
    }

    #[test]
    fn test_open_directory_by_dir_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vm.ovf"), b"<Envelope/>").unwrap();
        let pkg = Package::open(dir.path()).unwrap();
        assert_eq!(pkg.descriptor_name(), "vm.ovf");
    }

    #[test]
    fn test_verify_manifest_reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let ovf_path = dir.path().join("vm.ovf");
        fs::write(&ovf_path, b"<Envelope/>").unwrap();
        let good = ChecksumAlgorithm::Sha1.digest_bytes(b"<Envelope/>");
        fs::write(
            dir.path().join("vm.mf"),
            format!("SHA1(vm.ovf)= {}\nSHA1(gone.vmdk)= 00\nSHA1(vm.ovf)= ff\n", good),
        )
        .unwrap();

        let pkg = Package::open(&ovf_path).unwrap();
        let issues = pkg.verify_manifest().unwrap();
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ManifestIssue::MissingMember { filename } if filename == "gone.vmdk")));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ManifestIssue::Mismatch { filename, .. } if filename == "vm.ovf")));
    }

    #[test]
    fn test_write_tar_round_trip_and_order() {
        let dir = tempfile::tempdir().unwrap();
        // Source files live outside any package.
        let disk = dir.path().join("disk1.vmdk");
        fs::write(&disk, [9u8; 600]).unwrap();
        let ovf_path = dir.path().join("in.ovf");
        fs::write(&ovf_path, b"<Envelope/>").unwrap();
        let pkg = Package::open(&ovf_path).unwrap();

        let session = Session::new().unwrap();
        let target = dir.path().join("out.ova");
        pkg.write(
            &target,
            PackageForm::Tar,
            "out.ovf",
            b"<Envelope/>",
            &[MemberSource {
                name: "disk1.vmdk".to_string(),
                source: SourceKind::LocalFile(disk),
            }],
            ChecksumAlgorithm::Sha1,
            &session,
        )
        .unwrap();

        let out = Package::open(&target).unwrap();
        assert_eq!(out.member_names(), vec!["out.ovf", "out.mf", "disk1.vmdk"]);
        let issues = out.verify_manifest().unwrap();
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_write_overwrites_input_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let ova_path = dir.path().join("pkg.ova");
        {
            let file = File::create(&ova_path).unwrap();
            let mut writer = TarWriter::new(BufWriter::new(file));
            writer.add_bytes("pkg.ovf", b"<Envelope/>").unwrap();
            writer.add_bytes("disk1.vmdk", &[3u8; 300]).unwrap();
            writer.finish().unwrap().flush().unwrap();
        }
        let pkg = Package::open(&ova_path).unwrap();
        let session = Session::new().unwrap();
        pkg.write(
            &ova_path,
            PackageForm::Tar,
            "pkg.ovf",
            b"<Envelope></Envelope>",
            &[MemberSource {
                name: "disk1.vmdk".to_string(),
                source: SourceKind::PackageMember("disk1.vmdk".to_string()),
            }],
            ChecksumAlgorithm::Sha1,
            &session,
        )
        .unwrap();

        let out = Package::open(&ova_path).unwrap();
        assert_eq!(
            out.read_member_bytes("pkg.ovf").unwrap(),
            b"<Envelope></Envelope>"
        );
        assert_eq!(out.read_member_bytes("disk1.vmdk").unwrap(), vec![3u8; 300]);
        assert!(out.verify_manifest().unwrap().is_empty());
    }

    #[test]
    fn test_write_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let ovf_path = dir.path().join("in.ovf");
        fs::write(&ovf_path, b"<Envelope/>").unwrap();
        let pkg = Package::open(&ovf_path).unwrap();

        let token = crate::session::CancelToken::new();
        token.cancel();
        let session = Session::new().unwrap().with_cancel_token(token);
        let err = pkg
            .write(
                &dir.path().join("out.ova"),
                PackageForm::Tar,
                "out.ovf",
                b"<Envelope/>",
                &[],
                ChecksumAlgorithm::Sha1,
                &session,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(!dir.path().join("out.ova").exists());
    }
}

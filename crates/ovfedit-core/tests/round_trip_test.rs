//! Round-trip and container-level integration tests.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ovfedit_core::checksum::ChecksumAlgorithm;
use ovfedit_core::package::{Package, PackageForm, TarWriter};
use ovfedit_core::{open_package, Ovf, Session};

const CSR_OVF: &str = include_str!("data/csr1000v.ovf");

/// Disk member contents matching the sizes declared in the fixture.
fn disk_bytes() -> Vec<u8> {
    vec![0xd5u8; 102400]
}

fn iso_bytes() -> Vec<u8> {
    vec![0x15u8; 358400]
}

/// Build a spec-compliant sample OVA: descriptor, manifest, then the
/// referenced files in References order.
fn build_sample_ova(path: &Path) {
    let algo = ChecksumAlgorithm::Sha1;
    let manifest = format!(
        "SHA1(csr1000v.ovf)= {}\nSHA1(csr1000v_harddisk.vmdk)= {}\nSHA1(config.iso)= {}\n",
        algo.digest_bytes(CSR_OVF.as_bytes()),
        algo.digest_bytes(&disk_bytes()),
        algo.digest_bytes(&iso_bytes()),
    );
    let file = File::create(path).unwrap();
    let mut writer = TarWriter::new(BufWriter::new(file));
    writer.add_bytes("csr1000v.ovf", CSR_OVF.as_bytes()).unwrap();
    writer.add_bytes("csr1000v.mf", manifest.as_bytes()).unwrap();
    writer
        .add_bytes("csr1000v_harddisk.vmdk", &disk_bytes())
        .unwrap();
    writer.add_bytes("config.iso", &iso_bytes()).unwrap();
    writer.finish().unwrap().flush().unwrap();
}

fn sample_ova(dir: &Path) -> PathBuf {
    let path = dir.join("csr1000v.ova");
    build_sample_ova(&path);
    path
}

#[test]
fn test_load_then_save_preserves_descriptor_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = sample_ova(dir.path());
    let (package, mut ovf) = open_package(&input).unwrap();

    let session = Session::new().unwrap();
    let output = dir.path().join("csr1000v-copy.ova");
    ovf.write(&package, &output, None, &session).unwrap();

    let out_pkg = Package::open(&output).unwrap();
    // Descriptor bytes identical; member order is descriptor, manifest,
    // then the References order.
    assert_eq!(
        String::from_utf8(out_pkg.read_member_bytes("csr1000v-copy.ovf").unwrap()).unwrap(),
        CSR_OVF
    );
    assert_eq!(
        out_pkg.member_names(),
        vec![
            "csr1000v-copy.ovf",
            "csr1000v-copy.mf",
            "csr1000v_harddisk.vmdk",
            "config.iso"
        ]
    );
    // Member bytes carried over unchanged.
    assert_eq!(
        out_pkg.read_member_bytes("csr1000v_harddisk.vmdk").unwrap(),
        disk_bytes()
    );
    assert_eq!(out_pkg.read_member_bytes("config.iso").unwrap(), iso_bytes());
}

#[test]
fn test_saved_manifest_matches_emitted_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = sample_ova(dir.path());
    let (package, mut ovf) = open_package(&input).unwrap();

    let session = Session::new().unwrap();
    let output = dir.path().join("out.ova");
    ovf.write(&package, &output, None, &session).unwrap();

    let out_pkg = Package::open(&output).unwrap();
    let issues = out_pkg.verify_manifest().unwrap();
    assert!(issues.is_empty(), "manifest issues: {:?}", issues);
    // OVF 1.x manifests use SHA1.
    let manifest = String::from_utf8(out_pkg.read_member_bytes("out.mf").unwrap()).unwrap();
    assert!(manifest.starts_with("SHA1(out.ovf)= "));
    assert!(manifest.contains("SHA1(csr1000v_harddisk.vmdk)= "));
}

#[test]
fn test_noncompliant_member_order_is_fixed_on_save() {
    // Descriptor third in the TAR: non-compliant but loadable.
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("odd.ova");
    {
        let file = File::create(&input).unwrap();
        let mut writer = TarWriter::new(BufWriter::new(file));
        writer
            .add_bytes("csr1000v_harddisk.vmdk", &disk_bytes())
            .unwrap();
        writer.add_bytes("config.iso", &iso_bytes()).unwrap();
        writer.add_bytes("csr1000v.ovf", CSR_OVF.as_bytes()).unwrap();
        writer.finish().unwrap().flush().unwrap();
    }

    let (package, mut ovf) = open_package(&input).unwrap();
    let session = Session::new().unwrap();
    let output = dir.path().join("fixed.ova");
    ovf.write(&package, &output, None, &session).unwrap();

    let out_pkg = Package::open(&output).unwrap();
    assert_eq!(
        out_pkg.member_names(),
        vec![
            "fixed.ovf",
            "fixed.mf",
            "csr1000v_harddisk.vmdk",
            "config.iso"
        ]
    );
}

#[test]
fn test_manifest_mismatch_is_warning_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stale.ova");
    {
        let file = File::create(&input).unwrap();
        let mut writer = TarWriter::new(BufWriter::new(file));
        writer.add_bytes("csr1000v.ovf", CSR_OVF.as_bytes()).unwrap();
        writer
            .add_bytes(
                "csr1000v.mf",
                b"SHA1(csr1000v.ovf)= 0000000000000000000000000000000000000000\n",
            )
            .unwrap();
        writer
            .add_bytes("csr1000v_harddisk.vmdk", &disk_bytes())
            .unwrap();
        writer.add_bytes("config.iso", &iso_bytes()).unwrap();
        writer.finish().unwrap().flush().unwrap();
    }
    // Load succeeds despite the stale manifest.
    let (package, _ovf) = open_package(&input).unwrap();
    let issues = package.verify_manifest().unwrap();
    assert_eq!(issues.len(), 1);
}

#[test]
fn test_ova_to_directory_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let input = sample_ova(dir.path());
    let (package, mut ovf) = open_package(&input).unwrap();

    // OVA -> directory form.
    let session = Session::new().unwrap();
    let unpacked = dir.path().join("unpacked");
    std::fs::create_dir(&unpacked).unwrap();
    let ovf_path = unpacked.join("csr1000v.ovf");
    ovf.write(&package, &ovf_path, Some(PackageForm::Directory), &session)
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&ovf_path).unwrap(),
        CSR_OVF
    );
    assert!(unpacked.join("csr1000v.mf").exists());
    assert_eq!(
        std::fs::read(unpacked.join("csr1000v_harddisk.vmdk")).unwrap(),
        disk_bytes()
    );

    // Directory form -> OVA again.
    let (dir_pkg, mut dir_ovf) = open_package(&ovf_path).unwrap();
    let repacked = dir.path().join("repacked.ova");
    dir_ovf
        .write(&dir_pkg, &repacked, None, &session)
        .unwrap();
    let out_pkg = Package::open(&repacked).unwrap();
    assert_eq!(
        String::from_utf8(out_pkg.read_member_bytes("repacked.ovf").unwrap()).unwrap(),
        CSR_OVF
    );
    assert!(out_pkg.verify_manifest().unwrap().is_empty());
}

#[test]
fn test_overwrite_input_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let input = sample_ova(dir.path());
    let (package, mut ovf) = open_package(&input).unwrap();

    let session = Session::new().unwrap();
    ovf.write(&package, &input, None, &session).unwrap();

    let out_pkg = Package::open(&input).unwrap();
    assert_eq!(
        String::from_utf8(out_pkg.read_member_bytes("csr1000v.ovf").unwrap()).unwrap(),
        CSR_OVF
    );
    assert_eq!(
        out_pkg.read_member_bytes("csr1000v_harddisk.vmdk").unwrap(),
        disk_bytes()
    );
    assert!(out_pkg.verify_manifest().unwrap().is_empty());
}

#[test]
fn test_descriptor_only_round_trip_from_bytes() {
    let mut ovf = Ovf::parse(CSR_OVF.as_bytes()).unwrap();
    let bytes = ovf.to_bytes().unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), CSR_OVF);
}

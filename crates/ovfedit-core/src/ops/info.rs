//! Summarize a package's contents.

use std::fmt::Write as _;

use crate::error::Result;
use crate::hardware::{profile_set, Profile};
use crate::names::ResourceKind;
use crate::ovf::resources::memory_item_mebibytes;
use crate::ovf::Ovf;
use crate::package::Package;

/// How much detail to include in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Brief,
    #[default]
    Normal,
    Verbose,
}

/// Per-profile hardware summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub id: Option<String>,
    pub label: Option<String>,
    pub cpus: u64,
    pub memory_mb: u64,
    pub nics: usize,
    pub serials: usize,
    pub disk_count: usize,
}

/// Compute the hardware summary for one profile (or the default).
pub fn profile_summary(ovf: &Ovf, profile_id: Option<&str>) -> ProfileSummary {
    let universe = ovf.config_profiles();
    let profile = match profile_id {
        Some(id) => Profile::id(id),
        None => Profile::Default,
    };
    let p_set = match profile_id {
        Some(id) => profile_set([id]),
        None => crate::hardware::all_profiles_set(),
    };

    let mut cpus = 0u64;
    for idx in ovf
        .hardware()
        .find_all_items(Some(ResourceKind::Cpu), &[], &[], &universe)
    {
        if ovf.hardware().item(idx).has_profile(&profile, &universe) {
            if let Some(quantity) = ovf.hardware().item(idx).raw_value("VirtualQuantity", Some(&p_set))
            {
                cpus += quantity.parse::<u64>().unwrap_or(0);
            }
        }
    }
    let mut memory_mb = 0u64;
    for idx in ovf
        .hardware()
        .find_all_items(Some(ResourceKind::Memory), &[], &[], &universe)
    {
        if ovf.hardware().item(idx).has_profile(&profile, &universe) {
            memory_mb += memory_item_mebibytes(ovf.hardware().item(idx), &p_set).unwrap_or(0);
        }
    }
    let profile_slice = std::slice::from_ref(&profile);
    let nics = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Ethernet, profile_slice, &universe)[&profile];
    let serials = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Serial, profile_slice, &universe)[&profile];
    let disk_count = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Harddisk, profile_slice, &universe)[&profile]
        + ovf
            .hardware()
            .item_count_per_profile(ResourceKind::Cdrom, profile_slice, &universe)[&profile];

    let label = profile_id.and_then(|id| {
        let uri = ovf.ovf_ns().uri;
        ovf.deploy_opt_section()?
            .find_child_with_attr(uri, "Configuration", "id", id)?
            .find_child(uri, "Label")
            .map(|l| l.text_content().to_string())
    });

    ProfileSummary {
        id: profile_id.map(str::to_string),
        label,
        cpus,
        memory_mb,
        nics,
        serials,
        disk_count,
    }
}

/// Render a human-readable report of the package.
pub fn info_string(package: &Package, ovf: &Ovf, verbosity: Verbosity) -> Result<String> {
    let mut out = String::new();
    let uri = ovf.ovf_ns().uri;

    writeln!(out, "{}", package.path().display()).unwrap();
    writeln!(out, "{}", "-".repeat(60)).unwrap();
    writeln!(out, "OVF version: {}", ovf.version()).unwrap();

    if let Some(product) = ovf.product() {
        writeln!(out, "Product:  {}", product).unwrap();
    }
    if let Some(vendor) = ovf.vendor() {
        writeln!(out, "Vendor:   {}", vendor).unwrap();
    }
    if let Some(version) = ovf.version_short() {
        writeln!(out, "Version:  {}", version).unwrap();
    }
    if let Some(full) = ovf.version_long() {
        writeln!(out, "          {}", full).unwrap();
    }
    if let Some(class) = ovf.product_class() {
        writeln!(out, "Platform: {} ({})", ovf.platform().name(), class).unwrap();
    }

    // Files and disks.
    writeln!(out).unwrap();
    writeln!(out, "Files and Disks:").unwrap();
    if let Some(references) = ovf.references() {
        for file in references.find_children(uri, "File") {
            let href = file.attr(uri, "href").unwrap_or("<unnamed>");
            let size: u64 = file
                .attr(uri, "size")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let file_id = file.attr(uri, "id").unwrap_or("");
            let capacity = ovf
                .find_disk_by_file_ref(file_id)
                .and_then(|d| d.attr(uri, "diskId"))
                .and_then(|disk_id| ovf.disk_capacity_bytes(disk_id).ok());
            match capacity {
                Some(capacity) => writeln!(
                    out,
                    "  {:<40} {:>12} B  capacity {} B",
                    href, size, capacity
                )
                .unwrap(),
                None => writeln!(out, "  {:<40} {:>12} B", href, size).unwrap(),
            }
        }
    }

    // Networks.
    let networks = ovf.networks();
    if !networks.is_empty() {
        writeln!(out).unwrap();
        writeln!(out, "Networks:").unwrap();
        let descriptions = ovf.network_descriptions();
        for (name, desc) in networks.iter().zip(descriptions.iter()) {
            if desc.is_empty() {
                writeln!(out, "  {}", name).unwrap();
            } else {
                writeln!(out, "  {:<24} {}", name, desc).unwrap();
            }
        }
    }

    // Hardware per profile.
    writeln!(out).unwrap();
    writeln!(out, "Configuration Profiles:").unwrap();
    writeln!(
        out,
        "  {:<16} {:>4} {:>10} {:>5} {:>7} {:>6}",
        "Profile", "CPUs", "Memory", "NICs", "Serials", "Disks"
    )
    .unwrap();
    let profiles = ovf.config_profiles();
    let mut rows: Vec<ProfileSummary> = Vec::new();
    if profiles.is_empty() {
        rows.push(profile_summary(ovf, None));
    } else {
        for id in &profiles {
            rows.push(profile_summary(ovf, Some(id)));
        }
    }
    for row in rows {
        writeln!(
            out,
            "  {:<16} {:>4} {:>7} MB {:>5} {:>7} {:>6}",
            row.id.as_deref().unwrap_or("(default)"),
            row.cpus,
            row.memory_mb,
            row.nics,
            row.serials,
            row.disk_count
        )
        .unwrap();
    }

    // Properties.
    let properties = ovf.environment_properties();
    if !properties.is_empty() && verbosity != Verbosity::Brief {
        writeln!(out).unwrap();
        writeln!(out, "Properties:").unwrap();
        for prop in properties {
            writeln!(
                out,
                "  {:<28} = {}",
                prop.key,
                prop.value.as_deref().unwrap_or("")
            )
            .unwrap();
            if verbosity == Verbosity::Verbose {
                if let Some(label) = prop.label {
                    writeln!(out, "      \"{}\"", label).unwrap();
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::TarWriter;
    use std::io::Write;

    const CSR_OVF: &str = include_str!("../../tests/data/csr1000v.ovf");

    fn sample_package() -> (tempfile::TempDir, Package, Ovf) {
        let dir = tempfile::tempdir().unwrap();
        let ova = dir.path().join("csr1000v.ova");
        {
            let file = std::fs::File::create(&ova).unwrap();
            let mut writer = TarWriter::new(std::io::BufWriter::new(file));
            writer.add_bytes("csr1000v.ovf", CSR_OVF.as_bytes()).unwrap();
            writer
                .add_bytes("csr1000v_harddisk.vmdk", &[0u8; 1024])
                .unwrap();
            writer.add_bytes("config.iso", &[0u8; 512]).unwrap();
            writer.finish().unwrap().flush().unwrap();
        }
        let package = Package::open(&ova).unwrap();
        let ovf = Ovf::load(&package).unwrap();
        (dir, package, ovf)
    }

    #[test]
    fn test_profile_summary() {
        let (_dir, _pkg, ovf) = sample_package();
        let small = profile_summary(&ovf, Some("1CPU-4GB"));
        assert_eq!(small.cpus, 1);
        assert_eq!(small.memory_mb, 4096);
        assert_eq!(small.nics, 3);
        assert_eq!(small.serials, 1);
        assert_eq!(small.disk_count, 2);
        assert_eq!(small.label.as_deref(), Some("Small"));

        let large = profile_summary(&ovf, Some("4CPU-4GB"));
        assert_eq!(large.cpus, 4);
        assert_eq!(large.memory_mb, 4096);
    }

    #[test]
    fn test_info_string_contents() {
        let (_dir, package, ovf) = sample_package();
        let report = info_string(&package, &ovf, Verbosity::Normal).unwrap();
        assert!(report.contains("Cisco CSR 1000V Cloud Services Router"));
        assert!(report.contains("com.cisco.csr1000v"));
        assert!(report.contains("csr1000v_harddisk.vmdk"));
        assert!(report.contains("GigabitEthernet1"));
        assert!(report.contains("2CPU-4GB"));
        assert!(report.contains("mgmt-ipv4-addr"));
    }

    #[test]
    fn test_info_brief_omits_properties() {
        let (_dir, package, ovf) = sample_package();
        let report = info_string(&package, &ovf, Verbosity::Brief).unwrap();
        assert!(!report.contains("mgmt-ipv4-addr"));
    }
}

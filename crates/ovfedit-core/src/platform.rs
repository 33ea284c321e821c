//! Platform-specific defaults and validation.
//!
//! The ProductSection's product class string (e.g. `com.cisco.csr1000v`)
//! selects a [`Platform`] implementation supplying NIC naming, controller
//! defaults, bootstrap-disk placement, and hardware bounds. Unrecognized
//! product classes fall back to a permissive generic platform. Bounds
//! violations are reported as warning strings; the caller gates them
//! behind the session's confirmation callback.

use log::info;

use crate::names::ResourceKind;

/// Medium used for an injected bootstrap configuration disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapDiskType {
    Cdrom,
    Harddisk,
}

impl BootstrapDiskType {
    pub fn drive_kind(self) -> ResourceKind {
        match self {
            BootstrapDiskType::Cdrom => ResourceKind::Cdrom,
            BootstrapDiskType::Harddisk => ResourceKind::Harddisk,
        }
    }

    /// Conventional filename of the packaged bootstrap image.
    pub fn image_name(self) -> &'static str {
        match self {
            BootstrapDiskType::Cdrom => "config.iso",
            BootstrapDiskType::Harddisk => "config.vmdk",
        }
    }
}

/// Outcome of a platform bounds check: `Ok` or a warning to confirm.
pub type Check = std::result::Result<(), String>;

fn check_range(value: u64, min: u64, max: u64, label: &str, platform: &str) -> Check {
    if value < min {
        Err(format!(
            "{} requires at least {} {}; {} requested",
            platform, min, label, value
        ))
    } else if value > max {
        Err(format!(
            "{} supports at most {} {}; {} requested",
            platform, max, label, value
        ))
    } else {
        Ok(())
    }
}

/// Guest-platform knowledge used to fill defaults and sanity-check edits.
pub trait Platform {
    /// Descriptive label for this platform family.
    fn name(&self) -> &'static str;

    /// Filename the platform expects for its primary config text file.
    fn config_text_file(&self) -> &'static str {
        "config.txt"
    }

    /// Filename for a secondary config file, if the platform has one.
    fn secondary_config_text_file(&self) -> Option<&'static str> {
        None
    }

    /// Key prefix for converting config-file lines into OVF environment
    /// properties, for platforms that support it.
    fn literal_cli_string(&self) -> Option<&'static str> {
        Some("config")
    }

    /// Where an injected bootstrap configuration disk goes.
    fn bootstrap_disk_type(&self) -> BootstrapDiskType {
        BootstrapDiskType::Cdrom
    }

    /// NIC device types this platform supports, most-preferred first.
    fn supported_nic_types(&self) -> &'static [&'static str] {
        &["E1000", "E1000e", "PCNet32", "virtio", "VMXNET3"]
    }

    /// Default controller type for a new drive of the given kind.
    fn controller_type_for(&self, _drive: ResourceKind) -> ResourceKind {
        ResourceKind::IdeController
    }

    /// Guess the name of the Nth NIC, counting from 1.
    fn guess_nic_name(&self, nic_number: usize) -> String {
        format!("Ethernet{}", nic_number)
    }

    fn check_cpu_count(&self, _cpus: u64) -> Check {
        Ok(())
    }

    fn check_memory_amount(&self, _mebibytes: u64) -> Check {
        Ok(())
    }

    fn check_nic_count(&self, _count: u64) -> Check {
        Ok(())
    }

    fn check_serial_count(&self, _count: u64) -> Check {
        Ok(())
    }

    fn check_nic_type(&self, nic_type: &str) -> Check {
        let supported = self.supported_nic_types();
        if supported
            .iter()
            .any(|t| t.eq_ignore_ascii_case(nic_type))
        {
            Ok(())
        } else {
            Err(format!(
                "NIC type '{}' is not supported by {} (supported: {})",
                nic_type,
                self.name(),
                supported.join(", ")
            ))
        }
    }
}

/// Fallback for unrecognized or absent product classes.
struct Generic;

impl Platform for Generic {
    fn name(&self) -> &'static str {
        "(unrecognized platform, generic)"
    }
}

/// Cisco CSR1000V virtual router.
struct Csr1000v;

impl Platform for Csr1000v {
    fn name(&self) -> &'static str {
        "Cisco CSR1000V"
    }

    fn config_text_file(&self) -> &'static str {
        "iosxe_config.txt"
    }

    fn literal_cli_string(&self) -> Option<&'static str> {
        Some("ios-config")
    }

    // E1000 is not officially supported but mostly works.
    fn supported_nic_types(&self) -> &'static [&'static str] {
        &["E1000", "virtio", "VMXNET3"]
    }

    fn controller_type_for(&self, drive: ResourceKind) -> ResourceKind {
        match drive {
            ResourceKind::Harddisk => ResourceKind::ScsiController,
            _ => ResourceKind::IdeController,
        }
    }

    /// NIC names start at GigabitEthernet1 in all current releases.
    fn guess_nic_name(&self, nic_number: usize) -> String {
        format!("GigabitEthernet{}", nic_number)
    }

    fn check_cpu_count(&self, cpus: u64) -> Check {
        check_range(cpus, 1, 4, "CPUs", self.name())?;
        if cpus == 3 {
            return Err(format!("{} supports 1, 2, or 4 CPUs, not 3", self.name()));
        }
        Ok(())
    }

    fn check_memory_amount(&self, mebibytes: u64) -> Check {
        check_range(mebibytes, 2560, 8192, "MiB of RAM", self.name())
    }

    fn check_nic_count(&self, count: u64) -> Check {
        check_range(count, 3, 26, "NICs", self.name())
    }

    fn check_serial_count(&self, count: u64) -> Check {
        check_range(count, 0, 2, "serial ports", self.name())
    }
}

/// Cisco IOSv virtual router.
struct Iosv;

impl Platform for Iosv {
    fn name(&self) -> &'static str {
        "Cisco IOSv"
    }

    fn config_text_file(&self) -> &'static str {
        "ios_config.txt"
    }

    fn literal_cli_string(&self) -> Option<&'static str> {
        None
    }

    fn bootstrap_disk_type(&self) -> BootstrapDiskType {
        BootstrapDiskType::Harddisk
    }

    fn supported_nic_types(&self) -> &'static [&'static str] {
        &["E1000"]
    }

    fn guess_nic_name(&self, nic_number: usize) -> String {
        format!("GigabitEthernet0/{}", nic_number - 1)
    }

    fn check_cpu_count(&self, cpus: u64) -> Check {
        check_range(cpus, 1, 1, "CPUs", self.name())
    }

    fn check_memory_amount(&self, mebibytes: u64) -> Check {
        check_range(mebibytes, 192, 3072, "MiB of RAM", self.name())?;
        if mebibytes < 384 {
            return Err(format!(
                "less than 384 MiB of RAM may not suffice for some {} feature sets",
                self.name()
            ));
        }
        Ok(())
    }

    fn check_nic_count(&self, count: u64) -> Check {
        check_range(count, 0, 16, "NICs", self.name())
    }

    fn check_serial_count(&self, count: u64) -> Check {
        check_range(count, 1, 2, "serial ports", self.name())
    }
}

/// Cisco IOS XRv virtual router.
struct IosXrv;

impl Platform for IosXrv {
    fn name(&self) -> &'static str {
        "Cisco IOS XRv"
    }

    fn config_text_file(&self) -> &'static str {
        "iosxr_config.txt"
    }

    fn secondary_config_text_file(&self) -> Option<&'static str> {
        Some("iosxr_config_admin.txt")
    }

    fn literal_cli_string(&self) -> Option<&'static str> {
        None
    }

    fn supported_nic_types(&self) -> &'static [&'static str] {
        &["E1000", "virtio"]
    }

    fn guess_nic_name(&self, nic_number: usize) -> String {
        match nic_number {
            1 => "MgmtEth0/0/CPU0/0".to_string(),
            n => format!("GigabitEthernet0/0/0/{}", n - 2),
        }
    }

    fn check_cpu_count(&self, cpus: u64) -> Check {
        check_range(cpus, 1, 8, "CPUs", self.name())
    }

    fn check_memory_amount(&self, mebibytes: u64) -> Check {
        check_range(mebibytes, 3072, 8192, "MiB of RAM", self.name())
    }

    fn check_nic_count(&self, count: u64) -> Check {
        check_range(count, 1, 24, "NICs", self.name())
    }

    fn check_serial_count(&self, count: u64) -> Check {
        check_range(count, 1, 4, "serial ports", self.name())
    }
}

/// Cisco Nexus 9000v virtual switch.
struct Nexus9000v;

impl Platform for Nexus9000v {
    fn name(&self) -> &'static str {
        "Cisco Nexus 9000v"
    }

    fn config_text_file(&self) -> &'static str {
        "nxos_config.txt"
    }

    fn literal_cli_string(&self) -> Option<&'static str> {
        None
    }

    fn supported_nic_types(&self) -> &'static [&'static str] {
        &["E1000", "VMXNET3"]
    }

    fn controller_type_for(&self, drive: ResourceKind) -> ResourceKind {
        match drive {
            ResourceKind::Harddisk => ResourceKind::SataController,
            _ => ResourceKind::IdeController,
        }
    }

    fn guess_nic_name(&self, nic_number: usize) -> String {
        match nic_number {
            1 => "mgmt0".to_string(),
            n => format!("Ethernet1/{}", n - 1),
        }
    }

    fn check_cpu_count(&self, cpus: u64) -> Check {
        check_range(cpus, 1, 4, "CPUs", self.name())
    }

    fn check_memory_amount(&self, mebibytes: u64) -> Check {
        check_range(mebibytes, 8192, u64::MAX, "MiB of RAM", self.name())
    }

    fn check_nic_count(&self, count: u64) -> Check {
        check_range(count, 1, 65, "NICs", self.name())
    }

    fn check_serial_count(&self, count: u64) -> Check {
        check_range(count, 1, 1, "serial ports", self.name())
    }
}

static GENERIC: Generic = Generic;
static CSR1000V: Csr1000v = Csr1000v;
static IOSV: Iosv = Iosv;
static IOSXRV: IosXrv = IosXrv;
static NEXUS9000V: Nexus9000v = Nexus9000v;

/// The registry of known product-class strings.
static REGISTRY: &[(&str, &'static (dyn Platform + Sync))] = &[
    ("com.cisco.csr1000v", &CSR1000V),
    ("com.cisco.CSR1000V", &CSR1000V),
    ("com.cisco.iosv", &IOSV),
    ("com.cisco.ios-xrv", &IOSXRV),
    ("com.cisco.ios-xrv.rp", &IOSXRV),
    ("com.cisco.n9k", &NEXUS9000V),
    ("com.cisco.nexus9000v", &NEXUS9000V),
];

/// Resolve the platform for a product-class string.
/// `None` or an unrecognized class yields the generic platform.
pub fn for_product_class(product_class: Option<&str>) -> &'static dyn Platform {
    let Some(product_class) = product_class else {
        info!("No product class given; treating this as a generic platform");
        return &GENERIC;
    };
    match REGISTRY
        .iter()
        .find(|(key, _)| *key == product_class)
        .map(|(_, platform)| *platform as &'static dyn Platform)
    {
        Some(platform) => platform,
        None => {
            info!(
                "Unrecognized product class '{}'; treating this as a generic platform",
                product_class
            );
            &GENERIC
        }
    }
}

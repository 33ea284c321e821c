//! OVF namespace URIs, element names, and CIM resource-type codes.
//!
//! Everything here is keyed off the descriptor's OVF version, which is
//! itself derived from the envelope namespace URI. The loaded version is
//! preserved on write; it only selects namespaces, element spellings, and
//! the manifest checksum algorithm.

use crate::xml::NsDecl;

/// OVF envelope namespace, version 0.9 (pre-standard VMware drafts).
pub const OVF_09_URI: &str = "http://www.vmware.com/schema/ovf/1/envelope";
/// OVF envelope namespace, version 1.x (DMTF standard).
pub const OVF_1_URI: &str = "http://schemas.dmtf.org/ovf/envelope/1";
/// OVF envelope namespace, version 2.x.
pub const OVF_2_URI: &str = "http://schemas.dmtf.org/ovf/envelope/2";

/// CIM ResourceAllocationSettingData namespace (hardware Item children).
pub const RASD_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData";
/// CIM VirtualSystemSettingData namespace (System element children).
pub const VSSD_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData";
/// CIM EthernetPortAllocationSettingData namespace (OVF 2.x NIC items).
pub const EPASD_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_EthernetPortAllocationSettingData";
/// CIM StorageAllocationSettingData namespace (OVF 2.x storage items).
pub const SASD_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_StorageAllocationSettingData";
/// VMware OVF extension namespace.
pub const VMW_URI: &str = "http://www.vmware.com/schema/ovf";

pub const NS_RASD: NsDecl = NsDecl {
    prefix: "rasd",
    uri: RASD_URI,
};
pub const NS_VSSD: NsDecl = NsDecl {
    prefix: "vssd",
    uri: VSSD_URI,
};
pub const NS_EPASD: NsDecl = NsDecl {
    prefix: "epasd",
    uri: EPASD_URI,
};
pub const NS_SASD: NsDecl = NsDecl {
    prefix: "sasd",
    uri: SASD_URI,
};

/// The OVF specification version in use, as determined by the envelope
/// namespace. No transformation between versions is ever attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvfVersion {
    V0_9,
    V1,
    V2,
}

impl OvfVersion {
    /// Identify the version from an envelope namespace URI.
    pub fn from_envelope_uri(uri: &str) -> Option<Self> {
        match uri {
            OVF_09_URI => Some(OvfVersion::V0_9),
            OVF_1_URI => Some(OvfVersion::V1),
            OVF_2_URI => Some(OvfVersion::V2),
            _ => None,
        }
    }

    /// The envelope namespace for this version, with the `ovf` prefix.
    pub fn ovf_ns(self) -> NsDecl {
        NsDecl {
            prefix: "ovf",
            uri: match self {
                OvfVersion::V0_9 => OVF_09_URI,
                OvfVersion::V1 => OVF_1_URI,
                OvfVersion::V2 => OVF_2_URI,
            },
        }
    }

    /// Element spellings that changed between 0.9 and 1.x.
    pub fn item_names(self) -> ItemNames {
        match self {
            OvfVersion::V0_9 => ItemNames {
                instance_id: "InstanceId",
                element_name: "Caption",
            },
            _ => ItemNames {
                instance_id: "InstanceID",
                element_name: "ElementName",
            },
        }
    }
}

impl std::fmt::Display for OvfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OvfVersion::V0_9 => write!(f, "0.9"),
            OvfVersion::V1 => write!(f, "1.x"),
            OvfVersion::V2 => write!(f, "2.x"),
        }
    }
}

/// Version-dependent Item child spellings.
#[derive(Debug, Clone, Copy)]
pub struct ItemNames {
    pub instance_id: &'static str,
    pub element_name: &'static str,
}

/// Canonical order of recognized Envelope children.
pub const ENVELOPE_ORDER: &[&str] = &[
    "References",
    "DiskSection",
    "NetworkSection",
    "DeploymentOptionSection",
    "VirtualSystem",
];

/// Canonical order of recognized VirtualSystem children.
pub const VIRTUAL_SYSTEM_ORDER: &[&str] = &[
    "Info",
    "Name",
    "OperatingSystemSection",
    "VirtualHardwareSection",
    "ProductSection",
    "AnnotationSection",
    "EulaSection",
];

/// Canonical order of VirtualHardwareSection children.
pub const HARDWARE_SECTION_ORDER: &[&str] =
    &["Info", "System", "Item", "StorageItem", "EthernetPortItem"];

/// Canonical (CIM-alphabetical) order of RASD children within an Item.
pub const ITEM_CHILD_ORDER: &[&str] = &[
    "Address",
    "AddressOnParent",
    "AllocationUnits",
    "AutomaticAllocation",
    "Caption",
    "Connection",
    "ConsumerVisibility",
    "Description",
    "ElementName",
    "HostResource",
    "InstanceId",
    "InstanceID",
    "Limit",
    "MappingBehavior",
    "OtherResourceType",
    "Parent",
    "PoolID",
    "Reservation",
    "ResourceSubType",
    "ResourceType",
    "VirtualQuantity",
    "VirtualQuantityUnits",
    "Weight",
];

/// Hardware device categories, with their CIM ResourceType codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    IdeController,
    ScsiController,
    FcController,
    IscsiController,
    IbController,
    Ethernet,
    Floppy,
    Cdrom,
    Dvd,
    Harddisk,
    SataController,
    Serial,
    Parallel,
    Usb,
}

impl ResourceKind {
    /// The numeric ResourceType code as it appears in the descriptor.
    pub fn code(self) -> &'static str {
        match self {
            ResourceKind::Cpu => "3",
            ResourceKind::Memory => "4",
            ResourceKind::IdeController => "5",
            ResourceKind::ScsiController => "6",
            ResourceKind::FcController => "7",
            ResourceKind::IscsiController => "8",
            ResourceKind::IbController => "9",
            ResourceKind::Ethernet => "10",
            ResourceKind::Floppy => "14",
            ResourceKind::Cdrom => "15",
            ResourceKind::Dvd => "16",
            ResourceKind::Harddisk => "17",
            // 'Other Storage'; VirtualBox uses it for SATA controllers.
            ResourceKind::SataController => "20",
            ResourceKind::Serial => "21",
            ResourceKind::Parallel => "22",
            ResourceKind::Usb => "23",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "3" => ResourceKind::Cpu,
            "4" => ResourceKind::Memory,
            "5" => ResourceKind::IdeController,
            "6" => ResourceKind::ScsiController,
            "7" => ResourceKind::FcController,
            "8" => ResourceKind::IscsiController,
            "9" => ResourceKind::IbController,
            "10" => ResourceKind::Ethernet,
            "14" => ResourceKind::Floppy,
            "15" => ResourceKind::Cdrom,
            "16" => ResourceKind::Dvd,
            "17" => ResourceKind::Harddisk,
            "20" => ResourceKind::SataController,
            "21" => ResourceKind::Serial,
            "22" => ResourceKind::Parallel,
            "23" => ResourceKind::Usb,
            _ => return None,
        })
    }

    /// Lowercase name used in user-facing options and messages.
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::IdeController => "ide",
            ResourceKind::ScsiController => "scsi",
            ResourceKind::FcController => "fc",
            ResourceKind::IscsiController => "iscsi",
            ResourceKind::IbController => "ib",
            ResourceKind::Ethernet => "ethernet",
            ResourceKind::Floppy => "floppy",
            ResourceKind::Cdrom => "cdrom",
            ResourceKind::Dvd => "dvd",
            ResourceKind::Harddisk => "harddisk",
            ResourceKind::SataController => "sata",
            ResourceKind::Serial => "serial",
            ResourceKind::Parallel => "parallel",
            ResourceKind::Usb => "usb",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Some(match label {
            "cpu" => ResourceKind::Cpu,
            "memory" => ResourceKind::Memory,
            "ide" => ResourceKind::IdeController,
            "scsi" => ResourceKind::ScsiController,
            "fc" => ResourceKind::FcController,
            "iscsi" => ResourceKind::IscsiController,
            "ib" => ResourceKind::IbController,
            "ethernet" => ResourceKind::Ethernet,
            "floppy" => ResourceKind::Floppy,
            "cdrom" => ResourceKind::Cdrom,
            "dvd" => ResourceKind::Dvd,
            "harddisk" => ResourceKind::Harddisk,
            "sata" => ResourceKind::SataController,
            "serial" => ResourceKind::Serial,
            "parallel" => ResourceKind::Parallel,
            "usb" => ResourceKind::Usb,
            _ => return None,
        })
    }

    /// Whether this kind is a disk/CD controller that drives can attach to.
    pub fn is_controller(self) -> bool {
        matches!(
            self,
            ResourceKind::IdeController
                | ResourceKind::ScsiController
                | ResourceKind::SataController
        )
    }

    /// The namespace for this kind's Item children, by OVF version.
    /// OVF 2.x moved NICs and storage devices into their own namespaces.
    pub fn item_ns(self, version: OvfVersion) -> NsDecl {
        if version == OvfVersion::V2 {
            match self {
                ResourceKind::Ethernet => return NS_EPASD,
                ResourceKind::Harddisk | ResourceKind::Cdrom | ResourceKind::Dvd => {
                    return NS_SASD
                }
                _ => {}
            }
        }
        NS_RASD
    }

    /// The Item element spelling for this kind, by OVF version.
    pub fn item_tag(self, version: OvfVersion) -> &'static str {
        if version == OvfVersion::V2 {
            match self {
                ResourceKind::Ethernet => return "EthernetPortItem",
                ResourceKind::Harddisk | ResourceKind::Cdrom | ResourceKind::Dvd => {
                    return "StorageItem"
                }
                _ => {}
            }
        }
        "Item"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_uri() {
        assert_eq!(
            OvfVersion::from_envelope_uri(OVF_1_URI),
            Some(OvfVersion::V1)
        );
        assert_eq!(
            OvfVersion::from_envelope_uri(OVF_2_URI),
            Some(OvfVersion::V2)
        );
        assert_eq!(
            OvfVersion::from_envelope_uri(OVF_09_URI),
            Some(OvfVersion::V0_9)
        );
        assert_eq!(OvfVersion::from_envelope_uri("urn:nope"), None);
    }

    #[test]
    fn test_resource_codes_round_trip() {
        for kind in [
            ResourceKind::Cpu,
            ResourceKind::Memory,
            ResourceKind::ScsiController,
            ResourceKind::Ethernet,
            ResourceKind::Cdrom,
            ResourceKind::Harddisk,
            ResourceKind::Serial,
        ] {
            assert_eq!(ResourceKind::from_code(kind.code()), Some(kind));
            assert_eq!(ResourceKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(ResourceKind::from_code("99"), None);
    }

    #[test]
    fn test_item_names_by_version() {
        assert_eq!(OvfVersion::V0_9.item_names().instance_id, "InstanceId");
        assert_eq!(OvfVersion::V1.item_names().instance_id, "InstanceID");
        assert_eq!(OvfVersion::V0_9.item_names().element_name, "Caption");
    }

    #[test]
    fn test_ovf2_item_tags() {
        assert_eq!(ResourceKind::Ethernet.item_tag(OvfVersion::V2), "EthernetPortItem");
        assert_eq!(ResourceKind::Harddisk.item_tag(OvfVersion::V2), "StorageItem");
        assert_eq!(ResourceKind::Cpu.item_tag(OvfVersion::V2), "Item");
        assert_eq!(ResourceKind::Ethernet.item_tag(OvfVersion::V1), "Item");
    }
}

//! File, disk, and drive-device resources.
//!
//! Covers the References/DiskSection side of the descriptor and its links
//! into the hardware engine: searching by filename, file ID, or controller
//! address; adding and removing files with their Disk entries; and
//! creating controller and drive devices.

use std::path::Path;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hardware::{LogicalItem, ProfileSet};
use crate::names::ResourceKind;
use crate::package::SourceKind;
use crate::xml::Element;

use super::Ovf;

/// The streamOptimized VMDK format URI stamped on new Disk entries.
const VMDK_STREAM_FORMAT: &str =
    "http://www.vmware.com/interfaces/specifications/vmdk.html#streamOptimized";

/// What a drive Item's HostResource points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResourceRef {
    Disk(String),
    File(String),
}

/// Parse a HostResource value, accepting both the OVF 1.x prefixes and the
/// older 0.9 spellings.
pub fn parse_host_resource(value: &str) -> Option<HostResourceRef> {
    for (prefix, is_disk) in [
        ("ovf:/disk/", true),
        ("/disk/", true),
        ("ovf:/file/", false),
        ("/file/", false),
    ] {
        if let Some(id) = value.strip_prefix(prefix) {
            return Some(if is_disk {
                HostResourceRef::Disk(id.to_string())
            } else {
                HostResourceRef::File(id.to_string())
            });
        }
    }
    None
}

/// Everything found for one file/disk/device lookup. All fields optional:
/// a package may have a File with no Disk, a Disk with no drive, etc.
#[derive(Debug, Clone, Default)]
pub struct DeviceSearch {
    pub file_id: Option<String>,
    pub disk_id: Option<String>,
    /// Hardware index of the controller the drive hangs off.
    pub ctrl_index: Option<usize>,
    /// Hardware index of the drive device itself.
    pub disk_index: Option<usize>,
}

impl Ovf {
    // ------------------------------------------------------------------
    // File entries

    pub fn find_file_by_id(&self, file_id: &str) -> Option<&Element> {
        let uri = self.ovf_uri();
        self.references()?
            .find_child_with_attr(uri, "File", "id", file_id)
    }

    pub fn find_file_by_href(&self, href: &str) -> Option<&Element> {
        let uri = self.ovf_uri();
        self.references()?
            .find_child_with_attr(uri, "File", "href", href)
    }

    pub fn file_href_of(&self, file_id: &str) -> Option<String> {
        self.find_file_by_id(file_id)?
            .attr(self.ovf_uri(), "href")
            .map(str::to_string)
    }

    pub fn file_id_of_href(&self, href: &str) -> Option<String> {
        self.find_file_by_href(href)?
            .attr(self.ovf_uri(), "id")
            .map(str::to_string)
    }

    // ------------------------------------------------------------------
    // Disk entries

    pub fn find_disk_by_id(&self, disk_id: &str) -> Option<&Element> {
        let uri = self.ovf_uri();
        self.disk_section()?
            .find_child_with_attr(uri, "Disk", "diskId", disk_id)
    }

    /// The Disk entry whose fileRef points at the given File ID.
    pub fn find_disk_by_file_ref(&self, file_id: &str) -> Option<&Element> {
        let uri = self.ovf_uri();
        self.disk_section()?
            .find_child_with_attr(uri, "Disk", "fileRef", file_id)
    }

    pub fn disk_file_ref(&self, disk_id: &str) -> Option<String> {
        self.find_disk_by_id(disk_id)?
            .attr(self.ovf_uri(), "fileRef")
            .map(str::to_string)
    }

    /// Capacity in bytes of a Disk entry, decoding its allocation units.
    pub fn disk_capacity_bytes(&self, disk_id: &str) -> Result<u64> {
        let uri = self.ovf_uri();
        let disk = self
            .find_disk_by_id(disk_id)
            .ok_or_else(|| Error::not_found(format!("no disk with ID '{}'", disk_id)))?;
        let capacity: u64 = disk
            .attr(uri, "capacity")
            .unwrap_or("0")
            .parse()
            .map_err(|_| {
                Error::invalid_package(format!("disk '{}' has a non-numeric capacity", disk_id))
            })?;
        let units = disk.attr(uri, "capacityAllocationUnits").unwrap_or("byte");
        Ok(capacity * parse_alloc_units_multiplier(units)?)
    }

    // ------------------------------------------------------------------
    // Cross-linked searches

    /// Find the drive device whose HostResource references the given disk
    /// or file ID.
    pub fn find_item_for_host_resource(
        &self,
        disk_id: Option<&str>,
        file_id: Option<&str>,
    ) -> Option<usize> {
        for (idx, item) in self.hardware().items().enumerate() {
            let Some(host_resource) = item.raw_value("HostResource", None) else {
                continue;
            };
            match parse_host_resource(&host_resource) {
                Some(HostResourceRef::Disk(id)) => {
                    if disk_id == Some(id.as_str()) {
                        return Some(idx);
                    }
                }
                Some(HostResourceRef::File(id)) => {
                    if file_id == Some(id.as_str()) {
                        return Some(idx);
                    }
                }
                None => {}
            }
        }
        None
    }

    /// The controller a drive device is attached to, via its Parent link.
    pub fn find_parent_of_item(&self, drive_index: usize) -> Option<usize> {
        let parent = self.hardware().item(drive_index).raw_value("Parent", None)?;
        self.hardware()
            .items()
            .position(|i| i.instance_id().as_deref() == Some(parent.as_str()))
    }

    fn search_from_ids(&self, file_id: Option<String>) -> DeviceSearch {
        let mut result = DeviceSearch {
            file_id: file_id.clone(),
            ..Default::default()
        };
        if let Some(file_id) = &file_id {
            result.disk_id = self
                .find_disk_by_file_ref(file_id)
                .and_then(|d| d.attr(self.ovf_uri(), "diskId"))
                .map(str::to_string);
        }
        result.disk_index =
            self.find_item_for_host_resource(result.disk_id.as_deref(), file_id.as_deref());
        result.ctrl_index = result
            .disk_index
            .and_then(|idx| self.find_parent_of_item(idx));
        result
    }

    /// Search by stored filename (File href).
    pub fn search_from_filename(&self, filename: &str) -> DeviceSearch {
        self.search_from_ids(self.file_id_of_href(filename))
    }

    /// Search by File ID.
    pub fn search_from_file_id(&self, file_id: &str) -> DeviceSearch {
        if self.find_file_by_id(file_id).is_none() {
            // A Disk may reference the ID even with no File present.
            let mut result = DeviceSearch::default();
            result.disk_id = self
                .find_disk_by_file_ref(file_id)
                .and_then(|d| d.attr(self.ovf_uri(), "diskId"))
                .map(str::to_string);
            result.disk_index =
                self.find_item_for_host_resource(result.disk_id.as_deref(), Some(file_id));
            result.ctrl_index = result
                .disk_index
                .and_then(|idx| self.find_parent_of_item(idx));
            return result;
        }
        self.search_from_ids(Some(file_id.to_string()))
    }

    /// Search by controller type and `controller:unit` address.
    pub fn search_from_controller(
        &self,
        controller: ResourceKind,
        address: &str,
    ) -> Result<DeviceSearch> {
        let (ctrl_addr, unit_addr) = address.split_once(':').ok_or_else(|| {
            Error::invalid_input(format!(
                "device address '{}' must have the form 'controller:unit'",
                address
            ))
        })?;
        let universe = self.config_profiles();
        let mut result = DeviceSearch::default();
        let Some(ctrl_index) = self
            .hardware()
            .find_all_items(Some(controller), &[("Address", ctrl_addr)], &[], &universe)
            .first()
            .copied()
        else {
            return Ok(result);
        };
        result.ctrl_index = Some(ctrl_index);
        let ctrl_instance = self
            .hardware()
            .item(ctrl_index)
            .instance_id()
            .unwrap_or_default();
        let drives = self.hardware().find_all_items(
            None,
            &[
                ("Parent", ctrl_instance.as_str()),
                ("AddressOnParent", unit_addr),
            ],
            &[],
            &universe,
        );
        let Some(disk_index) = drives.first().copied() else {
            return Ok(result);
        };
        result.disk_index = Some(disk_index);
        if let Some(host_resource) = self
            .hardware()
            .item(disk_index)
            .raw_value("HostResource", None)
        {
            match parse_host_resource(&host_resource) {
                Some(HostResourceRef::Disk(disk_id)) => {
                    result.file_id = self
                        .find_disk_by_id(&disk_id)
                        .and_then(|d| d.attr(self.ovf_uri(), "fileRef"))
                        .map(str::to_string);
                    result.disk_id = Some(disk_id);
                }
                Some(HostResourceRef::File(file_id)) => {
                    result.disk_id = self
                        .find_disk_by_file_ref(&file_id)
                        .and_then(|d| d.attr(self.ovf_uri(), "diskId"))
                        .map(str::to_string);
                    result.file_id = Some(file_id);
                }
                None => warn!("Unrecognized HostResource '{}'", host_resource),
            }
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // File add/remove

    /// Add a File entry for a local file, or overwrite an existing one.
    ///
    /// The stored filename is the basename of `path`; the file's bytes are
    /// copied into the package at write time. When the entry backs an
    /// existing Disk, the File is inserted so that Files stay in Disk
    /// declaration order, as the specification requires. Returns the href.
    pub fn add_file_entry(
        &mut self,
        path: &Path,
        file_id: &str,
        replace_disk_id: Option<&str>,
    ) -> Result<String> {
        let ns = self.ovf_ns();
        let size = std::fs::metadata(path).map_err(|e| Error::io(e, path))?.len();
        let href = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::invalid_input(format!("'{}' has no file name", path.display()))
            })?;
        debug!("Adding File '{}' (id {}) to References", href, file_id);

        let existing_href = self.file_href_of(file_id);
        if let Some(old_href) = existing_href {
            // Overwrite in place.
            self.remove_file_source(&old_href);
            let references = self.references_mut().expect("file entry exists");
            let file = references
                .find_child_with_attr_mut(ns.uri, "File", "id", file_id)
                .expect("file entry exists");
            file.clear();
            file.set_attr(ns, "id", file_id);
            file.set_attr(ns, "href", &href);
            file.set_attr(ns, "size", size.to_string());
        } else {
            let mut file = Element::new(ns, "File");
            file.set_attr(ns, "id", file_id);
            file.set_attr(ns, "href", &href);
            file.set_attr(ns, "size", size.to_string());

            // Files backing Disks must appear in Disk declaration order.
            // Find the first File backing a later Disk and insert before it.
            let next_file_id = replace_disk_id.and_then(|disk_id| {
                let uri = self.ovf_uri();
                let disks = self.disk_section()?.find_children(uri, "Disk");
                let pos = disks
                    .iter()
                    .position(|d| d.attr(uri, "diskId") == Some(disk_id))?;
                disks[pos + 1..]
                    .iter()
                    .filter_map(|d| d.attr(uri, "fileRef"))
                    .find(|file_ref| self.find_file_by_id(file_ref).is_some())
                    .map(str::to_string)
            });
            let references = self.ensure_references();
            match next_file_id {
                Some(next_id) => {
                    references.insert_child_before(
                        |e| e.is(ns.uri, "File") && e.attr(ns.uri, "id") == Some(&next_id),
                        file,
                    );
                }
                None => {
                    references.add_child(file);
                }
            }
        }
        self.set_file_source(&href, SourceKind::LocalFile(path.to_path_buf()));
        Ok(href)
    }

    /// Remove a File entry and everything hanging off it.
    ///
    /// The referencing Disk (if any) is removed. A CD-ROM drive mapping
    /// the file is left in place as an empty drive; a hard-disk drive is
    /// deleted outright.
    pub fn remove_file_entry(
        &mut self,
        file_id: &str,
        disk_id: Option<&str>,
        disk_index: Option<usize>,
    ) -> Result<()> {
        let ns = self.ovf_ns();
        let href = self
            .file_href_of(file_id)
            .ok_or_else(|| Error::not_found(format!("no file with ID '{}'", file_id)))?;
        info!("Removing file '{}' (id {})", href, file_id);
        let references = self.references_mut().expect("file entry exists");
        references.remove_child_where(|e| {
            e.is(ns.uri, "File") && e.attr(ns.uri, "id") == Some(file_id)
        });
        self.remove_file_source(&href);

        if let Some(disk_id) = disk_id {
            if let Some(section) = self.disk_section_mut() {
                section.remove_child_where(|e| {
                    e.is(ns.uri, "Disk") && e.attr(ns.uri, "diskId") == Some(disk_id)
                });
                if section.find_child(ns.uri, "Disk").is_none() {
                    debug!("No Disks left; removing DiskSection");
                    self.doc
                        .root
                        .remove_child_where(|e| e.is(ns.uri, "DiskSection"));
                }
            }
        }

        if let Some(index) = disk_index {
            match self.hardware().item(index).resource_kind() {
                Some(ResourceKind::Cdrom) | Some(ResourceKind::Dvd) => {
                    // An empty CD-ROM drive is legitimate; just unmap it.
                    self.hardware_mut()
                        .item_mut(index)
                        .set_property("HostResource", "", None)?;
                }
                Some(ResourceKind::Harddisk) => {
                    self.hardware_mut().delete_item(index);
                }
                other => {
                    return Err(Error::invalid_input(format!(
                        "drive type {:?} mapping file '{}' is neither a CD-ROM nor a hard disk",
                        other.map(|k| k.label()),
                        file_id
                    )))
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disk entries

    /// Add or update the Disk entry for a hard disk. CD-ROMs carry no Disk
    /// entry; an existing one is removed. Returns the disk ID, if any.
    pub fn add_disk_entry(
        &mut self,
        drive_kind: ResourceKind,
        file_id: &str,
        capacity_bytes: u64,
        existing_disk_id: Option<&str>,
    ) -> Result<Option<String>> {
        let ns = self.ovf_ns();
        if drive_kind != ResourceKind::Harddisk {
            if let Some(disk_id) = existing_disk_id {
                info!("CD-ROMs need no Disk element; removing existing entry");
                if let Some(section) = self.disk_section_mut() {
                    section.remove_child_where(|e| {
                        e.is(ns.uri, "Disk") && e.attr(ns.uri, "diskId") == Some(disk_id)
                    });
                    if section.find_child(ns.uri, "Disk").is_none() {
                        self.doc
                            .root
                            .remove_child_where(|e| e.is(ns.uri, "DiskSection"));
                    }
                }
            }
            return Ok(None);
        }

        let disk_id = existing_disk_id.unwrap_or(file_id).to_string();
        let (capacity, units) = factor_bytes(capacity_bytes);
        let section = self.ensure_disk_section();
        let exists = section
            .find_child_with_attr(ns.uri, "Disk", "diskId", &disk_id)
            .is_some();
        if !exists {
            debug!("Adding Disk '{}'", disk_id);
            let mut disk = Element::new(ns, "Disk");
            disk.set_attr(ns, "diskId", &disk_id);
            section.add_child(disk);
        }
        let disk = section
            .find_child_with_attr_mut(ns.uri, "Disk", "diskId", &disk_id)
            .expect("disk just ensured");
        disk.set_attr(ns, "capacity", capacity.to_string());
        disk.set_attr(ns, "capacityAllocationUnits", units);
        disk.set_attr(ns, "fileRef", file_id);
        disk.set_attr(ns, "format", VMDK_STREAM_FORMAT);
        Ok(Some(disk_id))
    }

    // ------------------------------------------------------------------
    // Controllers and drive devices

    /// Find a controller of the given kind with a free unit, along with
    /// the first free unit number.
    pub fn find_open_controller(
        &self,
        kind: ResourceKind,
    ) -> Result<Option<(usize, u64)>> {
        let universe = self.config_profiles();
        for ctrl_index in self
            .hardware()
            .find_all_items(Some(kind), &[], &[], &universe)
        {
            let instance = self
                .hardware()
                .item(ctrl_index)
                .instance_id()
                .unwrap_or_default();
            let devices = self.hardware().find_all_items(
                None,
                &[("Parent", instance.as_str())],
                &[],
                &universe,
            );
            let capacity = controller_capacity(kind);
            if (devices.len() as u64) < capacity {
                let taken: Vec<String> = devices
                    .iter()
                    .filter_map(|&d| self.hardware().item(d).raw_value("AddressOnParent", None))
                    .collect();
                let mut unit = 0u64;
                while taken.iter().any(|t| t == &unit.to_string()) {
                    unit += 1;
                }
                debug!(
                    "Controller instance {} has a free unit {}",
                    instance, unit
                );
                return Ok(Some((ctrl_index, unit)));
            }
        }
        Ok(None)
    }

    /// Find an existing empty drive of the given kind, for config
    /// injection: a CD-ROM with nothing mapped, or a hard-disk drive whose
    /// Disk has no backing file.
    pub fn find_empty_drive(&self, kind: ResourceKind) -> Option<usize> {
        let universe = self.config_profiles();
        match kind {
            ResourceKind::Cdrom | ResourceKind::Dvd => self
                .hardware()
                .find_all_items(Some(kind), &[], &[], &universe)
                .into_iter()
                .find(|&idx| {
                    self.hardware()
                        .item(idx)
                        .raw_value("HostResource", None)
                        .map(|v| v.is_empty())
                        .unwrap_or(true)
                }),
            ResourceKind::Harddisk => {
                let uri = self.ovf_uri();
                let section = self.disk_section()?;
                for disk in section.find_children(uri, "Disk") {
                    if disk.attr(uri, "fileRef").is_some() {
                        continue;
                    }
                    let disk_id = disk.attr(uri, "diskId")?;
                    if let Some(idx) = self.find_item_for_host_resource(Some(disk_id), None) {
                        return Some(idx);
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// The controller kind and `controller:unit` address of a drive.
    pub fn find_device_location(&self, drive_index: usize) -> Result<(ResourceKind, String)> {
        let ctrl_index = self.find_parent_of_item(drive_index).ok_or_else(|| {
            Error::invalid_package("drive device has no controller Parent")
        })?;
        let ctrl = self.hardware().item(ctrl_index);
        let kind = ctrl.resource_kind().ok_or_else(|| {
            Error::invalid_package("drive parent is not a recognized controller")
        })?;
        let ctrl_addr = ctrl.raw_value("Address", None).unwrap_or_default();
        let unit = self
            .hardware()
            .item(drive_index)
            .raw_value("AddressOnParent", None)
            .unwrap_or_default();
        Ok((kind, format!("{}:{}", ctrl_addr, unit)))
    }

    /// Create a controller of the given kind, or update an existing one's
    /// subtype. Returns the hardware index.
    pub fn add_controller_device(
        &mut self,
        kind: ResourceKind,
        subtype: Option<&str>,
        address: Option<u64>,
        ctrl_index: Option<usize>,
    ) -> Result<usize> {
        let universe = self.config_profiles();
        let index = match ctrl_index {
            Some(index) => index,
            None => {
                info!("{} controller not found, creating new device", kind.label());
                let address = match address {
                    Some(a) => a,
                    None => {
                        let taken: Vec<String> = self
                            .hardware()
                            .find_all_items(Some(kind), &[], &[], &universe)
                            .into_iter()
                            .filter_map(|i| self.hardware().item(i).raw_value("Address", None))
                            .collect();
                        let mut address = 0u64;
                        while taken.iter().any(|t| t == &address.to_string()) {
                            address += 1;
                        }
                        address
                    }
                };
                let max = match kind {
                    ResourceKind::ScsiController => 3,
                    ResourceKind::IdeController => 1,
                    _ => u64::MAX,
                };
                if address > max {
                    return Err(Error::invalid_input(format!(
                        "{} controller address {} is above the maximum of {}",
                        kind.label(),
                        address,
                        max
                    )));
                }
                let index = self.hardware_mut().new_item(kind, None)?;
                let names = self.version().item_names();
                let item = self.hardware_mut().item_mut(index);
                item.set_property("Address", &address.to_string(), None)?;
                item.set_property(
                    names.element_name,
                    &format!("{} Controller", kind.label().to_uppercase()),
                    None,
                )?;
                item.set_property(
                    "Description",
                    &format!("{} Controller {}", kind.label().to_uppercase(), address),
                    None,
                )?;
                index
            }
        };
        if let Some(subtype) = subtype {
            self.hardware_mut()
                .item_mut(index)
                .set_property("ResourceSubType", subtype, None)?;
        }
        Ok(index)
    }

    /// Create or update the drive device mapping a disk/file to a
    /// controller. Returns the hardware index of the drive.
    #[allow(clippy::too_many_arguments)]
    pub fn add_disk_device(
        &mut self,
        drive_kind: ResourceKind,
        unit_address: Option<u64>,
        name: Option<&str>,
        description: Option<&str>,
        disk_id: Option<&str>,
        file_id: &str,
        ctrl_index: usize,
        disk_index: Option<usize>,
    ) -> Result<usize> {
        let universe = self.config_profiles();
        let names = self.version().item_names();
        let ctrl_instance = self
            .hardware()
            .item(ctrl_index)
            .instance_id()
            .ok_or_else(|| Error::invalid_package("controller has no InstanceID"))?;
        let ctrl_kind = self.hardware().item(ctrl_index).resource_kind();

        let (index, name) = match disk_index {
            Some(index) => {
                debug!("Updating existing drive device");
                (index, name.map(str::to_string))
            }
            None => {
                info!("Drive device not found, adding new device");
                let unit = match unit_address {
                    Some(u) => u,
                    None => {
                        let devices = self.hardware().find_all_items(
                            None,
                            &[("Parent", ctrl_instance.as_str())],
                            &[],
                            &universe,
                        );
                        let taken: Vec<String> = devices
                            .iter()
                            .filter_map(|&d| {
                                self.hardware().item(d).raw_value("AddressOnParent", None)
                            })
                            .collect();
                        let mut unit = 0u64;
                        while taken.iter().any(|t| t == &unit.to_string()) {
                            unit += 1;
                        }
                        warn!(
                            "New disk address on parent not specified, guessing unit {}",
                            unit
                        );
                        unit
                    }
                };
                let max = match ctrl_kind {
                    Some(ResourceKind::ScsiController) => 15,
                    Some(ResourceKind::IdeController) => 1,
                    _ => u64::MAX,
                };
                if unit > max {
                    return Err(Error::invalid_input(format!(
                        "unit address {} is above the maximum of {} for this controller",
                        unit, max
                    )));
                }
                let default_name = match drive_kind {
                    ResourceKind::Cdrom | ResourceKind::Dvd => "CD-ROM Drive",
                    ResourceKind::Harddisk => "Hard Disk Drive",
                    other => {
                        return Err(Error::invalid_input(format!(
                            "'{}' is not a disk drive type",
                            other.label()
                        )))
                    }
                };
                let index = self.hardware_mut().new_item(drive_kind, None)?;
                let item = self.hardware_mut().item_mut(index);
                item.set_property("AddressOnParent", &unit.to_string(), None)?;
                item.set_property("Parent", &ctrl_instance, None)?;
                (index, Some(name.unwrap_or(default_name).to_string()))
            }
        };

        let host_resource = match (drive_kind, disk_id) {
            (ResourceKind::Harddisk, Some(disk_id)) => format!("ovf:/disk/{}", disk_id),
            _ => format!("ovf:/file/{}", file_id),
        };
        let item = self.hardware_mut().item_mut(index);
        item.set_property("ResourceType", drive_kind.code(), None)?;
        item.set_property("HostResource", &host_resource, None)?;
        if let Some(name) = name {
            item.set_property(names.element_name, &name, None)?;
        }
        if let Some(description) = description {
            item.set_property("Description", description, None)?;
        }
        Ok(index)
    }
}

/// Units a drive can sit at per controller type.
fn controller_capacity(kind: ResourceKind) -> u64 {
    match kind {
        ResourceKind::ScsiController => 16,
        ResourceKind::IdeController => 2,
        _ => u64::MAX,
    }
}

/// Decode a DSP0004 programmatic-units string like `byte * 2^20`.
pub fn parse_alloc_units_multiplier(units: &str) -> Result<u64> {
    let compact: String = units.chars().filter(|c| !c.is_whitespace()).collect();
    if compact == "byte" {
        return Ok(1);
    }
    if let Some(exp) = compact.strip_prefix("byte*2^") {
        let exp: u32 = exp.parse().map_err(|_| {
            Error::invalid_package(format!("bad allocation units '{}'", units))
        })?;
        return 1u64
            .checked_shl(exp)
            .ok_or_else(|| Error::invalid_package(format!("allocation units '{}' overflow", units)));
    }
    // A few non-programmatic spellings show up in older descriptors.
    match compact.to_ascii_lowercase().as_str() {
        "kilobytes" | "kb" => Ok(1 << 10),
        "megabytes" | "mb" => Ok(1 << 20),
        "gigabytes" | "gb" => Ok(1 << 30),
        _ => Err(Error::invalid_package(format!(
            "unrecognized allocation units '{}'",
            units
        ))),
    }
}

/// Express a byte count as (value, units) with the largest power-of-two
/// unit that divides it evenly, to keep descriptor values readable.
pub fn factor_bytes(bytes: u64) -> (u64, &'static str) {
    for (exp, units) in [
        (60u32, "byte * 2^60"),
        (50, "byte * 2^50"),
        (40, "byte * 2^40"),
        (30, "byte * 2^30"),
        (20, "byte * 2^20"),
        (10, "byte * 2^10"),
    ] {
        let unit = 1u64 << exp;
        if bytes > 0 && bytes % unit == 0 {
            return (bytes / unit, units);
        }
    }
    (bytes, "byte")
}

/// RAM of a memory Item in MiB under the given profile set, decoding its
/// AllocationUnits.
pub fn memory_item_mebibytes(item: &LogicalItem, profiles: &ProfileSet) -> Option<u64> {
    let quantity: u64 = item
        .raw_value("VirtualQuantity", Some(profiles))?
        .parse()
        .ok()?;
    let units = item
        .raw_value("AllocationUnits", Some(profiles))
        .unwrap_or_else(|| "byte * 2^20".to_string());
    let multiplier = parse_alloc_units_multiplier(&units).ok()?;
    Some(quantity * multiplier >> 20)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::profile_set;

    const CSR_OVF: &str = include_str!("../../tests/data/csr1000v.ovf");

    fn ovf() -> Ovf {
        Ovf::parse(CSR_OVF.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_host_resource() {
        assert_eq!(
            parse_host_resource("ovf:/disk/vmdisk1"),
            Some(HostResourceRef::Disk("vmdisk1".to_string()))
        );
        assert_eq!(
            parse_host_resource("ovf:/file/file2"),
            Some(HostResourceRef::File("file2".to_string()))
        );
        assert_eq!(
            parse_host_resource("/disk/old"),
            Some(HostResourceRef::Disk("old".to_string()))
        );
        assert_eq!(parse_host_resource("something else"), None);
    }

    #[test]
    fn test_search_from_filename() {
        let ovf = ovf();
        let found = ovf.search_from_filename("csr1000v_harddisk.vmdk");
        assert_eq!(found.file_id.as_deref(), Some("file1"));
        assert_eq!(found.disk_id.as_deref(), Some("vmdisk1"));
        let drive = found.disk_index.unwrap();
        assert_eq!(
            ovf.hardware().item(drive).instance_id().as_deref(),
            Some("6")
        );
        let ctrl = found.ctrl_index.unwrap();
        assert_eq!(
            ovf.hardware().item(ctrl).instance_id().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn test_search_from_filename_cdrom() {
        let ovf = ovf();
        let found = ovf.search_from_filename("config.iso");
        assert_eq!(found.file_id.as_deref(), Some("file2"));
        assert_eq!(found.disk_id, None);
        let drive = found.disk_index.unwrap();
        assert_eq!(
            ovf.hardware().item(drive).resource_kind(),
            Some(ResourceKind::Cdrom)
        );
    }

    #[test]
    fn test_search_missing_file() {
        let ovf = ovf();
        let found = ovf.search_from_filename("README.txt");
        assert!(found.file_id.is_none());
        assert!(found.disk_index.is_none());
    }

    #[test]
    fn test_search_from_controller() {
        let ovf = ovf();
        let found = ovf
            .search_from_controller(ResourceKind::ScsiController, "0:0")
            .unwrap();
        assert_eq!(found.file_id.as_deref(), Some("file1"));
        assert_eq!(found.disk_id.as_deref(), Some("vmdisk1"));

        let empty = ovf
            .search_from_controller(ResourceKind::ScsiController, "0:1")
            .unwrap();
        assert!(empty.ctrl_index.is_some());
        assert!(empty.disk_index.is_none());
    }

    #[test]
    fn test_disk_capacity_bytes() {
        let ovf = ovf();
        assert_eq!(ovf.disk_capacity_bytes("vmdisk1").unwrap(), 8 << 30);
        assert!(ovf.disk_capacity_bytes("nope").is_err());
    }

    #[test]
    fn test_parse_alloc_units() {
        assert_eq!(parse_alloc_units_multiplier("byte").unwrap(), 1);
        assert_eq!(parse_alloc_units_multiplier("byte * 2^20").unwrap(), 1 << 20);
        assert_eq!(parse_alloc_units_multiplier("byte*2^30").unwrap(), 1 << 30);
        assert_eq!(parse_alloc_units_multiplier("MegaBytes").unwrap(), 1 << 20);
        assert!(parse_alloc_units_multiplier("parsec").is_err());
    }

    #[test]
    fn test_factor_bytes() {
        assert_eq!(factor_bytes(8 << 30), (8, "byte * 2^30"));
        assert_eq!(factor_bytes(1536 << 20), (1536, "byte * 2^20"));
        assert_eq!(factor_bytes(1000), (1000, "byte"));
    }

    #[test]
    fn test_memory_item_mebibytes() {
        let ovf = ovf();
        let universe = ovf.config_profiles();
        let mem = ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Memory), &[], &[], &universe)[0];
        let mib = memory_item_mebibytes(
            ovf.hardware().item(mem),
            &profile_set(["1CPU-4GB"]),
        );
        assert_eq!(mib, Some(4096));
    }

    #[test]
    fn test_add_file_entry_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.vmdk");
        std::fs::write(&path, [0u8; 2048]).unwrap();

        let mut ovf = ovf();
        let href = ovf.add_file_entry(&path, "file3", None).unwrap();
        assert_eq!(href, "new.vmdk");
        assert!(ovf.find_file_by_id("file3").is_some());
        assert!(matches!(
            ovf.file_source("new.vmdk"),
            Some(SourceKind::LocalFile(_))
        ));
        assert_eq!(
            ovf.file_hrefs(),
            vec!["csr1000v_harddisk.vmdk", "config.iso", "new.vmdk"]
        );

        ovf.remove_file_entry("file3", None, None).unwrap();
        assert!(ovf.find_file_by_id("file3").is_none());
        assert!(ovf.file_source("new.vmdk").is_none());
    }

    #[test]
    fn test_add_file_entry_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replacement.vmdk");
        std::fs::write(&path, [1u8; 512]).unwrap();

        let mut ovf = ovf();
        let href = ovf.add_file_entry(&path, "file1", None).unwrap();
        assert_eq!(href, "replacement.vmdk");
        // Still exactly one file1, with the new href and size.
        let uri = ovf.ovf_uri();
        let files = ovf.references().unwrap().find_children(uri, "File");
        let matching: Vec<_> = files
            .iter()
            .filter(|f| f.attr(uri, "id") == Some("file1"))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].attr(uri, "size"), Some("512"));
    }

    #[test]
    fn test_remove_file_with_harddisk_drive() {
        let mut ovf = ovf();
        let found = ovf.search_from_filename("csr1000v_harddisk.vmdk");
        ovf.remove_file_entry(
            "file1",
            found.disk_id.as_deref(),
            found.disk_index,
        )
        .unwrap();
        assert!(ovf.find_file_by_id("file1").is_none());
        assert!(ovf.find_disk_by_id("vmdisk1").is_none());
        // Hard disk drive deleted; DiskSection removed with its last Disk.
        assert!(ovf.disk_section().is_none());
        let universe = ovf.config_profiles();
        assert!(ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Harddisk), &[], &[], &universe)
            .is_empty());
    }

    #[test]
    fn test_remove_file_with_cdrom_drive_leaves_empty_drive() {
        let mut ovf = ovf();
        let found = ovf.search_from_filename("config.iso");
        let drive = found.disk_index.unwrap();
        ovf.remove_file_entry("file2", None, Some(drive)).unwrap();
        assert!(ovf.find_file_by_id("file2").is_none());
        // Drive remains, now empty; it becomes the empty drive for
        // config injection.
        assert_eq!(ovf.find_empty_drive(ResourceKind::Cdrom), Some(drive));
    }

    #[test]
    fn test_find_open_controller() {
        let ovf = ovf();
        // SCSI 0 has one drive at unit 0, so unit 1 is free.
        let (ctrl, unit) = ovf
            .find_open_controller(ResourceKind::ScsiController)
            .unwrap()
            .unwrap();
        assert_eq!(
            ovf.hardware().item(ctrl).instance_id().as_deref(),
            Some("3")
        );
        assert_eq!(unit, 1);
    }

    #[test]
    fn test_add_controller_and_disk_device() {
        let mut ovf = ovf();
        // New SCSI controller auto-picks address 1 (0 is taken).
        let ctrl = ovf
            .add_controller_device(ResourceKind::ScsiController, Some("lsilogic"), None, None)
            .unwrap();
        assert_eq!(
            ovf.hardware().item(ctrl).raw_value("Address", None).as_deref(),
            Some("1")
        );

        let disk_id = ovf
            .add_disk_entry(ResourceKind::Harddisk, "file9", 4 << 30, None)
            .unwrap()
            .unwrap();
        assert_eq!(disk_id, "file9");
        let drive = ovf
            .add_disk_device(
                ResourceKind::Harddisk,
                None,
                None,
                Some("second disk"),
                Some(disk_id.as_str()),
                "file9",
                ctrl,
                None,
            )
            .unwrap();
        let item = ovf.hardware().item(drive);
        assert_eq!(
            item.raw_value("HostResource", None).as_deref(),
            Some("ovf:/disk/file9")
        );
        assert_eq!(item.raw_value("AddressOnParent", None).as_deref(), Some("0"));
        // Parent links to the new controller.
        let parent = item.raw_value("Parent", None).unwrap();
        assert_eq!(
            ovf.hardware().item(ctrl).instance_id().as_deref(),
            Some(parent.as_str())
        );
    }

    #[test]
    fn test_add_disk_device_unit_bounds() {
        let mut ovf = ovf();
        let found = ovf.search_from_filename("csr1000v_harddisk.vmdk");
        let ctrl = found.ctrl_index.unwrap();
        let err = ovf
            .add_disk_device(
                ResourceKind::Harddisk,
                Some(99),
                None,
                None,
                Some("vmdisk9"),
                "file9",
                ctrl,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }
}

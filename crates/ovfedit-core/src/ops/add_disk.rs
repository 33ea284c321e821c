//! Add or replace a disk in the package.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Error, Result};
use crate::names::ResourceKind;
use crate::ops::check_for_conflict;
use crate::ovf::Ovf;
use crate::session::Session;

/// Options for the add-disk operation. Everything except the image path is
/// optional and derived automatically when unset.
#[derive(Debug, Clone)]
pub struct AddDiskOptions {
    /// Local disk image to copy into the package at write time. Format
    /// conversion (if the image is not already suitable) is the caller's
    /// job, via external helper tools.
    pub disk_image: PathBuf,
    /// `cdrom` or `harddisk`; guessed from the file extension when unset.
    pub drive_type: Option<ResourceKind>,
    pub file_id: Option<String>,
    /// Controller kind (`ide`/`scsi`/`sata`); platform default when unset.
    pub controller: Option<ResourceKind>,
    /// Controller subtype such as `lsilogic` or `virtio`.
    pub subtype: Option<String>,
    /// Device address as `controller:unit`, e.g. `0:1`.
    pub address: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Disk capacity in bytes; defaults to the image file size.
    pub capacity: Option<u64>,
}

impl AddDiskOptions {
    pub fn new(disk_image: impl Into<PathBuf>) -> Self {
        Self {
            disk_image: disk_image.into(),
            drive_type: None,
            file_id: None,
            controller: None,
            subtype: None,
            address: None,
            name: None,
            description: None,
            capacity: None,
        }
    }
}

/// Guess a drive type from a disk image filename.
fn guess_drive_type(path: &Path) -> Result<ResourceKind> {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("iso") => Ok(ResourceKind::Cdrom),
        Some("vmdk") | Some("raw") | Some("img") | Some("qcow2") => Ok(ResourceKind::Harddisk),
        _ => Err(Error::invalid_input(format!(
            "unable to guess disk drive type from filename '{}'; specify it explicitly",
            path.display()
        ))),
    }
}

/// Add the disk image to the package, wiring up File, Disk, controller,
/// and drive device entries.
pub fn run(ovf: &mut Ovf, options: &AddDiskOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    if !options.disk_image.is_file() {
        return Err(Error::invalid_input(format!(
            "'{}' is not a file",
            options.disk_image.display()
        )));
    }
    let drive_type = match options.drive_type {
        Some(kind) if matches!(kind, ResourceKind::Cdrom | ResourceKind::Harddisk) => kind,
        Some(kind) => {
            return Err(Error::invalid_input(format!(
                "'{}' is not a disk drive type",
                kind.label()
            )))
        }
        None => {
            let guessed = guess_drive_type(&options.disk_image)?;
            warn!(
                "New disk drive type not specified, guessing it should be '{}' \
                 based on file extension",
                guessed.label()
            );
            guessed
        }
    };
    if let Some(controller) = options.controller {
        if !controller.is_controller() {
            return Err(Error::invalid_input(format!(
                "'{}' is not a disk controller type",
                controller.label()
            )));
        }
    }

    let filename = options
        .disk_image
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            Error::invalid_input(format!("'{}' has no file name", options.disk_image.display()))
        })?;

    // Three independent lookups that must agree on what, if anything, is
    // being replaced.
    let by_name = ovf.search_from_filename(&filename);
    let by_id = options
        .file_id
        .as_ref()
        .map(|id| ovf.search_from_file_id(id));
    let by_address = match (&options.controller, &options.address) {
        (Some(controller), Some(address)) => {
            Some(ovf.search_from_controller(*controller, address)?)
        }
        _ => None,
    };

    let file_id = check_for_conflict(
        "file to overwrite",
        &[
            by_name.file_id.clone(),
            by_id.as_ref().and_then(|s| s.file_id.clone()),
            by_address.as_ref().and_then(|s| s.file_id.clone()),
        ],
    )?;
    let disk_id = check_for_conflict(
        "disk to overwrite",
        &[
            by_name.disk_id.clone(),
            by_id.as_ref().and_then(|s| s.disk_id.clone()),
            by_address.as_ref().and_then(|s| s.disk_id.clone()),
        ],
    )?;
    let disk_index = check_for_conflict(
        "drive device to overwrite",
        &[
            by_name.disk_index,
            by_id.as_ref().and_then(|s| s.disk_index),
            by_address.as_ref().and_then(|s| s.disk_index),
        ],
    )?;
    let mut ctrl_index = check_for_conflict(
        "controller for the disk",
        &[
            by_name.ctrl_index,
            by_id.as_ref().and_then(|s| s.ctrl_index),
            by_address.as_ref().and_then(|s| s.ctrl_index),
        ],
    )?;

    // Pick the controller kind: explicit option, the found controller's
    // own kind, or the platform default for this drive type.
    let controller = match options.controller {
        Some(kind) => {
            if let Some(idx) = ctrl_index {
                let found = ovf.hardware().item(idx).resource_kind();
                if found != Some(kind) {
                    return Err(Error::invalid_input(format!(
                        "disk is attached to a {} controller but '{}' was requested",
                        found.map(|k| k.label()).unwrap_or("unknown"),
                        kind.label()
                    )));
                }
            }
            kind
        }
        None => match ctrl_index {
            Some(idx) => ovf
                .hardware()
                .item(idx)
                .resource_kind()
                .filter(|k| k.is_controller())
                .ok_or_else(|| {
                    Error::invalid_package("existing drive's parent is not a controller")
                })?,
            None => {
                let kind = ovf.platform().controller_type_for(drive_type);
                info!(
                    "Controller type not specified - using platform default '{}'",
                    kind.label()
                );
                kind
            }
        },
    };

    // With no specific controller requested, reuse any existing one with a
    // free slot.
    let mut ctrl_address: Option<u64> = None;
    let mut unit_address: Option<u64> = None;
    if let Some(address) = &options.address {
        let (ctrl, unit) = address.split_once(':').ok_or_else(|| {
            Error::invalid_input(format!(
                "device address '{}' must have the form 'controller:unit'",
                address
            ))
        })?;
        ctrl_address = Some(ctrl.parse().map_err(|_| {
            Error::invalid_input(format!("'{}' is not a valid controller number", ctrl))
        })?);
        unit_address = Some(unit.parse().map_err(|_| {
            Error::invalid_input(format!("'{}' is not a valid unit number", unit))
        })?);
    } else if ctrl_index.is_none() {
        if let Some((idx, unit)) = ovf.find_open_controller(controller)? {
            ctrl_index = Some(idx);
            unit_address = Some(unit);
        }
    }

    // Confirmation points before anything is touched.
    if file_id.is_some() {
        session.confirm_or_fail(&format!(
            "A file already exists for '{}' in the package. Overwrite it?",
            filename
        ))?;
    }
    if let Some(disk_id) = &disk_id {
        session.confirm_or_fail(&format!(
            "A disk entry '{}' already exists. Overwrite it?",
            disk_id
        ))?;
    }
    if disk_index.is_some() {
        session.confirm_or_fail("An existing drive device will be overwritten. Continue?")?;
    }

    let file_id = file_id
        .or_else(|| options.file_id.clone())
        .unwrap_or_else(|| filename.clone());

    // File entry first, ordered against any existing Disk.
    ovf.add_file_entry(&options.disk_image, &file_id, disk_id.as_deref())?;

    // Then the Disk entry.
    let capacity = match options.capacity {
        Some(capacity) => capacity,
        None => {
            std::fs::metadata(&options.disk_image)
                .map_err(|e| Error::io(e, &options.disk_image))?
                .len()
        }
    };
    let disk_id = ovf.add_disk_entry(drive_type, &file_id, capacity, disk_id.as_deref())?;

    // The controller, reusing the common subtype when creating one fresh.
    let subtype = match (&options.subtype, ctrl_index) {
        (Some(subtype), _) => Some(subtype.clone()),
        (None, None) => {
            let universe = ovf.config_profiles();
            ovf.hardware().common_subtype(controller, &universe)
        }
        (None, Some(_)) => None,
    };
    let ctrl_index =
        ovf.add_controller_device(controller, subtype.as_deref(), ctrl_address, ctrl_index)?;

    // Finally the drive device itself.
    ovf.add_disk_device(
        drive_type,
        unit_address,
        options.name.as_deref(),
        options.description.as_deref(),
        disk_id.as_deref(),
        &file_id,
        ctrl_index,
        disk_index,
    )?;
    info!(
        "Added {} '{}' as file ID '{}'",
        drive_type.label(),
        filename,
        file_id
    );
    Ok(())
}

//! Embed a bootstrap configuration disk into the package.
//!
//! The configuration image itself (ISO or disk image carrying the config
//! text files) is built by the caller with external tooling; this
//! operation places it where the guest platform expects it: overwriting a
//! previously injected config disk, or filling an empty drive of the
//! platform's bootstrap type.

use std::path::PathBuf;

use log::info;

use crate::error::{Error, Result};
use crate::ops::add_disk::{self, AddDiskOptions};
use crate::ovf::Ovf;
use crate::session::Session;

/// Options for the inject-config operation.
#[derive(Debug, Clone)]
pub struct InjectConfigOptions {
    /// The prepared configuration image (ISO for CD-ROM platforms, disk
    /// image for hard-disk platforms).
    pub config_image: PathBuf,
}

/// Inject the configuration image into the package.
pub fn run(ovf: &mut Ovf, options: &InjectConfigOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    if !options.config_image.is_file() {
        return Err(Error::invalid_input(format!(
            "'{}' is not a file",
            options.config_image.display()
        )));
    }
    let platform = ovf.platform();
    let disk_type = platform.bootstrap_disk_type();
    let target_name = disk_type.image_name();
    info!(
        "Platform {} takes bootstrap configuration on a {} as '{}'",
        platform.name(),
        disk_type.drive_kind().label(),
        target_name
    );

    // Overwrite a previously injected config disk if one exists; otherwise
    // find an empty drive of the right type to fill.
    let found = ovf.search_from_filename(target_name);
    let (file_id, drive_index) = match &found.file_id {
        Some(file_id) => {
            session.confirm_or_fail(&format!(
                "Existing configuration disk '{}' found. Continue and overwrite it?",
                file_id
            ))?;
            info!("Overwriting existing config disk '{}'", file_id);
            (Some(file_id.clone()), found.disk_index)
        }
        None => {
            let drive = ovf.find_empty_drive(disk_type.drive_kind()).ok_or_else(|| {
                Error::not_found(format!(
                    "could not find an empty {} drive to inject the config into",
                    disk_type.drive_kind().label()
                ))
            })?;
            (None, Some(drive))
        }
    };
    let drive_index = drive_index.ok_or_else(|| {
        Error::not_found("configuration file found but no drive device maps it")
    })?;
    let (controller, address) = ovf.find_device_location(drive_index)?;

    // Stage the image in the scratch directory under its canonical name,
    // then reuse the add-disk machinery to wire it in.
    let staged = session.working_dir().join(target_name);
    std::fs::copy(&options.config_image, &staged)
        .map_err(|e| Error::io(e, &options.config_image))?;

    let add_options = AddDiskOptions {
        disk_image: staged,
        drive_type: Some(disk_type.drive_kind()),
        file_id,
        controller: Some(controller),
        subtype: None,
        address: Some(address),
        name: None,
        description: Some("Configuration disk".to_string()),
        capacity: None,
    };
    add_disk::run(ovf, &add_options, session)
}

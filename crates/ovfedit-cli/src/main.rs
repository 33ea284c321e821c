//! ovfedit CLI - edit OVF/OVA virtual appliance packages.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use ovfedit_core::ops::{
    add_disk, add_file, edit_hardware, edit_product, edit_properties, info, inject_config,
    open_package, remove_file,
};
use ovfedit_core::{Error, PackageForm, ResourceKind, Session};

/// Edit OVF and OVA virtual appliance packages.
#[derive(Parser)]
#[command(name = "ovfedit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Auto-confirm all warnings instead of prompting.
    #[arg(long, global = true)]
    force: bool,

    /// Only print warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Increase verbosity.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print debugging output.
    #[arg(short = 'd', long, global = true)]
    debug: bool,
}

/// Arguments shared by every editing subcommand.
#[derive(Args)]
struct PackageArgs {
    /// OVF descriptor or OVA file to edit.
    package: PathBuf,

    /// Write to this path instead of overwriting the input.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Display information about an OVF/OVA package.
    Info {
        /// OVF descriptor or OVA file to inspect.
        package: PathBuf,

        /// Show a one-screen summary only.
        #[arg(short, long, conflicts_with = "verbose")]
        brief: bool,
    },

    /// Add a disk image to the package.
    AddDisk {
        /// Disk image file to add.
        disk_image: PathBuf,

        #[command(flatten)]
        package: PackageArgs,

        /// Disk drive type.
        #[arg(short = 't', long, value_enum)]
        drive_type: Option<DriveTypeArg>,

        /// File ID to assign (defaults to the image's filename).
        #[arg(short = 'i', long)]
        file_id: Option<String>,

        /// Controller type to attach to.
        #[arg(short, long, value_enum)]
        controller: Option<ControllerArg>,

        /// Controller subtype, such as "lsilogic" or "virtio".
        #[arg(short, long)]
        subtype: Option<String>,

        /// Device address as controller:unit, e.g. "0:1".
        #[arg(short, long)]
        address: Option<String>,

        /// Device name.
        #[arg(short, long)]
        name: Option<String>,

        /// Device description.
        #[arg(short = 'D', long)]
        description: Option<String>,
    },

    /// Add a plain file to the package.
    AddFile {
        /// File to add.
        file: PathBuf,

        #[command(flatten)]
        package: PackageArgs,

        /// File ID to assign (defaults to the filename).
        #[arg(short = 'i', long)]
        file_id: Option<String>,
    },

    /// Remove a file from the package.
    RemoveFile {
        /// Stored filename to remove.
        #[arg(short = 'f', long = "file-path")]
        file_path: Option<String>,

        /// File ID to remove.
        #[arg(short = 'i', long)]
        file_id: Option<String>,

        #[command(flatten)]
        package: PackageArgs,
    },

    /// Edit virtual hardware: CPUs, memory, NICs, networks, serial ports.
    EditHardware {
        #[command(flatten)]
        package: PackageArgs,

        /// Configuration profile(s) to edit (default: all).
        #[arg(short, long = "profile")]
        profiles: Vec<String>,

        /// Delete all profiles other than those given with --profile.
        #[arg(long)]
        delete_all_other_profiles: bool,

        /// Number of CPUs.
        #[arg(short, long)]
        cpus: Option<u64>,

        /// RAM amount, e.g. "4096", "4096M", or "8GB".
        #[arg(short, long)]
        memory: Option<String>,

        /// Number of NICs.
        #[arg(short, long)]
        nics: Option<usize>,

        /// NIC device type(s).
        #[arg(long = "nic-type")]
        nic_types: Vec<String>,

        /// Network names to map NICs to ("{N}" wildcard supported).
        #[arg(short = 'N', long = "nic-network")]
        nic_networks: Vec<String>,

        /// Network descriptions ("{N}" wildcard supported).
        #[arg(long = "network-description")]
        network_descriptions: Vec<String>,

        /// NIC device names ("{N}" wildcard supported).
        #[arg(long = "nic-name")]
        nic_names: Vec<String>,

        /// NIC MAC addresses.
        #[arg(short = 'M', long = "mac-address")]
        mac_addresses: Vec<String>,

        /// Number of serial ports.
        #[arg(short = 'S', long)]
        serial_ports: Option<usize>,

        /// Serial connectivity URIs such as "telnet://localhost:9101".
        #[arg(long = "serial-connectivity")]
        serial_connectivity: Vec<String>,

        /// SCSI controller subtype(s).
        #[arg(long = "scsi-subtype")]
        scsi_subtypes: Vec<String>,

        /// IDE controller subtype(s).
        #[arg(long = "ide-subtype")]
        ide_subtypes: Vec<String>,

        /// Virtual system type(s), e.g. "vmx-08".
        #[arg(long = "virtual-system-type")]
        virtual_system_type: Vec<String>,
    },

    /// Edit product information.
    EditProduct {
        #[command(flatten)]
        package: PackageArgs,

        /// Product name.
        #[arg(short, long)]
        product: Option<String>,

        /// Vendor name.
        #[arg(long)]
        vendor: Option<String>,

        /// Short version string.
        #[arg(long = "version")]
        version_short: Option<String>,

        /// Full version string.
        #[arg(long = "full-version")]
        version_long: Option<String>,

        /// Product URL.
        #[arg(long)]
        product_url: Option<String>,

        /// Vendor URL.
        #[arg(long)]
        vendor_url: Option<String>,

        /// Application URL.
        #[arg(long)]
        application_url: Option<String>,

        /// Product class, e.g. "com.cisco.csr1000v".
        #[arg(long)]
        product_class: Option<String>,
    },

    /// Edit environment properties.
    EditProperties {
        #[command(flatten)]
        package: PackageArgs,

        /// Property to set, as key[=value][+type]. Repeatable.
        #[arg(short, long = "properties", value_name = "KEY[=VALUE][+TYPE]")]
        properties: Vec<String>,

        /// Labels, parallel to --properties.
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Descriptions, parallel to --properties.
        #[arg(short = 'D', long = "description")]
        descriptions: Vec<String>,

        /// Mark the edited properties as user-configurable (or not).
        #[arg(short, long)]
        user_configurable: Option<bool>,

        /// Environment transport(s): iso, vmware, ibm, or a full value.
        #[arg(short, long = "transport")]
        transports: Vec<String>,
    },

    /// Inject a prepared bootstrap configuration image.
    InjectConfig {
        /// The configuration image (ISO or disk image) to embed.
        config_image: PathBuf,

        #[command(flatten)]
        package: PackageArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriveTypeArg {
    Cdrom,
    Harddisk,
}

impl From<DriveTypeArg> for ResourceKind {
    fn from(arg: DriveTypeArg) -> Self {
        match arg {
            DriveTypeArg::Cdrom => ResourceKind::Cdrom,
            DriveTypeArg::Harddisk => ResourceKind::Harddisk,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ControllerArg {
    Ide,
    Scsi,
    Sata,
}

impl From<ControllerArg> for ResourceKind {
    fn from(arg: ControllerArg) -> Self {
        match arg {
            ControllerArg::Ide => ResourceKind::IdeController,
            ControllerArg::Scsi => ResourceKind::ScsiController,
            ControllerArg::Sata => ResourceKind::SataController,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

/// Map errors to the documented exit codes: 1 for user errors, 2 for
/// environmental failures, 3 for internal errors.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(core) if core.is_user_error() => 1,
        Some(Error::Internal { .. }) => 3,
        Some(_) => 2,
        None => 2,
    }
}

fn make_session(cli: &Cli) -> Result<Session> {
    let mut session = Session::new()?.with_force(cli.force);
    if !cli.force && !cli.quiet {
        session = session.with_confirm(Box::new(prompt_confirm));
    }
    Ok(session)
}

/// Ask the user a yes/no question on the terminal.
fn prompt_confirm(message: &str) -> bool {
    eprintln!("{}", message);
    loop {
        eprint!("Continue? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return true,
            "" | "n" | "no" => return false,
            _ => eprintln!("Please answer 'y' or 'n'."),
        }
    }
}

/// Parse a memory size argument into MiB. A bare number is taken as MiB.
fn parse_memory_mb(value: &str) -> Result<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid memory amount '{}'", value))?;
    let mib = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "M" | "MB" | "MIB" => amount,
        "G" | "GB" | "GIB" => amount * 1024,
        "T" | "TB" | "TIB" => amount * 1024 * 1024,
        other => anyhow::bail!("unknown memory unit '{}' in '{}'", other, value),
    };
    Ok(mib)
}

/// Run an edit against a package, then write it back out.
fn edit_and_write<F>(cli: &Cli, package_args: &PackageArgs, edit: F) -> Result<()>
where
    F: FnOnce(&mut ovfedit_core::Ovf, &Session) -> ovfedit_core::Result<()>,
{
    let session = make_session(cli)?;
    let (package, mut ovf) = open_package(&package_args.package)?;
    edit(&mut ovf, &session)?;
    let target = package_args
        .output
        .clone()
        .unwrap_or_else(|| package_args.package.to_path_buf());
    let form = match package.form() {
        _ if target.extension().is_some_and(|e| e == "ova" || e == "box") => PackageForm::Tar,
        _ if target.extension().is_some_and(|e| e == "ovf") => PackageForm::Directory,
        form => form,
    };
    ovf.write(&package, &target, Some(form), &session)?;
    Ok(())
}

fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Info { package, brief } => {
            let (package, ovf) = open_package(package)?;
            let verbosity = if *brief {
                info::Verbosity::Brief
            } else if cli.verbose {
                info::Verbosity::Verbose
            } else {
                info::Verbosity::Normal
            };
            print!("{}", info::info_string(&package, &ovf, verbosity)?);
            Ok(())
        }

        Commands::AddDisk {
            disk_image,
            package,
            drive_type,
            file_id,
            controller,
            subtype,
            address,
            name,
            description,
        } => edit_and_write(cli, package, |ovf, session| {
            let options = add_disk::AddDiskOptions {
                disk_image: disk_image.clone(),
                drive_type: drive_type.map(Into::into),
                file_id: file_id.clone(),
                controller: controller.map(Into::into),
                subtype: subtype.clone(),
                address: address.clone(),
                name: name.clone(),
                description: description.clone(),
                capacity: None,
            };
            add_disk::run(ovf, &options, session)
        }),

        Commands::AddFile {
            file,
            package,
            file_id,
        } => edit_and_write(cli, package, |ovf, session| {
            let options = add_file::AddFileOptions {
                file: file.clone(),
                file_id: file_id.clone(),
            };
            add_file::run(ovf, &options, session)
        }),

        Commands::RemoveFile {
            file_path,
            file_id,
            package,
        } => edit_and_write(cli, package, |ovf, session| {
            let options = remove_file::RemoveFileOptions {
                file_path: file_path.clone(),
                file_id: file_id.clone(),
            };
            remove_file::run(ovf, &options, session)
        }),

        Commands::EditHardware {
            package,
            profiles,
            delete_all_other_profiles,
            cpus,
            memory,
            nics,
            nic_types,
            nic_networks,
            network_descriptions,
            nic_names,
            mac_addresses,
            serial_ports,
            serial_connectivity,
            scsi_subtypes,
            ide_subtypes,
            virtual_system_type,
        } => {
            let memory_mb = memory.as_deref().map(parse_memory_mb).transpose()?;
            edit_and_write(cli, package, |ovf, session| {
                let options = edit_hardware::EditHardwareOptions {
                    profiles: (!profiles.is_empty()).then(|| profiles.clone()),
                    delete_all_other_profiles: *delete_all_other_profiles,
                    cpus: *cpus,
                    memory_mb,
                    nics: *nics,
                    nic_types: nic_types.clone(),
                    nic_networks: nic_networks.clone(),
                    network_descriptions: network_descriptions.clone(),
                    nic_names: nic_names.clone(),
                    mac_addresses: mac_addresses.clone(),
                    serial_ports: *serial_ports,
                    serial_connectivity: serial_connectivity.clone(),
                    scsi_subtypes: scsi_subtypes.clone(),
                    ide_subtypes: ide_subtypes.clone(),
                    virtual_system_type: (!virtual_system_type.is_empty())
                        .then(|| virtual_system_type.clone()),
                };
                edit_hardware::run(ovf, &options, session)
            })
        }

        Commands::EditProduct {
            package,
            product,
            vendor,
            version_short,
            version_long,
            product_url,
            vendor_url,
            application_url,
            product_class,
        } => edit_and_write(cli, package, |ovf, session| {
            let options = edit_product::EditProductOptions {
                product: product.clone(),
                vendor: vendor.clone(),
                version_short: version_short.clone(),
                version_long: version_long.clone(),
                product_url: product_url.clone(),
                vendor_url: vendor_url.clone(),
                application_url: application_url.clone(),
                product_class: product_class.clone(),
            };
            edit_product::run(ovf, &options, session)
        }),

        Commands::EditProperties {
            package,
            properties,
            labels,
            descriptions,
            user_configurable,
            transports,
        } => {
            let specs = properties
                .iter()
                .map(|p| edit_properties::parse_property_arg(p))
                .collect::<ovfedit_core::Result<Vec<_>>>()?;
            edit_and_write(cli, package, |ovf, session| {
                let options = edit_properties::EditPropertiesOptions {
                    properties: specs,
                    labels: labels.clone(),
                    descriptions: descriptions.clone(),
                    user_configurable: *user_configurable,
                    transports: transports.clone(),
                };
                edit_properties::run(ovf, &options, session)
            })
        }

        Commands::InjectConfig {
            config_image,
            package,
        } => edit_and_write(cli, package, |ovf, session| {
            let options = inject_config::InjectConfigOptions {
                config_image: config_image.clone(),
            };
            inject_config::run(ovf, &options, session)
        }),
    }
}

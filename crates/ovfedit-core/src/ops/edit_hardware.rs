//! Edit virtual hardware: CPUs, memory, NICs, networks, serial ports,
//! controllers, and configuration profiles.

use log::{info, warn};

use crate::error::Result;
use crate::hardware::{profile_set, Profile, ProfileSet};
use crate::names::ResourceKind;
use crate::ovf::Ovf;
use crate::session::Session;
use crate::validation::{expand_list_wildcard, guess_list_wildcard};

/// Options for the edit-hardware operation. Unset fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct EditHardwareOptions {
    /// Profiles to scope the edits to; `None` applies everywhere.
    pub profiles: Option<Vec<String>>,
    /// Remove every profile not named in `profiles`.
    pub delete_all_other_profiles: bool,
    pub cpus: Option<u64>,
    /// RAM in MiB.
    pub memory_mb: Option<u64>,
    pub nics: Option<usize>,
    /// NIC device type(s); multiple values form a space-separated list.
    pub nic_types: Vec<String>,
    /// Network names for NICs, with `{N}` wildcard support.
    pub nic_networks: Vec<String>,
    /// Network descriptions, with `{N}` wildcard support.
    pub network_descriptions: Vec<String>,
    /// NIC device names, with `{N}` wildcard support.
    pub nic_names: Vec<String>,
    pub mac_addresses: Vec<String>,
    pub serial_ports: Option<usize>,
    /// Serial connectivity URIs such as `telnet://localhost:9101`.
    pub serial_connectivity: Vec<String>,
    pub scsi_subtypes: Vec<String>,
    pub ide_subtypes: Vec<String>,
    pub virtual_system_type: Option<Vec<String>>,
}

/// Mutable working state shared by the helper passes.
struct EditContext<'a> {
    options: &'a EditHardwareOptions,
    /// Resolved NIC networks (may be inferred from existing names).
    nic_networks: Option<Vec<String>>,
    network_descriptions: Option<Vec<String>>,
}

/// Apply hardware edits to the descriptor.
pub fn run(ovf: &mut Ovf, options: &EditHardwareOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    let mut ctx = EditContext {
        options,
        nic_networks: (!options.nic_networks.is_empty()).then(|| options.nic_networks.clone()),
        network_descriptions: (!options.network_descriptions.is_empty())
            .then(|| options.network_descriptions.clone()),
    };

    update_profiles(ovf, options, session)?;
    session.check_cancelled()?;

    if let Some(types) = &options.virtual_system_type {
        ovf.set_system_types(types)?;
    }
    if let Some(cpus) = options.cpus {
        set_cpu_count(ovf, cpus, options, session)?;
    }
    if let Some(memory_mb) = options.memory_mb {
        set_memory(ovf, memory_mb, options, session)?;
    }
    session.check_cancelled()?;

    infer_networks_from_nics(ovf, &mut ctx);
    update_nics(ovf, options, session)?;
    update_networks(ovf, &mut ctx, session)?;
    // NIC names go last so network-induced display-name changes don't
    // clobber user-requested names.
    update_nic_names(ovf, options)?;
    update_serial(ovf, options, session)?;

    if !options.scsi_subtypes.is_empty() {
        set_controller_subtypes(
            ovf,
            ResourceKind::ScsiController,
            &options.scsi_subtypes,
            options,
        )?;
    }
    if !options.ide_subtypes.is_empty() {
        set_controller_subtypes(
            ovf,
            ResourceKind::IdeController,
            &options.ide_subtypes,
            options,
        )?;
    }
    Ok(())
}

/// The scoping profile list, or `None` for "everywhere".
fn profile_list(options: &EditHardwareOptions) -> Option<Vec<Profile>> {
    options
        .profiles
        .as_ref()
        .map(|ids| ids.iter().map(|id| Profile::id(id.clone())).collect())
}

/// The scoping profile set for value edits, or `None` for "everywhere".
fn profile_value_set(options: &EditHardwareOptions) -> Option<ProfileSet> {
    options
        .profiles
        .as_ref()
        .map(|ids| profile_set(ids.iter().cloned()))
}

fn update_profiles(
    ovf: &mut Ovf,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    if let Some(profiles) = &options.profiles {
        if options.virtual_system_type.is_some() {
            session.confirm_or_fail(
                "VirtualSystemType is not filtered by configuration profile; the requested \
                 system type will apply to ALL profiles. Continue?",
            )?;
        }
        if !options.network_descriptions.is_empty() {
            session.confirm_or_fail(
                "Network descriptions are not filtered by configuration profile; they will \
                 apply to networks across ALL profiles. Continue?",
            )?;
        }
        let existing = ovf.config_profiles();
        for profile in profiles {
            if !existing.iter().any(|p| p == profile) {
                session.confirm_or_fail(&format!(
                    "Profile '{}' does not exist. Create it?",
                    profile
                ))?;
                ovf.create_configuration_profile(profile, profile, profile)?;
            }
        }
    }

    if options.delete_all_other_profiles {
        delete_other_profiles(ovf, options, session)?;
    }
    Ok(())
}

fn delete_other_profiles(
    ovf: &mut Ovf,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    let keep: Vec<String> = options.profiles.clone().unwrap_or_default();
    if keep.is_empty() {
        session.confirm_or_fail(
            "--delete-all-other-profiles was given without --profile. Really delete ALL \
             configuration profiles?",
        )?;
    }
    let to_delete: Vec<String> = ovf
        .config_profiles()
        .into_iter()
        .filter(|p| !keep.iter().any(|k| k == p))
        .collect();
    for profile in to_delete {
        if !keep.is_empty() && !session.confirm(&format!("Delete profile {}?", profile)) {
            info!("Skipping deletion of profile {}", profile);
            continue;
        }
        ovf.delete_configuration_profile(&profile)?;
    }
    // Drop attribute entries that no longer cover a surviving profile and
    // relabel full coverage back to the unscoped form; items left with no
    // identity at all disappear.
    let universe = ovf.config_profiles();
    for idx in 0..ovf.hardware().len() {
        ovf.hardware_mut().item_mut(idx).retain_profiles(&universe)?;
    }
    for idx in (0..ovf.hardware().len()).rev() {
        if ovf.hardware().item(idx).instance_id().is_none() {
            ovf.hardware_mut().delete_item(idx);
        }
    }
    Ok(())
}

fn set_cpu_count(
    ovf: &mut Ovf,
    cpus: u64,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    if let Err(msg) = ovf.platform().check_cpu_count(cpus) {
        session.confirm_or_fail(&msg)?;
    }
    let universe = ovf.config_profiles();
    let profiles = profile_value_set(options);
    ovf.hardware_mut().set_value_for_all_items(
        ResourceKind::Cpu,
        "VirtualQuantity",
        &cpus.to_string(),
        profiles.as_ref(),
        true,
        &universe,
    )
}

fn set_memory(
    ovf: &mut Ovf,
    memory_mb: u64,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    if let Err(msg) = ovf.platform().check_memory_amount(memory_mb) {
        session.confirm_or_fail(&msg)?;
    }
    let universe = ovf.config_profiles();
    let profiles = profile_value_set(options);
    ovf.hardware_mut().set_value_for_all_items(
        ResourceKind::Memory,
        "VirtualQuantity",
        &memory_mb.to_string(),
        profiles.as_ref(),
        true,
        &universe,
    )?;
    ovf.hardware_mut().set_value_for_all_items(
        ResourceKind::Memory,
        "AllocationUnits",
        "byte * 2^20",
        profiles.as_ref(),
        false,
        &universe,
    )
}

/// When adding NICs with no explicit network list, try to infer a naming
/// pattern from the existing one-network-per-NIC layout and extend it.
fn infer_networks_from_nics(ovf: &Ovf, ctx: &mut EditContext<'_>) {
    let Some(requested) = ctx.options.nics else {
        return;
    };
    if ctx.nic_networks.is_some() {
        return;
    }
    let universe = ovf.config_profiles();
    let profiles = profile_list(ctx.options).unwrap_or_else(|| {
        crate::hardware::default_profile_list(&universe)
    });
    let current = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Ethernet, &profiles, &universe)
        .values()
        .copied()
        .max()
        .unwrap_or(0);
    if requested <= current || current < 2 {
        return;
    }
    let networks = ovf.networks();
    if networks.len() != current {
        return;
    }
    info!(
        "All existing NICs are mapped to unique networks; looking for an implicit \
         pattern for creating new networks"
    );
    match guess_list_wildcard(&networks) {
        Some(pattern) => {
            info!("Identified a network name pattern: {:?}", pattern);
            ctx.nic_networks = Some(pattern);
        }
        None => info!(
            "No pattern could be identified from existing network names {:?}",
            networks
        ),
    }
    if ctx.network_descriptions.is_none() {
        if let Some(pattern) = guess_list_wildcard(&ovf.network_descriptions()) {
            info!("Identified a description pattern: {:?}", pattern);
            ctx.network_descriptions = Some(pattern);
        }
    }
}

fn update_nics(
    ovf: &mut Ovf,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    let universe = ovf.config_profiles();
    let profiles = profile_list(options);

    if let Some(nics) = options.nics {
        if let Err(msg) = ovf.platform().check_nic_count(nics as u64) {
            session.confirm_or_fail(&msg)?;
        }
        let count_profiles = profiles
            .clone()
            .unwrap_or_else(|| crate::hardware::default_profile_list(&universe));
        let counts = ovf.hardware().item_count_per_profile(
            ResourceKind::Ethernet,
            &count_profiles,
            &universe,
        );
        for (profile, count) in &counts {
            if nics < *count {
                session.confirm_or_fail(&format!(
                    "Profile {} currently has {} NIC(s). Delete {} to reduce to {} total?",
                    profile,
                    count,
                    count - nics,
                    nics
                ))?;
            }
        }
        let platform = ovf.platform();
        ovf.hardware_mut().set_item_count_per_profile(
            ResourceKind::Ethernet,
            nics,
            profiles.as_deref(),
            &universe,
            platform,
        )?;
    }

    if !options.nic_types.is_empty() {
        for nic_type in &options.nic_types {
            if let Err(msg) = ovf.platform().check_nic_type(nic_type) {
                session.confirm_or_fail(&msg)?;
            }
        }
        let value = options.nic_types.join(" ");
        let value_profiles = profile_value_set(options);
        ovf.hardware_mut().set_value_for_all_items(
            ResourceKind::Ethernet,
            "ResourceSubType",
            &value,
            value_profiles.as_ref(),
            false,
            &universe,
        )?;
    }

    if !options.mac_addresses.is_empty() {
        ovf.hardware_mut().set_item_values_per_profile(
            ResourceKind::Ethernet,
            "Address",
            &options.mac_addresses,
            profiles.as_deref(),
            None,
            &universe,
        )?;
    }
    Ok(())
}

fn update_networks(
    ovf: &mut Ovf,
    ctx: &mut EditContext<'_>,
    session: &Session,
) -> Result<()> {
    let universe = ovf.config_profiles();
    let profiles = profile_list(ctx.options);
    let count_profiles = profiles
        .clone()
        .unwrap_or_else(|| crate::hardware::default_profile_list(&universe));
    let max_nics = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Ethernet, &count_profiles, &universe)
        .values()
        .copied()
        .max()
        .unwrap_or(0);
    let existing_networks = ovf.networks();

    // NICs with no Connection are not valid, so a VM that just gained its
    // first NICs needs at least one network.
    if max_nics > 0 && existing_networks.is_empty() && ctx.nic_networks.is_none() {
        warn!(
            "No network names specified, but NICs must be mapped to a network. \
             Will add network 'VM Network'."
        );
        ctx.nic_networks = Some(vec!["VM Network".to_string()]);
    }

    let mut new_descs = ctx
        .network_descriptions
        .as_ref()
        .map(|d| expand_list_wildcard(d, max_nics, false))
        .unwrap_or_default();

    if ctx.nic_networks.is_none() {
        if !new_descs.is_empty() {
            // Only re-describing existing networks.
            for (network, desc) in ovf.networks().into_iter().zip(new_descs) {
                ovf.create_network(&network, Some(desc.as_str()));
            }
        }
        return Ok(());
    }

    let new_networks =
        expand_list_wildcard(ctx.nic_networks.as_ref().unwrap(), max_nics, false);
    for network in &new_networks {
        let desc = if new_descs.is_empty() {
            None
        } else {
            Some(new_descs.remove(0))
        };
        if !ovf.networks().iter().any(|n| n == network) {
            session.confirm_or_fail(&format!(
                "Network {} is not currently defined. Create it?",
                network
            ))?;
        }
        ovf.create_network(network, desc.as_deref());
    }

    // Map NICs to the networks: the Nth NIC takes the Nth name, with the
    // final name covering any remaining NICs.
    if let Some(default) = new_networks.last().cloned() {
        ovf.hardware_mut().set_item_values_per_profile(
            ResourceKind::Ethernet,
            "Connection",
            &new_networks,
            profiles.as_deref(),
            Some(default.as_str()),
            &universe,
        )?;
    }
    Ok(())
}

fn update_nic_names(ovf: &mut Ovf, options: &EditHardwareOptions) -> Result<()> {
    if options.nic_names.is_empty() {
        return Ok(());
    }
    let universe = ovf.config_profiles();
    let profiles = profile_list(options);
    let count_profiles = profiles
        .clone()
        .unwrap_or_else(|| crate::hardware::default_profile_list(&universe));
    let max_nics = ovf
        .hardware()
        .item_count_per_profile(ResourceKind::Ethernet, &count_profiles, &universe)
        .values()
        .copied()
        .max()
        .unwrap_or(0);
    let names = expand_list_wildcard(&options.nic_names, max_nics, false);
    let element_name = ovf.version().item_names().element_name;
    ovf.hardware_mut().set_item_values_per_profile(
        ResourceKind::Ethernet,
        element_name,
        &names,
        profiles.as_deref(),
        None,
        &universe,
    )
}

fn update_serial(
    ovf: &mut Ovf,
    options: &EditHardwareOptions,
    session: &Session,
) -> Result<()> {
    let universe = ovf.config_profiles();
    let profiles = profile_list(options);

    if let Some(serial_ports) = options.serial_ports {
        if let Err(msg) = ovf.platform().check_serial_count(serial_ports as u64) {
            session.confirm_or_fail(&msg)?;
        }
        let count_profiles = profiles
            .clone()
            .unwrap_or_else(|| crate::hardware::default_profile_list(&universe));
        let counts = ovf.hardware().item_count_per_profile(
            ResourceKind::Serial,
            &count_profiles,
            &universe,
        );
        for (profile, count) in &counts {
            if serial_ports < *count {
                session.confirm_or_fail(&format!(
                    "Profile {} currently has {} serial port(s). Delete {} to reduce to {} \
                     total?",
                    profile,
                    count,
                    count - serial_ports,
                    serial_ports
                ))?;
            }
        }
        let platform = ovf.platform();
        ovf.hardware_mut().set_item_count_per_profile(
            ResourceKind::Serial,
            serial_ports,
            profiles.as_deref(),
            &universe,
            platform,
        )?;
    }

    if !options.serial_connectivity.is_empty() {
        let count_profiles = profiles
            .clone()
            .unwrap_or_else(|| crate::hardware::default_profile_list(&universe));
        let counts = ovf.hardware().item_count_per_profile(
            ResourceKind::Serial,
            &count_profiles,
            &universe,
        );
        for (profile, count) in &counts {
            if options.serial_connectivity.len() < *count {
                session.confirm_or_fail(&format!(
                    "There are {} serial port(s) under profile {} but connectivity \
                     information for only {}. The remaining ports will be unreachable. \
                     Continue?",
                    count,
                    profile,
                    options.serial_connectivity.len()
                ))?;
            }
        }
        ovf.hardware_mut().set_item_values_per_profile(
            ResourceKind::Serial,
            "Address",
            &options.serial_connectivity,
            profiles.as_deref(),
            None,
            &universe,
        )?;
    }
    Ok(())
}

fn set_controller_subtypes(
    ovf: &mut Ovf,
    kind: ResourceKind,
    subtypes: &[String],
    options: &EditHardwareOptions,
) -> Result<()> {
    let universe = ovf.config_profiles();
    let value = subtypes.join(" ");
    let profiles = profile_value_set(options);
    ovf.hardware_mut().set_value_for_all_items(
        kind,
        "ResourceSubType",
        &value,
        profiles.as_ref(),
        false,
        &universe,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ovf() -> Ovf {
        Ovf::parse(include_str!("../../tests/data/csr1000v.ovf").as_bytes()).unwrap()
    }

    fn forced() -> Session {
        Session::new().unwrap().with_force(true)
    }

    #[test]
    fn test_set_cpus_and_memory_under_profile() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            profiles: Some(vec!["1CPU-4GB".to_string()]),
            cpus: Some(1),
            memory_mb: Some(8192),
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();

        let universe = ovf.config_profiles();
        let cpu = ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Cpu), &[], &[], &universe)[0];
        // 2CPU-4GB keeps its own value.
        assert_eq!(
            ovf.hardware()
                .item(cpu)
                .raw_value("VirtualQuantity", Some(&profile_set(["2CPU-4GB"]))),
            Some("2".to_string())
        );
        assert_eq!(
            ovf.hardware()
                .item(cpu)
                .raw_value("VirtualQuantity", Some(&profile_set(["1CPU-4GB"]))),
            Some("1".to_string())
        );
        // Memory gains a profile-scoped override; others keep 4096.
        let mem = ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Memory), &[], &[], &universe)[0];
        assert_eq!(
            ovf.hardware()
                .item(mem)
                .raw_value("VirtualQuantity", Some(&profile_set(["1CPU-4GB"]))),
            Some("8192".to_string())
        );
        assert_eq!(
            ovf.hardware()
                .item(mem)
                .raw_value("VirtualQuantity", Some(&profile_set(["2CPU-4GB"]))),
            Some("4096".to_string())
        );
        // Profile universe unchanged.
        assert_eq!(universe.len(), 3);
    }

    #[test]
    fn test_platform_bounds_gated_by_confirmation() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            cpus: Some(3), // CSR1000V supports 1, 2, or 4
            ..Default::default()
        };
        let session = Session::new().unwrap();
        assert!(run(&mut ovf, &options, &session).is_err());
        // --force confirms the warning and proceeds.
        run(&mut ovf, &options, &forced()).unwrap();
    }

    #[test]
    fn test_add_nics_extends_network_sequence() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            nics: Some(5),
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        let universe = ovf.config_profiles();
        assert_eq!(
            ovf.hardware()
                .find_all_items(Some(ResourceKind::Ethernet), &[], &[], &universe)
                .len(),
            5
        );
        // GigabitEthernet1..3 existed; 4 and 5 are inferred and created.
        assert!(ovf.networks().contains(&"GigabitEthernet4".to_string()));
        assert!(ovf.networks().contains(&"GigabitEthernet5".to_string()));
    }

    #[test]
    fn test_first_nic_gets_default_network() {
        // A VM with no NICs and no networks at all.
        let minimal = concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<ovf:Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" "#,
            r#"xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData">"#,
            "<ovf:VirtualSystem ovf:id=\"minimal\">",
            "<ovf:Info>A virtual machine</ovf:Info>",
            "<ovf:VirtualHardwareSection>",
            "<ovf:Info>Virtual hardware requirements</ovf:Info>",
            "</ovf:VirtualHardwareSection>",
            "</ovf:VirtualSystem>",
            "</ovf:Envelope>",
        );
        let mut ovf = Ovf::parse(minimal.as_bytes()).unwrap();
        let options = EditHardwareOptions {
            nics: Some(1),
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();

        let universe = ovf.config_profiles();
        let nics =
            ovf.hardware()
                .find_all_items(Some(ResourceKind::Ethernet), &[], &[], &universe);
        assert_eq!(nics.len(), 1);
        assert_eq!(
            ovf.hardware().item(nics[0]).raw_value("Connection", None),
            Some("VM Network".to_string())
        );
        assert_eq!(ovf.networks(), vec!["VM Network".to_string()]);
    }

    #[test]
    fn test_nic_network_mapping_last_name_covers_rest() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            nic_networks: vec!["mgmt".to_string()],
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        let universe = ovf.config_profiles();
        for idx in ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Ethernet), &[], &[], &universe)
        {
            assert_eq!(
                ovf.hardware().item(idx).raw_value("Connection", None),
                Some("mgmt".to_string())
            );
        }
        assert!(ovf.networks().contains(&"mgmt".to_string()));
    }

    #[test]
    fn test_serial_count_and_connectivity() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            serial_ports: Some(2),
            serial_connectivity: vec![
                "telnet://localhost:9101".to_string(),
                "telnet://localhost:9102".to_string(),
            ],
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        let universe = ovf.config_profiles();
        let serials =
            ovf.hardware()
                .find_all_items(Some(ResourceKind::Serial), &[], &[], &universe);
        assert_eq!(serials.len(), 2);
        assert_eq!(
            ovf.hardware().item(serials[0]).raw_value("Address", None),
            Some("telnet://localhost:9101".to_string())
        );
        assert_eq!(
            ovf.hardware().item(serials[1]).raw_value("Address", None),
            Some("telnet://localhost:9102".to_string())
        );
    }

    #[test]
    fn test_create_profile_on_demand() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            profiles: Some(vec!["8CPU-8GB".to_string()]),
            memory_mb: Some(8192),
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        assert!(ovf.config_profiles().contains(&"8CPU-8GB".to_string()));
    }

    #[test]
    fn test_delete_all_other_profiles() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            profiles: Some(vec!["2CPU-4GB".to_string()]),
            delete_all_other_profiles: true,
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        assert_eq!(ovf.config_profiles(), vec!["2CPU-4GB".to_string()]);
        // The formerly scoped 2-CPU value now covers the whole universe.
        let universe = ovf.config_profiles();
        let cpu = ovf
            .hardware()
            .find_all_items(Some(ResourceKind::Cpu), &[], &[], &universe)[0];
        assert_eq!(
            ovf.hardware()
                .item(cpu)
                .raw_value("VirtualQuantity", Some(&profile_set(["2CPU-4GB"]))),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_scsi_subtype() {
        let mut ovf = ovf();
        let options = EditHardwareOptions {
            scsi_subtypes: vec!["virtualscsi".to_string()],
            ..Default::default()
        };
        run(&mut ovf, &options, &forced()).unwrap();
        let universe = ovf.config_profiles();
        let scsi = ovf.hardware().find_all_items(
            Some(ResourceKind::ScsiController),
            &[],
            &[],
            &universe,
        )[0];
        assert_eq!(
            ovf.hardware().item(scsi).raw_value("ResourceSubType", None),
            Some("virtualscsi".to_string())
        );
    }
}

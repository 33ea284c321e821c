//! The OVF descriptor model.
//!
//! [`Ovf`] owns the parsed descriptor XML plus the hardware engine built
//! from its VirtualHardwareSection. Typed accessors cover the recognized
//! sections (References, DiskSection, NetworkSection,
//! DeploymentOptionSection, VirtualSystem, ProductSection); everything
//! else rides along untouched in the element tree and serializes exactly
//! as it was read.

pub mod resources;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};
use crate::hardware::{default_profile_list, Hardware, Profile};
use crate::names::{
    OvfVersion, ResourceKind, ENVELOPE_ORDER, VIRTUAL_SYSTEM_ORDER,
};
use crate::package::{MemberSource, Package, PackageForm, SourceKind};
use crate::platform::{self, Platform};
use crate::session::Session;
use crate::xml::{
    document_to_bytes, parse_document, Document, Element, NsDecl,
};

/// Canonical order of recognized ProductSection children.
const PRODUCT_SECTION_ORDER: &[&str] = &[
    "Info",
    "Product",
    "Vendor",
    "Version",
    "FullVersion",
    "ProductUrl",
    "VendorUrl",
    "AppUrl",
    "Icon",
    "Category",
    "Property",
];

/// Order of children within a DeploymentOptionSection Configuration.
const CONFIGURATION_ORDER: &[&str] = &["Label", "Description"];

/// One environment property from the ProductSection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub key: String,
    pub value: Option<String>,
    pub property_type: Option<String>,
    pub qualifiers: Option<String>,
    pub user_configurable: bool,
    pub label: Option<String>,
    pub description: Option<String>,
}

/// Options accepted when setting a property value.
#[derive(Debug, Clone, Default)]
pub struct PropertyUpdate<'a> {
    pub value: Option<&'a str>,
    pub property_type: Option<&'a str>,
    pub user_configurable: Option<bool>,
    pub label: Option<&'a str>,
    pub description: Option<&'a str>,
}

/// A parsed, editable OVF descriptor.
#[derive(Debug)]
pub struct Ovf {
    doc: Document,
    version: OvfVersion,
    hardware: Hardware,
    /// Where the bytes of each referenced file (by href) will come from at
    /// write time.
    file_sources: BTreeMap<String, SourceKind>,
}

impl Ovf {
    /// Parse a descriptor from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Ovf> {
        let doc = parse_document(bytes)?;
        let version = doc
            .root
            .uri
            .as_deref()
            .and_then(OvfVersion::from_envelope_uri)
            .ok_or_else(|| {
                Error::invalid_package(format!(
                    "root element '{}' is not an OVF Envelope in a recognized namespace",
                    doc.root.local
                ))
            })?;
        if doc.root.local != "Envelope" {
            return Err(Error::invalid_package(format!(
                "expected an Envelope root element, found '{}'",
                doc.root.local
            )));
        }
        info!("Descriptor uses OVF version {}", version);

        let ovf_uri = version.ovf_ns().uri;
        let systems = doc.root.find_children(ovf_uri, "VirtualSystem");
        let virtual_system = match systems.len() {
            0 => {
                return Err(Error::invalid_package(
                    "descriptor contains no VirtualSystem",
                ))
            }
            1 => systems[0],
            n => {
                // Multi-system OVFs are out of scope; edit the first.
                warn!(
                    "Descriptor contains {} VirtualSystems; only the first is editable",
                    n
                );
                systems[0]
            }
        };

        let profiles = config_profiles_of(&doc.root, ovf_uri);
        let hardware = match virtual_system.find_child(ovf_uri, "VirtualHardwareSection") {
            Some(section) => Hardware::from_section(section, &profiles, version)?,
            None => {
                let empty = Element::new(version.ovf_ns(), "VirtualHardwareSection");
                Hardware::from_section(&empty, &profiles, version)?
            }
        };

        Ok(Ovf {
            doc,
            version,
            hardware,
            file_sources: BTreeMap::new(),
        })
    }

    /// Parse the descriptor of an opened package, wiring up file sources
    /// for every referenced member.
    pub fn load(package: &Package) -> Result<Ovf> {
        let bytes = package.read_member_bytes(package.descriptor_name())?;
        let mut ovf = Ovf::parse(&bytes)?;
        for href in ovf.file_hrefs() {
            if package.has_member(&href) {
                ovf.file_sources
                    .insert(href.clone(), SourceKind::PackageMember(href));
            } else {
                warn!("Referenced file '{}' is missing from the package", href);
            }
        }
        Ok(ovf)
    }

    pub fn version(&self) -> OvfVersion {
        self.version
    }

    /// The manifest digest algorithm mandated by this descriptor's version.
    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        ChecksumAlgorithm::for_version(self.version)
    }

    pub fn ovf_ns(&self) -> NsDecl {
        self.version.ovf_ns()
    }

    fn ovf_uri(&self) -> &'static str {
        self.version.ovf_ns().uri
    }

    pub fn envelope(&self) -> &Element {
        &self.doc.root
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware {
        &mut self.hardware
    }

    /// The platform for this descriptor's product class.
    pub fn platform(&self) -> &'static dyn Platform {
        platform::for_product_class(self.product_class().as_deref())
    }

    /// Serialize the current descriptor state, including pending hardware
    /// changes, to XML bytes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.sync_hardware()?;
        Ok(document_to_bytes(&self.doc))
    }

    /// Flush the hardware engine's state back into the element tree.
    fn sync_hardware(&mut self) -> Result<()> {
        let ns = self.version.ovf_ns();
        let Ovf { doc, hardware, .. } = self;
        let virtual_system = doc
            .root
            .find_child_mut(ns.uri, "VirtualSystem")
            .ok_or_else(|| Error::invalid_package("descriptor lost its VirtualSystem"))?;
        if virtual_system
            .find_child(ns.uri, "VirtualHardwareSection")
            .is_none()
        {
            if hardware.is_empty() {
                return Ok(());
            }
            ensure_child_section(
                virtual_system,
                ns,
                "VirtualHardwareSection",
                Some("Virtual hardware requirements"),
                VIRTUAL_SYSTEM_ORDER,
            );
        }
        let section = virtual_system
            .find_child_mut(ns.uri, "VirtualHardwareSection")
            .expect("section just ensured");
        hardware.update_section(section)
    }

    // ------------------------------------------------------------------
    // Section handles

    pub fn references(&self) -> Option<&Element> {
        self.doc.root.find_child(self.ovf_uri(), "References")
    }

    pub fn references_mut(&mut self) -> Option<&mut Element> {
        let uri = self.ovf_uri();
        self.doc.root.find_child_mut(uri, "References")
    }

    pub fn ensure_references(&mut self) -> &mut Element {
        let ns = self.ovf_ns();
        ensure_child_section(&mut self.doc.root, ns, "References", None, ENVELOPE_ORDER)
    }

    pub fn disk_section(&self) -> Option<&Element> {
        self.doc.root.find_child(self.ovf_uri(), "DiskSection")
    }

    pub fn disk_section_mut(&mut self) -> Option<&mut Element> {
        let uri = self.ovf_uri();
        self.doc.root.find_child_mut(uri, "DiskSection")
    }

    pub fn ensure_disk_section(&mut self) -> &mut Element {
        let ns = self.ovf_ns();
        ensure_child_section(
            &mut self.doc.root,
            ns,
            "DiskSection",
            Some("Virtual disk information"),
            ENVELOPE_ORDER,
        )
    }

    pub fn network_section(&self) -> Option<&Element> {
        self.doc.root.find_child(self.ovf_uri(), "NetworkSection")
    }

    pub fn ensure_network_section(&mut self) -> &mut Element {
        let ns = self.ovf_ns();
        ensure_child_section(
            &mut self.doc.root,
            ns,
            "NetworkSection",
            Some("Logical networks"),
            ENVELOPE_ORDER,
        )
    }

    pub fn deploy_opt_section(&self) -> Option<&Element> {
        self.doc
            .root
            .find_child(self.ovf_uri(), "DeploymentOptionSection")
    }

    pub fn virtual_system(&self) -> &Element {
        self.doc
            .root
            .find_child(self.ovf_uri(), "VirtualSystem")
            .expect("checked at parse time")
    }

    fn virtual_system_mut(&mut self) -> &mut Element {
        let uri = self.ovf_uri();
        self.doc
            .root
            .find_child_mut(uri, "VirtualSystem")
            .expect("checked at parse time")
    }

    pub fn product_section(&self) -> Option<&Element> {
        self.virtual_system()
            .find_child(self.ovf_uri(), "ProductSection")
    }

    pub fn ensure_product_section(&mut self) -> &mut Element {
        let ns = self.ovf_ns();
        let vs = self.virtual_system_mut();
        ensure_child_section(
            vs,
            ns,
            "ProductSection",
            Some("Product Information"),
            VIRTUAL_SYSTEM_ORDER,
        )
    }

    // ------------------------------------------------------------------
    // Configuration profiles

    /// The declared configuration profile IDs, default profile first.
    pub fn config_profiles(&self) -> Vec<String> {
        config_profiles_of(&self.doc.root, self.ovf_uri())
    }

    /// The profile list meaning "all profiles" for hardware edits.
    pub fn default_profile_list(&self) -> Vec<Profile> {
        default_profile_list(&self.config_profiles())
    }

    /// Create a profile, or update the label/description of an existing
    /// one.
    pub fn create_configuration_profile(
        &mut self,
        id: &str,
        label: &str,
        description: &str,
    ) -> Result<()> {
        let ns = self.ovf_ns();
        let section = ensure_child_section(
            &mut self.doc.root,
            ns,
            "DeploymentOptionSection",
            Some("Configuration Profiles"),
            ENVELOPE_ORDER,
        );
        let existing = section
            .find_child_with_attr_mut(ns.uri, "Configuration", "id", id)
            .is_some();
        if !existing {
            debug!("Creating new Configuration element for profile {}", id);
            let mut cfg = Element::new(ns, "Configuration");
            cfg.set_attr(ns, "id", id);
            section.add_child(cfg);
        }
        let cfg = section
            .find_child_with_attr_mut(ns.uri, "Configuration", "id", id)
            .expect("configuration just ensured");
        cfg.set_or_make_child(ns, "Label", Some(label), CONFIGURATION_ORDER);
        cfg.set_or_make_child(ns, "Description", Some(description), CONFIGURATION_ORDER);
        Ok(())
    }

    /// Delete a profile from the DeploymentOptionSection and scrub it from
    /// every hardware item.
    pub fn delete_configuration_profile(&mut self, id: &str) -> Result<()> {
        let ns = self.ovf_ns();
        let universe = self.config_profiles();
        if !universe.iter().any(|p| p == id) {
            return Err(Error::not_found(format!(
                "no such configuration profile '{}'",
                id
            )));
        }
        info!("Deleting configuration profile {}", id);

        // The profile is disappearing from the whole descriptor, so the
        // implicit default keeps covering the remainder (no splitting).
        let target = Profile::id(id);
        for idx in 0..self.hardware.len() {
            if self.hardware.item(idx).has_profile(&target, &universe) {
                self.hardware
                    .item_mut(idx)
                    .remove_profile(&target, false, &universe)?;
            }
        }

        let section = self
            .doc
            .root
            .find_child_mut(ns.uri, "DeploymentOptionSection")
            .expect("profile list was non-empty");
        section
            .remove_child_where(|e| {
                e.is(ns.uri, "Configuration") && e.attr(ns.uri, "id") == Some(id)
            })
            .expect("profile element exists");
        if section.find_child(ns.uri, "Configuration").is_none() {
            self.doc
                .root
                .remove_child_where(|e| e.is(ns.uri, "DeploymentOptionSection"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Networks

    /// Declared network names, in document order.
    pub fn networks(&self) -> Vec<String> {
        let uri = self.ovf_uri();
        self.network_section()
            .map(|section| {
                section
                    .find_children(uri, "Network")
                    .iter()
                    .filter_map(|n| n.attr(uri, "name"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Network descriptions, parallel to [`networks`](Self::networks).
    pub fn network_descriptions(&self) -> Vec<String> {
        let uri = self.ovf_uri();
        self.network_section()
            .map(|section| {
                section
                    .find_children(uri, "Network")
                    .iter()
                    .map(|n| {
                        n.find_child(uri, "Description")
                            .map(|d| d.text_content().to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Define a network, or update the description of an existing one.
    pub fn create_network(&mut self, name: &str, description: Option<&str>) {
        let ns = self.ovf_ns();
        let section = self.ensure_network_section();
        let exists = section
            .find_child_with_attr(ns.uri, "Network", "name", name)
            .is_some();
        if !exists {
            debug!("Creating new Network '{}'", name);
            let mut network = Element::new(ns, "Network");
            network.set_attr(ns, "name", name);
            section.add_child(network);
        }
        if let Some(description) = description {
            let network = section
                .find_child_with_attr_mut(ns.uri, "Network", "name", name)
                .expect("network just ensured");
            network.set_or_make_child(ns, "Description", Some(description), &["Description"]);
        }
    }

    /// Drop networks no NIC is connected to; remove the section when none
    /// are left. Called on write.
    fn refresh_networks(&mut self) -> Result<()> {
        let ns = self.ovf_ns();
        let universe = self.config_profiles();
        let mut connected: Vec<String> = Vec::new();
        for idx in self
            .hardware
            .find_all_items(Some(ResourceKind::Ethernet), &[], &[], &universe)
        {
            for value in self.hardware.item(idx).all_values("Connection") {
                if !connected.contains(&value) {
                    connected.push(value);
                }
            }
        }
        let Some(section) = self.doc.root.find_child_mut(ns.uri, "NetworkSection") else {
            return Ok(());
        };
        loop {
            let removed = section.remove_child_where(|e| {
                e.is(ns.uri, "Network")
                    && e.attr(ns.uri, "name")
                        .map(|name| !connected.iter().any(|c| c == name))
                        .unwrap_or(true)
            });
            match removed {
                Some(network) => warn!(
                    "Removing unused network {}",
                    network.attr(ns.uri, "name").unwrap_or("<unnamed>")
                ),
                None => break,
            }
        }
        if section.find_child(ns.uri, "Network").is_none() {
            warn!("No networks left; removing NetworkSection");
            self.doc
                .root
                .remove_child_where(|e| e.is(ns.uri, "NetworkSection"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Product information

    pub fn product_class(&self) -> Option<String> {
        self.product_section()
            .and_then(|s| s.attr(self.ovf_uri(), "class"))
            .map(str::to_string)
    }

    pub fn set_product_class(&mut self, class: &str) {
        let ns = self.ovf_ns();
        self.ensure_product_section().set_attr(ns, "class", class);
    }

    fn product_child(&self, tag: &str) -> Option<String> {
        self.product_section()
            .and_then(|s| s.find_child(self.ovf_uri(), tag))
            .map(|e| e.text_content().to_string())
    }

    fn set_product_child(&mut self, tag: &str, text: &str) {
        let ns = self.ovf_ns();
        self.ensure_product_section()
            .set_or_make_child(ns, tag, Some(text), PRODUCT_SECTION_ORDER);
    }

    pub fn product(&self) -> Option<String> {
        self.product_child("Product")
    }

    pub fn set_product(&mut self, value: &str) {
        self.set_product_child("Product", value);
    }

    pub fn vendor(&self) -> Option<String> {
        self.product_child("Vendor")
    }

    pub fn set_vendor(&mut self, value: &str) {
        self.set_product_child("Vendor", value);
    }

    pub fn version_short(&self) -> Option<String> {
        self.product_child("Version")
    }

    pub fn set_version_short(&mut self, value: &str) {
        self.set_product_child("Version", value);
    }

    pub fn version_long(&self) -> Option<String> {
        self.product_child("FullVersion")
    }

    pub fn set_version_long(&mut self, value: &str) {
        self.set_product_child("FullVersion", value);
    }

    pub fn product_url(&self) -> Option<String> {
        self.product_child("ProductUrl")
    }

    pub fn set_product_url(&mut self, value: &str) {
        self.set_product_child("ProductUrl", value);
    }

    pub fn vendor_url(&self) -> Option<String> {
        self.product_child("VendorUrl")
    }

    pub fn set_vendor_url(&mut self, value: &str) {
        self.set_product_child("VendorUrl", value);
    }

    pub fn application_url(&self) -> Option<String> {
        self.product_child("AppUrl")
    }

    pub fn set_application_url(&mut self, value: &str) {
        self.set_product_child("AppUrl", value);
    }

    // ------------------------------------------------------------------
    // System settings

    /// The VirtualSystemType tokens (e.g. `vmx-08 vmx-09`), if declared.
    pub fn system_types(&self) -> Vec<String> {
        let uri = self.ovf_uri();
        self.virtual_system()
            .find_child(uri, "VirtualHardwareSection")
            .and_then(|s| s.find_child(uri, "System"))
            .and_then(|s| s.find_child(crate::names::VSSD_URI, "VirtualSystemType"))
            .map(|e| {
                e.text_content()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the VirtualSystemType tokens. Not filtered by profile.
    pub fn set_system_types(&mut self, types: &[String]) -> Result<()> {
        let ns = self.ovf_ns();
        let vs = self.virtual_system_mut();
        let section = ensure_child_section(
            vs,
            ns,
            "VirtualHardwareSection",
            Some("Virtual hardware requirements"),
            VIRTUAL_SYSTEM_ORDER,
        );
        let system = ensure_child_section(
            section,
            ns,
            "System",
            None,
            crate::names::HARDWARE_SECTION_ORDER,
        );
        let joined = types.join(" ");
        system.set_or_make_child(
            crate::names::NS_VSSD,
            "VirtualSystemType",
            Some(joined.as_str()),
            &["ElementName", "InstanceID", "VirtualSystemIdentifier", "VirtualSystemType"],
        );
        Ok(())
    }

    /// Declared environment transport mechanisms.
    pub fn environment_transports(&self) -> Vec<String> {
        let uri = self.ovf_uri();
        self.virtual_system()
            .find_child(uri, "VirtualHardwareSection")
            .and_then(|s| s.attr(uri, "transport"))
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Set the environment transport mechanisms.
    pub fn set_environment_transports(&mut self, transports: &[String]) -> Result<()> {
        let ns = self.ovf_ns();
        let vs = self.virtual_system_mut();
        let section = ensure_child_section(
            vs,
            ns,
            "VirtualHardwareSection",
            Some("Virtual hardware requirements"),
            VIRTUAL_SYSTEM_ORDER,
        );
        section.set_attr(ns, "transport", transports.join(" "));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Environment properties

    /// All properties declared in the primary ProductSection.
    pub fn environment_properties(&self) -> Vec<PropertyInfo> {
        let uri = self.ovf_uri();
        let Some(section) = self.product_section() else {
            return Vec::new();
        };
        section
            .find_children(uri, "Property")
            .iter()
            .filter_map(|prop| {
                let key = prop.attr(uri, "key")?.to_string();
                Some(PropertyInfo {
                    key,
                    value: prop.attr(uri, "value").map(str::to_string),
                    property_type: prop.attr(uri, "type").map(str::to_string),
                    qualifiers: prop.attr(uri, "qualifiers").map(str::to_string),
                    user_configurable: prop.attr(uri, "userConfigurable") == Some("true"),
                    label: prop
                        .find_child(uri, "Label")
                        .map(|l| l.text_content().to_string()),
                    description: prop
                        .find_child(uri, "Description")
                        .map(|d| d.text_content().to_string()),
                })
            })
            .collect()
    }

    /// The current value of a property, or None if absent.
    pub fn property_value(&self, key: &str) -> Option<String> {
        let uri = self.ovf_uri();
        self.product_section()
            .and_then(|s| s.find_child_with_attr(uri, "Property", "key", key))
            .and_then(|p| p.attr(uri, "value"))
            .map(str::to_string)
    }

    /// Set or create a property. The value is validated against the
    /// property's type and qualifiers; booleans are canonicalized to
    /// `true`/`false`. Returns the value actually stored, if any.
    pub fn set_property(&mut self, key: &str, update: PropertyUpdate<'_>) -> Result<Option<String>> {
        if self.version == OvfVersion::V0_9 {
            return Err(Error::invalid_input(
                "environment properties are not supported for OVF 0.9 descriptors",
            ));
        }
        let ns = self.ovf_ns();
        let section = self.ensure_product_section();
        let exists = section
            .find_child_with_attr(ns.uri, "Property", "key", key)
            .is_some();
        let mut property_type = update.property_type.map(str::to_string);
        if !exists {
            let mut prop = Element::new(ns, "Property");
            prop.set_attr(ns, "key", key);
            section.add_child_ordered(prop, PRODUCT_SECTION_ORDER);
            // Properties must carry a type to be schema-valid.
            if property_type.is_none() {
                property_type = Some("string".to_string());
            }
        }
        let prop = section
            .find_child_with_attr_mut(ns.uri, "Property", "key", key)
            .expect("property just ensured");

        if let Some(user_configurable) = update.user_configurable {
            prop.set_attr(ns, "userConfigurable", user_configurable.to_string());
        }
        let mut value = update.value.map(str::to_string);
        if let Some(property_type) = &property_type {
            prop.set_attr(ns, "type", property_type);
            // Revalidate any existing value when only the type changed.
            if value.is_none() {
                value = prop.attr(ns.uri, "value").map(str::to_string);
            }
        }
        let stored = match value {
            Some(value) => {
                let canonical = validate_property_value(prop, ns, key, &value)?;
                prop.set_attr(ns, "value", &canonical);
                Some(canonical)
            }
            None => None,
        };
        if let Some(label) = update.label {
            prop.set_or_make_child(ns, "Label", Some(label), &["Label", "Description"]);
        }
        if let Some(description) = update.description {
            prop.set_or_make_child(
                ns,
                "Description",
                Some(description),
                &["Label", "Description"],
            );
        }
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Validation and write-out

    /// Check the hardware against platform bounds. Violations are warnings
    /// gated by the session's confirmation callback.
    pub fn validate_hardware(&self, session: &Session) -> Result<()> {
        let universe = self.config_profiles();
        let platform = self.platform();
        let profiles = self.default_profile_list();

        for profile in &profiles {
            let label = match profile.as_id() {
                Some(id) => format!("profile {}", id),
                None => "default profile".to_string(),
            };
            let p_set: crate::hardware::ProfileSet = [profile.clone()].into_iter().collect();
            for idx in self
                .hardware
                .find_all_items(Some(ResourceKind::Cpu), &[], &[], &universe)
            {
                if let Some(cpus) = self.hardware.item(idx).raw_value("VirtualQuantity", Some(&p_set))
                {
                    if let Ok(cpus) = cpus.parse::<u64>() {
                        if let Err(msg) = platform.check_cpu_count(cpus) {
                            session.confirm_or_fail(&format!("{} ({})", msg, label))?;
                        }
                    }
                }
            }
            for idx in self
                .hardware
                .find_all_items(Some(ResourceKind::Memory), &[], &[], &universe)
            {
                if let Some(mib) =
                    resources::memory_item_mebibytes(self.hardware.item(idx), &p_set)
                {
                    if let Err(msg) = platform.check_memory_amount(mib) {
                        session.confirm_or_fail(&format!("{} ({})", msg, label))?;
                    }
                }
            }
            let nic_counts = self.hardware.item_count_per_profile(
                ResourceKind::Ethernet,
                std::slice::from_ref(profile),
                &universe,
            );
            if let Err(msg) = platform.check_nic_count(nic_counts[profile] as u64) {
                session.confirm_or_fail(&format!("{} ({})", msg, label))?;
            }
            let serial_counts = self.hardware.item_count_per_profile(
                ResourceKind::Serial,
                std::slice::from_ref(profile),
                &universe,
            );
            if let Err(msg) = platform.check_serial_count(serial_counts[profile] as u64) {
                session.confirm_or_fail(&format!("{} ({})", msg, label))?;
            }
        }
        Ok(())
    }

    /// Bring File entries in line with reality before writing: re-state
    /// sizes and drop references to files that no longer exist.
    fn refresh_file_references(&mut self, package: &Package) -> Result<()> {
        let ns = self.ovf_ns();
        let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();
        for href in self.file_hrefs() {
            match self.file_sources.get(&href) {
                Some(SourceKind::PackageMember(name)) => match package.member_size(name) {
                    Ok(size) => {
                        sizes.insert(href, size);
                    }
                    Err(_) => missing.push(href),
                },
                Some(SourceKind::LocalFile(path)) => match std::fs::metadata(path) {
                    Ok(meta) => {
                        sizes.insert(href, meta.len());
                    }
                    Err(_) => missing.push(href),
                },
                None => missing.push(href),
            }
        }
        let Some(references) = self.references_mut() else {
            return Ok(());
        };
        for href in &missing {
            warn!("Referenced file '{}' does not exist; dropping it", href);
            references.remove_child_where(|e| {
                e.is(ns.uri, "File") && e.attr(ns.uri, "href") == Some(href)
            });
        }
        for file in references.child_elements_mut() {
            if !file.is(ns.uri, "File") {
                continue;
            }
            let Some(href) = file.attr(ns.uri, "href").map(str::to_string) else {
                continue;
            };
            if let Some(size) = sizes.get(&href) {
                file.set_attr(ns, "size", size.to_string());
            }
        }
        for href in missing {
            self.file_sources.remove(&href);
        }
        Ok(())
    }

    /// The href of every referenced file, in References order.
    pub fn file_hrefs(&self) -> Vec<String> {
        let uri = self.ovf_uri();
        self.references()
            .map(|refs| {
                refs.find_children(uri, "File")
                    .iter()
                    .filter_map(|f| f.attr(uri, "href"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Register the byte source used for a referenced file at write time.
    pub fn set_file_source(&mut self, href: &str, source: SourceKind) {
        self.file_sources.insert(href.to_string(), source);
    }

    pub fn file_source(&self, href: &str) -> Option<&SourceKind> {
        self.file_sources.get(href)
    }

    pub fn remove_file_source(&mut self, href: &str) {
        self.file_sources.remove(href);
    }

    /// Write the descriptor and all referenced files to `target`.
    ///
    /// The output form defaults to the target's extension (`.ova` is TAR,
    /// anything else directory form). The manifest is regenerated; for OVA
    /// the member order is descriptor, manifest, then the References order.
    pub fn write(
        &mut self,
        package: &Package,
        target: &Path,
        form: Option<PackageForm>,
        session: &Session,
    ) -> Result<()> {
        session.check_cancelled()?;
        self.validate_hardware(session)?;
        self.refresh_file_references(package)?;
        self.refresh_networks()?;
        let bytes = self.to_bytes()?;

        let form = form.unwrap_or_else(|| {
            if target.extension().is_some_and(|e| e == "ova" || e == "box") {
                PackageForm::Tar
            } else {
                PackageForm::Directory
            }
        });
        let descriptor_name = output_descriptor_name(target, form);
        let members: Vec<MemberSource> = self
            .file_hrefs()
            .into_iter()
            .filter_map(|href| {
                let source = self.file_sources.get(&href)?.clone();
                Some(MemberSource { name: href, source })
            })
            .collect();
        let algorithm = self.checksum_algorithm();
        let target = if form == PackageForm::Directory {
            // Directory output targets the descriptor path itself.
            target
                .extension()
                .is_some_and(|e| e == "ovf")
                .then(|| target.to_path_buf())
                .unwrap_or_else(|| target.join(&descriptor_name))
        } else {
            target.to_path_buf()
        };
        package.write(
            &target,
            form,
            &descriptor_name,
            &bytes,
            &members,
            algorithm,
            session,
        )
    }
}

/// Compute the descriptor member name for an output target.
fn output_descriptor_name(target: &Path, form: PackageForm) -> String {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());
    match form {
        PackageForm::Tar => format!("{}.ovf", stem),
        PackageForm::Directory => {
            if target.extension().is_some_and(|e| e == "ovf") {
                target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("{}.ovf", stem))
            } else {
                format!("{}.ovf", stem)
            }
        }
    }
}

/// Profile IDs declared in the DeploymentOptionSection, default first.
fn config_profiles_of(root: &Element, ovf_uri: &str) -> Vec<String> {
    let Some(section) = root.find_child(ovf_uri, "DeploymentOptionSection") else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for config in section.find_children(ovf_uri, "Configuration") {
        let Some(id) = config.attr(ovf_uri, "id") else {
            continue;
        };
        let default = matches!(config.attr(ovf_uri, "default"), Some("true") | Some("1"));
        if default {
            ids.insert(0, id.to_string());
        } else {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Create a missing section with its Info child, in schema order.
fn ensure_child_section<'a>(
    parent: &'a mut Element,
    ns: NsDecl,
    local: &str,
    info: Option<&str>,
    ordering: &[&str],
) -> &'a mut Element {
    if parent.find_child(ns.uri, local).is_none() {
        let mut section = Element::new(ns, local);
        if let Some(info) = info {
            section.set_or_make_child(ns, "Info", Some(info), &["Info"]);
        }
        parent.add_child_ordered(section, ordering);
    }
    parent
        .find_child_mut(ns.uri, local)
        .expect("section just ensured")
}

/// Validate and canonicalize a value against a Property element's type and
/// qualifiers.
fn validate_property_value(
    prop: &Element,
    ns: NsDecl,
    key: &str,
    value: &str,
) -> Result<String> {
    let prop_type = prop.attr(ns.uri, "type").unwrap_or("");
    let value = match prop_type {
        "boolean" => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "t" | "y" | "yes" => "true".to_string(),
            "false" | "0" | "f" | "n" | "no" => "false".to_string(),
            _ => {
                return Err(Error::invalid_input(format!(
                    "property '{}' requires a boolean value, got '{}'",
                    key, value
                )))
            }
        },
        "int" | "uint8" | "uint16" | "uint32" | "uint64" | "int8" | "int16" | "int32"
        | "int64" => {
            if value.parse::<i64>().is_err() {
                return Err(Error::invalid_input(format!(
                    "property '{}' requires an integer value, got '{}'",
                    key, value
                )));
            }
            value.to_string()
        }
        _ => value.to_string(),
    };

    if let Some(qualifiers) = prop.attr(ns.uri, "qualifiers") {
        if let Some(max_len) = parse_qualifier_arg(qualifiers, "MaxLen") {
            if value.len() > max_len {
                return Err(Error::invalid_input(format!(
                    "value for property '{}' must be no longer than {} characters",
                    key, max_len
                )));
            }
        }
        if let Some(min_len) = parse_qualifier_arg(qualifiers, "MinLen") {
            if value.len() < min_len {
                return Err(Error::invalid_input(format!(
                    "value for property '{}' must be no shorter than {} characters",
                    key, min_len
                )));
            }
        }
    }
    Ok(value)
}

/// Extract `N` from a `Name(N)` qualifier, if present.
fn parse_qualifier_arg(qualifiers: &str, name: &str) -> Option<usize> {
    let start = qualifiers.find(name)? + name.len();
    let rest = qualifiers[start..].trim_start();
    let rest = rest.strip_prefix('(')?;
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSR_OVF: &str = include_str!("../../tests/data/csr1000v.ovf");

    fn ovf() -> Ovf {
        Ovf::parse(CSR_OVF.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_version_and_sections() {
        let ovf = ovf();
        assert_eq!(ovf.version(), OvfVersion::V1);
        assert_eq!(ovf.checksum_algorithm(), ChecksumAlgorithm::Sha1);
        assert!(ovf.references().is_some());
        assert!(ovf.disk_section().is_some());
        assert!(ovf.network_section().is_some());
        assert!(ovf.deploy_opt_section().is_some());
        assert!(ovf.product_section().is_some());
    }

    #[test]
    fn test_parse_rejects_non_ovf() {
        assert!(Ovf::parse(b"<foo/>").is_err());
        assert!(Ovf::parse(br#"<Envelope xmlns="urn:random"/>"#).is_err());
    }

    #[test]
    fn test_parse_requires_virtual_system() {
        let err = Ovf::parse(
            br#"<ovf:Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1"></ovf:Envelope>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("VirtualSystem"));
    }

    #[test]
    fn test_round_trip_unedited_is_byte_identical() {
        let mut ovf = ovf();
        let bytes = ovf.to_bytes().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), CSR_OVF);
    }

    #[test]
    fn test_config_profiles_default_first() {
        let ovf = ovf();
        // 2CPU-4GB carries ovf:default="true" in the fixture.
        assert_eq!(
            ovf.config_profiles(),
            vec!["2CPU-4GB".to_string(), "1CPU-4GB".to_string(), "4CPU-4GB".to_string()]
        );
    }

    #[test]
    fn test_create_and_delete_profile() {
        let mut ovf = ovf();
        ovf.create_configuration_profile("8CPU-8GB", "Large", "Eight CPUs, eight GiB")
            .unwrap();
        assert!(ovf.config_profiles().contains(&"8CPU-8GB".to_string()));

        ovf.delete_configuration_profile("8CPU-8GB").unwrap();
        assert!(!ovf.config_profiles().contains(&"8CPU-8GB".to_string()));
        assert!(matches!(
            ovf.delete_configuration_profile("8CPU-8GB"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_networks() {
        let mut ovf = ovf();
        assert_eq!(
            ovf.networks(),
            vec![
                "GigabitEthernet1".to_string(),
                "GigabitEthernet2".to_string(),
                "GigabitEthernet3".to_string()
            ]
        );
        ovf.create_network("mgmt", Some("management network"));
        assert!(ovf.networks().contains(&"mgmt".to_string()));
        // Update in place, no duplicate.
        ovf.create_network("mgmt", Some("updated"));
        assert_eq!(ovf.networks().iter().filter(|n| *n == "mgmt").count(), 1);
    }

    #[test]
    fn test_product_accessors() {
        let mut ovf = ovf();
        assert_eq!(ovf.product_class().as_deref(), Some("com.cisco.csr1000v"));
        assert_eq!(ovf.platform().name(), "Cisco CSR1000V");

        ovf.set_product("CSR 1000V");
        ovf.set_vendor("Cisco Systems, Inc.");
        ovf.set_version_short("3.13");
        ovf.set_version_long("3.13.0S");
        assert_eq!(ovf.product().as_deref(), Some("CSR 1000V"));
        assert_eq!(ovf.vendor().as_deref(), Some("Cisco Systems, Inc."));
        assert_eq!(ovf.version_short().as_deref(), Some("3.13"));
        assert_eq!(ovf.version_long().as_deref(), Some("3.13.0S"));
    }

    #[test]
    fn test_property_set_and_idempotence() {
        let mut ovf = ovf();
        let update = PropertyUpdate {
            value: Some("10.1.1.100/24"),
            ..Default::default()
        };
        ovf.set_property("mgmt-ipv4-addr", update.clone()).unwrap();
        assert_eq!(
            ovf.property_value("mgmt-ipv4-addr").as_deref(),
            Some("10.1.1.100/24")
        );
        let once = ovf.to_bytes().unwrap();
        ovf.set_property("mgmt-ipv4-addr", update).unwrap();
        let twice = ovf.to_bytes().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_property_create_with_default_type() {
        let mut ovf = ovf();
        assert_eq!(ovf.property_value("brand-new"), None);
        ovf.set_property(
            "brand-new",
            PropertyUpdate {
                value: Some("hello"),
                ..Default::default()
            },
        )
        .unwrap();
        let info = ovf
            .environment_properties()
            .into_iter()
            .find(|p| p.key == "brand-new")
            .unwrap();
        assert_eq!(info.property_type.as_deref(), Some("string"));
        assert_eq!(info.value.as_deref(), Some("hello"));
    }

    #[test]
    fn test_property_boolean_canonicalization() {
        let mut ovf = ovf();
        ovf.set_property(
            "enable-thing",
            PropertyUpdate {
                value: Some("YES"),
                property_type: Some("boolean"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ovf.property_value("enable-thing").as_deref(), Some("true"));
        let err = ovf
            .set_property(
                "enable-thing",
                PropertyUpdate {
                    value: Some("maybe"),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn test_property_maxlen_qualifier() {
        let mut ovf = ovf();
        // The fixture declares login-username with MaxLen(64).
        let long = "x".repeat(100);
        let err = ovf
            .set_property(
                "login-username",
                PropertyUpdate {
                    value: Some(long.as_str()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("64"));
    }

    #[test]
    fn test_empty_string_value_is_stored() {
        let mut ovf = ovf();
        ovf.set_property(
            "login-username",
            PropertyUpdate {
                value: Some(""),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ovf.property_value("login-username").as_deref(), Some(""));
    }

    #[test]
    fn test_parse_qualifier_arg() {
        assert_eq!(parse_qualifier_arg("MaxLen(64)", "MaxLen"), Some(64));
        assert_eq!(
            parse_qualifier_arg("MinLen(2) MaxLen(10)", "MaxLen"),
            Some(10)
        );
        assert_eq!(parse_qualifier_arg("Key", "MaxLen"), None);
    }

    #[test]
    fn test_output_descriptor_name() {
        assert_eq!(
            output_descriptor_name(Path::new("/tmp/out.ova"), PackageForm::Tar),
            "out.ovf"
        );
        assert_eq!(
            output_descriptor_name(Path::new("/tmp/out.ovf"), PackageForm::Directory),
            "out.ovf"
        );
    }
}

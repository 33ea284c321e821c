//! The hardware factorization engine.
//!
//! [`Hardware`] holds every device described by a VirtualHardwareSection as
//! [`LogicalItem`]s grouped by InstanceID. Edits operate on the logical
//! items; [`Hardware::update_section`] regenerates the flat Item elements
//! only when something actually changed, so untouched descriptors
//! round-trip byte-for-byte.

pub mod item;

pub use item::{
    all_profiles_set, profile_set, profile_set_string, LogicalItem, Profile, ProfileSet,
};

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::names::{ItemNames, OvfVersion, ResourceKind, HARDWARE_SECTION_ORDER};
use crate::platform::Platform;
use crate::validation::natural_cmp;
use crate::xml::Element;

const ITEM_TAGS: &[&str] = &["Item", "StorageItem", "EthernetPortItem"];

/// All hardware devices of one virtual system.
#[derive(Debug, Clone)]
pub struct Hardware {
    items: Vec<LogicalItem>,
    names: ItemNames,
    version: OvfVersion,
    /// Number of flat Item elements most recently ingested or emitted.
    ingested_elements: usize,
}

impl Hardware {
    /// Build the logical item set from a VirtualHardwareSection.
    pub fn from_section(
        section: &Element,
        config_profiles: &[String],
        version: OvfVersion,
    ) -> Result<Hardware> {
        let names = version.item_names();
        let ovf_uri = version.ovf_ns().uri;
        let mut hardware = Hardware {
            items: Vec::new(),
            names,
            version,
            ingested_elements: 0,
        };

        for child in section.child_elements() {
            if !ITEM_TAGS.contains(&child.local.as_str()) {
                continue;
            }
            hardware.ingested_elements += 1;
            let instance = child
                .child_elements()
                .find(|c| c.local == names.instance_id)
                .map(|c| c.text_content().to_string())
                .ok_or_else(|| {
                    Error::invalid_package(format!(
                        "hardware {} element has no {}",
                        child.local, names.instance_id
                    ))
                })?;

            let profiles = match child.attr(ovf_uri, "configuration") {
                Some(config) => {
                    let ids: Vec<&str> = config.split_whitespace().collect();
                    let unknown: Vec<&str> = ids
                        .iter()
                        .copied()
                        .filter(|id| !config_profiles.iter().any(|p| p == id))
                        .collect();
                    if !unknown.is_empty() {
                        return Err(Error::invalid_package(format!(
                            "unknown profile(s) {:?} for Item instance {}",
                            unknown, instance
                        )));
                    }
                    profile_set(ids)
                }
                None => all_profiles_set(),
            };

            match hardware.index_of_instance(&instance) {
                Some(idx) => {
                    hardware.items[idx]
                        .ingest_element(child, &profiles)
                        .map_err(|e| {
                            debug!("{}", e);
                            Error::invalid_package(format!(
                                "data conflict for Item instance {}",
                                instance
                            ))
                        })?;
                }
                None => {
                    let mut item = LogicalItem::new(names);
                    item.ingest_element(child, &profiles)?;
                    hardware.items.push(item);
                }
            }
        }
        debug!(
            "Hardware section contains {} Item elements describing {} devices",
            hardware.ingested_elements,
            hardware.items.len()
        );
        hardware.sort_items();
        // Treat the ingested state as golden.
        for item in &mut hardware.items {
            item.modified = false;
        }
        Ok(hardware)
    }

    fn sort_items(&mut self) {
        self.items.sort_by(|a, b| {
            natural_cmp(
                &a.instance_id().unwrap_or_default(),
                &b.instance_id().unwrap_or_default(),
            )
        });
    }

    fn index_of_instance(&self, instance: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.instance_id().as_deref() == Some(instance))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, index: usize) -> &LogicalItem {
        &self.items[index]
    }

    pub fn item_mut(&mut self, index: usize) -> &mut LogicalItem {
        &mut self.items[index]
    }

    pub fn items(&self) -> impl Iterator<Item = &LogicalItem> {
        self.items.iter()
    }

    /// Regenerate the flat Item elements under the section, if anything
    /// changed since ingest.
    pub fn update_section(&mut self, section: &mut Element) -> Result<()> {
        let current_count = section
            .child_elements()
            .filter(|c| ITEM_TAGS.contains(&c.local.as_str()))
            .count();
        let modified =
            current_count != self.flat_element_count() || self.items.iter().any(|i| i.modified);
        if !modified {
            debug!("No changes to hardware definition; XML left untouched");
            return Ok(());
        }

        // Capture the section's indentation before clearing its children.
        let indent = section_indent(section);

        let mut removed = 0;
        while section
            .remove_child_where(|e| ITEM_TAGS.contains(&e.local.as_str()))
            .is_some()
        {
            removed += 1;
        }
        debug!("Cleared {} existing Item elements", removed);

        self.sort_items();
        let ovf_ns = self.version.ovf_ns();
        for item in &self.items {
            for element in item.generate_elements(self.version, ovf_ns)? {
                section.add_child_ordered(element, HARDWARE_SECTION_ORDER);
            }
        }
        section.reindent(&indent);
        self.ingested_elements = self.flat_element_count();
        info!(
            "Hardware section now contains {} Item elements for {} devices",
            self.ingested_elements,
            self.items.len()
        );
        Ok(())
    }

    fn flat_element_count(&self) -> usize {
        self.items
            .iter()
            .map(|i| i.nonintersecting_profile_sets().len())
            .sum()
    }

    /// The next InstanceID: strictly greater than every existing one, so
    /// cloned and new devices sort after their ancestors.
    pub fn next_instance_id(&self) -> String {
        let max = self
            .items
            .iter()
            .filter_map(|i| i.instance_id())
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }

    /// Create a new item of the given kind. Returns its index.
    pub fn new_item(
        &mut self,
        kind: ResourceKind,
        profiles: Option<&ProfileSet>,
    ) -> Result<usize> {
        let instance = self.next_instance_id();
        let mut item = LogicalItem::new(self.names);
        item.set_property(self.names.instance_id, &instance, profiles)?;
        item.set_property("ResourceType", kind.code(), profiles)?;
        // ovftool rejects Items with no ElementName, so provide a default.
        item.set_property(self.names.element_name, kind.label(), profiles)?;
        item.modified = true;
        info!(
            "Created new {} under profile(s) {:?}, InstanceID {}",
            kind.label(),
            profiles,
            instance
        );
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    /// Clone an item into the given profiles with a fresh InstanceID.
    /// Returns the clone's index.
    pub fn clone_item(
        &mut self,
        parent: usize,
        profiles: &[Profile],
        universe: &[String],
    ) -> Result<usize> {
        let instance = self.next_instance_id();
        let mut clone = self.items[parent].clone();

        // Drop profiles the clone should not cover, so re-setting the
        // InstanceID below cannot leave the old ID alive under a leftover
        // profile.
        for id in universe {
            let p = Profile::id(id.clone());
            if clone.has_profile(&p, universe) && !profiles.contains(&p) {
                clone.remove_profile(&p, true, universe)?;
            }
        }

        let profile_set: ProfileSet = profiles.iter().cloned().collect();
        clone.set_property(self.names.instance_id, &instance, Some(&profile_set))?;
        clone.modified = true;
        debug!("Cloned item as instance {}", instance);
        self.items.push(clone);
        Ok(self.items.len() - 1)
    }

    /// Delete the item at the given index.
    pub fn delete_item(&mut self, index: usize) {
        let instance = self.items[index].instance_id().unwrap_or_default();
        debug!("Deleting item instance {}", instance);
        self.items.remove(index);
    }

    fn item_matches(
        &self,
        item: &LogicalItem,
        kind: Option<ResourceKind>,
        properties: &[(&str, &str)],
        profiles: &[Profile],
        universe: &[String],
    ) -> bool {
        if let Some(kind) = kind {
            if item.resource_kind() != Some(kind) {
                return false;
            }
        }
        for profile in profiles {
            if !item.has_profile(profile, universe) {
                return false;
            }
        }
        for (name, value) in properties {
            if item.raw_value(name, None).as_deref() != Some(*value) {
                return false;
            }
        }
        true
    }

    /// Find all items matching the given kind, property values, and
    /// profiles, in natural instance order.
    pub fn find_all_items(
        &self,
        kind: Option<ResourceKind>,
        properties: &[(&str, &str)],
        profiles: &[Profile],
        universe: &[String],
    ) -> Vec<usize> {
        let matches: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.item_matches(&self.items[i], kind, properties, profiles, universe))
            .collect();
        debug!(
            "Found {} items of kind {:?} with properties {:?} under {:?}",
            matches.len(),
            kind.map(|k| k.label()),
            properties,
            profiles
        );
        matches
    }

    /// Find the single item matching the given filters.
    /// More than one match is a conflict.
    pub fn find_item(
        &self,
        kind: Option<ResourceKind>,
        properties: &[(&str, &str)],
        profile: Option<&Profile>,
        universe: &[String],
    ) -> Result<Option<usize>> {
        let profiles: Vec<Profile> = profile.cloned().into_iter().collect();
        let matches = self.find_all_items(kind, properties, &profiles, universe);
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            n => Err(Error::conflict(format!(
                "found {} matching '{}' items (instances {:?})",
                n,
                kind.map(|k| k.label()).unwrap_or("hardware"),
                matches
                    .iter()
                    .map(|&i| self.items[i].instance_id().unwrap_or_default())
                    .collect::<Vec<_>>()
            ))),
        }
    }

    /// Count items of a kind under each given profile. Items present under
    /// "no profile" count against every profile.
    pub fn item_count_per_profile(
        &self,
        kind: ResourceKind,
        profiles: &[Profile],
        universe: &[String],
    ) -> BTreeMap<Profile, usize> {
        let mut counts: BTreeMap<Profile, usize> =
            profiles.iter().map(|p| (p.clone(), 0)).collect();
        for idx in self.find_all_items(Some(kind), &[], &[], universe) {
            for profile in profiles {
                if self.items[idx].has_profile(profile, universe) {
                    *counts.get_mut(profile).unwrap() += 1;
                }
            }
        }
        counts
    }

    /// Adjust profile membership of existing items toward the desired
    /// count. Returns (per-profile counts, number of items still to
    /// create, index of the last item seen).
    fn update_existing_item_profiles(
        &mut self,
        kind: ResourceKind,
        count: usize,
        profiles: &[Profile],
        universe: &[String],
    ) -> Result<(BTreeMap<Profile, usize>, usize, Option<usize>)> {
        let mut count_dict = self.item_count_per_profile(kind, profiles, universe);
        let mut items_seen: BTreeMap<Profile, usize> =
            profiles.iter().map(|p| (p.clone(), 0)).collect();
        let mut last_item = None;

        // Walk the existing items in order. Once `count` items have been
        // seen under a profile, remove that profile from any further items;
        // profiles that are short adopt items found under other profiles.
        for idx in self.find_all_items(Some(kind), &[], &[], universe) {
            last_item = Some(idx);
            for profile in profiles {
                if self.items[idx].has_profile(profile, universe) {
                    if items_seen[profile] >= count {
                        self.items[idx].remove_profile(profile, true, universe)?;
                    } else {
                        *items_seen.get_mut(profile).unwrap() += 1;
                    }
                } else if count_dict[profile] < count {
                    self.items[idx].add_profile(profile, universe)?;
                    *count_dict.get_mut(profile).unwrap() += 1;
                    *items_seen.get_mut(profile).unwrap() += 1;
                }
            }
        }

        let items_to_add = profiles
            .iter()
            .map(|p| count.saturating_sub(items_seen[p]))
            .max()
            .unwrap_or(0);
        Ok((count_dict, items_to_add, last_item))
    }

    /// Make a freshly cloned item distinct from its parent: bump an
    /// integer AddressOnParent, and give NICs a platform-style name.
    fn update_cloned_item(
        &mut self,
        index: usize,
        profiles: &ProfileSet,
        item_count: usize,
        platform: &dyn Platform,
    ) -> Result<()> {
        let kind = self.items[index].resource_kind();
        if self.items[index].raw_value("Address", None).is_some() {
            return Err(Error::invalid_input(format!(
                "cannot ensure a unique Address value when cloning an item of type {:?}",
                kind.map(|k| k.label())
            )));
        }
        let addresses = self.items[index].all_values("AddressOnParent");
        if addresses.len() > 1 {
            return Err(Error::invalid_input(format!(
                "AddressOnParent varies across profiles ({:?}); cannot clone this item",
                addresses
            )));
        }
        if let Some(address) = addresses.first() {
            let address: u64 = address.parse().map_err(|_| {
                Error::invalid_input(format!(
                    "cannot derive a unique AddressOnParent from non-integer value '{}'",
                    address
                ))
            })?;
            self.items[index].set_property(
                "AddressOnParent",
                &(address + 1).to_string(),
                Some(profiles),
            )?;
        }
        if kind == Some(ResourceKind::Ethernet) {
            let name = platform.guess_nic_name(item_count);
            let element_name = self.names.element_name;
            self.items[index].set_property(element_name, &name, Some(profiles))?;
        }
        Ok(())
    }

    /// Set the number of items of a kind under the given profiles.
    ///
    /// Growth re-uses items that already exist under other profiles before
    /// cloning new ones; shrinking removes the highest-numbered instances
    /// first. Clones get fresh, strictly increasing InstanceIDs.
    pub fn set_item_count_per_profile(
        &mut self,
        kind: ResourceKind,
        count: usize,
        profiles: Option<&[Profile]>,
        universe: &[String],
        platform: &dyn Platform,
    ) -> Result<()> {
        let profiles: Vec<Profile> = match profiles {
            Some(p) => p.to_vec(),
            None => default_profile_list(universe),
        };
        let (mut count_dict, mut items_to_add, mut last_item) =
            self.update_existing_item_profiles(kind, count, &profiles, universe)?;

        debug!("Creating {} new {} items", items_to_add, kind.label());
        while items_to_add > 0 {
            let new_item_profiles: Vec<Profile> = profiles
                .iter()
                .filter(|p| count_dict[p] < count)
                .cloned()
                .collect();
            for p in &new_item_profiles {
                *count_dict.get_mut(p).unwrap() += 1;
            }
            let new_set: ProfileSet = new_item_profiles.iter().cloned().collect();
            let new_index = match last_item {
                None => {
                    warn!(
                        "No existing items of type {} found; creating from scratch",
                        kind.label()
                    );
                    self.new_item(kind, Some(&new_set))?
                }
                Some(parent) => self.clone_item(parent, &new_item_profiles, universe)?,
            };
            let item_count = count_dict[&new_item_profiles[0]];
            self.update_cloned_item(new_index, &new_set, item_count, platform)?;
            last_item = Some(new_index);
            items_to_add -= 1;
        }
        Ok(())
    }

    /// Set a property to one value across all items of a kind.
    ///
    /// With no matching items: creates one when `create_new` is set,
    /// otherwise logs a warning and does nothing.
    pub fn set_value_for_all_items(
        &mut self,
        kind: ResourceKind,
        name: &str,
        value: &str,
        profiles: Option<&ProfileSet>,
        create_new: bool,
        universe: &[String],
    ) -> Result<()> {
        let mut indices = self.find_all_items(Some(kind), &[], &[], universe);
        if indices.is_empty() {
            if !create_new {
                warn!("No items of type {} found; nothing to do", kind.label());
                return Ok(());
            }
            warn!(
                "No existing items of type {} found; creating from scratch",
                kind.label()
            );
            indices.push(self.new_item(kind, profiles)?);
        }
        for idx in indices {
            self.items[idx].set_property(name, value, profiles)?;
        }
        debug!(
            "Updated {} {} to {} under profiles {:?}",
            kind.label(),
            name,
            value,
            profiles
        );
        Ok(())
    }

    /// Set per-item values for a property across items of a kind: the Nth
    /// item takes the Nth value, with `default` covering any excess items.
    pub fn set_item_values_per_profile(
        &mut self,
        kind: ResourceKind,
        name: &str,
        values: &[String],
        profiles: Option<&[Profile]>,
        default: Option<&str>,
        universe: &[String],
    ) -> Result<()> {
        let profiles: Vec<Profile> = match profiles {
            Some(p) => p.to_vec(),
            None => default_profile_list(universe),
        };
        let mut remaining = values.iter();
        let mut used = 0usize;
        for idx in self.find_all_items(Some(kind), &[], &[], universe) {
            let value = match remaining.next() {
                Some(v) => {
                    used += 1;
                    Some(v.as_str())
                }
                None => default,
            };
            let Some(value) = value else { continue };
            for profile in &profiles {
                if self.items[idx].has_profile(profile, universe) {
                    let p_set: ProfileSet = [profile.clone()].into_iter().collect();
                    self.items[idx].set_property(name, value, Some(&p_set))?;
                }
            }
        }
        if used < values.len() {
            warn!(
                "Not all {} {} values were used; {:?} left over",
                kind.label(),
                name,
                &values[used..]
            );
        }
        Ok(())
    }

    /// The ResourceSubType shared by all items of a kind, if they agree.
    pub fn common_subtype(&self, kind: ResourceKind, universe: &[String]) -> Option<String> {
        let mut common: Option<String> = None;
        for idx in self.find_all_items(Some(kind), &[], &[], universe) {
            let subtype = self.items[idx].raw_value("ResourceSubType", None)?;
            match &common {
                None => common = Some(subtype),
                Some(existing) if *existing == subtype => {}
                Some(_) => return None,
            }
        }
        common
    }
}

/// The profile list meaning "everywhere": every declared profile plus the
/// default remainder.
pub fn default_profile_list(universe: &[String]) -> Vec<Profile> {
    let mut list: Vec<Profile> = universe.iter().map(|p| Profile::id(p.clone())).collect();
    list.push(Profile::Default);
    list
}

/// Indentation prefix of the section's own line, for reindenting after
/// regeneration.
fn section_indent(section: &Element) -> String {
    let candidate = section
        .nodes
        .last()
        .and_then(|n| match n {
            crate::xml::Node::Element(e) => e.tail.clone(),
            crate::xml::Node::Comment(c) => c.tail.clone(),
        })
        .or_else(|| section.tail.clone())
        .unwrap_or_default();
    match candidate.rfind('\n') {
        Some(pos) => candidate[pos + 1..].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NS_RASD;
    use crate::platform;
    use crate::xml::parse_fragment;

    const UNIVERSE: &[&str] = &["1CPU-1GB", "2CPU-2GB", "4CPU-4GB"];

    fn universe() -> Vec<String> {
        UNIVERSE.iter().map(|s| s.to_string()).collect()
    }

    fn section() -> Element {
        parse_fragment(concat!(
            r#"<ovf:VirtualHardwareSection xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" "#,
            r#"xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData">"#,
            "<ovf:Info>Virtual hardware requirements</ovf:Info>",
            "<ovf:Item>",
            "<rasd:Description>Number of Virtual CPUs</rasd:Description>",
            "<rasd:ElementName>1 virtual CPU(s)</rasd:ElementName>",
            "<rasd:InstanceID>1</rasd:InstanceID>",
            "<rasd:ResourceType>3</rasd:ResourceType>",
            "<rasd:VirtualQuantity>1</rasd:VirtualQuantity>",
            "</ovf:Item>",
            r#"<ovf:Item ovf:configuration="2CPU-2GB">"#,
            "<rasd:Description>Number of Virtual CPUs</rasd:Description>",
            "<rasd:ElementName>2 virtual CPU(s)</rasd:ElementName>",
            "<rasd:InstanceID>1</rasd:InstanceID>",
            "<rasd:ResourceType>3</rasd:ResourceType>",
            "<rasd:VirtualQuantity>2</rasd:VirtualQuantity>",
            "</ovf:Item>",
            "<ovf:Item>",
            "<rasd:AllocationUnits>byte * 2^20</rasd:AllocationUnits>",
            "<rasd:ElementName>1024 MB of memory</rasd:ElementName>",
            "<rasd:InstanceID>2</rasd:InstanceID>",
            "<rasd:ResourceType>4</rasd:ResourceType>",
            "<rasd:VirtualQuantity>1024</rasd:VirtualQuantity>",
            "</ovf:Item>",
            "<ovf:Item>",
            "<rasd:Address>0</rasd:Address>",
            "<rasd:ElementName>SCSI Controller 0</rasd:ElementName>",
            "<rasd:InstanceID>3</rasd:InstanceID>",
            "<rasd:ResourceSubType>lsilogic</rasd:ResourceSubType>",
            "<rasd:ResourceType>6</rasd:ResourceType>",
            "</ovf:Item>",
            "<ovf:Item>",
            "<rasd:AddressOnParent>0</rasd:AddressOnParent>",
            "<rasd:Connection>GigabitEthernet1</rasd:Connection>",
            "<rasd:ElementName>GigabitEthernet1</rasd:ElementName>",
            "<rasd:InstanceID>11</rasd:InstanceID>",
            "<rasd:ResourceSubType>VMXNET3</rasd:ResourceSubType>",
            "<rasd:ResourceType>10</rasd:ResourceType>",
            "</ovf:Item>",
            "</ovf:VirtualHardwareSection>",
        ))
        .unwrap()
    }

    fn hardware() -> Hardware {
        Hardware::from_section(&section(), &universe(), OvfVersion::V1).unwrap()
    }

    #[test]
    fn test_ingest_groups_by_instance() {
        let hw = hardware();
        // 5 flat Items, but instance 1 appears twice.
        assert_eq!(hw.len(), 4);
        let cpu = hw.find_all_items(Some(ResourceKind::Cpu), &[], &[], &universe());
        assert_eq!(cpu.len(), 1);
        let item = hw.item(cpu[0]);
        assert_eq!(
            item.raw_value("VirtualQuantity", Some(&profile_set(["2CPU-2GB"]))),
            Some("2".to_string())
        );
        assert_eq!(
            item.raw_value("VirtualQuantity", Some(&profile_set(["1CPU-1GB"]))),
            Some("1".to_string())
        );
    }

    #[test]
    fn test_ingest_rejects_unknown_profile() {
        let mut sec = section();
        let extra = parse_fragment(concat!(
            r#"<ovf:Item xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" "#,
            r#"xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData" "#,
            r#"ovf:configuration="8CPU-8GB">"#,
            "<rasd:InstanceID>99</rasd:InstanceID>",
            "<rasd:ResourceType>3</rasd:ResourceType>",
            "</ovf:Item>",
        ))
        .unwrap();
        sec.add_child(extra);
        let err = Hardware::from_section(&sec, &universe(), OvfVersion::V1).unwrap_err();
        assert!(err.to_string().contains("8CPU-8GB"));
    }

    #[test]
    fn test_update_section_no_change_is_noop() {
        let mut sec = section();
        let before = crate::xml::element_to_string(&sec);
        let mut hw = Hardware::from_section(&sec, &universe(), OvfVersion::V1).unwrap();
        hw.update_section(&mut sec).unwrap();
        assert_eq!(crate::xml::element_to_string(&sec), before);
    }

    #[test]
    fn test_update_section_after_edit() {
        let mut sec = section();
        let mut hw = Hardware::from_section(&sec, &universe(), OvfVersion::V1).unwrap();
        let mem = hw.find_all_items(Some(ResourceKind::Memory), &[], &[], &universe())[0];
        hw.item_mut(mem)
            .set_property("VirtualQuantity", "8192", Some(&profile_set(["4CPU-4GB"])))
            .unwrap();
        hw.update_section(&mut sec).unwrap();

        // Memory now has two flat Items: generic and 4CPU-4GB-scoped.
        let memory_items: Vec<&Element> = sec
            .child_elements()
            .filter(|e| {
                e.local == "Item"
                    && e.find_child(NS_RASD.uri, "ResourceType")
                        .is_some_and(|rt| rt.text_content() == "4")
            })
            .collect();
        assert_eq!(memory_items.len(), 2);
        let scoped: Vec<_> = memory_items
            .iter()
            .filter(|e| {
                e.attr("http://schemas.dmtf.org/ovf/envelope/1", "configuration")
                    == Some("4CPU-4GB")
            })
            .collect();
        assert_eq!(scoped.len(), 1);
        assert_eq!(
            scoped[0]
                .find_child(NS_RASD.uri, "VirtualQuantity")
                .unwrap()
                .text_content(),
            "8192"
        );
    }

    #[test]
    fn test_next_instance_id_is_strictly_monotonic() {
        let mut hw = hardware();
        assert_eq!(hw.next_instance_id(), "12");
        let idx = hw.new_item(ResourceKind::Serial, None).unwrap();
        assert_eq!(hw.item(idx).instance_id(), Some("12".to_string()));
        assert_eq!(hw.next_instance_id(), "13");
    }

    #[test]
    fn test_clone_item_gets_fresh_instance_and_bumped_address() {
        let mut hw = hardware();
        let u = universe();
        let platform = platform::for_product_class(Some("com.cisco.csr1000v"));
        let nic = hw.find_all_items(Some(ResourceKind::Ethernet), &[], &[], &u)[0];
        let profiles = default_profile_list(&u);
        let clone = hw.clone_item(nic, &profiles, &u).unwrap();
        let p_set: ProfileSet = profiles.iter().cloned().collect();
        hw.update_cloned_item(clone, &p_set, 2, platform).unwrap();

        assert_eq!(hw.item(clone).instance_id(), Some("12".to_string()));
        assert_eq!(
            hw.item(clone).raw_value("AddressOnParent", None),
            Some("1".to_string())
        );
        assert_eq!(
            hw.item(clone)
                .value("ElementName", None)
                .unwrap(),
            Some("GigabitEthernet2".to_string())
        );
    }

    #[test]
    fn test_set_item_count_grows_nics() {
        let mut hw = hardware();
        let u = universe();
        let platform = platform::for_product_class(Some("com.cisco.csr1000v"));
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 3, None, &u, platform)
            .unwrap();
        let nics = hw.find_all_items(Some(ResourceKind::Ethernet), &[], &[], &u);
        assert_eq!(nics.len(), 3);
        // New NICs take increasing instance IDs and addresses.
        let ids: Vec<String> = nics
            .iter()
            .map(|&i| hw.item(i).instance_id().unwrap())
            .collect();
        assert_eq!(ids, vec!["11", "12", "13"]);
        let addresses: Vec<String> = nics
            .iter()
            .map(|&i| hw.item(i).raw_value("AddressOnParent", None).unwrap())
            .collect();
        assert_eq!(addresses, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_set_item_count_shrinks_per_profile() {
        let mut hw = hardware();
        let u = universe();
        let platform = platform::for_product_class(None);
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 3, None, &u, platform)
            .unwrap();
        // Now reduce to 1 under a single profile only.
        hw.set_item_count_per_profile(
            ResourceKind::Ethernet,
            1,
            Some(&[Profile::id("1CPU-1GB")]),
            &u,
            platform,
        )
        .unwrap();
        let counts = hw.item_count_per_profile(
            ResourceKind::Ethernet,
            &default_profile_list(&u),
            &u,
        );
        assert_eq!(counts[&Profile::id("1CPU-1GB")], 1);
        assert_eq!(counts[&Profile::id("2CPU-2GB")], 3);
    }

    #[test]
    fn test_set_item_count_creates_from_scratch() {
        let mut sec = parse_fragment(concat!(
            r#"<ovf:VirtualHardwareSection xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">"#,
            "<ovf:Info>Hardware</ovf:Info>",
            "</ovf:VirtualHardwareSection>",
        ))
        .unwrap();
        let u: Vec<String> = Vec::new();
        let mut hw = Hardware::from_section(&sec, &u, OvfVersion::V1).unwrap();
        let platform = platform::for_product_class(None);
        hw.set_item_count_per_profile(ResourceKind::Cpu, 1, None, &u, platform)
            .unwrap();
        assert_eq!(
            hw.find_all_items(Some(ResourceKind::Cpu), &[], &[], &u).len(),
            1
        );
        hw.update_section(&mut sec).unwrap();
        assert!(sec
            .child_elements()
            .any(|e| e.local == "Item"));
    }

    #[test]
    fn test_set_value_for_all_items_missing_without_create() {
        let mut hw = hardware();
        let u = universe();
        // No serial items exist; without create_new this is a no-op.
        hw.set_value_for_all_items(ResourceKind::Serial, "VirtualQuantity", "1", None, false, &u)
            .unwrap();
        assert!(hw
            .find_all_items(Some(ResourceKind::Serial), &[], &[], &u)
            .is_empty());
    }

    #[test]
    fn test_set_item_values_per_profile_with_default() {
        let mut hw = hardware();
        let u = universe();
        let platform = platform::for_product_class(None);
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 3, None, &u, platform)
            .unwrap();
        hw.set_item_values_per_profile(
            ResourceKind::Ethernet,
            "Connection",
            &["net1".to_string()],
            None,
            Some("net1"),
            &u,
        )
        .unwrap();
        for idx in hw.find_all_items(Some(ResourceKind::Ethernet), &[], &[], &u) {
            assert_eq!(
                hw.item(idx).raw_value("Connection", None),
                Some("net1".to_string())
            );
        }
    }

    #[test]
    fn test_common_subtype() {
        let hw = hardware();
        let u = universe();
        assert_eq!(
            hw.common_subtype(ResourceKind::ScsiController, &u),
            Some("lsilogic".to_string())
        );
        assert_eq!(hw.common_subtype(ResourceKind::Serial, &u), None);
    }

    #[test]
    fn test_find_item_multiple_is_conflict() {
        let mut hw = hardware();
        let u = universe();
        let platform = platform::for_product_class(None);
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 2, None, &u, platform)
            .unwrap();
        let err = hw
            .find_item(Some(ResourceKind::Ethernet), &[], None, &u)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }
}

//! Logical hardware items.
//!
//! A [`LogicalItem`] aggregates every `Item` element that shares an
//! InstanceID: one conceptual device whose attribute values may differ per
//! configuration profile. Internally it is a map from attribute name to
//! (value -> profile-set), where the special [`Profile::Default`] member
//! stands for "every profile not covered by an explicit entry". Keeping
//! values as map keys makes factorization minimality structural: two
//! entries of one attribute can never share a value.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::names::{ItemNames, OvfVersion, ResourceKind, ITEM_CHILD_ORDER};
use crate::validation::{natural_cmp, natural_sort};
use crate::xml::{element_to_string, parse_fragment, Attr, Element, NsDecl};

/// Marker appended to property keys holding attributes of the Item element
/// itself (e.g. `ovf:required`).
const ATTRIB_KEY_SUFFIX: &str = " {item attribute}";
/// Marker appended to property keys holding whole non-standard child
/// elements, preserved verbatim.
const ELEMENT_KEY_SUFFIX: &str = " {custom element}";
/// Separator inside property keys holding attributes of child elements.
const CHILD_ATTRIB_MARK: &str = "_attrib_";

/// Names of the OVF attributes on Item elements.
const CONFIG_ATTR: &str = "configuration";

/// Placeholders for values that embed other attribute values. They are
/// substituted back at read/emit time so that, e.g., renaming a NIC's
/// network keeps its display name coherent.
const WILDCARD_VIRTUAL_QUANTITY: &str = "_VQ_";
const WILDCARD_RESOURCE_SUB_TYPE: &str = "_RST_";
const WILDCARD_CONNECTION: &str = "_CONN_";
const WILDCARD_ELEMENT_NAME: &str = "_EN_";

/// One configuration profile, or the implicit remainder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Profile {
    /// Applies to every profile not covered by an explicit sibling entry.
    Default,
    /// A specific profile ID from the DeploymentOptionSection.
    Id(String),
}

impl Profile {
    pub fn id(id: impl Into<String>) -> Self {
        Profile::Id(id.into())
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Profile::Default => None,
            Profile::Id(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Default => f.write_str("<default>"),
            Profile::Id(id) => f.write_str(id),
        }
    }
}

/// A set of profiles an attribute value applies to.
pub type ProfileSet = BTreeSet<Profile>;

/// Build a profile set from IDs.
pub fn profile_set<I, S>(ids: I) -> ProfileSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(|s| Profile::Id(s.into())).collect()
}

/// The set containing only the default sentinel: "all profiles".
pub fn all_profiles_set() -> ProfileSet {
    let mut set = ProfileSet::new();
    set.insert(Profile::Default);
    set
}

/// Render a profile set as an `ovf:configuration` string. The default
/// sentinel renders as the empty string (attribute omitted).
pub fn profile_set_string(set: &ProfileSet) -> String {
    if set.contains(&Profile::Default) {
        return String::new();
    }
    let mut ids: Vec<&str> = set.iter().filter_map(Profile::as_id).collect();
    natural_sort(&mut ids);
    ids.join(" ")
}

/// A logical hardware device: all Items sharing one InstanceID.
#[derive(Debug, Clone)]
pub struct LogicalItem {
    /// properties\[name\]\[value\] = set of profiles using that value.
    properties: BTreeMap<String, BTreeMap<String, ProfileSet>>,
    names: ItemNames,
    pub modified: bool,
}

impl LogicalItem {
    pub fn new(names: ItemNames) -> Self {
        Self {
            properties: BTreeMap::new(),
            names,
            modified: false,
        }
    }

    /// Property names currently known to this item.
    pub fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    /// All values stored for a property, ignoring profiles. ResourceSubType
    /// entries are split on spaces, since the descriptor allows a
    /// space-separated list there.
    pub fn all_values(&self, name: &str) -> Vec<String> {
        let Some(value_map) = self.properties.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<String> = Vec::new();
        for value in value_map.keys() {
            if name == "ResourceSubType" {
                for part in value.split_whitespace() {
                    if !out.iter().any(|v| v == part) {
                        out.push(part.to_string());
                    }
                }
            } else if !out.iter().any(|v| v == value) {
                out.push(value.clone());
            }
        }
        out
    }

    /// Union of all profile sets under which this property has a value.
    pub fn all_profiles(&self, name: &str) -> Option<ProfileSet> {
        let value_map = self.properties.get(name)?;
        if value_map.is_empty() {
            return None;
        }
        let mut union = ProfileSet::new();
        for set in value_map.values() {
            union.extend(set.iter().cloned());
        }
        Some(union)
    }

    /// The InstanceID, if set. Stored as a string; descriptor IDs are
    /// numeric in practice but the format does not require it.
    pub fn instance_id(&self) -> Option<String> {
        self.raw_value(self.names.instance_id, None)
    }

    /// The device kind, decoded from the ResourceType code.
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        self.raw_value("ResourceType", None)
            .and_then(|code| ResourceKind::from_code(&code))
    }

    /// Whether this item exists under the given profile.
    pub fn has_profile(&self, profile: &Profile, universe: &[String]) -> bool {
        let Some(profiles) = self.all_profiles(self.names.instance_id) else {
            return false;
        };
        if profiles.contains(profile) {
            return true;
        }
        match profile {
            Profile::Default => false,
            Profile::Id(id) => {
                profiles.contains(&Profile::Default) && universe.iter().any(|p| p == id)
            }
        }
    }

    /// Ingest one flat `Item` element scoped to the given profiles.
    ///
    /// Fails with a conflict if the element disagrees with data already
    /// ingested for this InstanceID.
    pub fn ingest_element(&mut self, item: &Element, profiles: &ProfileSet) -> Result<()> {
        debug!("Ingesting {} element", item.local);
        // Attributes of the Item element itself (except the profile scope).
        for attr in &item.attrs {
            if attr.local == CONFIG_ATTR || attr.is_xmlns() {
                continue;
            }
            let key = format!("{}{}", attr.raw_name(), ATTRIB_KEY_SUFFIX);
            self.set_property_impl(&key, &attr.value, Some(profiles), false)?;
        }

        // Children, with ElementName saved for last and Description after
        // it: both may embed values of other children (VirtualQuantity,
        // ResourceSubType, Connection) that must be known before the
        // wildcard capture runs.
        let mut children: Vec<&Element> = item.child_elements().collect();
        children.sort_by_key(|c| match c.local.as_str() {
            name if name == self.names.element_name => 1,
            "Description" => 2,
            _ => 0,
        });

        for child in children {
            if !ITEM_CHILD_ORDER.contains(&child.local.as_str()) {
                // Non-standard elements (e.g. vmw:Config) may legally repeat
                // with distinguishing attributes; rather than guess their
                // identity rules, preserve each verbatim.
                let serialized = element_to_string(child);
                let key = format!("{}{}", serialized, ELEMENT_KEY_SUFFIX);
                self.set_property_impl(&key, &serialized, Some(profiles), false)?;
                continue;
            }
            self.set_property_impl(&child.local, child.text_content(), Some(profiles), false)?;
            for attr in &child.attrs {
                if attr.is_xmlns() {
                    continue;
                }
                let key = format!(
                    "{}{}{}",
                    child.local,
                    CHILD_ATTRIB_MARK,
                    attr.raw_name()
                );
                self.set_property_impl(&key, &attr.value, Some(profiles), false)?;
            }
        }
        self.modified = true;
        self.validate_and_clean()
    }

    /// Store a value for a property under the given profiles, overwriting
    /// prior values for those profiles.
    ///
    /// With `profiles` of `None`: if the property exists, every profile it
    /// currently covers is updated; otherwise the value applies to all
    /// profiles.
    pub fn set_property(
        &mut self,
        name: &str,
        value: &str,
        profiles: Option<&ProfileSet>,
    ) -> Result<()> {
        self.set_property_impl(name, value, profiles, true)
    }

    fn set_property_impl(
        &mut self,
        name: &str,
        value: &str,
        profiles: Option<&ProfileSet>,
        overwrite: bool,
    ) -> Result<()> {
        let profiles: ProfileSet = match profiles {
            Some(p) => p.clone(),
            None => self
                .all_profiles(name)
                .unwrap_or_else(all_profiles_set),
        };
        let value = self.value_add_wildcards(name, value, &profiles);
        debug!("Setting {} to '{}' under {:?}", name, value, profiles);

        if !self.properties.contains_key(name) {
            // New property.
            if value.is_empty() {
                return Ok(());
            }
            let stored_profiles = if profiles.contains(&Profile::Default) {
                all_profiles_set()
            } else {
                profiles
            };
            self.properties
                .entry(name.to_string())
                .or_default()
                .insert(value, stored_profiles);
            self.modified = true;
            return self.validate_and_clean();
        }

        let value_map = self.properties.get_mut(name).unwrap();
        let known_values: Vec<String> = value_map.keys().cloned().collect();
        for known_value in known_values {
            let profile_set = value_map.get(&known_value).unwrap().clone();
            if !overwrite && !profile_set.is_disjoint(&profiles) {
                return Err(Error::conflict(format!(
                    "value '{}' for '{}' under profiles {:?} conflicts with \
                     existing value '{}' under overlapping profiles",
                    value, name, profiles, known_value
                )));
            }
            let mut new_set = profile_set.clone();
            if known_value != value {
                // These profiles no longer use the old value.
                for p in &profiles {
                    new_set.remove(p);
                }
            } else if profile_set.contains(&Profile::Default) {
                // Already covered implicitly by the default entry.
            } else {
                new_set.extend(profiles.iter().cloned());
            }
            if new_set != profile_set {
                self.modified = true;
                if new_set.is_empty() {
                    debug!("No longer any profiles with value '{}'", known_value);
                    value_map.remove(&known_value);
                } else {
                    value_map.insert(known_value, new_set);
                }
            }
        }

        if !value.is_empty() && !value_map.contains_key(&value) {
            value_map.insert(value, profiles);
            self.modified = true;
        } else if value_map.is_empty() {
            debug!("No longer any values saved for {}", name);
            self.properties.remove(name);
            self.modified = true;
        }

        if self.modified {
            self.validate_and_clean()?;
        }
        Ok(())
    }

    /// Replace embedded attribute values with wildcard placeholders in
    /// names/descriptions, so dependent text regenerates when the
    /// referenced attribute changes.
    fn value_add_wildcards(&self, name: &str, value: &str, profiles: &ProfileSet) -> String {
        let mut value = value.to_string();
        if name == self.names.element_name || name == "Description" {
            if let Some(vq) = self.raw_value("VirtualQuantity", Some(profiles)) {
                if !vq.is_empty() {
                    value = value.replace(&vq, WILDCARD_VIRTUAL_QUANTITY);
                }
            }
            if let Some(rst) = self.raw_value("ResourceSubType", Some(profiles)) {
                if !rst.is_empty() {
                    value = value.replace(&rst, WILDCARD_RESOURCE_SUB_TYPE);
                }
            }
            if let Some(conn) = self.raw_value("Connection", Some(profiles)) {
                if !conn.is_empty() {
                    value = value.replace(&conn, WILDCARD_CONNECTION);
                }
            }
        }
        if name == "Description" {
            if let Some(en) = self.raw_value(self.names.element_name, Some(profiles)) {
                if !en.is_empty() {
                    value = value.replace(&en, WILDCARD_ELEMENT_NAME);
                }
            }
        }
        value
    }

    /// Substitute wildcard placeholders with the current attribute values.
    fn value_replace_wildcards(
        &self,
        name: &str,
        value: Option<String>,
        profiles: Option<&ProfileSet>,
    ) -> Option<String> {
        let mut value = value?;
        if name == self.names.element_name || name == "Description" {
            // ElementName first: it may itself embed further wildcards.
            if name == "Description" && value.contains(WILDCARD_ELEMENT_NAME) {
                if let Some(en) = self.raw_value(self.names.element_name, profiles) {
                    value = value.replace(WILDCARD_ELEMENT_NAME, &en);
                }
            }
            if let Some(rst) = self.raw_value("ResourceSubType", profiles) {
                value = value.replace(WILDCARD_RESOURCE_SUB_TYPE, &rst);
            }
            if let Some(vq) = self.raw_value("VirtualQuantity", profiles) {
                value = value.replace(WILDCARD_VIRTUAL_QUANTITY, &vq);
            }
            if let Some(conn) = self.raw_value("Connection", profiles) {
                value = value.replace(WILDCARD_CONNECTION, &conn);
            }
        }
        Some(value)
    }

    /// The stored value string, without wildcard substitution.
    ///
    /// With `profiles` of `None`, returns the value only when a single one
    /// exists. With a profile set, returns the value when one entry covers
    /// the whole set (directly or via the default), `None` when the value
    /// differs across the requested profiles.
    pub fn raw_value(&self, name: &str, profiles: Option<&ProfileSet>) -> Option<String> {
        let value_map = self.properties.get(name)?;
        let profiles = match profiles {
            None => {
                return if value_map.len() == 1 {
                    value_map.keys().next().cloned()
                } else {
                    None
                };
            }
            Some(p) => p,
        };
        let mut default_val = None;
        for (val, prof) in value_map {
            if prof.is_superset(profiles) {
                return Some(val.clone());
            }
            if prof.contains(&Profile::Default) {
                default_val = Some(val.clone());
            } else if !prof.is_disjoint(profiles) {
                return None;
            }
        }
        default_val
    }

    /// The value for a property under the given profiles, with wildcard
    /// placeholders substituted.
    pub fn value(&self, name: &str, profiles: Option<&ProfileSet>) -> Result<Option<String>> {
        let raw = self.raw_value(name, profiles);
        let val = self.value_replace_wildcards(name, raw, profiles);
        if name == self.names.element_name || name == "Description" {
            if let Some(v) = &val {
                if [
                    WILDCARD_VIRTUAL_QUANTITY,
                    WILDCARD_RESOURCE_SUB_TYPE,
                    WILDCARD_CONNECTION,
                    WILDCARD_ELEMENT_NAME,
                ]
                .iter()
                .any(|w| v.contains(w))
                {
                    return Err(Error::internal(format!(
                        "unreplaced wildcard in value for {}: '{}'",
                        name, v
                    )));
                }
            }
        }
        Ok(val)
    }

    /// Extend this item to a new profile, cloning its current values.
    pub fn add_profile(&mut self, new_profile: &Profile, universe: &[String]) -> Result<()> {
        if self.has_profile(new_profile, universe) {
            warn!("Profile {} already exists under this item", new_profile);
            return Ok(());
        }
        let p_set: ProfileSet = [new_profile.clone()].into_iter().collect();
        let mut to_set: Vec<(String, String)> = Vec::new();
        for (name, value_map) in &self.properties {
            if value_map.is_empty() {
                continue;
            }
            let chosen = value_map
                .iter()
                .find(|(_, profiles)| {
                    profiles.contains(&Profile::Default) || value_map.len() == 1
                })
                .map(|(value, _)| value.clone());
            match chosen {
                Some(value) => to_set.push((name.clone(), value)),
                None => {
                    return Err(Error::internal(format!(
                        "cannot decide which value of '{}' to clone for profile {}",
                        name, new_profile
                    )))
                }
            }
        }
        for (name, value) in to_set {
            self.set_property(&name, &value, Some(&p_set))?;
        }
        self.modified = true;
        self.validate_and_clean()
    }

    /// Remove all trace of a profile from this item.
    ///
    /// With `split_default` set, entries covering the implicit default are
    /// rewritten as the explicit list of remaining profiles so the removed
    /// profile is genuinely excluded. Pass false when the profile is being
    /// deleted from the whole descriptor and the default can keep covering
    /// the remainder.
    pub fn remove_profile(
        &mut self,
        profile: &Profile,
        split_default: bool,
        universe: &[String],
    ) -> Result<()> {
        if !self.has_profile(profile, universe) {
            warn!("Profile {} not present under this item", profile);
            return Ok(());
        }
        for value_map in self.properties.values_mut() {
            let values: Vec<String> = value_map.keys().cloned().collect();
            for value in &values {
                let mut profiles = value_map.get(value).unwrap().clone();
                profiles.remove(profile);
                if profiles.contains(&Profile::Default)
                    && split_default
                    && *profile != Profile::Default
                {
                    // Expand the implicit remainder into an explicit list
                    // that excludes this profile and anything claimed by
                    // sibling values.
                    profiles.remove(&Profile::Default);
                    for id in universe {
                        if Some(id.as_str()) != profile.as_id() {
                            profiles.insert(Profile::id(id.clone()));
                        }
                    }
                    for (other_value, other_profiles) in value_map.iter() {
                        if other_value == value {
                            continue;
                        }
                        for p in other_profiles {
                            profiles.remove(p);
                        }
                    }
                }
                if profiles.is_empty() {
                    value_map.remove(value);
                } else {
                    value_map.insert(value.clone(), profiles);
                }
            }
        }
        self.properties.retain(|_, m| !m.is_empty());
        self.modified = true;
        self.validate_and_clean()
    }

    /// Restrict this item to the given profiles: attribute entries not
    /// covering any of them are dropped, and an entry that covers all of
    /// them is relabeled as the implicit default so the emitted Item loses
    /// its `configuration` attribute. Used after deleting all other
    /// profiles from the descriptor.
    pub fn retain_profiles(&mut self, keep: &[String]) -> Result<()> {
        if keep.is_empty() {
            return Ok(());
        }
        let names = self.property_names();
        for name in names {
            let mut new_map: BTreeMap<String, ProfileSet> = BTreeMap::new();
            for id in keep {
                let p_set: ProfileSet = [Profile::id(id.clone())].into_iter().collect();
                if let Some(value) = self.raw_value(&name, Some(&p_set)) {
                    new_map
                        .entry(value)
                        .or_default()
                        .insert(Profile::id(id.clone()));
                }
            }
            for profiles in new_map.values_mut() {
                if keep
                    .iter()
                    .all(|id| profiles.contains(&Profile::Id(id.clone())))
                {
                    profiles.clear();
                    profiles.insert(Profile::Default);
                }
            }
            if new_map.is_empty() {
                self.properties.remove(&name);
            } else {
                self.properties.insert(name, new_map);
            }
        }
        self.modified = true;
        self.validate_and_clean()
    }

    /// Verify internal consistency, repairing redundancy where possible.
    ///
    /// An item must have a single InstanceID and ResourceType, and for each
    /// property the profile sets must be pairwise disjoint. Violations are
    /// internal errors: the engine should never produce them.
    pub fn validate_and_clean(&mut self) -> Result<()> {
        for name in [self.names.instance_id, "ResourceType"] {
            if let Some(value_map) = self.properties.get(name) {
                if value_map.len() > 1 {
                    return Err(Error::internal(format!(
                        "item illegally contains multiple {} values: {:?}",
                        name,
                        value_map.keys().collect::<Vec<_>>()
                    )));
                }
            }
        }
        for (name, value_map) in self.properties.iter_mut() {
            let mut seen = ProfileSet::new();
            for (value, profile_set) in value_map.iter_mut() {
                if profile_set.contains(&Profile::Default) && profile_set.len() > 1 {
                    debug!(
                        "Profile set for {}='{}' contains redundant entries; cleaning",
                        name, value
                    );
                    profile_set.clear();
                    profile_set.insert(Profile::Default);
                }
                if !seen.is_disjoint(profile_set) {
                    return Err(Error::internal(format!(
                        "item attribute '{}' has overlapping profile sets",
                        name
                    )));
                }
                seen.extend(profile_set.iter().cloned());
            }
        }
        Ok(())
    }

    /// Partition the profile universe into the minimal set of shards such
    /// that every attribute is single-valued within each shard. One flat
    /// Item element is emitted per shard.
    pub fn nonintersecting_profile_sets(&self) -> Vec<ProfileSet> {
        let mut set_list: Vec<ProfileSet> = Vec::new();
        for value_map in self.properties.values() {
            for profiles in value_map.values() {
                let mut new_set = profiles.clone();
                let mut new_list: Vec<ProfileSet> = Vec::new();
                for existing in set_list {
                    if new_set == existing || new_set.is_disjoint(&existing) {
                        new_list.push(existing);
                        continue;
                    }
                    // Re-partition the overlap.
                    let only_existing: ProfileSet =
                        existing.difference(&new_set).cloned().collect();
                    let both: ProfileSet = existing.intersection(&new_set).cloned().collect();
                    new_list.push(only_existing);
                    new_list.push(both);
                    new_set = new_set.difference(&existing).cloned().collect();
                }
                new_list.push(new_set);
                new_list.retain(|s| !s.is_empty());
                new_list.sort();
                new_list.dedup();
                set_list = new_list;
            }
        }
        set_list.sort_by(|a, b| natural_cmp(&profile_set_string(a), &profile_set_string(b)));
        set_list
    }

    /// Emit the flat Item elements for this logical item.
    pub fn generate_elements(
        &self,
        version: OvfVersion,
        ovf_ns: NsDecl,
    ) -> Result<Vec<Element>> {
        let kind = self.resource_kind();
        let item_ns = kind
            .map(|k| k.item_ns(version))
            .unwrap_or(crate::names::NS_RASD);
        let item_tag = kind.map(|k| k.item_tag(version)).unwrap_or("Item");

        let mut elements = Vec::new();
        for shard in self.nonintersecting_profile_sets() {
            let mut item = Element::new(ovf_ns, item_tag);
            let config_string = profile_set_string(&shard);
            if !config_string.is_empty() {
                item.set_attr(ovf_ns, CONFIG_ATTR, &config_string);
            }
            let lookup_set = if config_string.is_empty() {
                all_profiles_set()
            } else {
                shard.clone()
            };
            for name in self.property_names() {
                let Some(val) = self.value(&name, Some(&lookup_set))? else {
                    debug!(
                        "No value for attribute '{}' under profile set '{}'",
                        name, config_string
                    );
                    continue;
                };
                if val.is_empty() {
                    continue;
                }
                if let Some(attr_name) = name.strip_suffix(ATTRIB_KEY_SUFFIX) {
                    item.attrs.push(raw_attr(attr_name, &val));
                } else if name.ends_with(ELEMENT_KEY_SUFFIX) {
                    let fragment = parse_fragment(&val).map_err(|e| {
                        Error::internal(format!("stored custom element no longer parses: {}", e))
                    })?;
                    item.add_child(fragment);
                } else if let Some((child_tag, attr_name)) = name.split_once(CHILD_ATTRIB_MARK) {
                    let child =
                        item.set_or_make_child(item_ns, child_tag, None, ITEM_CHILD_ORDER);
                    child.attrs.push(raw_attr(attr_name, &val));
                } else {
                    item.set_or_make_child(item_ns, &name, Some(&val), ITEM_CHILD_ORDER);
                }
            }
            elements.push(item);
        }
        Ok(elements)
    }
}

/// Build an attribute from a raw `prefix:local` name kept verbatim from
/// ingestion.
fn raw_attr(raw_name: &str, value: &str) -> Attr {
    let (prefix, local) = match raw_name.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, raw_name.to_string()),
    };
    Attr {
        prefix,
        local,
        uri: None,
        value: value.to_string(),
    }
}

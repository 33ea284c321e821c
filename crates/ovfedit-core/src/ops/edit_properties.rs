//! Edit environment properties in the ProductSection.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::ovf::{Ovf, PropertyUpdate};
use crate::session::Session;

/// Property types a `+type` suffix may name.
const KNOWN_TYPES: &[&str] = &[
    "string", "boolean", "int", "real", "int8", "int16", "int32", "int64", "uint8", "uint16",
    "uint32", "uint64",
];

/// One parsed `key[=value][+type]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub key: String,
    /// `None` means the value is left untouched (`-p key`); the empty
    /// string is a real value (`-p key=`).
    pub value: Option<String>,
    pub property_type: Option<String>,
}

/// Parse a property CLI string.
///
/// The delimiters `=` and `+` may both legitimately appear inside values
/// (SSH keys, base64), so parsing is deliberately conservative: the key is
/// everything before the first `=` or `+`, and a trailing `+word` is
/// consumed as a type only when `word` names a known property type.
pub fn parse_property_arg(arg: &str) -> Result<PropertySpec> {
    let split = arg.find(['=', '+']);
    let key = match split {
        Some(pos) => &arg[..pos],
        None => arg,
    };
    if key.is_empty() {
        return Err(Error::invalid_input(format!(
            "invalid property '{}': properties take the form key[=value][+type]",
            arg
        )));
    }
    let Some(pos) = split else {
        return Ok(PropertySpec {
            key: key.to_string(),
            value: None,
            property_type: None,
        });
    };

    if arg.as_bytes()[pos] == b'+' {
        // key+type, with no value.
        let type_name = &arg[pos + 1..];
        if !KNOWN_TYPES.contains(&type_name) {
            return Err(Error::invalid_input(format!(
                "invalid property '{}': '{}' is not a recognized property type",
                arg, type_name
            )));
        }
        return Ok(PropertySpec {
            key: key.to_string(),
            value: None,
            property_type: Some(type_name.to_string()),
        });
    }

    // key=value, possibly with a +type suffix on the value.
    let value = &arg[pos + 1..];
    if let Some(plus) = value.rfind('+') {
        let suffix = &value[plus + 1..];
        if KNOWN_TYPES.contains(&suffix) {
            return Ok(PropertySpec {
                key: key.to_string(),
                value: Some(value[..plus].to_string()),
                property_type: Some(suffix.to_string()),
            });
        }
    }
    Ok(PropertySpec {
        key: key.to_string(),
        value: Some(value.to_string()),
        property_type: None,
    })
}

/// Well-known transport shorthands.
const KNOWN_TRANSPORTS: &[(&str, &str)] = &[
    ("iso", "iso"),
    ("vmware", "com.vmware.guestInfo"),
    (
        "ibm",
        "http://www.ibm.com/xmlns/ovf/transport/filesystem/etc/ovf-transport",
    ),
];

/// Expand transport shorthands, warning about unrecognized values.
pub fn resolve_transports(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| {
            match KNOWN_TRANSPORTS.iter().find(|(short, _)| short == value) {
                Some((_, full)) => full.to_string(),
                None => {
                    if !KNOWN_TRANSPORTS.iter().any(|(_, full)| full == value) {
                        warn!("Unknown transport value '{}'", value);
                    }
                    value.clone()
                }
            }
        })
        .collect()
}

/// Options for the edit-properties operation.
#[derive(Debug, Clone, Default)]
pub struct EditPropertiesOptions {
    pub properties: Vec<PropertySpec>,
    /// Labels parallel to `properties` (all or none).
    pub labels: Vec<String>,
    /// Descriptions parallel to `properties` (all or none).
    pub descriptions: Vec<String>,
    pub user_configurable: Option<bool>,
    pub transports: Vec<String>,
}

/// Apply property edits to the descriptor.
pub fn run(ovf: &mut Ovf, options: &EditPropertiesOptions, session: &Session) -> Result<()> {
    if !options.labels.is_empty() && options.labels.len() != options.properties.len() {
        return Err(Error::invalid_input(format!(
            "the number of labels ({}) and properties ({}) must be equal",
            options.labels.len(),
            options.properties.len()
        )));
    }
    if !options.descriptions.is_empty()
        && options.descriptions.len() != options.properties.len()
    {
        return Err(Error::invalid_input(format!(
            "the number of descriptions ({}) and properties ({}) must be equal",
            options.descriptions.len(),
            options.properties.len()
        )));
    }

    for (index, spec) in options.properties.iter().enumerate() {
        session.check_cancelled()?;
        if ovf.property_value(&spec.key).is_none() {
            session.confirm_or_fail(&format!(
                "Property '{}' does not yet exist. Create it?",
                spec.key
            ))?;
        }
        debug!(
            "Setting property '{}' to {:?} (type {:?})",
            spec.key, spec.value, spec.property_type
        );
        ovf.set_property(
            &spec.key,
            PropertyUpdate {
                value: spec.value.as_deref(),
                property_type: spec.property_type.as_deref(),
                user_configurable: options.user_configurable,
                label: options.labels.get(index).map(String::as_str),
                description: options.descriptions.get(index).map(String::as_str),
            },
        )?;
    }

    if !options.transports.is_empty() {
        ovf.set_environment_transports(&resolve_transports(&options.transports))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: &str, value: Option<&str>, ptype: Option<&str>) -> PropertySpec {
        PropertySpec {
            key: key.to_string(),
            value: value.map(str::to_string),
            property_type: ptype.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_plain_forms() {
        assert_eq!(
            parse_property_arg("no_value").unwrap(),
            spec("no_value", None, None)
        );
        assert_eq!(
            parse_property_arg("key=value").unwrap(),
            spec("key", Some("value"), None)
        );
        assert_eq!(
            parse_property_arg("string_type+string").unwrap(),
            spec("string_type", None, Some("string"))
        );
        assert_eq!(
            parse_property_arg("full-type=yes+boolean").unwrap(),
            spec("full-type", Some("yes"), Some("boolean"))
        );
    }

    #[test]
    fn test_parse_empty_value_is_distinct_from_unset() {
        assert_eq!(parse_property_arg("key=").unwrap(), spec("key", Some(""), None));
        assert_eq!(parse_property_arg("key").unwrap(), spec("key", None, None));
    }

    #[test]
    fn test_parse_values_containing_delimiters() {
        // An SSH public key: '=' and '+' are part of the value.
        assert_eq!(
            parse_property_arg("ssh=autopubkey=ssh-rsa AA...q+t0...Tuw== root@M").unwrap(),
            spec("ssh", Some("autopubkey=ssh-rsa AA...q+t0...Tuw== root@M"), None)
        );
        // '+foo' is not a known type, so it stays in the value.
        assert_eq!(
            parse_property_arg("tricky=+foo").unwrap(),
            spec("tricky", Some("+foo"), None)
        );
        assert_eq!(
            parse_property_arg("tricky_value=++foo==++").unwrap(),
            spec("tricky_value", Some("++foo==++"), None)
        );
        // Only the rightmost known-type suffix is consumed.
        assert_eq!(
            parse_property_arg("trickiest=bar+foo=hello+boolean").unwrap(),
            spec("trickiest", Some("bar+foo=hello"), Some("boolean"))
        );
    }

    #[test]
    fn test_parse_rejects_bad_forms() {
        assert!(parse_property_arg("=value").is_err());
        assert!(parse_property_arg("key+sometype").is_err());
    }

    #[test]
    fn test_resolve_transports() {
        assert_eq!(
            resolve_transports(&["iso".to_string(), "vmware".to_string()]),
            vec!["iso".to_string(), "com.vmware.guestInfo".to_string()]
        );
        assert_eq!(
            resolve_transports(&["com.example.custom".to_string()]),
            vec!["com.example.custom".to_string()]
        );
    }

    #[test]
    fn test_label_count_mismatch() {
        let mut ovf =
            crate::ovf::Ovf::parse(include_str!("../../tests/data/csr1000v.ovf").as_bytes())
                .unwrap();
        let session = Session::new().unwrap();
        let options = EditPropertiesOptions {
            properties: vec![spec("hostname", Some("router1"), None)],
            labels: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert!(run(&mut ovf, &options, &session).is_err());
    }

    #[test]
    fn test_run_sets_existing_properties() {
        let mut ovf =
            crate::ovf::Ovf::parse(include_str!("../../tests/data/csr1000v.ovf").as_bytes())
                .unwrap();
        let session = Session::new().unwrap();
        let options = EditPropertiesOptions {
            properties: vec![
                spec("mgmt-ipv4-addr", Some("10.1.1.100/24"), None),
                spec("mgmt-ipv4-gateway", Some("10.1.1.1"), None),
            ],
            ..Default::default()
        };
        run(&mut ovf, &options, &session).unwrap();
        assert_eq!(
            ovf.property_value("mgmt-ipv4-addr").as_deref(),
            Some("10.1.1.100/24")
        );
        assert_eq!(
            ovf.property_value("mgmt-ipv4-gateway").as_deref(),
            Some("10.1.1.1")
        );
    }

    #[test]
    fn test_run_new_property_requires_confirmation() {
        let mut ovf =
            crate::ovf::Ovf::parse(include_str!("../../tests/data/csr1000v.ovf").as_bytes())
                .unwrap();
        let session = Session::new().unwrap(); // no callback, no force
        let options = EditPropertiesOptions {
            properties: vec![spec("brand-new", Some("x"), None)],
            ..Default::default()
        };
        assert!(run(&mut ovf, &options, &session).is_err());

        let session = Session::new().unwrap().with_force(true);
        run(&mut ovf, &options, &session).unwrap();
        assert_eq!(ovf.property_value("brand-new").as_deref(), Some("x"));
    }
}

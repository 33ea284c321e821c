//! Value validation and naming-sequence helpers.

use std::cmp::Ordering;

use log::{debug, info};

use crate::error::{Error, Result};

/// A token of a string split into runs of digits and non-digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlphanumToken {
    Text(String),
    Number(u64),
}

impl std::fmt::Display for AlphanumToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlphanumToken::Text(s) => f.write_str(s),
            AlphanumToken::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Split a string into alternating text and numeric tokens, so that
/// "GigabitEthernet10" sorts after "GigabitEthernet9".
pub fn alphanum_split(s: &str) -> Vec<AlphanumToken> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;
    for c in s.chars() {
        let digit = c.is_ascii_digit();
        if !current.is_empty() && digit != in_digits {
            tokens.push(finish_token(std::mem::take(&mut current), in_digits));
        }
        in_digits = digit;
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(finish_token(current, in_digits));
    }
    tokens
}

fn finish_token(s: String, digits: bool) -> AlphanumToken {
    if digits {
        // Overlong digit runs fall back to text comparison.
        match s.parse::<u64>() {
            Ok(n) => AlphanumToken::Number(n),
            Err(_) => AlphanumToken::Text(s),
        }
    } else {
        AlphanumToken::Text(s)
    }
}

/// Compare two strings with embedded numbers compared numerically.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let ta = alphanum_split(a);
    let tb = alphanum_split(b);
    for pair in ta.iter().zip(tb.iter()) {
        let ord = match pair {
            (AlphanumToken::Number(x), AlphanumToken::Number(y)) => x.cmp(y),
            (AlphanumToken::Text(x), AlphanumToken::Text(y)) => x.cmp(y),
            (AlphanumToken::Number(_), AlphanumToken::Text(_)) => Ordering::Less,
            (AlphanumToken::Text(_), AlphanumToken::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ta.len().cmp(&tb.len())
}

/// Sort strings naturally (numeric runs compared as numbers).
pub fn natural_sort<S: AsRef<str>>(values: &mut [S]) {
    values.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// Check an integer against inclusive bounds, returning a descriptive
/// error naming the label when out of range.
pub fn validate_int(value: u64, min: u64, max: u64, label: &str) -> Result<()> {
    if value < min {
        return Err(Error::invalid_input(format!(
            "{} value {} is below the minimum of {}",
            label, value, min
        )));
    }
    if value > max {
        return Err(Error::invalid_input(format!(
            "{} value {} is above the maximum of {}",
            label, value, max
        )));
    }
    Ok(())
}

/// Locate a `{N}` wildcard marker in a pattern string.
/// Returns (prefix, starting index, suffix).
fn find_wildcard(pattern: &str) -> Option<(&str, u64, &str)> {
    let open = pattern.find('{')?;
    let close = pattern[open..].find('}')? + open;
    let inner = &pattern[open + 1..close];
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let start = inner.parse().ok()?;
    Some((&pattern[..open], start, &pattern[close + 1..]))
}

/// Expand a list whose final entry may carry a `{N}` wildcard to the
/// desired length.
///
/// Items such as NIC and network names are usually numbered sequentially,
/// so callers may give a wildcard in the last entry to have the list grown
/// automatically:
///
/// - `["eth{0}"]` expanded to 3 gives `eth0, eth1, eth2`
/// - `["mgmt0", "eth{10}"]` expanded to 4 gives `mgmt0, eth10, eth11, eth12`
///
/// A final entry with no wildcard repeats as-is. Returns an empty list for
/// empty input.
pub fn expand_list_wildcard(name_list: &[String], length: usize, quiet: bool) -> Vec<String> {
    if name_list.is_empty() {
        return Vec::new();
    }
    let mut result: Vec<String> = name_list.to_vec();
    if result.len() >= length {
        return result;
    }
    if !quiet {
        info!("Expanding list {:?} to {} entries", name_list, length);
    }
    let pattern = result.pop().unwrap();
    match find_wildcard(&pattern) {
        Some((prefix, start, suffix)) => {
            let mut value = start;
            while result.len() < length {
                result.push(format!("{}{}{}", prefix, value, suffix));
                value += 1;
            }
        }
        None => {
            while result.len() < length {
                result.push(pattern.clone());
            }
        }
    }
    if !quiet {
        info!("New list is {:?}", result);
    }
    result
}

/// Inverse of [`expand_list_wildcard`]: guess a wildcard pattern that
/// regenerates the given values.
///
/// - `["foo1", "foo2", "foo3"]` gives `["foo{1}"]`
/// - `["mgmt0", "eth3", "eth4"]` gives `["mgmt0", "eth{3}"]`
/// - returns `None` when no sequential pattern fits.
pub fn guess_list_wildcard(known_values: &[String]) -> Option<Vec<String>> {
    debug!("Attempting to infer a pattern from {:?}", known_values);
    if known_values.len() < 2 {
        return None;
    }
    for value_index in 0..known_values.len() - 1 {
        let current = &known_values[value_index];
        let tokens = alphanum_split(current);
        for token_index in 0..tokens.len() {
            let n = match &tokens[token_index] {
                AlphanumToken::Number(n) => *n,
                AlphanumToken::Text(_) => continue,
            };
            let prefix: String = tokens[..token_index].iter().map(|t| t.to_string()).collect();
            let suffix: String = tokens[token_index + 1..]
                .iter()
                .map(|t| t.to_string())
                .collect();
            let possible_next = format!("{}{}{}", prefix, n + 1, suffix);
            if known_values[value_index + 1] != possible_next {
                continue;
            }
            let pattern = format!("{}{{{}}}{}", prefix, n, suffix);
            let mut candidate: Vec<String> = known_values[..value_index].to_vec();
            candidate.push(pattern);
            if expand_list_wildcard(&candidate, known_values.len(), true) == known_values {
                debug!("Inferred pattern list {:?}", candidate);
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_alphanum_split() {
        assert_eq!(
            alphanum_split("eth0/10"),
            vec![
                AlphanumToken::Text("eth".into()),
                AlphanumToken::Number(0),
                AlphanumToken::Text("/".into()),
                AlphanumToken::Number(10),
            ]
        );
    }

    #[test]
    fn test_natural_sort() {
        let mut v = strs(&["item10", "item2", "item1"]);
        natural_sort(&mut v);
        assert_eq!(v, strs(&["item1", "item2", "item10"]));
    }

    #[test]
    fn test_natural_sort_plain_numbers() {
        let mut v = strs(&["11", "2", "1", "10"]);
        natural_sort(&mut v);
        assert_eq!(v, strs(&["1", "2", "10", "11"]));
    }

    #[test]
    fn test_validate_int() {
        assert!(validate_int(4, 1, 8, "CPUs").is_ok());
        assert!(validate_int(0, 1, 8, "CPUs").is_err());
        assert!(validate_int(9, 1, 8, "CPUs").is_err());
    }

    #[test]
    fn test_expand_list_wildcard() {
        assert!(expand_list_wildcard(&[], 3, true).is_empty());
        assert_eq!(
            expand_list_wildcard(&strs(&["eth{0}"]), 3, true),
            strs(&["eth0", "eth1", "eth2"])
        );
        assert_eq!(
            expand_list_wildcard(&strs(&["mgmt0", "eth{10}"]), 4, true),
            strs(&["mgmt0", "eth10", "eth11", "eth12"])
        );
    }

    #[test]
    fn test_expand_list_no_wildcard_repeats_last() {
        assert_eq!(
            expand_list_wildcard(&strs(&["VM Network"]), 3, true),
            strs(&["VM Network", "VM Network", "VM Network"])
        );
    }

    #[test]
    fn test_expand_list_already_long_enough() {
        assert_eq!(
            expand_list_wildcard(&strs(&["a", "b", "c"]), 2, true),
            strs(&["a", "b", "c"])
        );
    }

    #[test]
    fn test_guess_list_wildcard() {
        assert_eq!(guess_list_wildcard(&strs(&["foo", "bar", "baz"])), None);
        assert_eq!(
            guess_list_wildcard(&strs(&["foo1", "foo2", "foo3"])),
            Some(strs(&["foo{1}"]))
        );
        assert_eq!(
            guess_list_wildcard(&strs(&["foo", "bar", "baz3", "baz4", "baz5"])),
            Some(strs(&["foo", "bar", "baz{3}"]))
        );
        assert_eq!(
            guess_list_wildcard(&strs(&["Eth0/1", "Eth0/2", "Eth0/3"])),
            Some(strs(&["Eth0/{1}"]))
        );
        assert_eq!(
            guess_list_wildcard(&strs(&["Eth0/0", "Eth1/0", "Eth2/0"])),
            Some(strs(&["Eth{0}/0"]))
        );
    }

    #[test]
    fn test_guess_then_expand_round_trip() {
        let names = strs(&["GigabitEthernet1", "GigabitEthernet2", "GigabitEthernet3"]);
        let pattern = guess_list_wildcard(&names).unwrap();
        assert_eq!(expand_list_wildcard(&pattern, 5, true).len(), 5);
        assert_eq!(
            expand_list_wildcard(&pattern, 5, true)[4],
            "GigabitEthernet5"
        );
    }
}

//! Serialization of the element tree back to bytes.
//!
//! Untouched input reproduces byte-for-byte: attribute order, whitespace,
//! comments, and self-closing tags are all recorded in the tree and written
//! back as-is.

use super::{Document, Element, Node};

/// Serialize a full document.
pub fn document_to_bytes(doc: &Document) -> Vec<u8> {
    let mut out = String::new();
    if let Some(prolog) = &doc.prolog {
        out.push_str(prolog);
    }
    match &doc.pre_root {
        Some(ws) => out.push_str(ws),
        None => {
            if doc.prolog.is_some() {
                out.push('\n');
            }
        }
    }
    write_element(&mut out, &doc.root);
    if let Some(tail) = &doc.root.tail {
        out.push_str(tail);
    }
    out.into_bytes()
}

/// Serialize a single element (without its tail), e.g. for preserving a
/// custom subtree as a string.
pub fn element_to_string(el: &Element) -> String {
    let mut out = String::new();
    write_element(&mut out, el);
    out
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    let name = el.raw_name();
    out.push_str(&name);
    for attr in &el.attrs {
        out.push(' ');
        out.push_str(&attr.raw_name());
        out.push_str("=\"");
        out.push_str(&escape_attr(&attr.value));
        out.push('"');
    }
    if el.nodes.is_empty() && el.text.is_none() && el.empty_tag {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = &el.text {
        out.push_str(&escape_text(text));
    }
    for node in &el.nodes {
        match node {
            Node::Element(child) => {
                write_element(out, child);
                if let Some(tail) = &child.tail {
                    out.push_str(&escape_text(tail));
                }
            }
            Node::Comment(c) => {
                out.push_str("<!--");
                out.push_str(&c.content);
                out.push_str("-->");
                if let Some(tail) = &c.tail {
                    out.push_str(&escape_text(tail));
                }
            }
        }
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

/// Escape character data.
fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a double-quoted attribute value.
fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

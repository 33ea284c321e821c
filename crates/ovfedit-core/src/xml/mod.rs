//! Namespace-aware XML document model.
//!
//! The OVF descriptor is edited in place, so this module keeps an owned
//! element tree that records everything needed to reproduce untouched
//! input byte-for-byte: attribute order, inter-element whitespace
//! (ElementTree-style `text`/`tail` strings), comments, and whether an
//! element was written with a self-closing tag. Recognized sections are
//! mutated through the lookup/insertion helpers here; unknown subtrees
//! simply ride along.

mod parse;
mod write;

pub use parse::{parse_document, parse_fragment};
pub use write::{document_to_bytes, element_to_string};

use crate::error::{Error, Result};

/// A namespace declaration: canonical prefix plus URI.
///
/// Used when creating elements/attributes programmatically; lookups always
/// go by URI so documents using unconventional prefixes still resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsDecl {
    pub prefix: &'static str,
    pub uri: &'static str,
}

/// A single XML attribute, with its namespace resolved at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    /// Prefix as written in the source (`None` for unprefixed attributes).
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Resolved namespace URI. Unprefixed attributes have no namespace.
    pub uri: Option<String>,
    /// Unescaped attribute value.
    pub value: String,
}

impl Attr {
    /// Whether this attribute is an `xmlns` or `xmlns:prefix` declaration.
    pub fn is_xmlns(&self) -> bool {
        self.prefix.as_deref() == Some("xmlns") || (self.prefix.is_none() && self.local == "xmlns")
    }

    /// The name as written in the source, e.g. `ovf:id`.
    pub fn raw_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

/// A comment node, carrying the whitespace that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub content: String,
    pub tail: Option<String>,
}

/// A child node of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Comment(Comment),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Comment(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Comment(_) => None,
        }
    }

    fn tail(&self) -> Option<&str> {
        match self {
            Node::Element(e) => e.tail.as_deref(),
            Node::Comment(c) => c.tail.as_deref(),
        }
    }

    fn set_tail(&mut self, tail: Option<String>) {
        match self {
            Node::Element(e) => e.tail = tail,
            Node::Comment(c) => c.tail = tail,
        }
    }
}

/// An XML element.
///
/// `text` is the character data between the start tag and the first child;
/// `tail` is the character data between this element's end tag and the next
/// sibling. Both are `None` when absent, which is how programmatically
/// created elements start out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub prefix: Option<String>,
    pub local: String,
    pub uri: Option<String>,
    pub attrs: Vec<Attr>,
    pub nodes: Vec<Node>,
    pub text: Option<String>,
    pub tail: Option<String>,
    /// Whether the source used a self-closing tag. New elements default to
    /// true so childless elements serialize as `<tag/>`.
    pub empty_tag: bool,
}

impl Element {
    /// Create a new element in the given namespace.
    pub fn new(ns: NsDecl, local: impl Into<String>) -> Self {
        Element {
            prefix: Some(ns.prefix.to_string()),
            local: local.into(),
            uri: Some(ns.uri.to_string()),
            attrs: Vec::new(),
            nodes: Vec::new(),
            text: None,
            tail: None,
            empty_tag: true,
        }
    }

    /// The tag name as written in the source, e.g. `ovf:Envelope`.
    pub fn raw_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    /// Check element identity by namespace URI and local name.
    pub fn is(&self, uri: &str, local: &str) -> bool {
        self.local == local && self.uri.as_deref() == Some(uri)
    }

    /// Iterate over child elements, skipping comments.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(Node::as_element)
    }

    /// Iterate mutably over child elements, skipping comments.
    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.nodes.iter_mut().filter_map(Node::as_element_mut)
    }

    /// Get an attribute value by namespace URI and local name.
    ///
    /// Falls back to an unprefixed attribute of the same local name, since
    /// some producers omit the namespace prefix on attributes.
    pub fn attr(&self, uri: &str, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.local == local && a.uri.as_deref() == Some(uri))
            .or_else(|| {
                self.attrs
                    .iter()
                    .find(|a| a.local == local && a.uri.is_none() && !a.is_xmlns())
            })
            .map(|a| a.value.as_str())
    }

    /// Get an unprefixed attribute value by local name.
    pub fn attr_plain(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.local == local && a.prefix.is_none() && local != "xmlns")
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing one (prefixed or not) with
    /// the same local name in this namespace.
    pub fn set_attr(&mut self, ns: NsDecl, local: &str, value: impl AsRef<str>) {
        let value = value.as_ref().to_string();
        if let Some(a) = self.attrs.iter_mut().find(|a| {
            a.local == local
                && !a.is_xmlns()
                && (a.uri.as_deref() == Some(ns.uri) || a.uri.is_none())
        }) {
            a.value = value;
            return;
        }
        self.attrs.push(Attr {
            prefix: Some(ns.prefix.to_string()),
            local: local.to_string(),
            uri: Some(ns.uri.to_string()),
            value,
        });
    }

    /// Set an unprefixed attribute.
    pub fn set_attr_plain(&mut self, local: &str, value: impl AsRef<str>) {
        let value = value.as_ref().to_string();
        if let Some(a) = self
            .attrs
            .iter_mut()
            .find(|a| a.local == local && a.prefix.is_none())
        {
            a.value = value;
            return;
        }
        self.attrs.push(Attr {
            prefix: None,
            local: local.to_string(),
            uri: None,
            value,
        });
    }

    /// Remove an attribute by namespace URI and local name. Returns the
    /// removed value, if any.
    pub fn remove_attr(&mut self, uri: &str, local: &str) -> Option<String> {
        let pos = self
            .attrs
            .iter()
            .position(|a| a.local == local && (a.uri.as_deref() == Some(uri) || a.uri.is_none()))?;
        Some(self.attrs.remove(pos).value)
    }

    /// Clear all attributes and children, keeping name and tail.
    pub fn clear(&mut self) {
        self.attrs.clear();
        self.nodes.clear();
        self.text = None;
        self.empty_tag = true;
    }

    /// Get the concatenated text content, or empty string.
    pub fn text_content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Replace the text content.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
        self.empty_tag = false;
    }

    /// Find the first child element with the given namespace and local name.
    pub fn find_child(&self, uri: &str, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(uri, local))
    }

    /// Mutable variant of [`find_child`](Self::find_child).
    pub fn find_child_mut(&mut self, uri: &str, local: &str) -> Option<&mut Element> {
        self.child_elements_mut().find(|e| e.is(uri, local))
    }

    /// Find the first child element by local name alone, ignoring namespace.
    pub fn find_child_by_local(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.local == local)
    }

    /// Find all child elements with the given namespace and local name.
    pub fn find_children(&self, uri: &str, local: &str) -> Vec<&Element> {
        self.child_elements().filter(|e| e.is(uri, local)).collect()
    }

    /// Find the unique child with the given name carrying the given
    /// attribute value.
    pub fn find_child_with_attr(
        &self,
        uri: &str,
        local: &str,
        attr_local: &str,
        attr_value: &str,
    ) -> Option<&Element> {
        self.child_elements()
            .find(|e| e.is(uri, local) && e.attr(uri, attr_local) == Some(attr_value))
    }

    /// Mutable variant of [`find_child_with_attr`](Self::find_child_with_attr).
    pub fn find_child_with_attr_mut(
        &mut self,
        uri: &str,
        local: &str,
        attr_local: &str,
        attr_value: &str,
    ) -> Option<&mut Element> {
        self.child_elements_mut()
            .find(|e| e.is(uri, local) && e.attr(uri, attr_local) == Some(attr_value))
    }

    /// Remove the first child element matching the predicate.
    /// Returns the removed element, with sibling whitespace repaired.
    pub fn remove_child_where<F>(&mut self, pred: F) -> Option<Element>
    where
        F: Fn(&Element) -> bool,
    {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.as_element().is_some_and(&pred))?;
        let removed_tail = self.nodes[idx].tail().map(str::to_string);
        let node = self.nodes.remove(idx);
        // The removed node carried the whitespace leading to the next
        // sibling (or the parent's close tag). Hand it to the predecessor.
        if idx == 0 {
            if self.nodes.is_empty() {
                self.text = None;
                self.empty_tag = true;
            }
        } else if idx == self.nodes.len() {
            self.nodes[idx - 1].set_tail(removed_tail);
        }
        match node {
            Node::Element(e) => Some(e),
            Node::Comment(_) => unreachable!("predicate only matches elements"),
        }
    }

    /// Append or insert a child element, honoring a tag ordering.
    ///
    /// `ordering` lists local names in schema order; the child is inserted
    /// before the first sibling whose tag sorts later. Tags not listed are
    /// appended at the end. Indentation is derived from existing siblings
    /// so the result serializes cleanly.
    pub fn add_child_ordered(&mut self, child: Element, ordering: &[&str]) -> &mut Element {
        let idx = self.insertion_index(&child.local, ordering);
        self.insert_child_at(idx, child)
    }

    /// Append a child element at the end, with indentation fix-up.
    pub fn add_child(&mut self, child: Element) -> &mut Element {
        let idx = self.nodes.len();
        self.insert_child_at(idx, child)
    }

    /// Insert a child immediately before the first element matching the
    /// predicate, or at the end if none matches.
    pub fn insert_child_before<F>(&mut self, pred: F, child: Element) -> &mut Element
    where
        F: Fn(&Element) -> bool,
    {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.as_element().is_some_and(&pred))
            .unwrap_or(self.nodes.len());
        self.insert_child_at(idx, child)
    }

    fn insertion_index(&self, local: &str, ordering: &[&str]) -> usize {
        let rank = match ordering.iter().position(|t| *t == local) {
            Some(r) => r,
            None => return self.nodes.len(),
        };
        let mut idx = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Element(e) => match ordering.iter().position(|t| *t == e.local) {
                    Some(r) if r > rank => break,
                    _ => idx = i + 1,
                },
                Node::Comment(_) => idx = i + 1,
            }
        }
        idx
    }

    /// Insert a child at the given node index, patching `text`/`tail`
    /// whitespace so the document stays consistently indented.
    fn insert_child_at(&mut self, idx: usize, mut child: Element) -> &mut Element {
        let inner_indent = self.child_indent();
        if self.nodes.is_empty() {
            // First child: open up the parent.
            let close_indent = self.close_indent();
            if self.text.is_none() {
                self.text = Some(inner_indent);
            }
            if child.tail.is_none() {
                child.tail = Some(close_indent);
            }
            self.empty_tag = false;
            self.nodes.push(Node::Element(child));
            let last = self.nodes.last_mut().unwrap();
            return match last {
                Node::Element(e) => e,
                Node::Comment(_) => unreachable!(),
            };
        }
        let last = idx == self.nodes.len();
        if last {
            // Take over the previous sibling's closing whitespace.
            let prev_tail = self.nodes[idx - 1].tail().map(str::to_string);
            if child.tail.is_none() {
                child.tail = prev_tail;
            }
            self.nodes[idx - 1].set_tail(Some(inner_indent));
        } else if child.tail.is_none() {
            child.tail = Some(inner_indent);
        }
        self.empty_tag = false;
        self.nodes.insert(idx, Node::Element(child));
        match &mut self.nodes[idx] {
            Node::Element(e) => e,
            Node::Comment(_) => unreachable!(),
        }
    }

    /// The whitespace run that separates this element's children, derived
    /// from existing content or defaulting to two-space nesting.
    fn child_indent(&self) -> String {
        if let Some(text) = &self.text {
            if text.contains('\n') {
                return text.clone();
            }
        }
        for node in &self.nodes {
            if let Some(tail) = node.tail() {
                if tail.contains('\n') {
                    return tail.to_string();
                }
            }
        }
        format!("{}  ", self.close_indent())
    }

    /// The whitespace run that precedes this element's close tag.
    fn close_indent(&self) -> String {
        if let Some(last) = self.nodes.last() {
            if let Some(tail) = last.tail() {
                if tail.contains('\n') {
                    return tail.to_string();
                }
            }
        }
        match &self.tail {
            Some(t) if t.contains('\n') => t.clone(),
            _ => "\n".to_string(),
        }
    }

    /// Find the child with the given name, creating it (with `text`) if
    /// absent; if present, replace its text.
    pub fn set_or_make_child(
        &mut self,
        ns: NsDecl,
        local: &str,
        text: Option<&str>,
        ordering: &[&str],
    ) -> &mut Element {
        let exists = self.find_child(ns.uri, local).is_some();
        if !exists {
            self.add_child_ordered(Element::new(ns, local), ordering);
        }
        let child = self
            .find_child_mut(ns.uri, local)
            .expect("child just ensured");
        if let Some(text) = text {
            child.set_text(text);
        }
        child
    }

    /// Recursively normalize indentation below this element.
    ///
    /// `indent` is the whitespace prefix of this element's own line. Used
    /// after wholesale regeneration of a section's children.
    pub fn reindent(&mut self, indent: &str) {
        if self.nodes.is_empty() {
            return;
        }
        let child_indent = format!("{}  ", indent);
        self.text = Some(format!("\n{}", child_indent));
        let count = self.nodes.len();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let tail = if i + 1 == count {
                format!("\n{}", indent)
            } else {
                format!("\n{}", child_indent)
            };
            node.set_tail(Some(tail));
            if let Node::Element(e) = node {
                e.reindent(&child_indent);
            }
        }
        self.empty_tag = false;
    }
}

/// A parsed XML document: prolog, pre-root whitespace, root element, and
/// the namespace declarations seen on the root.
#[derive(Debug, Clone)]
pub struct Document {
    pub prolog: Option<String>,
    pub pre_root: Option<String>,
    pub root: Element,
    /// (prefix, uri) pairs declared on the root, in order. An empty prefix
    /// records the default namespace.
    pub nsmap: Vec<(String, String)>,
}

impl Document {
    /// Look up the declared prefix for a namespace URI.
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.nsmap
            .iter()
            .find(|(_, u)| u == uri)
            .map(|(p, _)| p.as_str())
    }

    /// Ensure the given namespace is declared on the root element,
    /// registering the canonical prefix if it is not.
    pub fn ensure_ns(&mut self, ns: NsDecl) -> Result<()> {
        if self.prefix_for(ns.uri).is_some() {
            return Ok(());
        }
        if self.nsmap.iter().any(|(p, _)| p == ns.prefix) {
            return Err(Error::invalid_package(format!(
                "namespace prefix '{}' is already bound to a different URI",
                ns.prefix
            )));
        }
        self.root.attrs.push(Attr {
            prefix: Some("xmlns".to_string()),
            local: ns.prefix.to_string(),
            uri: None,
            value: ns.uri.to_string(),
        });
        self.nsmap.push((ns.prefix.to_string(), ns.uri.to_string()));
        Ok(())
    }
}

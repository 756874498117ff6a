use std::rc::Rc;

use kuchiki::traits::*;
use kuchiki::NodeData;

use super::{Document, NodeKind, NodeRef};
use crate::host::Scheduler;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

impl Document {
    /// Parse `html` into a document. Each top-level subtree is built detached
    /// and attached in one step.
    pub fn from_html(html: &str, scheduler: Rc<dyn Scheduler>) -> Self {
        let parsed = kuchiki::parse_html().one(html);
        let document = Self::empty(scheduler);
        for child in parsed.children() {
            if let NodeData::Doctype(_) = child.data() {
                document.has_doctype.set(true);
                continue;
            }
            if let Some(node) = import(&document, &child) {
                document.root.append_child(&node);
            }
        }
        document
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if self.has_doctype.get() {
            out.push_str("<!DOCTYPE html>");
        }
        for child in self.root.children() {
            serialize(&child, false, &mut out);
        }
        out
    }
}

fn import(document: &Document, source: &kuchiki::NodeRef) -> Option<NodeRef> {
    match source.data() {
        NodeData::Element(element) => {
            let node = document.create_element(&element.name.local);
            for (name, attribute) in element.attributes.borrow().map.iter() {
                node.set_attribute(&name.local, &attribute.value);
            }
            for child in source.children() {
                if let Some(imported) = import(document, &child) {
                    node.append_child(&imported);
                }
            }
            Some(node)
        }
        NodeData::Text(text) => Some(document.create_text(&text.borrow())),
        _ => None,
    }
}

fn serialize(node: &NodeRef, raw_text: bool, out: &mut String) {
    match &node.kind {
        NodeKind::Document => {
            for child in node.children() {
                serialize(&child, false, out);
            }
        }
        NodeKind::Text(data) => {
            let data = data.borrow();
            if raw_text {
                out.push_str(&data);
            } else {
                out.push_str(&html_escape::encode_text(data.as_str()));
            }
        }
        NodeKind::Element { tag } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in node.attributes.borrow().iter() {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }
            let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
            for child in node.children() {
                serialize(&child, raw, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

//! Image references inside content documents.
//!
//! Documents go through html5ever with a sink that keeps no tree at all: it
//! only notes `<img src>` and SVG `<image href>` as elements are created,
//! which is document order.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use html5ever::driver::ParseOpts;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute, QualName, local_name, ns, parse_document};

use crate::util::decode_xml;

/// Raw `src`/`href` values of image elements, in document order.
pub fn image_references(document: &[u8]) -> Vec<String> {
    let text = decode_xml(document);
    parse_document(ReferenceSink::default(), ParseOpts::default())
        .one(&*text)
        .into_references()
}

struct Node {
    name: QualName,
}

type Handle = Rc<Node>;

/// A `TreeSink` that discards the tree and keeps image references.
struct ReferenceSink {
    document: Handle,
    references: RefCell<Vec<String>>,
}

impl Default for ReferenceSink {
    fn default() -> Self {
        Self {
            document: Rc::new(Node {
                name: QualName::new(None, ns!(), local_name!("")),
            }),
            references: RefCell::new(Vec::new()),
        }
    }
}

impl ReferenceSink {
    fn into_references(self) -> Vec<String> {
        self.references.into_inner()
    }

    fn anonymous(&self) -> Handle {
        Rc::new(Node {
            name: QualName::new(None, ns!(), local_name!("")),
        })
    }
}

fn reference_attr(name: &QualName) -> Option<&'static str> {
    if name.ns == ns!(html) && name.local == local_name!("img") {
        Some("src")
    } else if name.ns == ns!(svg) && name.local == local_name!("image") {
        // Both `href` and `xlink:href` arrive with local name "href".
        Some("href")
    } else {
        None
    }
}

impl TreeSink for ReferenceSink {
    type Handle = Handle;
    type Output = Self;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {}

    fn get_document(&self) -> Self::Handle {
        self.document.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        &target.name
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        if let Some(wanted) = reference_attr(&name)
            && let Some(attr) = attrs.iter().find(|a| &*a.name.local == wanted)
        {
            let value = attr.value.trim();
            if !value.is_empty() {
                self.references.borrow_mut().push(value.to_string());
            }
        }
        Rc::new(Node { name })
    }

    fn create_comment(&self, _text: StrTendril) -> Self::Handle {
        self.anonymous()
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        self.anonymous()
    }

    fn append(&self, _parent: &Self::Handle, _child: NodeOrText<Self::Handle>) {}

    fn append_based_on_parent_node(
        &self,
        _element: &Self::Handle,
        _prev_element: &Self::Handle,
        _child: NodeOrText<Self::Handle>,
    ) {
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        target.clone()
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, _sibling: &Self::Handle, _new_node: NodeOrText<Self::Handle>) {}

    fn add_attrs_if_missing(&self, _target: &Self::Handle, _attrs: Vec<Attribute>) {}

    fn remove_from_parent(&self, _target: &Self::Handle) {}

    fn reparent_children(&self, _node: &Self::Handle, _new_parent: &Self::Handle) {}
}

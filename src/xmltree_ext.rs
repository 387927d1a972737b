use std::io::Read;

use bytes::Bytes;
use xmltree::{self, Element, EmitterConfig, XMLNode};

use crate::errors::{DavError, DavResult};

pub(crate) const DAV_NS: &str = "DAV:";

pub(crate) trait ElementExt {
    fn ns<S: Into<String>>(self, prefix: S, namespace: S) -> Self;
    fn new2<'a, E: Into<&'a str>>(e: E) -> Self;
    fn parse2<R: Read>(r: R) -> Result<Element, DavError>;
    fn new_text<'a, E: Into<&'a str>, T: Into<String>>(e: E, t: T) -> Self;
    fn text<T: Into<String>>(self, t: T) -> Self;
    fn push(&mut self, e: Element);
    fn push_text<'a, E: Into<&'a str>, T: Into<String>>(&mut self, e: E, t: T);
    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_>;
    fn has_children(&self) -> bool;
    fn is_dav(&self, name: &str) -> bool;
    fn text_content(&self) -> String;
    fn to_bytes(&self) -> DavResult<Bytes>;
}

impl ElementExt for Element {
    fn ns<S: Into<String>>(mut self, prefix: S, namespace: S) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(xmltree::Namespace::empty);
        ns.force_put(prefix.into(), namespace.into());
        self.namespaces = Some(ns);
        self
    }

    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let n = n.into();
        match n.split_once(':') {
            None => Element::new(n),
            Some((prefix, local)) => {
                let mut e = Element::new(local);
                e.prefix = Some(prefix.to_string());
                e
            }
        }
    }

    fn new_text<'a, N: Into<&'a str>, S: Into<String>>(n: N, t: S) -> Element {
        Element::new2(n).text(t)
    }

    fn text<S: Into<String>>(mut self, t: S) -> Element {
        self.children.retain(|c| !matches!(c, XMLNode::Text(_)));
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn push_text<'a, N: Into<&'a str>, S: Into<String>>(&mut self, n: N, t: S) {
        self.push(Element::new_text(n, t));
    }

    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(self.children.iter().filter_map(|c| c.as_element()))
    }

    fn has_children(&self) -> bool {
        self.children.iter().any(|c| c.as_element().is_some())
    }

    // elements without a namespace are accepted as DAV: elements too,
    // some clients leave out the xmlns.
    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref().is_none_or(|ns| ns == DAV_NS)
    }

    fn text_content(&self) -> String {
        self.get_text().map(|t| t.into_owned()).unwrap_or_default()
    }

    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        match Element::parse(r) {
            Ok(elems) => Ok(elems),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn to_bytes(&self) -> DavResult<Bytes> {
        let mut buf = Vec::new();
        let config = EmitterConfig::new().perform_indent(false).write_document_declaration(true);
        self.write_with_config(&mut buf, config)
            .map_err(|_| DavError::XmlWriteError)?;
        Ok(Bytes::from(buf))
    }
}

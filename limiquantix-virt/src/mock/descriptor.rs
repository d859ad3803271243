//! Descriptor parsing for the in-memory daemon.
//!
//! Only the handful of elements the daemon needs are extracted; everything
//! else is kept verbatim in the stored descriptor.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt::Display;
use uuid::Uuid;

use crate::error::{Result, VirtError};
use crate::flags::SecretUsageType;

/// Flattened view of an XML document: first text and attribute value seen
/// at each `/`-joined element path.
#[derive(Debug, Default)]
struct Descriptor {
    root: String,
    texts: HashMap<String, String>,
    attrs: HashMap<String, String>,
}

impl Descriptor {
    fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut desc = Descriptor::default();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => desc.enter(&mut path, &e)?,
                Ok(Event::Empty(e)) => {
                    desc.enter(&mut path, &e)?;
                    path.pop();
                }
                Ok(Event::End(_)) => {
                    path.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(malformed)?;
                    if !path.is_empty() {
                        desc.texts
                            .entry(path.join("/"))
                            .or_insert_with(|| text.into_owned());
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(malformed(e)),
            }
        }

        if desc.root.is_empty() {
            return Err(malformed("no root element"));
        }
        if !path.is_empty() {
            return Err(malformed(format!("unclosed element <{}>", path.join("/"))));
        }

        Ok(desc)
    }

    fn enter(&mut self, path: &mut Vec<String>, element: &BytesStart<'_>) -> Result<()> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();

        if path.is_empty() {
            if !self.root.is_empty() {
                return Err(malformed("more than one root element"));
            }
            self.root = name.clone();
        }
        path.push(name);

        let key = path.join("/");
        for attr in element.attributes() {
            let attr = attr.map_err(malformed)?;
            let value = attr.unescape_value().map_err(malformed)?;
            let attr_name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            self.attrs
                .entry(format!("{}@{}", key, attr_name))
                .or_insert_with(|| value.into_owned());
        }

        Ok(())
    }

    fn text(&self, path: &str) -> Option<&str> {
        self.texts
            .get(path)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn attr(&self, path: &str, name: &str) -> Option<&str> {
        self.attrs.get(&format!("{}@{}", path, name)).map(String::as_str)
    }

    fn expect_root(&self, root: &str) -> Result<()> {
        if self.root != root {
            return Err(VirtError::InvalidArgument(format!(
                "expected <{}> root element, found <{}>",
                root, self.root
            )));
        }
        Ok(())
    }
}

fn malformed(e: impl Display) -> VirtError {
    VirtError::InvalidArgument(format!("malformed XML descriptor: {}", e))
}

/// Canonical lowercase, hyphenated form of a UUID string.
pub(super) fn normalize_uuid(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|u| u.hyphenated().to_string())
}

fn uuid_or_generate(raw: Option<&str>) -> Result<String> {
    match raw {
        Some(raw) => normalize_uuid(raw)
            .ok_or_else(|| VirtError::InvalidArgument(format!("malformed UUID '{}'", raw))),
        None => Ok(Uuid::new_v4().to_string()),
    }
}

/// Identity fields of a `<domain>` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DomainSpec {
    pub name: String,
    pub uuid: String,
}

impl DomainSpec {
    pub(super) fn parse(xml: &str) -> Result<Self> {
        let desc = Descriptor::parse(xml)?;
        desc.expect_root("domain")?;

        let name = desc
            .text("domain/name")
            .ok_or_else(|| VirtError::InvalidArgument("domain descriptor has no <name>".to_string()))?
            .to_string();
        let uuid = uuid_or_generate(desc.text("domain/uuid"))?;

        Ok(Self { name, uuid })
    }
}

/// Identity and policy fields of a `<secret>` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SecretSpec {
    pub uuid: String,
    pub usage_type: SecretUsageType,
    pub usage_id: String,
    pub ephemeral: bool,
    pub private: bool,
}

impl SecretSpec {
    pub(super) fn parse(xml: &str) -> Result<Self> {
        let desc = Descriptor::parse(xml)?;
        desc.expect_root("secret")?;

        let uuid = uuid_or_generate(desc.text("secret/uuid"))?;
        let ephemeral = desc.attr("secret", "ephemeral") == Some("yes");
        let private = desc.attr("secret", "private") == Some("yes");

        let usage_type = match desc.attr("secret/usage", "type") {
            Some(name) => SecretUsageType::from_name(name).ok_or_else(|| {
                VirtError::InvalidArgument(format!("unknown secret usage type '{}'", name))
            })?,
            None => SecretUsageType::NONE,
        };

        let usage_id = match usage_id_element(usage_type) {
            Some(element) => desc
                .text(&format!("secret/usage/{}", element))
                .ok_or_else(|| {
                    VirtError::InvalidArgument(format!(
                        "{} secret usage requires a <{}> element",
                        usage_type, element
                    ))
                })?
                .to_string(),
            None => String::new(),
        };

        Ok(Self {
            uuid,
            usage_type,
            usage_id,
            ephemeral,
            private,
        })
    }
}

/// Child of `<usage>` that carries the usage ID for each usage type.
fn usage_id_element(usage_type: SecretUsageType) -> Option<&'static str> {
    match usage_type {
        SecretUsageType::VOLUME => Some("volume"),
        SecretUsageType::ISCSI => Some("target"),
        SecretUsageType::CEPH | SecretUsageType::TLS | SecretUsageType::VTPM => Some("name"),
        _ => None,
    }
}

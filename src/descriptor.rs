//! Parsing of the two XML documents the updater understands: the remote
//! catalog (`addons.xml`) and the per-add-on descriptor (`addon.xml`).

use crate::addon::{CatalogEntry, Capability, Requirement};
use crate::error::{AddonError, Result};
use crate::version::Version;
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::BTreeSet;

/// Fields read from an installed add-on's `addon.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescriptor {
    pub version: Version,
    pub requires: BTreeSet<String>,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub capabilities: BTreeSet<Capability>,
}

fn parse_document(bytes: &[u8], what: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AddonError::Parse(format!("{} is not valid UTF-8: {}", what, e)))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn load<'a>(text: &'a str, what: &str) -> Result<Document<'a>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
        .map_err(|e| AddonError::Parse(format!("malformed {}: {}", what, e)))
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.has_tag_name(name))
}

/// Ids name directories under the add-ons root, so they must be a single
/// visible path component.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\'])
}

/// `<requires><import addon=".." version=".."/></requires>` under `node`.
/// An import without a version accepts any installed version.
fn requirements(node: Node<'_, '_>, owner: &str) -> Result<Vec<Requirement>> {
    let mut requires = Vec::new();
    for block in child_elements(node, "requires") {
        for import in child_elements(block, "import") {
            let id = import.attribute("addon").filter(|s| !s.is_empty()).ok_or_else(|| {
                AddonError::Parse(format!(
                    "an import of add-on '{}' has no addon attribute",
                    owner
                ))
            })?;
            let min_version = match import.attribute("version").filter(|s| !s.trim().is_empty()) {
                Some(v) => Version::parse(v)?,
                None => Version::parse("0")?,
            };
            requires.push(Requirement {
                id: id.to_string(),
                min_version,
            });
        }
    }
    Ok(requires)
}

/// Parses the catalog. A single entry with a missing id or version rejects the
/// whole document.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<CatalogEntry>> {
    let text = parse_document(bytes, "catalog")?;
    let doc = load(&text, "catalog")?;
    let root = doc.root_element();
    if !root.has_tag_name("addons") {
        return Err(AddonError::Parse(format!(
            "catalog root element is <{}>, expected <addons>",
            root.tag_name().name()
        )));
    }

    let mut entries = Vec::new();
    for addon in child_elements(root, "addon") {
        let id = addon
            .attribute("id")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AddonError::Parse("catalog entry without an id attribute".to_string()))?;
        if !is_valid_id(id) {
            return Err(AddonError::Parse(format!("catalog entry has an invalid id '{}'", id)));
        }
        let version = addon
            .attribute("version")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                AddonError::Parse(format!(
                    "unable to find version attribute of add-on '{}'",
                    id
                ))
            })?;

        entries.push(CatalogEntry {
            id: id.to_string(),
            version: Version::parse(version)?,
            requires: requirements(addon, id)?,
        });
    }

    Ok(entries)
}

/// Parses an installed add-on's descriptor. `id` is only used in messages.
pub fn parse_local(bytes: &[u8], id: &str) -> Result<LocalDescriptor> {
    let what = format!("descriptor of add-on '{}'", id);
    let text = parse_document(bytes, &what)?;
    let doc = load(&text, &what)?;
    let root = doc.root_element();
    if !root.has_tag_name("addon") {
        return Err(AddonError::Parse(format!(
            "{} has root element <{}>, expected <addon>",
            what,
            root.tag_name().name()
        )));
    }

    let version = root
        .attribute("version")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AddonError::Parse(format!("{} has no version attribute", what)))?;

    let capabilities = child_elements(root, "extension")
        .filter_map(|ext| ext.attribute("point"))
        .filter_map(Capability::from_extension_point)
        .collect();

    Ok(LocalDescriptor {
        version: Version::parse(version)?,
        requires: requirements(root, id)?
            .into_iter()
            .map(|r| r.id)
            .collect(),
        name: root.attribute("name").map(str::to_string),
        provider: root.attribute("provider-name").map(str::to_string),
        capabilities,
    })
}

// src/services/transform.rs

//! Applies a [`RuleSet`] to fetched markup.
//!
//! The document is parsed into a mutable tree, each rule runs in stage
//! order, and the tree is serialized back. A rule whose selector matches
//! nothing is a no-op; markup drift never fails a run. Only serialization
//! can fail.

use kuchikiki::NodeRef;
use kuchikiki::traits::*;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::Target;
use crate::services::rules::{Rule, RuleSet, TextMatch};
use crate::utils::rebase_root_relative;

/// Transform `markup` for `target` and return the serialized document.
pub fn apply(markup: &str, target: &Target, rules: &RuleSet) -> Result<String> {
    let document = kuchikiki::parse_html().one(markup);

    for rule in rules.rules() {
        let edits = apply_rule(&document, target, rule);
        if edits == 0 {
            debug!(
                location = %target.id(),
                rule = %rule.describe(),
                "Rule matched nothing, skipped"
            );
        }
    }

    serialize(&document)
}

/// Apply one rule, returning the number of nodes it touched.
fn apply_rule(document: &NodeRef, target: &Target, rule: &Rule) -> usize {
    match rule {
        Rule::Remove { selector } => {
            let found = select_all(document, selector);
            for node in &found {
                node.detach();
            }
            found.len()
        }

        Rule::RemoveByText {
            selector,
            text_selector,
            text,
        } => {
            let mut removed = 0;
            for node in select_all(document, selector) {
                if text_matches(&node, text_selector, text) {
                    node.detach();
                    removed += 1;
                }
            }
            removed
        }

        Rule::TrimColumns {
            rows,
            count,
            min_cells,
        } => {
            let count = target.location.trim_columns.unwrap_or(*count);
            select_all(document, rows)
                .iter()
                .filter(|row| trim_row(row, count, *min_cells))
                .count()
        }

        Rule::Style {
            selector,
            style,
            when,
        } => {
            let mut styled = 0;
            for node in select_all(document, selector) {
                let wanted = match when {
                    Some(TextMatch { selector, text }) => text_matches(&node, selector, text),
                    None => true,
                };
                if wanted {
                    set_style(&node, style);
                    styled += 1;
                }
            }
            styled
        }

        Rule::InjectHeader {
            anchor,
            container_style,
            title_style,
            caption,
            caption_style,
        } => {
            let Some(anchor) = select_first(document, anchor) else {
                return 0;
            };
            let Some(container) = element_from("<div><h1></h1></div>") else {
                return 0;
            };
            set_style(&container, container_style);

            if let Some(title) = first_descendant(&container, "h1") {
                set_style(&title, title_style);
                title.append(NodeRef::new_text(target.location.display_name.trim()));
            }
            if let Some(caption) = caption {
                if let Some(line) = element_from("<p></p>") {
                    set_style(&line, caption_style);
                    line.append(NodeRef::new_text(caption.as_str()));
                    container.append(line);
                }
            }

            anchor.insert_before(container);
            1
        }

        Rule::InjectFooter {
            anchor,
            image_src,
            image_alt,
            container_style,
            image_style,
        } => {
            let Some(anchor) = select_first(document, anchor) else {
                return 0;
            };
            let Some(container) = element_from("<div><img></div>") else {
                return 0;
            };
            set_style(&container, container_style);

            if let Some(image) = first_descendant(&container, "img") {
                set_attribute(&image, "src", image_src);
                set_attribute(&image, "alt", image_alt);
                set_style(&image, image_style);
            }

            anchor.append(container);
            1
        }

        Rule::DocumentMeta { lang, no_translate } => {
            let Some(root) = select_first(document, "html") else {
                return 0;
            };
            if let Some(lang) = lang {
                set_attribute(&root, "lang", lang);
            }
            if *no_translate {
                set_attribute(&root, "translate", "no");
                add_class(&root, "notranslate");
            }
            1
        }

        Rule::AppendHead { markup } => {
            let Some(head) = select_first(document, "head") else {
                return 0;
            };
            let nodes = head_fragment(markup);
            let appended = nodes.len();
            for node in nodes {
                head.append(node);
            }
            appended
        }

        Rule::RebaseUrls {
            selector,
            attribute,
        } => {
            let mut rebased = 0;
            for node in select_all(document, selector) {
                let current = attribute_value(&node, attribute);
                if let Some(absolute) = current
                    .as_deref()
                    .and_then(|href| rebase_root_relative(&target.origin, href))
                {
                    set_attribute(&node, attribute, &absolute);
                    rebased += 1;
                }
            }
            rebased
        }
    }
}

/// Drop the trailing `count` cells of a row with at least `min_cells` cells.
fn trim_row(row: &NodeRef, count: usize, min_cells: usize) -> bool {
    let cells: Vec<NodeRef> = row
        .children()
        .filter(|child| {
            child
                .as_element()
                .is_some_and(|el| matches!(&*el.name.local, "td" | "th"))
        })
        .collect();

    if cells.len() < min_cells || count == 0 {
        return false;
    }
    for cell in cells.iter().rev().take(count) {
        cell.detach();
    }
    true
}

/// Merge `overrides` into an inline style string.
///
/// Properties already present are replaced in place; new ones are appended.
pub fn merge_style(existing: Option<&str>, overrides: &str) -> String {
    let mut declarations: Vec<(String, String)> = Vec::new();

    for source in [existing.unwrap_or_default(), overrides] {
        for declaration in source.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if property.is_empty() {
                continue;
            }
            match declarations.iter_mut().find(|(p, _)| *p == property) {
                Some(slot) => slot.1 = value,
                None => declarations.push((property, value)),
            }
        }
    }

    declarations
        .iter()
        .map(|(property, value)| format!("{property}: {value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn select_all(document: &NodeRef, selector: &str) -> Vec<NodeRef> {
    match document.select(selector) {
        Ok(found) => found.map(|el| el.as_node().clone()).collect(),
        Err(()) => {
            warn!(selector, "Invalid selector, rule skipped");
            Vec::new()
        }
    }
}

fn select_first(document: &NodeRef, selector: &str) -> Option<NodeRef> {
    document
        .select_first(selector)
        .ok()
        .map(|el| el.as_node().clone())
}

fn first_descendant(node: &NodeRef, tag: &str) -> Option<NodeRef> {
    node.descendants()
        .find(|d| d.as_element().is_some_and(|el| &*el.name.local == tag))
}

fn text_matches(node: &NodeRef, selector: &str, text: &str) -> bool {
    node.select_first(selector)
        .is_ok_and(|found| found.as_node().text_contents().trim() == text)
}

fn attribute_value(node: &NodeRef, name: &str) -> Option<String> {
    let element = node.as_element()?;
    let attributes = element.attributes.borrow();
    attributes.get(name).map(str::to_string)
}

fn set_attribute(node: &NodeRef, name: &str, value: &str) {
    if let Some(element) = node.as_element() {
        element
            .attributes
            .borrow_mut()
            .insert(name, value.to_string());
    }
}

fn set_style(node: &NodeRef, declarations: &str) {
    if declarations.trim().is_empty() {
        return;
    }
    let merged = merge_style(attribute_value(node, "style").as_deref(), declarations);
    set_attribute(node, "style", &merged);
}

fn add_class(node: &NodeRef, class: &str) {
    let existing = attribute_value(node, "class").unwrap_or_default();
    if existing.split_whitespace().any(|c| c == class) {
        return;
    }
    let value = if existing.trim().is_empty() {
        class.to_string()
    } else {
        format!("{} {class}", existing.trim())
    };
    set_attribute(node, "class", &value);
}

/// Parse a snippet in body context and return its first element.
fn element_from(snippet: &str) -> Option<NodeRef> {
    let wrapper = kuchikiki::parse_html()
        .one(format!("<html><head></head><body>{snippet}</body></html>").as_str());
    let body = select_first(&wrapper, "body")?;
    let element = body.children().find(|c| c.as_element().is_some())?;
    element.detach();
    Some(element)
}

/// Parse trusted markup in head context and return its top-level nodes.
fn head_fragment(markup: &str) -> Vec<NodeRef> {
    let wrapper = kuchikiki::parse_html()
        .one(format!("<html><head>{markup}</head><body></body></html>").as_str());
    let Some(head) = select_first(&wrapper, "head") else {
        return Vec::new();
    };
    let nodes: Vec<NodeRef> = head.children().collect();
    for node in &nodes {
        node.detach();
    }
    nodes
}

fn serialize(document: &NodeRef) -> Result<String> {
    let mut out = Vec::new();
    document
        .serialize(&mut out)
        .map_err(|e| AppError::Serialize(e.to_string()))?;
    String::from_utf8(out).map_err(|e| AppError::Serialize(e.to_string()))
}

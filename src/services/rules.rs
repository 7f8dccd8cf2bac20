// src/services/rules.rs

//! Declarative transform rule table.
//!
//! A [`RuleSet`] is pure data: an ordered list of [`Rule`] descriptors, each
//! naming a selector, an action and its parameters. Rules run stage by stage
//! (see [`Stage`]); later stages assume earlier removals already happened.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Rule categories, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Prune,
    Columns,
    Restyle,
    Inject,
    Metadata,
    Rebase,
}

/// Restrict a rule to elements whose descendant text matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    /// Descendant holding the text (e.g. `p.event_name`)
    pub selector: String,
    /// Expected text, compared after trimming
    pub text: String,
}

/// One markup edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Rule {
    /// Remove every element matching `selector`.
    Remove { selector: String },

    /// Remove elements matching `selector` whose descendant text matches.
    RemoveByText {
        selector: String,
        text_selector: String,
        text: String,
    },

    /// Drop the last `count` cells of every row matched by `rows`.
    ///
    /// A location's `trim_columns` overrides `count`. Rows with fewer than
    /// `min_cells` cells are left alone.
    TrimColumns {
        rows: String,
        #[serde(default = "default_trim_count")]
        count: usize,
        #[serde(default = "default_min_cells")]
        min_cells: usize,
    },

    /// Merge CSS declarations into the `style` attribute of matches.
    Style {
        selector: String,
        style: String,
        #[serde(default)]
        when: Option<TextMatch>,
    },

    /// Insert a header block (location name, optional caption) before the
    /// first `anchor` match.
    InjectHeader {
        anchor: String,
        #[serde(default)]
        container_style: String,
        #[serde(default)]
        title_style: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        caption_style: String,
    },

    /// Append a footer block with an image to the first `anchor` match.
    InjectFooter {
        anchor: String,
        image_src: String,
        #[serde(default)]
        image_alt: String,
        #[serde(default)]
        container_style: String,
        #[serde(default)]
        image_style: String,
    },

    /// Set document language and translation markers on `<html>`.
    DocumentMeta {
        #[serde(default)]
        lang: Option<String>,
        #[serde(default)]
        no_translate: bool,
    },

    /// Append trusted markup (meta tags) to `<head>`.
    AppendHead { markup: String },

    /// Absolutize root-relative `attribute` values on matches.
    RebaseUrls { selector: String, attribute: String },
}

fn default_trim_count() -> usize {
    2
}

fn default_min_cells() -> usize {
    2
}

impl Rule {
    pub fn stage(&self) -> Stage {
        match self {
            Rule::Remove { .. } | Rule::RemoveByText { .. } => Stage::Prune,
            Rule::TrimColumns { .. } => Stage::Columns,
            Rule::Style { .. } => Stage::Restyle,
            Rule::InjectHeader { .. } | Rule::InjectFooter { .. } => Stage::Inject,
            Rule::DocumentMeta { .. } | Rule::AppendHead { .. } => Stage::Metadata,
            Rule::RebaseUrls { .. } => Stage::Rebase,
        }
    }

    /// Every CSS selector this rule evaluates.
    pub fn selectors(&self) -> Vec<&str> {
        match self {
            Rule::Remove { selector } => vec![selector.as_str()],
            Rule::RemoveByText {
                selector,
                text_selector,
                ..
            } => vec![selector.as_str(), text_selector.as_str()],
            Rule::TrimColumns { rows, .. } => vec![rows.as_str()],
            Rule::Style { selector, when, .. } => {
                let mut all = vec![selector.as_str()];
                if let Some(m) = when {
                    all.push(m.selector.as_str());
                }
                all
            }
            Rule::InjectHeader { anchor, .. } | Rule::InjectFooter { anchor, .. } => {
                vec![anchor.as_str()]
            }
            Rule::DocumentMeta { .. } | Rule::AppendHead { .. } => Vec::new(),
            Rule::RebaseUrls { selector, .. } => vec![selector.as_str()],
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Rule::Remove { selector } => format!("remove {selector}"),
            Rule::RemoveByText {
                selector,
                text_selector,
                text,
            } => format!("remove {selector} where {text_selector} = {text:?}"),
            Rule::TrimColumns { rows, .. } => format!("trim columns of {rows}"),
            Rule::Style { selector, .. } => format!("style {selector}"),
            Rule::InjectHeader { anchor, .. } => format!("header before {anchor}"),
            Rule::InjectFooter { anchor, .. } => format!("footer in {anchor}"),
            Rule::DocumentMeta { .. } => "document metadata".to_string(),
            Rule::AppendHead { .. } => "append to head".to_string(),
            Rule::RebaseUrls { selector, attribute } => format!("rebase {selector} @{attribute}"),
        }
    }
}

/// On-disk shape of a rule table.
#[derive(Debug, Deserialize)]
struct RuleTable {
    rules: Vec<Rule>,
}

/// Ordered rule table, always sorted by [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set; rules are stably ordered by stage.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(Rule::stage);
        Self { rules }
    }

    /// Load a rule table from a TOML file (`[[rules]]` entries).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let table: RuleTable = toml::from_str(content)?;
        Ok(Self::new(table.rules))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every selector compiles.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            for selector in rule.selectors() {
                kuchikiki::Selectors::compile(selector)
                    .map_err(|_| AppError::selector(selector, rule.describe()))?;
            }
            if let Rule::RebaseUrls { attribute, .. } = rule {
                if attribute.trim().is_empty() {
                    return Err(AppError::config(format!("{}: empty attribute", rule.describe())));
                }
            }
        }
        Ok(())
    }

    /// The built-in table for calendar kiosk screens.
    pub fn calendar() -> Self {
        Self::new(vec![
            // Chrome that makes no sense on an unattended screen.
            remove(".language-selection"),
            remove(".language-selection-overlay"),
            remove("header"),
            remove(".mobile-icons"),
            remove("footer"),
            remove("section.calendar_main"),
            remove("section.calendar_header"),
            remove("#calendar_downer_text"),
            Rule::RemoveByText {
                selector: "div.event".into(),
                text_selector: "p.event_name".into(),
                text: "Padel".into(),
            },
            Rule::TrimColumns {
                rows: "table.calendar_table tr".into(),
                count: default_trim_count(),
                min_cells: default_min_cells(),
            },
            style("div.event", "height: 100%; min-height: 93px; margin-bottom: 10px"),
            style("body", "background-color: black"),
            style("#scheduler", "background-color: black"),
            style("#innercontainer", "display: flex; flex-direction: column; flex: 1"),
            style(
                "#widecontainer",
                "display: flex; flex-direction: column; justify-content: space-between; min-height: 100vh",
            ),
            Rule::InjectHeader {
                anchor: "#innercontainer".into(),
                container_style: "text-align: center; display: flex; justify-content: center; \
                                  border-bottom: 2px solid white; margin-bottom: 20px; \
                                  margin-left: 20px; margin-right: 20px"
                    .into(),
                title_style: "color: white; font-size: 4.5em; margin-bottom: 20px".into(),
                caption: None,
                caption_style: String::new(),
            },
            Rule::InjectFooter {
                anchor: "#widecontainer".into(),
                image_src: "https://www.formfactory.cz/timetable/the-fitness-logo.png".into(),
                image_alt: String::new(),
                container_style: "display: flex; align-items: flex-end; justify-content: center; \
                                  padding: 20px; padding-top: 40px; margin-left: 20px; \
                                  margin-right: 20px; border-top: 2px solid white"
                    .into(),
                image_style: "width: 400px; height: auto; margin-bottom: 20px".into(),
            },
            Rule::DocumentMeta {
                lang: Some("hr".into()),
                no_translate: true,
            },
            Rule::AppendHead {
                markup: concat!(
                    r#"<meta http-equiv="Cache-Control" content="no-store, no-cache, must-revalidate, proxy-revalidate">"#,
                    r#"<meta http-equiv="Pragma" content="no-cache">"#,
                    r#"<meta http-equiv="Expires" content="0">"#,
                    r#"<meta name="google" content="notranslate">"#,
                )
                .into(),
            },
            Rule::RebaseUrls {
                selector: "link[href]".into(),
                attribute: "href".into(),
            },
            Rule::RebaseUrls {
                selector: "script[src]".into(),
                attribute: "src".into(),
            },
        ])
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::calendar()
    }
}

fn remove(selector: &str) -> Rule {
    Rule::Remove {
        selector: selector.into(),
    }
}

fn style(selector: &str, declarations: &str) -> Rule {
    Rule::Style {
        selector: selector.into(),
        style: declarations.into(),
        when: None,
    }
}

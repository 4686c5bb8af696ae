//! Built-in CSS engine backed by lightningcss.
//!
//! lightningcss adds vendor prefixes from the same declaration handlers that
//! merge longhands into shorthands. Prefixing therefore minifies each
//! declaration in a one-declaration sheet of its own, where there is nothing
//! to merge; shorthand collapsing minifies the whole sheet.

use async_trait::async_trait;
use lightningcss::declaration::DeclarationBlock;
use lightningcss::rules::style::StyleRule;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use lightningcss::traits::ToCss;
use std::collections::BTreeMap;
use std::path::Path;

use super::{CssPostProcessor, StylesheetCompiler, ToolError};

/// Encode a browser version ("49", "10.3") the way lightningcss expects:
/// `major << 16 | minor << 8 | patch`.
pub fn encode_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    if major > 0xffff || minor > 0xff || patch > 0xff {
        return None;
    }
    Some(major << 16 | minor << 8 | patch)
}

/// Build a browser target list from `name = "version"` pairs.
///
/// Unknown browsers and malformed versions are skipped with a warning.
pub fn browsers_from(targets: &BTreeMap<String, String>) -> Browsers {
    let mut browsers = Browsers::default();
    for (name, version) in targets {
        let Some(encoded) = encode_version(version) else {
            tracing::warn!("Ignoring browser target {} = '{}': bad version", name, version);
            continue;
        };
        let slot = match name.as_str() {
            "android" => &mut browsers.android,
            "chrome" => &mut browsers.chrome,
            "edge" => &mut browsers.edge,
            "firefox" => &mut browsers.firefox,
            "ie" => &mut browsers.ie,
            "ios_saf" => &mut browsers.ios_saf,
            "opera" => &mut browsers.opera,
            "safari" => &mut browsers.safari,
            "samsung" => &mut browsers.samsung,
            _ => {
                tracing::warn!("Ignoring unknown browser target '{}'", name);
                continue;
            }
        };
        *slot = Some(encoded);
    }
    browsers
}

/// Parses, prefixes, merges and minifies CSS in process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightningCss {
    browsers: Browsers,
}

impl LightningCss {
    pub fn new(targets: &BTreeMap<String, String>) -> Self {
        Self { browsers: browsers_from(targets) }
    }

    fn targets(&self) -> Targets {
        Targets::from(self.browsers)
    }
}

fn parse(css: &str) -> Result<StyleSheet<'_>, ToolError> {
    StyleSheet::parse(css, ParserOptions::default()).map_err(|e| ToolError::Message(e.to_string()))
}

fn print(sheet: &StyleSheet<'_>, minify: bool, targets: Targets) -> Result<String, ToolError> {
    sheet
        .to_css(PrinterOptions { minify, targets, ..Default::default() })
        .map(|out| out.code)
        .map_err(|e| ToolError::Message(e.to_string()))
}

fn run_minify(sheet: &mut StyleSheet<'_>, targets: Targets) -> Result<(), ToolError> {
    sheet
        .minify(MinifyOptions { targets, ..Default::default() })
        .map_err(|e| ToolError::Message(e.to_string()))
}

fn empty_block<'i>() -> DeclarationBlock<'i> {
    DeclarationBlock { important_declarations: Vec::new(), declarations: Vec::new() }
}

fn prefix_rules(rules: &mut CssRuleList<'_>, targets: Targets) -> Result<(), ToolError> {
    for rule in rules.0.iter_mut() {
        match rule {
            CssRule::Style(style) => prefix_style(style, targets)?,
            CssRule::Media(media) => prefix_rules(&mut media.rules, targets)?,
            CssRule::Supports(supports) => prefix_rules(&mut supports.rules, targets)?,
            _ => {}
        }
    }
    Ok(())
}

/// Prefix one rule's declarations in place, keeping their order and
/// leaving longhands as written.
fn prefix_style(style: &mut StyleRule<'_>, targets: Targets) -> Result<(), ToolError> {
    let nested = std::mem::replace(&mut style.rules, CssRuleList(Vec::new()));
    let block = std::mem::replace(&mut style.declarations, empty_block());

    let normal = block.declarations.into_iter().map(|p| (p, false));
    let important = block.important_declarations.into_iter().map(|p| (p, true));

    let mut prefixed = empty_block();
    for (property, is_important) in normal.chain(important) {
        let mut single = style.clone();
        if is_important {
            single.declarations.important_declarations.push(property);
        } else {
            single.declarations.declarations.push(property);
        }

        let rules = CssRuleList(vec![CssRule::Style(single)]);
        let mut sheet = StyleSheet::new(Vec::new(), rules, ParserOptions::default());
        run_minify(&mut sheet, targets)?;

        let done = std::mem::take(&mut sheet.rules.0).into_iter().find_map(|rule| match rule {
            CssRule::Style(done) => Some(done),
            _ => None,
        });
        if let Some(done) = done {
            prefixed.declarations.extend(done.declarations.declarations);
            prefixed.important_declarations.extend(done.declarations.important_declarations);
        }
    }

    style.declarations = prefixed;
    style.rules = nested;
    prefix_rules(&mut style.rules, targets)
}

impl CssPostProcessor for LightningCss {
    fn prefix(&self, css: &str) -> Result<String, ToolError> {
        let mut sheet = parse(css)?;
        prefix_rules(&mut sheet.rules, self.targets())?;
        print(&sheet, false, self.targets())
    }

    fn merge_media(&self, css: &str) -> Result<String, ToolError> {
        let mut sheet = parse(css)?;
        let rules = std::mem::take(&mut sheet.rules.0);

        let mut plain = Vec::with_capacity(rules.len());
        let mut groups: Vec<(String, CssRule<'_>)> = Vec::new();

        for rule in rules {
            let CssRule::Media(media) = rule else {
                plain.push(rule);
                continue;
            };
            let key = media
                .query
                .to_css_string(PrinterOptions::default())
                .map_err(|e| ToolError::Message(e.to_string()))?;

            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, CssRule::Media(existing))) => existing.rules.0.extend(media.rules.0),
                _ => groups.push((key, CssRule::Media(media))),
            }
        }

        plain.extend(groups.into_iter().map(|(_, rule)| rule));
        sheet.rules.0 = plain;
        print(&sheet, false, self.targets())
    }

    fn collapse_shorthands(&self, css: &str) -> Result<String, ToolError> {
        let mut sheet = parse(css)?;
        run_minify(&mut sheet, self.targets())?;
        print(&sheet, false, self.targets())
    }

    fn minify(&self, css: &str) -> Result<String, ToolError> {
        let sheet = parse(css)?;
        print(&sheet, true, self.targets())
    }
}

#[async_trait]
impl StylesheetCompiler for LightningCss {
    async fn compile(&self, _path: &Path, source: &str) -> Result<String, ToolError> {
        let sheet = parse(source)?;
        print(&sheet, false, Targets::default())
    }
}

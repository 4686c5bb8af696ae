//! Right-to-left stylesheet mirroring.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::Mirror;

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{;]\s*)([A-Za-z-]+)(\s*:\s*)([^;{}]+)").expect("valid regex")
});
static DIRECTION_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(left|right|ltr|rtl)\b").expect("valid regex"));

/// Properties whose four-value form is `top right bottom left`.
const BOX_SHORTHANDS: &[&str] =
    &["margin", "padding", "border-width", "border-style", "border-color", "border-radius"];

/// Swap `left`/`right` and `ltr`/`rtl` in a property name or value.
pub fn swap_direction(text: &str) -> String {
    DIRECTION_WORD
        .replace_all(text, |caps: &Captures| match &caps[1] {
            "left" => "right",
            "right" => "left",
            "ltr" => "rtl",
            _ => "ltr",
        })
        .into_owned()
}

/// Swap the second and fourth value of a four-value box shorthand.
fn mirror_box(value: &str) -> Option<String> {
    let trimmed = value.trim_end();
    let trailing = &value[trimmed.len()..];
    let (body, important) = match trimmed.strip_suffix("!important") {
        Some(body) => (body, " !important"),
        None => (trimmed, ""),
    };
    let parts: Vec<&str> = body.split_whitespace().collect();
    if parts.len() != 4 || body.contains('/') {
        return None;
    }
    Some(format!("{} {} {} {}{}{}", parts[0], parts[3], parts[2], parts[1], important, trailing))
}

/// Mirrors direction-dependent declarations with regular expressions.
///
/// Handles property names (`margin-left`), keyword values (`float: left`,
/// `direction: ltr`) and four-value box shorthands. Values containing
/// `url(` are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMirror;

impl Mirror for RegexMirror {
    fn mirror(&self, css: &str) -> String {
        // Prefix a brace so a declaration at offset 0 also matches.
        let input = format!("{{{}", css);
        let out = DECLARATION.replace_all(&input, |caps: &Captures| {
            let property = swap_direction(&caps[2]);
            let raw_value = &caps[4];
            let value = if raw_value.contains("url(") {
                raw_value.to_string()
            } else if BOX_SHORTHANDS.contains(&caps[2].to_ascii_lowercase().as_str()) {
                mirror_box(raw_value).unwrap_or_else(|| raw_value.to_string())
            } else {
                swap_direction(raw_value)
            };
            format!("{}{}{}{}", &caps[1], property, &caps[3], value)
        });
        out[1..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(css: &str) -> String {
        RegexMirror.mirror(css)
    }

    #[test]
    fn test_swap_property_names() {
        assert_eq!(mirror("a{margin-left:4px}"), "a{margin-right:4px}");
        assert_eq!(mirror("a { padding-right: 2px; }"), "a { padding-left: 2px; }");
    }

    #[test]
    fn test_swap_keyword_values() {
        assert_eq!(mirror("a{float:left;text-align:right}"), "a{float:right;text-align:left}");
        assert_eq!(mirror("body{direction:ltr}"), "body{direction:rtl}");
    }

    #[test]
    fn test_box_shorthand() {
        assert_eq!(mirror("a{margin:1px 2px 3px 4px}"), "a{margin:1px 4px 3px 2px}");
        assert_eq!(
            mirror("a{padding:0 1em 0 2em !important}"),
            "a{padding:0 2em 0 1em !important}"
        );
        assert_eq!(mirror("a{margin:0 auto}"), "a{margin:0 auto}");
    }

    #[test]
    fn test_selectors_untouched() {
        assert_eq!(mirror(".left{color:red}"), ".left{color:red}");
    }

    #[test]
    fn test_urls_untouched() {
        let css = "a{background:url(img/arrow-left.png) left top}";
        assert_eq!(mirror(css), css);
    }

    #[test]
    fn test_declaration_at_start() {
        assert_eq!(mirror("left:0"), "right:0");
    }
}

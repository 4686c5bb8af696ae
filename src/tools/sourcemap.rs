//! Source map (revision 3) for concatenated bundles.
//!
//! Each generated line of a chunk maps back to the start of the root source
//! the chunk was compiled from. That is enough for browser dev tools to show
//! which stylesheet a rule came from.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Append the base64 VLQ encoding of `value` to `out`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let mut v: u64 = if value < 0 { ((-value as u64) << 1) | 1 } else { (value as u64) << 1 };
    loop {
        let mut digit = (v & 31) as usize;
        v >>= 5;
        if v > 0 {
            digit |= 32;
        }
        out.push(BASE64[digit] as char);
        if v == 0 {
            break;
        }
    }
}

/// Path of `to` relative to the directory `from`, with `/` separators.
pub fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    rel.to_string_lossy().replace('\\', "/")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap<'a> {
    version: u8,
    file: &'a str,
    sources: &'a [String],
    sources_content: &'a [String],
    names: [&'a str; 0],
    mappings: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    contents: Vec<String>,
    mappings: String,
    lines: usize,
    prev_source: i64,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of `generated` text compiled from `source`.
    pub fn add_chunk(&mut self, source: String, content: String, generated: &str) {
        let index = self.sources.len() as i64;
        self.sources.push(source);
        self.contents.push(content);

        for line in 0..generated.lines().count() {
            if self.lines > 0 {
                self.mappings.push(';');
            }
            // generated column, source index, original line, original column
            self.mappings.push('A');
            if line == 0 {
                encode_vlq(index - self.prev_source, &mut self.mappings);
                self.prev_source = index;
            } else {
                self.mappings.push('A');
            }
            self.mappings.push_str("AA");
            self.lines += 1;
        }
    }

    /// Number of generated lines mapped so far.
    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn to_json(&self, file: &str) -> Result<String, serde_json::Error> {
        serde_json::to_string(&RawSourceMap {
            version: 3,
            file,
            sources: &self.sources,
            sources_content: &self.contents,
            names: [],
            mappings: &self.mappings,
        })
    }
}

/// Trailer linking a CSS bundle to its map.
pub fn css_mapping_comment(map_name: &str) -> String {
    format!("/*# sourceMappingURL={} */\n", map_name)
}

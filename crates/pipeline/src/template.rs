use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--\s*<([^>]+)>\s*-->(.*?)<!--\s*</([^>]+)>\s*-->").expect("valid block regex")
});

pub const DEFAULT_TEMPLATE: &str = "<!-- <Video Description> -->\n<Hook>\n<!-- </Video Description> -->";
const HOOK_PLACEHOLDER: &str = "<Hook and SEO optimized video description from captions>";

/// A description template split into named blocks and verbatim text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTemplate {
    pub blocks: BTreeMap<String, String>,
    /// Everything outside the named blocks, comment lines removed.
    pub base_text: String,
}

impl ParsedTemplate {
    pub fn parse(raw: &str) -> Self {
        let text = raw
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut blocks = BTreeMap::new();
        let mut base_text = String::new();
        let mut cursor = 0;
        for caps in BLOCK_RE.captures_iter(&text) {
            let (Some(whole), Some(open), Some(body), Some(close)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            // The regex crate has no backreferences; mismatched pairs stay verbatim.
            if !open.as_str().trim().eq_ignore_ascii_case(close.as_str().trim()) {
                continue;
            }
            base_text.push_str(&text[cursor..whole.start()]);
            cursor = whole.end();
            blocks.insert(open.as_str().trim().to_string(), body.as_str().trim().to_string());
        }
        base_text.push_str(&text[cursor..]);

        Self {
            blocks,
            base_text: base_text.trim().to_string(),
        }
    }

    pub fn block(&self, name: &str) -> &str {
        self.blocks.get(name).map(String::as_str).unwrap_or("")
    }

    /// The layout handed to the model as the description template.
    pub fn template_text(&self) -> String {
        let text = format!("{}\n\n{}", self.block("Video Description"), self.base_text);
        let text = text.trim();
        if text.is_empty() {
            HOOK_PLACEHOLDER.to_string()
        } else {
            text.to_string()
        }
    }
}

/// First existing candidate, unless an explicit path was given.
pub fn locate_template(explicit: Option<&Path>, candidates: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    candidates.iter().find(|p| p.exists()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_and_base_text_are_separated() {
        let raw = "-- editor note, dropped\n\
                   <!-- <Video Name> -->Morning Brew<!-- </Video Name> -->\n\
                   <!-- <video description> -->\nHook here\n<!-- </Video Description> -->\n\
                   Subscribe for more.";
        let t = ParsedTemplate::parse(raw);
        assert_eq!(t.block("Video Name"), "Morning Brew");
        assert_eq!(t.block("video description"), "Hook here");
        assert_eq!(t.base_text, "Subscribe for more.");
        assert!(!t.base_text.contains("editor note"));
    }

    #[test]
    fn default_template_yields_hook_description() {
        let t = ParsedTemplate::parse(DEFAULT_TEMPLATE);
        assert_eq!(t.block("Video Description"), "<Hook>");
        assert_eq!(t.template_text(), "<Hook>");
    }

    #[test]
    fn empty_template_falls_back_to_placeholder() {
        assert_eq!(ParsedTemplate::parse("-- only comments").template_text(), HOOK_PLACEHOLDER);
    }

    #[test]
    fn multiline_blocks_match_across_lines() {
        let t = ParsedTemplate::parse("<!-- <Context> -->\nline one\nline two\n<!-- </Context> -->");
        assert_eq!(t.block("Context"), "line one\nline two");
        assert!(t.base_text.is_empty());
    }

    #[test]
    fn explicit_template_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("tdtmp.txt");
        std::fs::write(&present, "x").unwrap();
        let missing = dir.path().join("nope.txt");
        assert_eq!(locate_template(Some(&missing), &[present.clone()]), None);
        assert_eq!(locate_template(None, &[missing, present.clone()]), Some(present));
    }
}

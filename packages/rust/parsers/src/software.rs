//! Installed-software list parser.

use std::collections::HashSet;
use std::sync::LazyLock;

use dumpsift_shared::SoftwareEntry;
use regex::Regex;

use crate::EntityParser;
use crate::text::{decode, field, non_empty, read_blocks};

const NAME_KEYS: &[&str] = &["name", "program", "application", "displayname", "display name"];
const VERSION_KEYS: &[&str] = &["version", "displayversion", "display version"];

/// `12) Google Chrome [120.0.1]`, `Steam (2.10.91)`, `7-Zip - 23.01`.
static LISTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:\d+[.)]\s*)?(?P<name>.+?)\s*(?:\[(?P<v1>v?\d[^\]]*)\]|\((?P<v2>v?\d[^)]*)\)|\s-\s(?P<v3>v?\d\S*))?\s*$",
    )
    .expect("valid regex")
});

/// Parses software inventories into [`SoftwareEntry`] records, deduplicated
/// by name and version.
pub struct SoftwareParser;

impl EntityParser for SoftwareParser {
    type Record = SoftwareEntry;

    fn name(&self) -> &'static str {
        "software"
    }

    fn parse(&self, raw: &[u8]) -> Vec<SoftwareEntry> {
        let text = decode(raw);
        let mut seen = HashSet::new();

        let structured: Vec<SoftwareEntry> = read_blocks(&text)
            .iter()
            .filter_map(|block| {
                Some(SoftwareEntry {
                    name: field(block, NAME_KEYS).and_then(non_empty)?,
                    version: field(block, VERSION_KEYS).and_then(non_empty),
                })
            })
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        if !structured.is_empty() {
            return structured;
        }

        text.lines()
            .filter_map(parse_line)
            .filter(|entry| seen.insert(entry.clone()))
            .collect()
    }
}

fn parse_line(line: &str) -> Option<SoftwareEntry> {
    if line.trim().is_empty() || crate::text::is_separator(line) {
        return None;
    }
    let caps = LISTED.captures(line)?;
    let name = non_empty(caps.name("name")?.as_str())?;
    let version = ["v1", "v2", "v3"]
        .iter()
        .find_map(|group| caps.name(group))
        .and_then(|m| non_empty(m.as_str()));
    Some(SoftwareEntry { name, version })
}

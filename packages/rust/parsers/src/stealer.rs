//! Stealer family detection from banners and file names.

/// Known families and the lower-case markers that identify them.
const FAMILIES: &[(&str, &[&str])] = &[
    ("RedLine", &["redline"]),
    ("Raccoon", &["raccoon", "recordbreaker"]),
    ("Vidar", &["vidar"]),
    ("Lumma", &["lumma", "lummac2"]),
    ("StealC", &["stealc"]),
    ("Meta", &["metastealer", "meta stealer"]),
    ("Aurora", &["aurora"]),
    ("Titan", &["titan stealer", "titanstealer"]),
    ("Mystic", &["mystic"]),
    ("Rhadamanthys", &["rhadamanthys"]),
    ("RisePro", &["risepro"]),
    ("Atomic", &["atomic stealer", "amos"]),
];

/// Detect a family from any text (report banner, file content).
pub fn detect_in_text(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    FAMILIES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map(|(name, _)| *name)
}

/// Detect a family from a file or directory name.
pub fn detect_from_name(name: &str) -> Option<&'static str> {
    detect_in_text(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_families() {
        assert_eq!(detect_in_text("*** RedLine Stealer ***"), Some("RedLine"));
        assert_eq!(detect_from_name("StealC_passwords.txt"), Some("StealC"));
        assert_eq!(detect_from_name("LummaC2 Log"), Some("Lumma"));
        assert_eq!(detect_in_text("plain notes"), None);
    }
}

//! System report parser (`System.txt`, `Information.txt`, `UserInformation.txt`).

use dumpsift_shared::SystemProfile;

use crate::EntityParser;
use crate::stealer::detect_in_text;
use crate::text::{decode, is_separator, non_empty, split_key_value};

/// Parses a stealer's host report into at most one [`SystemProfile`].
pub struct SystemInfoParser;

impl EntityParser for SystemInfoParser {
    type Record = SystemProfile;

    fn name(&self) -> &'static str {
        "system"
    }

    fn parse(&self, raw: &[u8]) -> Vec<SystemProfile> {
        let text = decode(raw);
        let mut profile = SystemProfile::default();

        for line in text.lines() {
            if is_separator(line) {
                continue;
            }
            let Some((key, value)) = split_key_value(line) else {
                continue;
            };
            let Some(value) = non_empty(value) else {
                continue;
            };
            if let Some(slot) = slot_for(&mut profile, &key) {
                if slot.is_none() {
                    *slot = Some(value.clone());
                }
            }
            profile.entries.push((key, value));
        }

        if profile.entries.is_empty() {
            return Vec::new();
        }
        profile.stealer = detect_in_text(&text).map(str::to_string);
        vec![profile]
    }
}

fn slot_for<'a>(profile: &'a mut SystemProfile, key: &str) -> Option<&'a mut Option<String>> {
    let slot = match key {
        "computer name" | "computername" | "pc name" | "machine name" | "machinename"
        | "hostname" | "host name" | "computer" => &mut profile.hostname,
        "ip" | "ip address" | "ipaddress" | "ip addr" | "external ip" => &mut profile.ip,
        "country" | "country code" | "location" => &mut profile.country,
        "os" | "operating system" | "operation system" | "windows" | "os version" | "osversion"
        | "system" => {
            &mut profile.os
        }
        "user name" | "username" | "user" => &mut profile.username,
        "language" | "keyboard languages" | "current language" | "display language"
        | "languages" => &mut profile.language,
        "antivirus" | "anti-virus" | "antiviruses" | "av" => &mut profile.antivirus,
        "hwid" | "machine id" | "machineid" => &mut profile.hwid,
        "log date" | "local date" | "date" | "local time" | "infection date" | "time"
        | "install date" => &mut profile.infected_at,
        _ => return None,
    };
    Some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_redline_style_report() {
        let text = "\
*****************************************
Build ID: logs2024
IP: 203.0.113.7
FileLocation: C:\\Users\\jdoe\\AppData\\Local\\Temp\\a.exe
UserName: jdoe
Country: US
Computer Name: DESKTOP-ABC123
HWID: 9F3C2A
Current Language: English (United States)
Operation System: Windows 10 Pro x64
Log date: 03/14/2024 10:22:01
Antivirus: Windows Defender
";
        let profiles = SystemInfoParser.parse(text.as_bytes());
        assert_eq!(profiles.len(), 1);
        let p = &profiles[0];
        assert_eq!(p.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(p.username.as_deref(), Some("jdoe"));
        assert_eq!(p.hostname.as_deref(), Some("DESKTOP-ABC123"));
        assert_eq!(p.country.as_deref(), Some("US"));
        assert_eq!(p.hwid.as_deref(), Some("9F3C2A"));
        assert_eq!(p.infected_at.as_deref(), Some("03/14/2024 10:22:01"));
        assert_eq!(p.antivirus.as_deref(), Some("Windows Defender"));
        // Every pair is retained, mapped or not.
        assert!(p.entries.iter().any(|(k, _)| k == "build id"));
        assert!(p.entries.iter().any(|(k, _)| k == "operation system"));
    }

    #[test]
    fn first_value_wins() {
        let profiles = SystemInfoParser.parse(b"IP: 1.1.1.1\nIP Address: 2.2.2.2\n");
        assert_eq!(profiles[0].ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(profiles[0].entries.len(), 2);
    }

    #[test]
    fn detects_stealer_banner() {
        let text = "Lumma Stealer v4\nIP: 1.1.1.1\n";
        let profiles = SystemInfoParser.parse(text.as_bytes());
        assert_eq!(profiles[0].stealer.as_deref(), Some("Lumma"));
    }

    #[test]
    fn empty_or_garbage_is_empty() {
        assert!(SystemInfoParser.parse(b"").is_empty());
        assert!(SystemInfoParser.parse(b"just some words\nno pairs").is_empty());
    }
}

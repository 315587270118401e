//! Browser password dump parser.
//!
//! Handles the block format most stealers emit:
//!
//! ```text
//! URL: https://example.com/login
//! Username: alice
//! Password: hunter2
//! Browser: Chrome (Profile 1)
//! ===============
//! ```
//!
//! and falls back to `url:user:pass` combo lines when no block is found.

use dumpsift_shared::Credential;

use crate::EntityParser;
use crate::domain::extract_domain;
use crate::text::{decode, field, non_empty, read_blocks};

const URL_KEYS: &[&str] = &["url", "host", "hostname", "site", "website", "origin"];
const USER_KEYS: &[&str] = &["username", "user", "login", "user name", "email", "e-mail"];
const PASS_KEYS: &[&str] = &["password", "pass", "pwd"];
const BROWSER_KEYS: &[&str] = &["browser", "soft", "application", "app", "storage"];

/// Schemes recognised at the start of a combo line.
const COMBO_SCHEMES: &[&str] = &["https://", "http://", "android://", "ftp://"];

/// Parses credential dumps into [`Credential`] records.
pub struct CredentialParser;

impl EntityParser for CredentialParser {
    type Record = Credential;

    fn name(&self) -> &'static str {
        "credential"
    }

    fn parse(&self, raw: &[u8]) -> Vec<Credential> {
        let text = decode(raw);
        let structured = parse_blocks(&text);
        if !structured.is_empty() {
            return structured;
        }
        text.lines().filter_map(parse_combo_line).collect()
    }
}

fn parse_blocks(text: &str) -> Vec<Credential> {
    read_blocks(text)
        .into_iter()
        .filter_map(|block| {
            build(
                field(&block, URL_KEYS),
                field(&block, USER_KEYS)?,
                field(&block, PASS_KEYS)?,
                field(&block, BROWSER_KEYS),
            )
        })
        .collect()
}

/// Build a record if username and password are present. The URL is optional:
/// a login without one is kept with a null domain.
fn build(url: Option<&str>, user: &str, pass: &str, browser: Option<&str>) -> Option<Credential> {
    let username = non_empty(user)?;
    let password = non_empty(pass)?;
    let url = url.and_then(non_empty).filter(|u| !is_placeholder(u));
    let parts = url.as_deref().map(extract_domain).unwrap_or_default();

    Some(Credential {
        url,
        domain: parts.domain,
        tld: parts.tld,
        username,
        password,
        browser: browser.and_then(non_empty),
    })
}

fn is_placeholder(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "unknown" | "none" | "null" | "n/a" | "-"
    )
}

/// `url:user:pass`, `url|user|pass` or `url;user;pass`.
fn parse_combo_line(line: &str) -> Option<Credential> {
    let line = line.trim();
    if line.len() < 5 || line.chars().any(char::is_whitespace) {
        return None;
    }

    for sep in ['|', ';'] {
        let parts: Vec<&str> = line.split(sep).collect();
        if parts.len() == 3 && looks_like_host(parts[0]) {
            return build(Some(parts[0]), parts[1], parts[2], None);
        }
    }

    let (scheme, rest) = COMBO_SCHEMES
        .iter()
        .find_map(|s| {
            line.get(..s.len())
                .filter(|head| head.eq_ignore_ascii_case(s))
                .map(|_| (*s, &line[s.len()..]))
        })
        .unwrap_or(("", line));

    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() < 3 {
        return None;
    }
    let n = parts.len();
    let location = parts[..n - 2].join(":");
    if !looks_like_host(&location) && scheme != "android://" {
        return None;
    }
    let url = format!("{scheme}{location}");
    build(Some(&url), parts[n - 2], parts[n - 1], None)
}

fn looks_like_host(candidate: &str) -> bool {
    let host = candidate
        .split("://")
        .last()
        .unwrap_or(candidate)
        .split(['/', ':'])
        .next()
        .unwrap_or("");
    host.contains('.') && !host.starts_with('.') && !host.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<Credential> {
        CredentialParser.parse(text.as_bytes())
    }

    #[test]
    fn parses_separated_blocks() {
        let text = "\
URL: https://accounts.google.com/signin
Username: alice@gmail.com
Password: hunter2
Browser: Chrome (Default)
===============
URL: https://www.facebook.com/
Login: bob
Pass: s3cret:with:colons
===============
";
        let creds = parse(text);
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].domain.as_deref(), Some("google.com"));
        assert_eq!(creds[0].browser.as_deref(), Some("Chrome (Default)"));
        assert_eq!(creds[1].username, "bob");
        assert_eq!(creds[1].password, "s3cret:with:colons");
        assert_eq!(creds[1].tld.as_deref(), Some("com"));
    }

    #[test]
    fn splits_blocks_without_blank_lines() {
        let text = "HOST: a.com\nUSER: u1\nPASS: p1\nHOST: b.com\nUSER: u2\nPASS: p2\n";
        let creds = parse(text);
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[1].domain.as_deref(), Some("b.com"));
    }

    #[test]
    fn missing_domain_is_kept_as_null() {
        let creds = parse("Username: orphan\nPassword: pw\n");
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].domain, None);
        assert_eq!(creds[0].url, None);

        let creds = parse("URL: UNKNOWN\nUsername: orphan\nPassword: pw\n");
        assert_eq!(creds[0].url, None);
    }

    #[test]
    fn requires_username_and_password() {
        assert!(parse("URL: https://a.com\nUsername: alice\n").is_empty());
        assert!(parse("URL: https://a.com\nPassword: pw\n").is_empty());
        assert!(parse("URL: https://a.com\nUsername: \nPassword: pw\n").is_empty());
    }

    #[test]
    fn combo_lines_as_fallback() {
        let text = "\
https://login.example.com:8443/auth:carol:pa55
example.org|dave|letmein
not a credential line
android://hash@com.whatsapp/:erin:pw
";
        let creds = parse(text);
        assert_eq!(creds.len(), 3);
        assert_eq!(creds[0].url.as_deref(), Some("https://login.example.com:8443/auth"));
        assert_eq!(creds[0].username, "carol");
        assert_eq!(creds[0].domain.as_deref(), Some("example.com"));
        assert_eq!(creds[1].domain.as_deref(), Some("example.org"));
        assert_eq!(creds[2].domain.as_deref(), Some("com.whatsapp"));
    }

    #[test]
    fn structured_wins_over_combo() {
        let text = "URL: https://a.com\nUser: x\nPass: y\n\nb.com:u:p\n";
        let creds = parse(text);
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].domain.as_deref(), Some("a.com"));
    }

    #[test]
    fn binary_garbage_yields_nothing() {
        assert!(CredentialParser.parse(&[0, 159, 146, 150, 255, 0, 1]).is_empty());
    }
}

//! Domain and TLD extraction from the loose URLs found in password dumps.

use std::net::IpAddr;

use url::Url;

/// Second-level labels that are part of a public suffix (`co.uk`, `com.br`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "gov", "ac", "edu", "ne", "or"];

/// Registrable domain and top-level label of a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainParts {
    pub domain: Option<String>,
    pub tld: Option<String>,
}

/// Extract the registrable domain (`accounts.google.com` → `google.com`) and
/// its TLD. Android app logins (`android://<hash>@com.example.app/`) map to
/// the package name. IP hosts are kept verbatim with no TLD.
pub fn extract_domain(raw: &str) -> DomainParts {
    let raw = raw.trim();
    if raw.is_empty() {
        return DomainParts::default();
    }

    if let Some(rest) = raw.strip_prefix("android://") {
        let package = rest
            .rsplit_once('@')
            .map_or(rest, |(_, pkg)| pkg)
            .trim_end_matches('/');
        return DomainParts {
            domain: (!package.is_empty()).then(|| package.to_ascii_lowercase()),
            tld: None,
        };
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let Some(host) = Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return DomainParts::default();
    };

    let host = host.trim_start_matches("www.").trim_end_matches('.');
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return DomainParts {
            domain: Some(bare.to_string()),
            tld: None,
        };
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.as_slice() {
        [] => DomainParts::default(),
        [single] => DomainParts {
            domain: Some((*single).to_string()),
            tld: None,
        },
        [.., second, tld] => {
            let keep = if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(second) {
                3
            } else {
                2
            };
            let start = labels.len().saturating_sub(keep);
            DomainParts {
                domain: Some(labels[start..].join(".")),
                tld: Some((*tld).to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(raw: &str) -> Option<String> {
        extract_domain(raw).domain
    }

    #[test]
    fn strips_scheme_subdomains_and_www() {
        assert_eq!(domain("https://accounts.google.com/signin"), Some("google.com".into()));
        assert_eq!(domain("www.Example.org"), Some("example.org".into()));
        assert_eq!(extract_domain("https://mail.yahoo.com").tld, Some("com".into()));
    }

    #[test]
    fn keeps_country_second_level() {
        assert_eq!(domain("https://login.bbc.co.uk/"), Some("bbc.co.uk".into()));
        assert_eq!(extract_domain("bbc.co.uk").tld, Some("uk".into()));
    }

    #[test]
    fn ip_hosts_have_no_tld() {
        let parts = extract_domain("http://192.168.1.10:8080/admin");
        assert_eq!(parts.domain, Some("192.168.1.10".into()));
        assert_eq!(parts.tld, None);
    }

    #[test]
    fn android_package_names() {
        assert_eq!(
            domain("android://aGFzaA==@com.instagram.android/"),
            Some("com.instagram.android".into())
        );
    }

    #[test]
    fn garbage_yields_nothing() {
        assert_eq!(extract_domain(""), DomainParts::default());
        assert_eq!(domain("http://"), None);
    }
}

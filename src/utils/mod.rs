//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Absolutize a root-relative reference (`/css/a.css`) against `origin`.
///
/// Returns `None` for anything else: absolute URLs, protocol-relative
/// (`//cdn...`) references, document-relative paths, fragments.
pub fn rebase_root_relative(origin: &Url, href: &str) -> Option<String> {
    if !href.starts_with('/') || href.starts_with("//") {
        return None;
    }
    Some(resolve_url(origin, href))
}

/// Resident set size of this process in KiB, where the platform exposes it.
pub fn resident_memory_kb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_rebase_root_relative() {
        let origin = Url::parse("https://dubrava.example.com").unwrap();
        assert_eq!(
            rebase_root_relative(&origin, "/css/a.css").as_deref(),
            Some("https://dubrava.example.com/css/a.css")
        );
        assert_eq!(rebase_root_relative(&origin, "https://cdn.example.com/a.js"), None);
        assert_eq!(rebase_root_relative(&origin, "//cdn.example.com/a.js"), None);
        assert_eq!(rebase_root_relative(&origin, "css/a.css"), None);
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tkiosk\nVmPeak:\t  204800 kB\nVmRSS:\t   51200 kB\nThreads:\t8\n";
        assert_eq!(parse_vm_rss(status), Some(51200));
        assert_eq!(parse_vm_rss("Name:\tkiosk\n"), None);
    }
}

//! Lookup keys and the host/path fragments probed for each lookup

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use crate::hash::CompleteHash;

/// Most host suffixes probed besides the exact host
const MAX_HOST_COMPONENTS: usize = 5;
/// Most leading path prefixes probed besides the exact path
const MAX_PATH_COMPONENTS: usize = 4;

/// A canonical `host/path?query` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    host: String,
    /// Always starts with '/'
    path: String,
    query: Option<String>,
}

impl LookupKey {
    /// Build a key from a URL or an already canonical `host/path` string.
    ///
    /// Strips scheme, userinfo, port and fragment, lowercases the host and
    /// trims its dots. Returns `None` when no host is present.
    pub fn parse(input: &str) -> Option<Self> {
        let mut rest = input.trim();
        if let Some(idx) = rest.find("://") {
            rest = &rest[idx + 3..];
        }
        if let Some(idx) = rest.find('#') {
            rest = &rest[..idx];
        }

        let (authority, tail) = match rest.find(|c| c == '/' || c == '?') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        let host = match authority.rfind(':') {
            Some(idx) if authority[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &authority[..idx],
            _ => authority,
        };
        let host = host.trim_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }

        let (path, query) = match tail.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (tail, None),
        };
        let path = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };

        Some(Self { host, path, query })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host variants: the exact host, then suffixes made of the last
    /// five components down to two. IP literals get no suffixes.
    pub fn host_variants(&self) -> Vec<String> {
        let mut hosts = vec![self.host.clone()];
        if self.host.parse::<Ipv4Addr>().is_ok() {
            return hosts;
        }

        let components: Vec<&str> = self.host.split('.').collect();
        if components.len() < 2 {
            return hosts;
        }
        let first = components.len().saturating_sub(MAX_HOST_COMPONENTS).max(1);
        for start in first..components.len() - 1 {
            let suffix = components[start..].join(".");
            if !hosts.contains(&suffix) {
                hosts.push(suffix);
            }
        }
        hosts
    }

    /// Path variants: exact path with and without query, root, and up to
    /// four leading directory prefixes
    pub fn path_variants(&self) -> Vec<String> {
        let mut paths = Vec::new();
        if let Some(q) = &self.query {
            paths.push(format!("{}?{}", self.path, q));
        }
        paths.push(self.path.clone());
        if !paths.iter().any(|p| p == "/") {
            paths.push("/".to_string());
        }

        let mut prefix = String::from("/");
        let dirs: Vec<&str> = self.path.trim_start_matches('/').split('/').collect();
        // the last element is the file part (or empty for a trailing slash)
        for dir in dirs.iter().take(dirs.len().saturating_sub(1)).take(MAX_PATH_COMPONENTS) {
            prefix.push_str(dir);
            prefix.push('/');
            if !paths.contains(&prefix) {
                paths.push(prefix.clone());
            }
        }
        paths
    }

    /// Every `host + path` combination, deduplicated
    pub fn fragments(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for host in self.host_variants() {
            for path in self.path_variants() {
                let fragment = format!("{}{}", host, path);
                if seen.insert(fragment.clone()) {
                    out.push(fragment);
                }
            }
        }
        out
    }

    /// Complete hashes of every fragment
    pub fn fragment_hashes(&self) -> Vec<CompleteHash> {
        self.fragments()
            .iter()
            .map(|f| CompleteHash::of_fragment(f))
            .collect()
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        Ok(())
    }
}

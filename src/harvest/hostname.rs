//! Subdomain-tolerant hostname matching shared by the registry harvesters.

use url::Url;

/// Lowercased hostname of `url` without a leading `www.`.
///
/// Scheme-less inputs such as `example.org/data` are accepted.
pub fn host_of(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = Url::parse(url)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("https://{}", url)).ok())?;
    parsed.host_str().map(normalize)
}

/// Lowercases a hostname and strips a leading `www.`.
pub fn normalize(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Whether two hostnames denote the same repository: equal, or one a
/// direct subdomain of the other.
///
/// `about.example.org` matches `example.org`; `data.dans.knaw.nl` does not
/// match `knaw.nl`; `otherexample.org` never matches `example.org`.
pub fn hostnames_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    let depth_diff = labels(long).len().saturating_sub(labels(short).len());
    depth_diff == 1 && long.ends_with(&format!(".{}", short))
}

/// Number of trailing labels two hostnames share. Higher is closer.
pub fn match_score(a: &str, b: &str) -> usize {
    let a = normalize(a);
    let b = normalize(b);
    labels(&a)
        .iter()
        .rev()
        .zip(labels(&b).iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Whether the hosts of two URLs match under [`hostnames_match`].
pub fn urls_match(a: &str, b: &str) -> bool {
    match (host_of(a), host_of(b)) {
        (Some(a), Some(b)) => hostnames_match(&a, &b),
        _ => false,
    }
}

fn labels(host: &str) -> Vec<&str> {
    host.split('.').filter(|l| !l.is_empty()).collect()
}

use url::Url;

/// Extracts the domain from a URL
///
/// The rate limiter matches this value against each rule's glob. The port is
/// not part of the domain, so every port of a host shares one limit rule, and
/// a fully-qualified trailing dot is dropped so `example.com.` and
/// `example.com` fall under the same rule.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use swarm_crawl::url::extract_domain;
///
/// let url = Url::parse("https://example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("https://sub.example.com./path").unwrap();
/// assert_eq!(extract_domain(&url), Some("sub.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

//! Client identification: request descriptors and the key that partitions
//! all per-client state.
//!
//! Resolution never fails. Every header is untrusted input, so anything
//! missing or malformed degrades to a sentinel (`unknown` for the address,
//! `anonymous` for the subject) instead of rejecting the request.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Address sentinel used when no candidate yields an IP.
pub const UNKNOWN_IP: &str = "unknown";
/// Subject sentinel used when no credential can be decoded.
pub const ANONYMOUS: &str = "anonymous";

const EDGE_PROXY_HEADER: &str = "cf-connecting-ip";
const REVERSE_PROXY_HEADER: &str = "x-real-ip";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const AUTHORIZATION_HEADER: &str = "authorization";
const USER_AGENT_HEADER: &str = "user-agent";

/// What the surrounding framework tells us about an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    path: String,
    route: String,
    // lower-cased names
    headers: HashMap<String, String>,
    remote_ip: Option<IpAddr>,
}

impl RequestDescriptor {
    /// Descriptor for `path`; the route pattern defaults to the path itself.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self { route: path.clone(), path, headers: HashMap::new(), remote_ip: None }
    }

    /// Set the matched route pattern used for policy lookup.
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Add a header. Names are case-insensitive; a repeated name overwrites.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the connection-level peer address.
    pub fn remote_ip(mut self, ip: IpAddr) -> Self {
        self.remote_ip = Some(ip);
        self
    }

    /// Request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Matched route pattern.
    pub fn route_pattern(&self) -> &str {
        &self.route
    }

    /// Header lookup by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `User-Agent` header, empty when absent.
    pub fn user_agent(&self) -> &str {
        self.header_value(USER_AGENT_HEADER).unwrap_or("")
    }

    /// Connection-level peer address, if the framework supplied one.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }
}

/// Partition key for all rate-limit, suspicion and reputation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientKey(String);

impl ClientKey {
    /// Compose a key from an address label and a subject.
    pub fn new(ip: &str, subject: &str) -> Self {
        let ip = if ip.is_empty() { UNKNOWN_IP } else { ip };
        let subject = if subject.is_empty() { ANONYMOUS } else { subject };
        Self(format!("{ip}:{subject}"))
    }

    /// Borrow the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(raw: &str) -> Self {
        if raw.is_empty() {
            Self::new(UNKNOWN_IP, ANONYMOUS)
        } else {
            Self(raw.to_string())
        }
    }
}

/// Result of resolving a request to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Resolved address; `None` when every candidate was empty or unparsable.
    pub ip: Option<IpAddr>,
    /// Authenticated subject or [`ANONYMOUS`].
    pub subject: String,
    /// Partition key derived from both.
    pub key: ClientKey,
}

/// How much to trust proxy headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Consult `cf-connecting-ip`, `x-real-ip` and `x-forwarded-for`.
    pub trust_proxy_headers: bool,
    /// `0` takes the left-most `x-forwarded-for` hop; `n` takes the entry
    /// `n` positions from the right, i.e. the one appended by the outermost
    /// trusted proxy.
    pub trusted_proxy_hops: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { trust_proxy_headers: true, trusted_proxy_hops: 0 }
    }
}

/// Derives a [`ClientIdentity`] from a request descriptor.
#[derive(Debug, Clone, Default)]
pub struct ClientResolver {
    config: ResolverConfig,
}

impl ClientResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolve address, subject and key. Always succeeds.
    pub fn resolve(&self, req: &RequestDescriptor) -> ClientIdentity {
        let ip = self.resolve_ip(req);
        let subject = req
            .header_value(AUTHORIZATION_HEADER)
            .and_then(subject_from_authorization)
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let ip_label = ip.map(|ip| ip.to_string());
        let key = ClientKey::new(ip_label.as_deref().unwrap_or(UNKNOWN_IP), &subject);
        ClientIdentity { ip, subject, key }
    }

    /// First parsable candidate in trust order: edge proxy, reverse proxy,
    /// forwarded-for chain, connection address.
    pub fn resolve_ip(&self, req: &RequestDescriptor) -> Option<IpAddr> {
        if self.config.trust_proxy_headers {
            let from_headers = req
                .header_value(EDGE_PROXY_HEADER)
                .and_then(parse_ip)
                .or_else(|| req.header_value(REVERSE_PROXY_HEADER).and_then(parse_ip))
                .or_else(|| {
                    req.header_value(FORWARDED_FOR_HEADER).and_then(|chain| self.pick_hop(chain))
                });
            if from_headers.is_some() {
                return from_headers;
            }
        }
        req.peer_ip()
    }

    fn pick_hop(&self, chain: &str) -> Option<IpAddr> {
        let hops: Vec<&str> =
            chain.split(',').map(str::trim).filter(|hop| !hop.is_empty()).collect();
        let hop = match self.config.trusted_proxy_hops {
            0 => hops.first(),
            n if hops.len() >= n => hops.get(hops.len() - n),
            _ => hops.first(),
        };
        hop.and_then(|h| parse_ip(h))
    }
}

/// Accepts bare addresses, `ip:port`, and bracketed IPv6.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|sa| sa.ip()))
        .or_else(|| raw.trim_start_matches('[').trim_end_matches(']').parse().ok())
}

/// Best-effort subject from a bearer JWT. The signature is not verified: the
/// subject only partitions state, it never grants anything.
fn subject_from_authorization(value: &str) -> Option<String> {
    let token = value.trim().strip_prefix("Bearer ").or_else(|| value.trim().strip_prefix("bearer "))?;
    let payload = token.trim().split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    ["sub", "userId", "user_id"].iter().find_map(|field| match claims.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn bearer(claims: &str) -> String {
        format!(
            "Bearer {}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn edge_header_beats_everything() {
        let req = RequestDescriptor::new("/")
            .header("CF-Connecting-IP", "203.0.113.9")
            .header("X-Real-IP", "198.51.100.1")
            .header("X-Forwarded-For", "192.0.2.1, 10.0.0.1")
            .remote_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let id = ClientResolver::default().resolve(&req);
        assert_eq!(id.key.as_str(), "203.0.113.9:anonymous");
    }

    #[test]
    fn forwarded_for_takes_first_hop_by_default() {
        let req = RequestDescriptor::new("/").header("x-forwarded-for", " 192.0.2.1 , 10.0.0.1");
        let id = ClientResolver::default().resolve(&req);
        assert_eq!(id.ip, Some("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn trusted_hops_count_from_the_right() {
        let resolver =
            ClientResolver::new(ResolverConfig { trust_proxy_headers: true, trusted_proxy_hops: 1 });
        let req = RequestDescriptor::new("/").header("x-forwarded-for", "6.6.6.6, 192.0.2.1");
        assert_eq!(resolver.resolve_ip(&req), Some("192.0.2.1".parse().unwrap()));

        let short = RequestDescriptor::new("/").header("x-forwarded-for", "192.0.2.7");
        let resolver =
            ClientResolver::new(ResolverConfig { trust_proxy_headers: true, trusted_proxy_hops: 3 });
        assert_eq!(resolver.resolve_ip(&short), Some("192.0.2.7".parse().unwrap()));
    }

    #[test]
    fn untrusted_headers_are_ignored() {
        let resolver =
            ClientResolver::new(ResolverConfig { trust_proxy_headers: false, trusted_proxy_hops: 0 });
        let req = RequestDescriptor::new("/")
            .header("x-real-ip", "198.51.100.1")
            .remote_ip("10.1.2.3".parse().unwrap());
        assert_eq!(resolver.resolve_ip(&req), Some("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn garbage_falls_through_to_unknown() {
        let req = RequestDescriptor::new("/").header("x-real-ip", "not-an-ip").header("x-forwarded-for", "");
        let id = ClientResolver::default().resolve(&req);
        assert_eq!(id.ip, None);
        assert_eq!(id.key.as_str(), "unknown:anonymous");
    }

    #[test]
    fn ports_and_brackets_are_stripped() {
        assert_eq!(parse_ip("192.0.2.1:8080"), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(parse_ip("[2001:db8::1]"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(parse_ip("[2001:db8::1]:443"), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn subject_comes_from_bearer_claims() {
        let req = RequestDescriptor::new("/")
            .header("authorization", bearer(r#"{"sub":"user-42"}"#))
            .remote_ip("10.0.0.5".parse().unwrap());
        let id = ClientResolver::default().resolve(&req);
        assert_eq!(id.subject, "user-42");
        assert_eq!(id.key.as_str(), "10.0.0.5:user-42");

        let numeric = RequestDescriptor::new("/").header("Authorization", bearer(r#"{"userId":7}"#));
        assert_eq!(ClientResolver::default().resolve(&numeric).subject, "7");
    }

    #[test]
    fn malformed_credentials_are_anonymous() {
        for value in ["Basic abc", "Bearer", "Bearer a.!!!.c", "Bearer a.e30.c"] {
            let req = RequestDescriptor::new("/").header("authorization", value);
            assert_eq!(ClientResolver::default().resolve(&req).subject, ANONYMOUS, "{value}");
        }
    }

    #[test]
    fn client_key_is_never_empty() {
        assert_eq!(ClientKey::from("").as_str(), "unknown:anonymous");
        assert_eq!(ClientKey::new("", "").as_str(), "unknown:anonymous");
    }
}

use std::fmt;
use std::sync::Arc;

/// How an outbound request reaches its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Direct,
    Socks5,
    HttpProxy,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Direct => "direct",
            TransportKind::Socks5 => "socks5",
            TransportKind::HttpProxy => "http_proxy",
        }
    }

    /// Map a proxy URL scheme to a transport kind
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "http" | "https" => Some(TransportKind::HttpProxy),
            "socks5" | "socks5h" => Some(TransportKind::Socks5),
            "direct" => Some(TransportKind::Direct),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Direct => 0,
            TransportKind::Socks5 => 1080,
            TransportKind::HttpProxy => 80,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Username/password pair for an upstream relay
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One network path to a target
///
/// Candidates are built once at startup and shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCandidate {
    pub kind: TransportKind,
    /// `host:port` of the relay; empty for direct connections
    pub address: String,
    pub credentials: Option<ProxyCredentials>,
    /// Lower values are tried first
    pub priority: u32,
}

impl TransportCandidate {
    pub fn direct() -> Self {
        Self {
            kind: TransportKind::Direct,
            address: String::new(),
            credentials: None,
            priority: u32::MAX,
        }
    }

    pub fn relay(
        kind: TransportKind,
        address: impl Into<String>,
        credentials: Option<ProxyCredentials>,
    ) -> Self {
        Self {
            kind,
            address: address.into(),
            credentials,
            priority: 0,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == TransportKind::Direct
    }

    /// Build the shared candidate chain: relays in the given order, direct last.
    ///
    /// Any direct entry among `relays` is dropped; exactly one direct
    /// candidate always terminates the chain.
    pub fn chain(relays: impl IntoIterator<Item = TransportCandidate>) -> Arc<[TransportCandidate]> {
        let mut chain: Vec<TransportCandidate> = relays
            .into_iter()
            .filter(|c| !c.is_direct())
            .enumerate()
            .map(|(i, mut c)| {
                c.priority = i as u32;
                c
            })
            .collect();

        let mut direct = TransportCandidate::direct();
        direct.priority = chain.len() as u32;
        chain.push(direct);

        chain.into()
    }
}

/// Credentials are never part of the display form, so candidates are safe to log.
impl fmt::Display for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            write!(f, "direct")
        } else {
            write!(f, "{} {}", self.kind, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_puts_direct_last() {
        let chain = TransportCandidate::chain(vec![
            TransportCandidate::direct(),
            TransportCandidate::relay(TransportKind::Socks5, "10.0.0.1:1080", None),
            TransportCandidate::relay(TransportKind::HttpProxy, "10.0.0.2:3128", None),
        ]);

        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].kind, TransportKind::Socks5);
        assert_eq!(chain[0].priority, 0);
        assert_eq!(chain[1].kind, TransportKind::HttpProxy);
        assert_eq!(chain[1].priority, 1);
        assert!(chain[2].is_direct());
        assert_eq!(chain[2].priority, 2);
    }

    #[test]
    fn empty_chain_is_direct_only() {
        let chain = TransportCandidate::chain(Vec::new());
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_direct());
    }

    #[test]
    fn display_hides_credentials() {
        let candidate = TransportCandidate::relay(
            TransportKind::Socks5,
            "relay.example:1080",
            Some(ProxyCredentials {
                username: "user".to_string(),
                password: "hunter2".to_string(),
            }),
        );

        assert_eq!(candidate.to_string(), "socks5 relay.example:1080");
        assert!(!format!("{:?}", candidate).contains("hunter2"));
    }

    #[test]
    fn kind_from_scheme() {
        assert_eq!(TransportKind::from_scheme("SOCKS5h"), Some(TransportKind::Socks5));
        assert_eq!(TransportKind::from_scheme("https"), Some(TransportKind::HttpProxy));
        assert_eq!(TransportKind::from_scheme("socks4"), None);
    }
}

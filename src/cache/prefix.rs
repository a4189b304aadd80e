//! Key prefixes and their default lifetimes.

/// TTL for prefixes outside the known set.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Known key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePrefix {
    Profile,
    Bounty,
    BountyList,
}

impl CachePrefix {
    pub const ALL: [CachePrefix; 3] = [
        CachePrefix::Profile,
        CachePrefix::Bounty,
        CachePrefix::BountyList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePrefix::Profile => "profile:",
            CachePrefix::Bounty => "bounty:",
            CachePrefix::BountyList => "bounty-list:",
        }
    }

    /// Default TTL in seconds.
    pub fn default_ttl(&self) -> u64 {
        match self {
            CachePrefix::Profile => 300,
            CachePrefix::Bounty => 180,
            CachePrefix::BountyList => 60,
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == prefix)
    }
}

impl AsRef<str> for CachePrefix {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Default TTL for an arbitrary prefix string.
pub fn default_ttl_for(prefix: &str) -> u64 {
    CachePrefix::from_prefix(prefix)
        .map(|p| p.default_ttl())
        .unwrap_or(DEFAULT_TTL_SECS)
}

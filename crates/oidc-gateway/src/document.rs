//! The documents this gateway republishes.
//!
//! The set is closed: each variant maps to exactly one upstream path and one
//! cache slot, so no request path is ever forwarded verbatim to the upstream.

use std::fmt;

/// A document served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Document {
    /// OpenID Connect discovery document.
    OpenIdConfiguration,
    /// JSON Web Key Set used to verify service-account tokens.
    Jwks,
}

impl Document {
    /// Every served document, in population order.
    pub const ALL: [Document; 2] = [Document::OpenIdConfiguration, Document::Jwks];

    /// Request path, identical on the gateway and on the upstream.
    pub const fn path(self) -> &'static str {
        match self {
            Document::OpenIdConfiguration => "/.well-known/openid-configuration",
            Document::Jwks => "/openid/v1/jwks",
        }
    }

    /// Resolves a request path to a document, if it is one of the known paths.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|doc| doc.path() == path)
    }

    /// Short name used in log fields.
    pub const fn name(self) -> &'static str {
        match self {
            Document::OpenIdConfiguration => "openid-configuration",
            Document::Jwks => "jwks",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Document::OpenIdConfiguration => 0,
            Document::Jwks => 1,
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_round_trip() {
        for doc in Document::ALL {
            assert_eq!(Document::from_path(doc.path()), Some(doc));
        }
    }

    #[test]
    fn test_unknown_paths_are_rejected() {
        assert_eq!(Document::from_path("/some/other/path"), None);
        assert_eq!(Document::from_path("/openid/v1/jwks/"), None);
        assert_eq!(Document::from_path("/.well-known/../openid/v1/jwks"), None);
        assert_eq!(Document::from_path(""), None);
    }

    #[test]
    fn test_indices_are_distinct() {
        assert_ne!(Document::OpenIdConfiguration.index(), Document::Jwks.index());
        assert_eq!(Document::Jwks.to_string(), "jwks");
    }
}

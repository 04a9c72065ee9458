use std::path::PathBuf;

use crate::{API_PREFIX, HEALTH_PATH, UPLOADS_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    Prefix(String),
    Exact(String),
    Any,
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Exact(exact) => path == exact,
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Base URL of the upstream, without a trailing slash.
    Upstream(String),
    Filesystem(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub matcher: PathMatcher,
    pub target: RouteTarget,
}

/// Ordered routing rules, fixed once the gateway is built. The first match
/// wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<ProxyRoute>,
}

impl RouteTable {
    pub fn new(routes: Vec<ProxyRoute>) -> Self {
        Self { routes }
    }

    /// API prefix and health path go to the backend, then uploaded files,
    /// then everything else is served from the static export.
    pub fn standard(backend_base_url: &str, static_root: PathBuf) -> Self {
        let upstream = RouteTarget::Upstream(backend_base_url.trim_end_matches('/').to_string());
        Self::new(vec![
            ProxyRoute {
                matcher: PathMatcher::Prefix(API_PREFIX.to_string()),
                target: upstream.clone(),
            },
            ProxyRoute {
                matcher: PathMatcher::Exact(HEALTH_PATH.to_string()),
                target: upstream.clone(),
            },
            ProxyRoute {
                matcher: PathMatcher::Prefix(UPLOADS_PREFIX.to_string()),
                target: upstream,
            },
            ProxyRoute {
                matcher: PathMatcher::Any,
                target: RouteTarget::Filesystem(static_root),
            },
        ])
    }

    pub fn classify(&self, path: &str) -> Option<&RouteTarget> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(path))
            .map(|route| &route.target)
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::standard("http://127.0.0.1:8000/", PathBuf::from("/srv/frontend-out"))
    }

    #[test]
    fn api_health_and_uploads_are_proxied() {
        let table = table();
        let upstream = RouteTarget::Upstream("http://127.0.0.1:8000".to_string());
        assert_eq!(table.classify("/api/accounts"), Some(&upstream));
        assert_eq!(table.classify("/health"), Some(&upstream));
        assert_eq!(table.classify("/uploads/media/a.jpg"), Some(&upstream));
    }

    #[test]
    fn near_misses_fall_through_to_static_files() {
        let table = table();
        let static_root = RouteTarget::Filesystem(PathBuf::from("/srv/frontend-out"));
        assert_eq!(table.classify("/api"), Some(&static_root));
        assert_eq!(table.classify("/healthz"), Some(&static_root));
        assert_eq!(table.classify("/health/deep"), Some(&static_root));
        assert_eq!(table.classify("/apidocs"), Some(&static_root));
        assert_eq!(table.classify("/uploads"), Some(&static_root));
    }

    #[test]
    fn empty_table_matches_nothing() {
        assert_eq!(RouteTable::new(Vec::new()).classify("/"), None);
    }
}

//! Route-prefix application table.
//!
//! Prefixes are kept sorted by descending length at registration time so
//! resolution is a single ordered scan, with `/` always last as the
//! fallback. A matched non-root prefix is stripped once from the path
//! before the application sees it.

use std::sync::Arc;

use crate::asgi::AsgiApp;
use crate::error::{QactuarError, QactuarResult};

#[derive(Default)]
pub struct AppTable {
    entries: Vec<(String, Arc<dyn AsgiApp>)>,
}

impl AppTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount an application at a route prefix. Re-registering a prefix
    /// replaces the previous application.
    pub fn register(&mut self, route: impl Into<String>, app: Arc<dyn AsgiApp>) {
        let route = route.into();
        self.entries.retain(|(existing, _)| *existing != route);
        self.entries.push((route, app));
        self.entries.sort_by(|(a, _), (b, _)| {
            // Longest prefix first, "/" always last.
            match (a.as_str(), b.as_str()) {
                ("/", "/") => std::cmp::Ordering::Equal,
                ("/", _) => std::cmp::Ordering::Greater,
                (_, "/") => std::cmp::Ordering::Less,
                (a, b) => b.len().cmp(&a.len()).then_with(|| a.cmp(b)),
            }
        });
    }

    /// Resolve a request path to an application and the scoped path the
    /// application should see.
    pub fn resolve(&self, path: &str) -> QactuarResult<(Arc<dyn AsgiApp>, String)> {
        for (route, app) in &self.entries {
            if route == "/" {
                if path == "/" {
                    return Ok((Arc::clone(app), path.to_string()));
                }
            } else if let Some(scoped) = path.strip_prefix(route.as_str()) {
                return Ok((Arc::clone(app), scoped.to_string()));
            }
        }
        // The default app takes anything left over, with the path intact.
        if let Some((_, app)) = self.entries.iter().find(|(route, _)| route == "/") {
            return Ok((Arc::clone(app), path.to_string()));
        }
        Err(QactuarError::RouteNotFound(path.to_string()))
    }

    /// Registered `(route, app)` pairs in match order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn AsgiApp>)> {
        self.entries.iter().map(|(route, app)| (route.as_str(), app))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asgi::{AsgiChannel, Scope};
    use crate::error::QactuarResult;
    use async_trait::async_trait;

    struct NoopApp;

    #[async_trait]
    impl AsgiApp for NoopApp {
        async fn call(&self, _: Scope, _: &mut dyn AsgiChannel) -> QactuarResult<()> {
            Ok(())
        }
    }

    fn table(routes: &[&'static str]) -> AppTable {
        let mut table = AppTable::new();
        for route in routes {
            table.register(*route, Arc::new(NoopApp));
        }
        table
    }

    fn resolve_scoped(table: &AppTable, path: &str) -> String {
        table.resolve(path).unwrap().1
    }

    #[test]
    fn longest_prefix_wins() {
        let table = table(&["/", "/api", "/api/v2"]);
        assert_eq!(resolve_scoped(&table, "/api/v2/users"), "/users");
        assert_eq!(resolve_scoped(&table, "/api/foo"), "/foo");
        assert_eq!(resolve_scoped(&table, "/other"), "/other");
    }

    #[test]
    fn prefix_is_stripped_once() {
        let table = table(&["/api"]);
        assert_eq!(resolve_scoped(&table, "/api/api/foo"), "/api/foo");
    }

    #[test]
    fn root_matches_only_exact_path_before_fallback() {
        let table = table(&["/"]);
        assert_eq!(resolve_scoped(&table, "/"), "/");
        // Non-root paths still fall back to the default app, unstripped.
        assert_eq!(resolve_scoped(&table, "/anything"), "/anything");
    }

    #[test]
    fn missing_route_is_an_error() {
        let table = table(&["/api"]);
        let err = table.resolve("/").unwrap_err();
        assert!(matches!(err, QactuarError::RouteNotFound(_)));
    }

    #[test]
    fn reregistering_replaces() {
        let mut table = table(&["/api"]);
        table.register("/api", Arc::new(NoopApp));
        assert_eq!(table.len(), 1);
        assert!(table.resolve("/api/x").is_ok());
    }
}

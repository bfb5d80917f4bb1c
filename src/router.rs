//! Exact-match URL path routing, set up once at startup and read-only
//! thereafter.

use crate::broadcast::BroadcastHandle;
use crate::connection::Connection;
use crate::config::ServerConfig;
use crate::handler::Handler;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Builds a fresh [`Handler`] for a newly accepted connection on some path,
/// given the [`BroadcastHandle`] that connection joined its namespace with.
pub type HandlerFactory = Rc<dyn Fn(BroadcastHandle) -> Box<dyn Handler>>;

/// Builds the protocol-level [`Connection`] for a newly accepted connection.
/// Most deployments just want [`Connection::new`]; this indirection exists
/// so a path can be registered with different connection-level settings.
pub type ControllerFactory = Rc<dyn Fn(Rc<ServerConfig>) -> Connection>;

/// One registered route: what to build when a connection handshakes
/// against its path.
#[derive(Clone)]
pub struct Route {
    /// Builds the application [`Handler`] for a new connection on this route.
    pub handler_factory: HandlerFactory,
    /// Builds the protocol-level [`Connection`] for a new connection on this route.
    pub controller_factory: ControllerFactory,
}

/// Path → [`Route`] table. Two independent registries back this type
/// conceptually (handler factories, controller factories); they are kept
/// paired here since every route needs both to accept a connection.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
    default: Option<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router { routes: HashMap::new(), default: None }
    }

    /// Register a route for an exact path. The path is normalized (see
    /// [`normalize_path`]) before being stored.
    pub fn register(&mut self, path: &str, route: Route) {
        self.routes.insert(normalize_path(path), route);
    }

    /// Register the fallback route used when no path matches.
    pub fn register_default(&mut self, route: Route) {
        self.default = Some(route);
    }

    /// Resolve a request path to its route, falling back to the default if
    /// one was registered.
    pub fn resolve(&self, path: &str) -> Result<&Route, Error> {
        let normalized = normalize_path(path);
        self.routes.get(&normalized).or(self.default.as_ref()).ok_or(Error::NoRoute)
    }
}

/// Normalize a request-target path: ensure a leading slash and collapse
/// consecutive slashes into one.
pub fn normalize_path(path: &str) -> String {
    let with_leading_slash = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };

    let mut out = String::with_capacity(with_leading_slash.len());
    let mut prev_was_slash = false;
    for c in with_leading_slash.chars() {
        if c == '/' {
            if prev_was_slash {
                continue
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        out.push(c);
    }
    out
}

#[derive(Debug)]
pub enum Error {
    /// Neither an exact match nor a default route was registered.
    NoRoute,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoRoute => f.write_str("no route matches and no default route is registered"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;

    struct NullHandler;
    impl Handler for NullHandler {
        fn on_message(
            &mut self,
            _id: crate::handler::ConnectionId,
            _message: crate::message::Message,
            _broadcast: &BroadcastHandle,
        ) -> Result<crate::handler::HandlerAction, crate::error::WsError> {
            Ok(crate::handler::HandlerAction::Silent)
        }
    }

    fn route() -> Route {
        Route {
            handler_factory: Rc::new(|_broadcast| Box::new(NullHandler) as Box<dyn Handler>),
            controller_factory: Rc::new(Connection::new),
        }
    }

    #[test]
    fn normalizes_missing_leading_slash() {
        assert_eq!(normalize_path("chat"), "/chat");
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(normalize_path("//chat//room"), "/chat/room");
    }

    #[test]
    fn resolves_exact_match() {
        let mut router = Router::new();
        router.register("/chat", route());
        assert!(router.resolve("/chat").is_ok());
        assert!(router.resolve("//chat").is_ok());
    }

    #[test]
    fn falls_back_to_default() {
        let mut router = Router::new();
        router.register_default(route());
        assert!(router.resolve("/anything").is_ok());
    }

    #[test]
    fn no_match_and_no_default_is_an_error() {
        let router = Router::new();
        assert!(matches!(router.resolve("/chat"), Err(Error::NoRoute)));
    }
}

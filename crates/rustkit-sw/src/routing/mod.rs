//! Request routing.
//!
//! ```text
//! Router
//!   ├── GET  → [Route, Route, ...]   (first match wins)
//!   ├── POST → [Route, ...]
//!   ├── default handler per method
//!   └── catch handler
//! ```

pub mod handler;
pub mod navigation;
pub mod route;
pub mod router;

pub use handler::{handler_fn, FnHandler, Handler, RouteContext};
pub use navigation::{NavigationMatcher, NavigationRouteOptions};
pub use route::{
    Capture, ExactUrlMatcher, MatchContext, MatchResult, Params, RegexMatcher, Route, RouteMatcher,
};
pub use router::Router;

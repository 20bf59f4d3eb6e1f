//! Session controllers, their registry, and the session cache.
//!
//! A [`controller::SessionController`] runs the poll loop for one pane and
//! exposes its lifecycle. The [`registry::ControllerRegistry`] keeps one
//! controller per pane key. The [`cache::SessionCache`] answers session
//! metadata queries without hammering the multiplexer.

pub mod cache;
pub mod controller;
pub mod registry;

pub use cache::{CacheStats, SessionCache};
pub use controller::{ControllerContext, PaneSnapshot, SessionController};
pub use registry::ControllerRegistry;

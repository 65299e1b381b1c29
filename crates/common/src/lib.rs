//! Shared types for the shopguard request security pipeline.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod prefix_map;

pub use config::*;
pub use context::SecurityContext;
pub use error::{ShieldError, ShieldResult};
pub use events::{EventFilter, EventRing, EventType, SecurityEvent, Severity};
pub use prefix_map::IpPrefixMap;

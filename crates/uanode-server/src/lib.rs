//! # uanode-server
//!
//! uanode server with a pluggable async runtime.
//!
//! The subscription model ([`subscription`]) is runtime-agnostic. Everything
//! that spawns tasks or does I/O sits behind the `tokio-runtime` feature
//! (default), for Linux/desktop.

pub mod subscription;

#[cfg(feature = "tokio-runtime")]
pub mod config;
#[cfg(feature = "tokio-runtime")]
pub mod engine;
#[cfg(feature = "tokio-runtime")]
pub mod queue;
#[cfg(feature = "tokio-runtime")]
pub mod sample;
#[cfg(feature = "tokio-runtime")]
pub mod security;
#[cfg(feature = "tokio-runtime")]
pub mod server;
#[cfg(feature = "tokio-runtime")]
pub mod session;
#[cfg(feature = "tokio-runtime")]
pub mod timer;

pub use uanode_core::{MemoryNodeStore, NodeId, NodeStore};
pub use subscription::{Notification, SubscriptionState};

#[cfg(feature = "tokio-runtime")]
pub use config::{ConfigError, DemoConfig, SecurityConfig, ServerConfig};
#[cfg(feature = "tokio-runtime")]
pub use engine::{EngineError, EngineOptions, SubscriptionEngine, SubscriptionRequest};
#[cfg(feature = "tokio-runtime")]
pub use sample::{build_sample_address_space, BuildError, SampleNodes};
#[cfg(feature = "tokio-runtime")]
pub use security::{FileSecurityProvider, SecurityError, SecurityProvider};
#[cfg(feature = "tokio-runtime")]
pub use server::{ServerHandle, StartError, UaServer};
#[cfg(feature = "tokio-runtime")]
pub use session::STREAM_PATH;
#[cfg(feature = "tokio-runtime")]
pub use timer::{TimerError, TimerSet};

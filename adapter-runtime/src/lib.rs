//! # Adapter Runtime
//!
//! Base runtime for destination adapters that forward analytics calls
//! (identify, track, page, screen, group, alias) to third-party HTTP APIs:
//! - Enablement and validation before any network I/O
//! - Mapper, batch and ecommerce routing in front of destination handlers
//! - Request pipeline with fixed transport policy and lifecycle events
//! - Retry classification for callers that resubmit failed calls
//! - Distributed locks over Redis
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   AdapterType (frozen by AdapterTypeBuilder)        │
//! └────────────┬────────────────────────────────────────┘
//!              │ Integration::new(type, settings)
//! ┌────────────▼────────────────────────────────────────┐
//! │   Enablement ─▶ Validation ─▶ Dispatcher            │
//! └────────────┬────────────────────────────────────────┘
//!              │
//!     ┌────────┼────────────────┬────────────┐
//!     │        │                │            │
//! ┌───▼────┐ ┌─▼──────┐ ┌──────▼──┐ ┌───────▼──────┐
//! │ Mapper │ │ Batch  │ │Ecommerce│ │ Page/Screen  │
//! │        │ │        │ │ routing │ │  ─▶ Track    │
//! └───┬────┘ └─┬──────┘ └──────┬──┘ └───────┬──────┘
//!     │        │                │            │
//!     └────────┼────────────────┴────────────┘
//!              │ handlers
//! ┌────────────▼─────────────────────────────────────┐
//! │   Request pipeline + Distributed lock + Retry    │
//! └──────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod ecommerce;
pub mod enablement;
pub mod error;
pub mod event;
pub mod integration;
pub mod lock;
pub mod mapping;
pub mod message;
pub mod metrics;
pub mod request;
pub mod retry;
pub mod validation;

pub use builder::{AdapterType, AdapterTypeBuilder, OptionMeta, Timeout};
pub use config::RuntimeConfig;
pub use dispatch::{
    batch_handler_fn, handler_fn, BatchHandler, Dispatcher, Handler, Method, Payload,
};
pub use ecommerce::EcommerceEvent;
pub use error::{Error, ErrorKind, Origin, Result, TransportCode};
pub use event::AdapterEvent;
pub use integration::Integration;
pub use lock::{LockStore, MemoryLockStore, RedisLockStore};
pub use message::{CallType, Facade, Message};
pub use request::{Agent, Request, Response};
pub use retry::RetryClassifier;

/// Adapter settings as supplied by the integrator
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Default request timeout (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default lock lease (milliseconds)
pub const DEFAULT_LOCK_TTL_MS: u64 = 15_000;

/// `User-Agent` sent with every outbound request
pub const USER_AGENT: &str = "Segment.io/1.0";

//! CRAFTS resource mapping engine
//!
//! Declarative, model-driven REST APIs over SPARQL triple stores. An API is a
//! JSON configuration naming SPARQL endpoints and a model of resource kinds;
//! each kind maps its labels onto RDF predicates held by one endpoint.
//!
//! # Architecture
//!
//! - [`model`]: API configuration, load-time validation and RDF values
//! - [`gateway`]: the only component that talks to SPARQL endpoints
//!   (templating, namespace compaction, HTTP protocol, authentication)
//! - [`cache`]: per-label resource cache with in-flight coalescing, and the
//!   query-result cache keyed by endpoint
//! - [`engine`]: extraction, rendering and the triple-diff write protocols
//! - [`registry`]: one engine per registered API plus the TTL sweeper
//! - [`http`]: thin axum REST surface
//!
//! ## Example Usage
//!
//! ```no_run
//! use crafts::{ApiConfig, ApiRegistry, FetchRequest, HttpTransport, QueryGateway};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo(config_json: &str) -> Result<(), crafts::CraftsError> {
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(60))?);
//! let registry = ApiRegistry::new(Arc::new(QueryGateway::new(transport)?));
//!
//! let engine = registry.create_api(ApiConfig::from_json(config_json)?)?;
//! let ctx = engine.context();
//! let response = engine
//!     .fetch(&ctx, &FetchRequest::single("Book", "http://example.org/book/1"))
//!     .await?;
//! println!("{}", serde_json::Value::Array(response.data));
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod http;
pub mod model;
pub mod registry;

// Re-export main types for convenience
pub use cache::{QueryCache, ResourceCache, SweepSummary};
pub use config::ServiceConfig;
pub use engine::{
    FetchRequest, FetchResponse, PatchOp, PatchOperation, ResourceEngine, WriteFailure, WriteReport,
};
pub use error::{CraftsError, CraftsResult};
pub use gateway::{HttpTransport, QueryContext, QueryGateway, SparqlResults, SparqlTransport};
pub use http::HttpServer;
pub use model::{ApiConfig, Connection, Endpoint, LiteralValue, ModelElement, Value};
pub use registry::{ApiRegistry, SweepReport};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

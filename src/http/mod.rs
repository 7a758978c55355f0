//! HTTP data plane: backends, services, and per-port routers

pub mod backend;
pub mod router;
pub mod service;

pub use backend::HttpBackend;
pub use router::{HttpRouter, Selector};
pub use service::HttpService;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The live HTTP service table: written only by the gateway event loop,
/// read by every router request task.
pub type HttpServiceTable = Arc<RwLock<HashMap<String, Arc<HttpService>>>>;

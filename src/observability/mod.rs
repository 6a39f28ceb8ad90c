pub mod endpoints;
pub mod metrics;
pub mod middleware;

pub use endpoints::metrics_handler;
pub use metrics::*;
pub use middleware::metrics_middleware;

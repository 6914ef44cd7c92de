//! External research providers: ranked web search and domain-traffic metrics.

pub mod metrics;
pub mod search;

pub use metrics::{TrafficClient, domain_for_url};
pub use search::{SearchClient, SearchHit};

use async_trait::async_trait;

use crate::api::{IngestStatus, ProxyError};
use crate::event::{Dataset, Event};

pub mod http;
pub mod print;

/// The second destination: takes normalized events for one dataset.
///
/// Each call is a single attempt. Retrying, if any, is up to the implementation.
#[async_trait]
pub trait IngestClient {
    async fn ingest(&self, dataset: &Dataset, events: Vec<Event>)
        -> Result<IngestStatus, ProxyError>;
}

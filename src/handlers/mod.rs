pub mod ingest;

pub use ingest::{forward_event, ingest};

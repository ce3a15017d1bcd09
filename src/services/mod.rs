pub mod eventstore;

pub use eventstore::{EventStoreClient, LogInfo, METHOD_OVERRIDE_HEADER};

pub mod event;
pub mod snapshot;

pub use event::Event;
pub use snapshot::{Cursor, Snapshot};

pub mod court_session;
pub mod critical;
pub mod maintenance;
pub mod pool;
pub mod recovery;
pub mod types;

#[cfg(test)]
mod tests;

pub use court_session::{CourtSession, SessionLease, SessionMeta};
pub use critical::{CriticalOperationGuard, CriticalOperations};
pub use maintenance::spawn_maintenance;
pub use pool::BrowserPool;
pub use types::*;

mod db;
mod logs;
mod store;

pub use db::{NODE, TAG, TestDb, props, registry};
pub use logs::LogCapture;
pub use store::{CountingStore, StoreStats};

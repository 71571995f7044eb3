//! In-memory adapters for task tree persistence and change events.

mod feed;
mod store;

pub use feed::InMemoryTreeChangeFeed;
pub use store::InMemoryTaskTreeStore;

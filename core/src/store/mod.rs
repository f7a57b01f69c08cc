// Store module: positive filter persistence and the backend server

pub mod backend;
mod positive;
mod server;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use positive::{MatchPolicy, PositiveFilterStore};
pub use server::{dispatch, BackendServer};

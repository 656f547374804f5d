pub mod executor;
pub mod loader;
pub mod session_store;

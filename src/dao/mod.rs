/// Database model definitions.
pub mod models;
/// Transactional session repository and its backends.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;

/*!
 * Database module for persistent storage of documents, jobs and chunks.
 *
 * SQLite-backed implementation of the store traits. Every chunk commit is
 * durable before the pipeline moves on, which is what makes interrupted
 * jobs resumable.
 */

pub mod connection;
pub mod repository;
pub mod schema;

// Re-export main types
pub use connection::DatabaseConnection;
pub use repository::Repository;

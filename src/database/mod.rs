// Database module
// Connection handling for the SQLite engine backing documents and points

pub mod sqlite;

pub use sqlite::*;

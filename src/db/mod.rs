mod backend;
mod connection;
mod error;
mod normalize;
mod rest;
mod schema;
mod sqlite;

pub use backend::*;
pub use connection::*;
pub use error::*;
pub use normalize::*;
pub use rest::*;
pub use schema::*;
pub use sqlite::*;

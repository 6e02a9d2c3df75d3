/// Logical query model and its per-backend translators.
///
/// ```text
/// LogicalQuery            (types.rs)
///       ↓
/// ├── SQL compiler        (compiler.rs)  → SQLite `?` / PostgreSQL `$n`
/// └── REST renderer       (rest.rs)      → path + `column=eq.value` pairs
///       ↓
/// Backend adapters        (db/ module)
/// ```
pub mod compiler;
pub mod rest;
pub mod types;

pub use compiler::{compile, Dialect, SqlStatement};
pub use rest::{render, RestMethod, RestRequest};
pub use types::*;

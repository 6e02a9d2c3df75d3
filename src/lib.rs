pub mod ast;
pub mod config;
pub mod db;
pub mod repo;
pub mod store;

/// Public API types
pub mod models;
pub mod reltag;

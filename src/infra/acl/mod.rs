//! Access-control backends.

pub mod memory;

pub use memory::InMemoryAcl;

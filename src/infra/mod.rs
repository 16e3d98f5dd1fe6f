//! Infrastructure adapters for repositories and access control.

pub mod acl;
pub mod repository;

pub use acl::InMemoryAcl;
pub use repository::InMemoryRepository;

pub mod cache;
pub mod datastore;
pub mod processor;
pub mod repository;

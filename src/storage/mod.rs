pub mod file_store;
pub mod location_registry;

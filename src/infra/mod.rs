pub mod file_store;
pub mod provenance;

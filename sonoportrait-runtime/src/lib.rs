pub mod config_store;
pub mod file_manager;
pub mod stability;

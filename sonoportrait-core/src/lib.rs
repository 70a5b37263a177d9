pub mod config;
pub mod error;
pub mod generation;
pub mod params;
pub mod prompts;
pub mod types;

pub use config::*;
pub use error::*;
pub use generation::*;
pub use params::*;
pub use prompts::*;
pub use types::*;

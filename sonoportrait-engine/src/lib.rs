pub mod pipeline;
pub mod session;
pub mod traits;

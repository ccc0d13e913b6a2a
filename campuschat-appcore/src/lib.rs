pub mod errors;
pub mod service;

pub use errors::user_facing_error;
pub use service::AppService;

pub mod api;
pub mod config;
pub mod events;
pub mod text;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use events::*;
pub use text::*;
pub use types::*;

pub mod api_client;
pub mod auth_store;
pub mod builder;
pub mod config_store;
pub mod conversation_store;
pub mod defaults;
pub mod document_store;
pub mod fsutil;
pub mod media;
pub mod secrets;

pub use api_client::ApiClient;
pub use auth_store::{AuthSession, AuthState, AuthStore, SignOutReason};
pub use builder::{Runtime, build_runtime};
pub use config_store::ConfigStore;
pub use conversation_store::ConversationStore;
pub use document_store::DocumentStore;
pub use secrets::{KeyringVault, MemoryVault, TokenVault};

pub mod auth;
pub mod chat_backend;
pub mod db;
pub mod memory;
pub mod object_store;

pub use auth::PgIdentityProvider;
pub use chat_backend::HttpChatBackend;
pub use db::PgDocumentStore;
pub use memory::{MemoryDocumentStore, MemoryIdentityProvider};
pub use object_store::FsObjectStore;

// Authentication module
// Token set storage, session lifecycle and token refresh

mod refresh;
mod session;
mod store;
mod types;

pub use refresh::TokenRefresher;
pub use session::Session;
pub use store::{CredentialStore, MemoryStore, SqliteStore};
pub use types::{
    RefreshResponse, TokenSet, LANG_KEY, SESSION_ENTRY_KEYS, TOKEN_KEYS,
};

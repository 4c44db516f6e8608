mod gate;
pub mod models;
pub mod token_store;

pub use gate::AuthGate;
pub use models::{AuthTokens, LoginRequest, RefreshRequest};
pub use token_store::{MemoryTokenStore, TokenStore, decode_expiration};

pub mod config;
pub mod credentials;
pub mod frame;
pub mod health;
pub mod message;
pub mod ping;
pub mod rate_limit;
pub mod reconnect;
pub mod types;

pub use config::*;
pub use credentials::*;
pub use frame::*;
pub use health::*;
pub use message::*;
pub use ping::*;
pub use rate_limit::*;
pub use reconnect::*;
pub use types::*;

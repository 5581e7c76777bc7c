//! # switchyard
//!
//! A reverse proxy that fronts an upstream LLM HTTP API with a fleet of
//! managed OAuth accounts. Callers authenticate with gateway-issued bearer
//! keys; the gateway admits them under a global session cap, picks a
//! healthy account, keeps that account's short-lived access token fresh,
//! and relays the exchange — streaming SSE responses byte-for-byte.
//!
//! All mutable state (accounts, client keys, sessions) lives in in-memory
//! write-behind stores flushed to JSON files by a background job, so a
//! restart recovers everything up to the last sync tick.
//!
//! The upstream API and the OAuth token endpoint are capabilities behind
//! traits ([`proxy::Upstream`], [`oauth::TokenEndpoint`]) so tests run the
//! whole dispatcher against in-memory fakes.

pub mod accounts;
pub mod admin;
pub mod config;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod oauth;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod sessions;
pub mod storage;
pub mod token;

pub use accounts::{Account, AccountStatus, AccountStore};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use keys::{ClientKey, ClientKeyStore, KeyRole, KeyStatus};
pub use oauth::{HttpTokenEndpoint, TokenEndpoint, TokenGrant};
pub use pool::AccountPool;
pub use proxy::{HttpUpstream, Upstream};
pub use server::Gateway;
pub use sessions::{Session, SessionRegistry};
pub use token::TokenManager;

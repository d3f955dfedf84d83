//! Ephemeral credential minting
//!
//! One short-lived, single-use credential authorizes one connection attempt
//! to the remote speech endpoint. Credentials are fetched from a trusted
//! minting endpoint, are never cached, and are never written to logs (the
//! `EphemeralCredential` newtype redacts its Debug output).

mod broker;

pub use broker::{EphemeralCredential, HttpTokenBroker, MintedSession, TokenError, TokenMinter};

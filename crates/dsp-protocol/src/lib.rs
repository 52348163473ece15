//! Dataspace protocol (v0.8) contract negotiation primitives.
//!
//! This crate provides:
//! - **Vocabulary**: compact JSON-LD terms and version detection
//! - **Messages**: [`ProtocolMessage`] and process identifiers
//! - **Codec**: strict, forward-compatible encoding and decoding
//! - **State machine**: the legal transition table for both roles
//! - **Binding**: HTTPS paths for each message kind
//!
//! Nothing here performs I/O.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod binding;
pub mod codec;
mod error;
mod message;
mod state_machine;
pub mod vocab;

pub use codec::{
    Envelope, NegotiationError, NegotiationSnapshot, decode, decode_envelope, encode,
    envelope_from_document, from_document, to_document,
};
pub use error::*;
pub use message::*;
pub use state_machine::*;

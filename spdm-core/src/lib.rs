// Licensed under the Apache-2.0 license

//! SPDM core: transcript management, session key schedule and the
//! AEAD-secured record layer, above an integrator-provided transport.

// Common errors
pub mod error;

// Codec and protocol buffer
pub mod codec;

// Software crypto primitive facade
pub mod crypto;

// Spdm common message protocol types
pub mod protocol;

// Connection and response state
pub mod state;

// Transport layer hooks
pub mod transport;

// Transcript management
pub mod transcript;

// Secure session management and record layer
pub mod session;

// Context and the typed data accessor
pub mod context;

// Copyright 2022 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Core of a Type-II (Mixmaster-family) anonymous remailer node.
//!
//! The node accepts fixed-size onion packets by email, strips one layer
//! using its secret key and either forwards the residual packet to the next
//! hop, stores it locally when the next hop is itself, or delivers a
//! decrypted payload when it is the exit. A randomised pool with
//! percentage-rate release and cover-traffic dummies provides the mixing
//! property.
//!
//! SMTP submission, maildir traversal, HTTP fetching and daemon plumbing
//! live outside this crate; their seams are the traits in [`mail`].

pub mod armor;
pub mod chain;
pub mod chunk;
pub mod config;
pub mod dates;
pub mod decoder;
pub mod error;
pub mod idlog;
pub mod keyring;
pub mod mail;
pub mod packet;
pub mod pool;
pub mod server;

pub use config::Config;
pub use decoder::Stats;
pub use error::Error;
pub use keyring::{Pubring, Secring};
pub use packet::{Packet, BODY_BYTES, MAX_HOPS, PACKET_BYTES};
pub use server::Server;

/// Version string advertised in armor headers and key records.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 16 byte identifier of a mix key, the truncated BLAKE2s hash of the
/// public key.
pub type KeyId = [u8; KEY_ID_BYTES];

/// Size in bytes of a [`KeyId`].
pub const KEY_ID_BYTES: usize = 16;

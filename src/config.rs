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

//! Remailer configuration.
//!
//! Loading these options from a file is the embedding binary's problem;
//! this struct carries the recognised options and their defaults.

use std::path::PathBuf;

/// Configuration data for a remailer node.
#[derive(Clone)]
pub struct Config {
	/// Remailer short name, e.g. "banana".
	pub name: String,
	/// Remailer email address.
	pub address: String,
	/// Minimum number of outbound pool files before any are released.
	pub pool_min: usize,
	/// Percentage of the outbound pool released per cycle.
	pub pool_rate: usize,
	/// Seconds between supervisory ticks.
	pub loop_seconds: u64,
	/// Maximum acceptable packet age in days.
	pub max_age_days: u16,
	/// Days a packet ID is retained for replay suppression.
	pub id_expiry_days: u16,
	/// Days a partial chunk record is retained before expiry.
	pub chunk_expiry_days: u16,
	/// Days a new key remains valid.
	pub key_life_days: u16,
	/// Days before expiry a key stops being advertised, and days after
	/// expiry it is still accepted for decryption.
	pub key_grace_days: u16,
	/// Whether this node delivers plaintext to final recipients.
	pub is_exit: bool,
	/// Loop forever rather than performing a single pass.
	pub daemon: bool,
	/// Import expired public keys (for stats consumers such as Echolot).
	pub accept_expired_public: bool,
	/// Deadline in seconds for keyring and stats fetches.
	pub http_timeout: u64,
	/// Maximum accepted message size in kB, reported by remailer-conf.
	pub max_message_size_kb: usize,
	/// Domain used when constructing Message-IDs; falls back to the
	/// domain of `address`.
	pub message_domain: String,
	/// SMTP submission parameters, consumed by the delivery collaborator.
	pub smtp_relay: String,
	pub smtp_user: String,
	pub smtp_pass: String,
	pub smtp_port: u16,
	/// Hops selected by `*` must have latency in this range (minutes).
	pub min_latency: u32,
	pub max_latency: u32,
	/// Hops selected by `*` must have at least this uptime (percent).
	pub min_uptime: f32,
	/// File and directory locations.
	pub files: Files,
}

/// Locations of the node's files and directories.
#[derive(Clone)]
pub struct Files {
	pub pubring: PathBuf,
	pub mlist2: PathBuf,
	pub secring: PathBuf,
	pub pubkey: PathBuf,
	pub idlog: PathBuf,
	pub chunkdb: PathBuf,
	pub pooldir: PathBuf,
	pub maildir: PathBuf,
	pub adminkey: PathBuf,
	pub help: PathBuf,
}

impl Files {
	/// Conventional layout under a single base directory.
	pub fn in_dir(base: impl Into<PathBuf>) -> Self {
		let base = base.into();
		Self {
			pubring: base.join("pubring.mix"),
			mlist2: base.join("mlist2.txt"),
			secring: base.join("secring.mix"),
			pubkey: base.join("key.txt"),
			idlog: base.join("idlog"),
			chunkdb: base.join("chunkdb"),
			pooldir: base.join("pool"),
			maildir: base.join("Maildir"),
			adminkey: base.join("adminkey.txt"),
			help: base.join("help.txt"),
		}
	}
}

impl Config {
	pub fn new(name: impl Into<String>, address: impl Into<String>, base: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			address: address.into(),
			pool_min: 45,
			pool_rate: 65,
			loop_seconds: 60,
			max_age_days: 14,
			id_expiry_days: 14,
			chunk_expiry_days: 60,
			key_life_days: 14,
			key_grace_days: 28,
			is_exit: false,
			daemon: false,
			accept_expired_public: false,
			http_timeout: 30,
			max_message_size_kb: 10,
			message_domain: String::new(),
			smtp_relay: "127.0.0.1".into(),
			smtp_user: String::new(),
			smtp_pass: String::new(),
			smtp_port: 25,
			min_latency: 0,
			max_latency: 120,
			min_uptime: 98.0,
			files: Files::in_dir(base),
		}
	}

	/// Capability string advertised in key records. `M` marks a
	/// middle-only node.
	pub fn caps(&self) -> &'static str {
		if self.is_exit {
			"E"
		} else {
			"M"
		}
	}
}

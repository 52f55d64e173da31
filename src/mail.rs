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

//! Mail seams.
//!
//! SMTP submission and maildir traversal are external collaborators; the
//! traits here are their contract with the node. Delivery failures are
//! classified so the pool knows whether to retry an entry or drop it.

use crate::{config::Config, error::Error, keyring::Pubring, packet::crypto::random_bytes};
use chrono::Utc;
use std::fmt;

/// How a delivery attempt failed.
#[derive(Debug)]
pub enum DeliveryError {
	/// Worth retrying on a later cycle; the pool entry stays.
	Transient(String),
	/// Will never succeed; the pool entry is dropped.
	Permanent(String),
}

impl fmt::Display for DeliveryError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			DeliveryError::Transient(what) => write!(f, "Transient delivery failure: {}", what),
			DeliveryError::Permanent(what) => write!(f, "Permanent delivery failure: {}", what),
		}
	}
}

/// SMTP submission collaborator.
pub trait Delivery: Send + Sync {
	/// Mail an armored packet to the next remailer in the chain.
	fn deliver_packet(&self, next_hop: &str, armored: &str) -> Result<(), DeliveryError>;

	/// Submit a plaintext mail; recipients come from its own headers.
	fn deliver_plain(&self, mail: &[u8]) -> Result<(), DeliveryError>;

	/// Send the pre-formatted reply to a `remailer-*` service request.
	fn service_reply(&self, request: &ServiceRequest, to: &str) -> Result<(), DeliveryError>;
}

/// One message drained from the mail source. Only `From` and `Subject`
/// are interpreted.
pub struct InboundMail {
	pub subject: String,
	pub from: String,
	pub body: String,
}

/// Maildir collaborator: yields unseen messages and forgets them.
pub trait MailSource {
	fn unseen(&mut self) -> Result<Vec<InboundMail>, Error>;
}

/// A `remailer-*` service request parsed from a Subject line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceRequest {
	Key,
	Conf,
	AdminKey,
	Help,
}

impl ServiceRequest {
	/// True when a subject is addressed to the service responder at all.
	pub fn is_service(subject: &str) -> bool {
		subject.trim().to_lowercase().starts_with("remailer-")
	}

	pub fn parse(subject: &str) -> Option<Self> {
		let subject = subject.trim().to_lowercase();
		if subject.starts_with("remailer-key") {
			Some(Self::Key)
		} else if subject.starts_with("remailer-conf") {
			Some(Self::Conf)
		} else if subject.starts_with("remailer-adminkey") {
			Some(Self::AdminKey)
		} else if subject.starts_with("remailer-help") {
			Some(Self::Help)
		} else {
			None
		}
	}
}

/// Everything a remailer-conf reply reports.
pub struct ConfData {
	pub name: String,
	pub address: String,
	pub pool_size: usize,
	pub max_size_kb: usize,
	/// Packet versions this node decodes.
	pub versions: Vec<&'static str>,
	pub middle: bool,
	/// One header line per known public key.
	pub key_list: Vec<String>,
}

/// Collect the data a remailer-conf reply needs.
pub fn conf_data(cfg: &Config, ring: &Pubring, pool_size: usize) -> ConfData {
	ConfData {
		name: cfg.name.clone(),
		address: cfg.address.clone(),
		pool_size,
		max_size_kb: cfg.max_message_size_kb,
		versions: vec!["v2"],
		middle: !cfg.is_exit,
		key_list: ring.key_list(),
	}
}

/// An RFC compliant Message-ID for outbound mail construction.
pub fn message_id(cfg: &Config) -> String {
	let date = Utc::now().format("%Y%m%d.%H%M%S");
	let random = hex::encode(random_bytes::<4>());
	let domain = if !cfg.message_domain.is_empty() {
		cfg.message_domain.clone()
	} else if let Some((_, domain)) = cfg.address.split_once('@') {
		domain.to_string()
	} else {
		"yamn.invalid".to_string()
	};
	format!("<{}.{}@{}>", date, random, domain)
}

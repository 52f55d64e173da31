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

/// Error handling
use std::fmt;

/// Remailer node error.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
	/// Malformed text record.
	Parse(String),
	/// Decrypt, digest or key-agreement failure.
	Crypto(&'static str),
	/// No secret key for the key ID a header names.
	KeyUnknown(String),
	/// Packet ID already seen.
	Replay,
	/// Record past its validity window.
	Expired,
	/// Slot data failed to authenticate or decode.
	SlotDecrypt,
	/// Anti-tag digest over the post-header bytes does not match.
	AntiTagMismatch,
	/// Packet age in days is out of the accepted window.
	BadTimestamp(i64),
	/// Buffer is not the expected fixed size.
	SizeMismatch { wanted: usize, got: usize },
	/// Final packet asks for a delivery method we do not implement.
	UnsupportedMethod(u8),
	/// Payload does not fit the packet body.
	MessageTooLarge(usize),
	/// A chain needs between one and `MAX_HOPS` hops.
	BadChainLength(usize),
	/// Not enough distinct candidate remailers to satisfy a chain.
	InsufficientPeers { wanted: usize, have: usize },
	/// Armor scanner did not find a required cutmark.
	ArmorMissingMarker(&'static str),
	/// Armored length does not match the decoded payload.
	ArmorBadSize { stated: usize, got: usize },
	/// Armored payload digest does not match.
	ArmorDigestMismatch,
	/// IO failure worth retrying; pool entries stay in place.
	TransientIo(String),
	/// IO failure that will not recover; pool entries are dropped.
	PermanentIo(String),
	/// Bad configuration; fatal at startup.
	Config(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::Parse(what) => write!(f, "Parse failure: {}.", what),
			Error::Crypto(what) => write!(f, "Crypto failure: {}.", what),
			Error::KeyUnknown(keyid) => write!(f, "No secret key with ID {}.", keyid),
			Error::Replay => write!(f, "Duplicate packet ID."),
			Error::Expired => write!(f, "Record has expired."),
			Error::SlotDecrypt => write!(f, "Slot data failed to decrypt."),
			Error::AntiTagMismatch => write!(f, "Anti-tag digest mismatch."),
			Error::BadTimestamp(age) => write!(f, "Packet age of {} days is unacceptable.", age),
			Error::SizeMismatch { wanted, got } =>
				write!(f, "Incorrect length: Expected={}, Got={}.", wanted, got),
			Error::UnsupportedMethod(method) =>
				write!(f, "Unsupported delivery method: {}.", method),
			Error::MessageTooLarge(len) => write!(f, "Message of {} bytes is too large.", len),
			Error::BadChainLength(len) => write!(f, "Chain of {} hops is not usable.", len),
			Error::InsufficientPeers { wanted, have } =>
				write!(f, "Not enough remailers: Wanted={}, Have={}.", wanted, have),
			Error::ArmorMissingMarker(marker) => write!(f, "No {} found on message.", marker),
			Error::ArmorBadSize { stated, got } =>
				write!(f, "Payload size mismatch: Stated={}, Got={}.", stated, got),
			Error::ArmorDigestMismatch => write!(f, "Incorrect payload digest during dearmor."),
			Error::TransientIo(what) => write!(f, "Transient IO failure: {}.", what),
			Error::PermanentIo(what) => write!(f, "Permanent IO failure: {}.", what),
			Error::Config(what) => write!(f, "Configuration error: {}.", what),
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Self {
		// Retry by default; callers that know better classify themselves.
		Error::TransientIo(e.to_string())
	}
}

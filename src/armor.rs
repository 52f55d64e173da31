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

//! Armored transport envelope.
//!
//! A packet travels in an email body as base64 between cutmarks, preceded
//! by its decimal length and a hex BLAKE2s digest.

use crate::{
	error::Error,
	packet::{crypto::digest256, PACKET_BYTES},
	VERSION,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Column at which armored base64 wraps.
pub const BASE64_WRAP: usize = 64;

const COLONS: &str = "::";
const BEGIN: &str = "-----BEGIN REMAILER MESSAGE-----";
const END: &str = "-----END REMAILER MESSAGE-----";

/// Wrap a raw packet in the armored envelope.
pub fn armor(payload: &[u8]) -> Result<String, Error> {
	if payload.len() != PACKET_BYTES {
		return Err(Error::SizeMismatch { wanted: PACKET_BYTES, got: payload.len() })
	}
	let mut out = String::with_capacity(payload.len() * 4 / 3 + 256);
	out.push_str(COLONS);
	out.push('\n');
	out.push_str(&format!("Remailer-Type: yamn-{}\n\n", VERSION));
	out.push_str(BEGIN);
	out.push('\n');
	out.push_str(&format!("{}\n", payload.len()));
	out.push_str(&hex::encode(digest256(&[payload])));
	out.push('\n');
	let encoded = STANDARD.encode(payload);
	for line in encoded.as_bytes().chunks(BASE64_WRAP) {
		out.push_str(std::str::from_utf8(line).expect("Base64 is ASCII"));
		out.push('\n');
	}
	out.push_str(END);
	out.push('\n');
	Ok(out)
}

enum Phase {
	AwaitColons,
	AwaitBegin,
	AwaitSize,
	AwaitDigest,
	InBody,
	Done,
}

/// Strict-order scan of an armored message, yielding the raw packet.
pub fn dearmor(text: &str) -> Result<Vec<u8>, Error> {
	let mut phase = Phase::AwaitColons;
	let mut stated_len = 0usize;
	let mut stated_digest = Vec::new();
	let mut encoded = String::new();

	for line in text.lines() {
		match phase {
			Phase::AwaitColons =>
				if line == COLONS {
					phase = Phase::AwaitBegin;
				},
			Phase::AwaitBegin =>
				if line == BEGIN {
					phase = Phase::AwaitSize;
				},
			Phase::AwaitSize => {
				stated_len = line
					.parse()
					.map_err(|_| Error::Parse(format!("Unable to extract payload size from {}", line)))?;
				phase = Phase::AwaitDigest;
			},
			Phase::AwaitDigest => {
				if line.len() != 64 {
					return Err(Error::Parse(format!(
						"Expected 64 digit hex encoded hash, got {} bytes",
						line.len(),
					)))
				}
				stated_digest = hex::decode(line)
					.map_err(|_| Error::Parse("Unable to decode hex hash on payload".into()))?;
				phase = Phase::InBody;
			},
			Phase::InBody =>
				if line == END {
					phase = Phase::Done;
				} else {
					encoded.push_str(line);
				},
			Phase::Done => break,
		}
	}

	match phase {
		Phase::AwaitColons => return Err(Error::ArmorMissingMarker("::")),
		Phase::AwaitBegin => return Err(Error::ArmorMissingMarker("Begin cutmark")),
		Phase::AwaitSize => return Err(Error::ArmorMissingMarker("payload size")),
		Phase::AwaitDigest => return Err(Error::ArmorMissingMarker("payload digest")),
		Phase::InBody => return Err(Error::ArmorMissingMarker("End cutmark")),
		Phase::Done => (),
	}

	let payload = STANDARD
		.decode(encoded)
		.map_err(|e| Error::Parse(format!("Base64 decode failed: {}", e)))?;
	if payload.len() != stated_len {
		return Err(Error::ArmorBadSize { stated: stated_len, got: payload.len() })
	}
	if payload.len() != PACKET_BYTES {
		return Err(Error::ArmorBadSize { stated: PACKET_BYTES, got: payload.len() })
	}
	if digest256(&[&payload[..]])[..] != stated_digest[..] {
		return Err(Error::ArmorDigestMismatch)
	}
	Ok(payload)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::OsRng, RngCore};

	fn packet_bytes() -> Vec<u8> {
		let mut payload = vec![0u8; PACKET_BYTES];
		OsRng.fill_bytes(&mut payload);
		payload
	}

	#[test]
	fn round_trip() {
		let payload = packet_bytes();
		let armored = armor(&payload).unwrap();
		assert!(armored.starts_with("::\nRemailer-Type: yamn-"));
		assert!(armored.lines().all(|line| line.len() <= BASE64_WRAP));
		assert_eq!(dearmor(&armored).unwrap(), payload);
	}

	#[test]
	fn wrong_size_payload_will_not_armor() {
		assert!(matches!(armor(b"short"), Err(Error::SizeMismatch { .. })));
	}

	#[test]
	fn tampered_body_is_detected() {
		let armored = armor(&packet_bytes()).unwrap();
		// Flip a character inside the base64 body.
		let mut lines: Vec<String> = armored.lines().map(str::to_string).collect();
		let body_line = 6;
		let flipped = if lines[body_line].starts_with('A') { "B" } else { "A" };
		lines[body_line].replace_range(0..1, flipped);
		let err = dearmor(&lines.join("\n")).unwrap_err();
		assert_eq!(err, Error::ArmorDigestMismatch);
	}

	#[test]
	fn declared_length_must_match() {
		let armored = armor(&packet_bytes()).unwrap();
		let mut lines: Vec<String> = armored.lines().map(str::to_string).collect();
		lines[4] = "1234".into();
		assert!(matches!(dearmor(&lines.join("\n")), Err(Error::ArmorBadSize { .. })));
	}

	#[test]
	fn missing_markers_are_reported() {
		assert_eq!(dearmor("nothing here"), Err(Error::ArmorMissingMarker("::")));
		assert_eq!(dearmor("::\n"), Err(Error::ArmorMissingMarker("Begin cutmark")));
		let headless = format!("::\n{}\n15360\n{}\nQUJD\n", BEGIN, "ab".repeat(32));
		assert_eq!(dearmor(&headless), Err(Error::ArmorMissingMarker("End cutmark")));
	}
}

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

//! Key exchange, secret derivation, MAC computation, and the AES-CTR
//! layer cipher.

use crate::{KeyId, KEY_ID_BYTES};
use aes::{
	cipher::{KeyIvInit, StreamCipher},
	Aes256,
};
use blake2::{
	digest::{consts::U32, FixedOutput, Mac, Update, VariableOutput},
	Blake2s256, Blake2sMac, Blake2sVar,
};
use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

const SLOT_KEY_PERSONAL: &[u8; 8] = b"yamnslot";
const SLOT_MAC_PERSONAL: &[u8; 8] = b"yamn-mac";

/// Size in bytes of an AES-256 layer key.
pub const KEY_BYTES: usize = 32;
/// Size in bytes of a full CTR IV.
pub const IV_BYTES: usize = 16;
/// Size in bytes of the partial IV an intermediate header carries.
pub const IV_BASE_BYTES: usize = 12;
/// Size in bytes of a BLAKE2s-256 digest.
pub const DIGEST_BYTES: usize = 32;

pub type Digest32 = [u8; DIGEST_BYTES];

/// The layer cipher. With the block counter walking the leading IV bytes,
/// streams keyed by the trailing sequence counter never overlap.
pub type Aes256Ctr = ctr::Ctr128LE<Aes256>;

////////////////////////////////////////////////////////////////////////////////
// Key exchange
////////////////////////////////////////////////////////////////////////////////

/// Generate a fresh Curve25519 keypair.
pub fn gen_keypair() -> (StaticSecret, PublicKey) {
	let secret = StaticSecret::random_from_rng(OsRng);
	let public = PublicKey::from(&secret);
	(secret, public)
}

/// X25519 agreement with a raw peer public key. `None` for a
/// non-contributory exchange.
pub fn shared_secret(secret: &StaticSecret, peer: &[u8; 32]) -> Option<[u8; 32]> {
	let shared = secret.diffie_hellman(&PublicKey::from(*peer));
	shared.was_contributory().then(|| shared.to_bytes())
}

/// 16 byte key ID: the truncated BLAKE2s hash of a public key.
pub fn key_id(public: &[u8; 32]) -> KeyId {
	let mut h = Blake2sVar::new(KEY_ID_BYTES).expect("Output size is fixed and small enough");
	Update::update(&mut h, public);
	let mut id = [0u8; KEY_ID_BYTES];
	h.finalize_variable(&mut id).expect("Output size matches the hasher");
	id
}

////////////////////////////////////////////////////////////////////////////////
// Secret derivation
////////////////////////////////////////////////////////////////////////////////

/// Keys protecting the slot data of one header.
pub struct SlotKeys {
	pub encrypt: [u8; KEY_BYTES],
	pub mac: [u8; KEY_BYTES],
}

/// Derive the slot-data keys from a shared secret. This is the
/// construction libsodium uses for crypto_kdf_derive_from_key; see
/// https://doc.libsodium.org/key_derivation/
pub fn derive_slot_keys(shared: &[u8; 32]) -> SlotKeys {
	SlotKeys {
		encrypt: derive_secret(shared, SLOT_KEY_PERSONAL),
		mac: derive_secret(shared, SLOT_MAC_PERSONAL),
	}
}

fn derive_secret(shared: &[u8; 32], personal: &[u8; 8]) -> [u8; KEY_BYTES] {
	let h = Blake2sMac::<U32>::new_with_salt_and_personal(shared, b"", personal)
		.expect("Key, salt, and personalisation sizes are fixed and small enough");
	h.finalize().into_bytes().into()
}

////////////////////////////////////////////////////////////////////////////////
// Digests and MACs
////////////////////////////////////////////////////////////////////////////////

/// BLAKE2s-256 over the concatenation of `parts`.
pub fn digest256(parts: &[&[u8]]) -> Digest32 {
	let mut h = Blake2s256::default();
	for part in parts {
		Update::update(&mut h, part);
	}
	h.finalize_fixed().into()
}

pub fn compute_mac(key: &[u8; KEY_BYTES], data: &[u8]) -> Digest32 {
	let mut h =
		<Blake2sMac<U32> as Mac>::new_from_slice(key).expect("Key size is fixed and small enough");
	Mac::update(&mut h, data);
	h.finalize().into_bytes().into()
}

/// Constant-time MAC verification.
pub fn mac_ok(tag: &Digest32, key: &[u8; KEY_BYTES], data: &[u8]) -> bool {
	let mut h =
		<Blake2sMac<U32> as Mac>::new_from_slice(key).expect("Key size is fixed and small enough");
	Mac::update(&mut h, data);
	h.verify_slice(tag).is_ok()
}

////////////////////////////////////////////////////////////////////////////////
// Layer encryption
////////////////////////////////////////////////////////////////////////////////

/// Expand a partial IV and a sequence counter into a full CTR IV.
pub fn seq_iv(base: &[u8; IV_BASE_BYTES], counter: u32) -> [u8; IV_BYTES] {
	let mut iv = [0u8; IV_BYTES];
	iv[..IV_BASE_BYTES].copy_from_slice(base);
	iv[IV_BASE_BYTES..].copy_from_slice(&counter.to_le_bytes());
	iv
}

/// Apply one AES-256-CTR layer in place. Its own inverse.
pub fn apply_layer(data: &mut [u8], key: &[u8; KEY_BYTES], iv: &[u8; IV_BYTES]) {
	let mut cipher = Aes256Ctr::new(key.into(), iv.into());
	cipher.apply_keystream(data);
}

/// Fixed-size block of bytes from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
	let mut bytes = [0u8; N];
	OsRng.fill_bytes(&mut bytes);
	bytes
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layer_round_trip() {
		let key = random_bytes::<KEY_BYTES>();
		let base = random_bytes::<IV_BASE_BYTES>();
		let mut buf = vec![7u8; 600];
		let reference = buf.clone();
		apply_layer(&mut buf, &key, &seq_iv(&base, 3));
		assert_ne!(buf, reference);
		apply_layer(&mut buf, &key, &seq_iv(&base, 3));
		assert_eq!(buf, reference);
	}

	#[test]
	fn seq_ivs_are_distinct_streams() {
		let key = random_bytes::<KEY_BYTES>();
		let base = random_bytes::<IV_BASE_BYTES>();
		let mut a = vec![0u8; 512];
		let mut b = vec![0u8; 512];
		apply_layer(&mut a, &key, &seq_iv(&base, 1));
		apply_layer(&mut b, &key, &seq_iv(&base, 2));
		// Keystreams from adjacent counters must not share any block.
		assert!(a.chunks(16).all(|block| !b.chunks(16).any(|other| other == block)));
	}

	#[test]
	fn exchange_agrees() {
		let (sk_a, pk_a) = gen_keypair();
		let (sk_b, pk_b) = gen_keypair();
		let ab = shared_secret(&sk_a, pk_b.as_bytes()).unwrap();
		let ba = shared_secret(&sk_b, pk_a.as_bytes()).unwrap();
		assert_eq!(ab, ba);
		let keys = derive_slot_keys(&ab);
		assert_ne!(keys.encrypt, keys.mac);
	}

	#[test]
	fn mac_detects_tamper() {
		let key = random_bytes::<KEY_BYTES>();
		let tag = compute_mac(&key, b"slot data");
		assert!(mac_ok(&tag, &key, b"slot data"));
		assert!(!mac_ok(&tag, &key, b"slot datb"));
	}

	#[test]
	fn key_id_is_sixteen_bytes_of_blake2s() {
		let (_, public) = gen_keypair();
		let id = key_id(public.as_bytes());
		assert_eq!(id.len(), KEY_ID_BYTES);
		assert_eq!(id, key_id(public.as_bytes()));
	}
}

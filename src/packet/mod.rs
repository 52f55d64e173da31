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

//! Packet format.
//!
//! A packet is a stack of `MAX_HOPS` header slots followed by a fixed body.
//! Each header slot is encrypted to one hop; consuming it yields an AES key
//! that strips one layer from every remaining slot and the body. The slot
//! appended at the bottom during a peel is zero filled and leaves the layer
//! strip as pure keystream, which is what lets the encoder predict every
//! later hop's view of the stack and bind it into the anti-tag digests.

pub mod crypto;

use crate::{dates::epoch_days_now, error::Error, KeyId, KEY_ID_BYTES};
use arrayref::{array_ref, array_refs, mut_array_refs};
use crypto::{
	apply_layer, compute_mac, derive_slot_keys, digest256, gen_keypair, key_id, mac_ok,
	random_bytes, seq_iv, shared_secret, Digest32, DIGEST_BYTES, IV_BASE_BYTES, IV_BYTES,
	KEY_BYTES,
};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;

/// Maximum hops the packet format supports.
pub const MAX_HOPS: usize = 10;
/// The size in bytes of one header slot.
pub const HEADER_BYTES: usize = 512;
/// The size in bytes of the full header stack.
pub const HEADERS_BYTES: usize = MAX_HOPS * HEADER_BYTES;
/// The size in bytes of the packet body.
pub const BODY_BYTES: usize = 10240;
/// The fixed wire size of a packet.
pub const PACKET_BYTES: usize = HEADERS_BYTES + BODY_BYTES;

/// The size in bytes of a packet ID.
pub const PACKET_ID_BYTES: usize = 16;
/// The size in bytes of a chunked-message ID.
pub const MESSAGE_ID_BYTES: usize = 16;
/// Fixed width of the next-hop address field.
pub const ADDRESS_BYTES: usize = 80;

const SLOT_DATA_BYTES: usize = 192;
const PACKET_INFO_BYTES: usize = 96;

const EPH_OFFSET: usize = KEY_ID_BYTES;
const SLOT_IV_OFFSET: usize = EPH_OFFSET + 32;
const SLOT_DATA_OFFSET: usize = SLOT_IV_OFFSET + IV_BYTES;
const MAC_OFFSET: usize = SLOT_DATA_OFFSET + SLOT_DATA_BYTES;
const HEADER_PAD_OFFSET: usize = MAC_OFFSET + DIGEST_BYTES;
const HEADER_PAD_BYTES: usize = HEADER_BYTES - HEADER_PAD_OFFSET;

/// Header slots strip with counters `1..=MAX_HOPS`; the body follows.
const BODY_IV_COUNTER: u32 = MAX_HOPS as u32 + 1;

/// Intermediate packet: forward the residual to the next hop.
pub const TYPE_INTERMEDIATE: u8 = 0;
/// Final packet: this hop is the exit.
pub const TYPE_FINAL: u8 = 1;

/// Deliver the plaintext over SMTP.
pub const DELIVERY_SMTP: u8 = 0;
/// Cover traffic; discard on arrival.
pub const DELIVERY_DUMMY: u8 = 255;

/// A remailer packet as an immutable value. Peeling produces a new packet
/// of identical size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet(Box<[u8; PACKET_BYTES]>);

/// One hop of a chain: where to send and which key to encrypt to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hop {
	pub address: String,
	pub public_key: [u8; 32],
}

/// Exit-hop parameters for [`encode`].
#[derive(Clone, Debug)]
pub struct FinalParams {
	pub delivery: u8,
	pub message_id: [u8; MESSAGE_ID_BYTES],
	pub chunk_num: u8,
	pub num_chunks: u8,
}

impl FinalParams {
	/// A single-chunk SMTP delivery with a fresh message ID.
	pub fn single() -> Self {
		Self {
			delivery: DELIVERY_SMTP,
			message_id: random_bytes(),
			chunk_num: 1,
			num_chunks: 1,
		}
	}

	/// Cover traffic.
	pub fn dummy() -> Self {
		Self { delivery: DELIVERY_DUMMY, ..Self::single() }
	}

	/// One chunk of a multi-part message. Chunk numbers are 1-based.
	pub fn chunk(message_id: [u8; MESSAGE_ID_BYTES], chunk_num: u8, num_chunks: u8) -> Self {
		Self { delivery: DELIVERY_SMTP, message_id, chunk_num, num_chunks }
	}
}

/// Decrypted slot data of a consumed header.
#[derive(Clone, Debug)]
pub struct SlotData {
	pub packet_id: [u8; PACKET_ID_BYTES],
	pub aes_key: [u8; KEY_BYTES],
	/// Days since the Unix epoch at encode time.
	pub days: u16,
	pub anti_tag: Digest32,
	pub info: PacketInfo,
}

#[derive(Clone, Debug)]
pub enum PacketInfo {
	Intermediate(IntermediateInfo),
	Final(FinalInfo),
}

#[derive(Clone, Debug)]
pub struct IntermediateInfo {
	pub iv_base: [u8; IV_BASE_BYTES],
	pub next_hop: String,
}

#[derive(Clone, Debug)]
pub struct FinalInfo {
	pub delivery: u8,
	pub body_len: u32,
	pub message_id: [u8; MESSAGE_ID_BYTES],
	pub chunk_num: u8,
	pub num_chunks: u8,
	pub body_iv: [u8; IV_BYTES],
}

/// Source of secret keys for header decryption.
pub trait SecretLookup {
	fn secret(&self, key_id: &KeyId) -> Option<StaticSecret>;
}

impl SecretLookup for HashMap<KeyId, StaticSecret> {
	fn secret(&self, key_id: &KeyId) -> Option<StaticSecret> {
		self.get(key_id).cloned()
	}
}

/// Result of peeling one layer.
#[derive(Debug)]
pub enum Peeled {
	/// Residual packet and where to send it.
	Intermediate {
		packet_id: [u8; PACKET_ID_BYTES],
		next_hop: String,
		packet: Packet,
	},
	/// Decrypted exit payload.
	Final {
		packet_id: [u8; PACKET_ID_BYTES],
		info: FinalInfo,
		plain: Vec<u8>,
	},
}

impl Packet {
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
		if bytes.len() != PACKET_BYTES {
			return Err(Error::SizeMismatch { wanted: PACKET_BYTES, got: bytes.len() })
		}
		let mut packet = Box::new([0u8; PACKET_BYTES]);
		packet.copy_from_slice(bytes);
		Ok(Packet(packet))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0[..]
	}

	/// Decrypt and authenticate the top header against our secret keys.
	pub fn open_header(&self, keys: &dyn SecretLookup) -> Result<SlotData, Error> {
		let header = array_ref![&self.0[..], 0, HEADER_BYTES];
		let (recipient, ephemeral, slot_iv, slot_ct, mac, _pad) = array_refs![
			header,
			KEY_ID_BYTES,
			32,
			IV_BYTES,
			SLOT_DATA_BYTES,
			DIGEST_BYTES,
			HEADER_PAD_BYTES
		];
		let secret = keys.secret(recipient).ok_or_else(|| Error::KeyUnknown(hex::encode(recipient)))?;
		let shared =
			shared_secret(&secret, ephemeral).ok_or(Error::Crypto("non-contributory exchange"))?;
		let slot_keys = derive_slot_keys(&shared);
		if !mac_ok(mac, &slot_keys.mac, &header[EPH_OFFSET..MAC_OFFSET]) {
			return Err(Error::SlotDecrypt)
		}
		let mut slot_bytes = *slot_ct;
		apply_layer(&mut slot_bytes, &slot_keys.encrypt, slot_iv);
		decode_slot_data(&slot_bytes)
	}

	/// Check the anti-tag digest over everything below the top header.
	pub fn anti_tag_ok(&self, tag: &Digest32) -> bool {
		let digest = digest256(&[&self.0[HEADER_BYTES..HEADERS_BYTES], &self.0[HEADERS_BYTES..]]);
		digest.ct_eq(tag).unwrap_u8() == 1
	}

	/// Discard the consumed top header and strip one layer from the rest.
	/// The vacated bottom slot starts zeroed and leaves the strip as
	/// keystream, preserving the packet size.
	pub fn shifted_stripped(
		&self,
		key: &[u8; KEY_BYTES],
		iv_base: &[u8; IV_BASE_BYTES],
	) -> Packet {
		let mut out = Box::new([0u8; PACKET_BYTES]);
		out[..HEADERS_BYTES - HEADER_BYTES].copy_from_slice(&self.0[HEADER_BYTES..HEADERS_BYTES]);
		out[HEADERS_BYTES..].copy_from_slice(&self.0[HEADERS_BYTES..]);
		strip_stack(&mut out[..HEADERS_BYTES], key, iv_base);
		apply_layer(&mut out[HEADERS_BYTES..], key, &seq_iv(iv_base, BODY_IV_COUNTER));
		Packet(out)
	}

	/// Decrypt the body of a final packet and truncate to its stated length.
	pub fn decrypt_body(
		&self,
		key: &[u8; KEY_BYTES],
		iv: &[u8; IV_BYTES],
		len: usize,
	) -> Result<Vec<u8>, Error> {
		if len > BODY_BYTES {
			return Err(Error::SizeMismatch { wanted: BODY_BYTES, got: len })
		}
		let mut body = self.0[HEADERS_BYTES..].to_vec();
		apply_layer(&mut body, key, iv);
		body.truncate(len);
		Ok(body)
	}
}

/// Age in whole days of an encode-time day stamp. Negative for stamps from
/// the future.
pub fn age_days(days: u16) -> i64 {
	epoch_days_now() as i64 - days as i64
}

/// Strip one AES-CTR layer from every slot of a header stack.
fn strip_stack(stack: &mut [u8], key: &[u8; KEY_BYTES], iv_base: &[u8; IV_BASE_BYTES]) {
	debug_assert_eq!(stack.len(), HEADERS_BYTES);
	for slot in 0..MAX_HOPS {
		let iv = seq_iv(iv_base, slot as u32 + 1);
		apply_layer(&mut stack[slot * HEADER_BYTES..(slot + 1) * HEADER_BYTES], key, &iv);
	}
}

/// Peel one layer: authenticate the top header, verify the anti-tag digest
/// and the timestamp window, then transform the packet for the next hop or
/// decrypt the exit payload.
pub fn peel(
	packet: &Packet,
	keys: &dyn SecretLookup,
	max_age_days: u16,
) -> Result<Peeled, Error> {
	let slot = packet.open_header(keys)?;
	if !packet.anti_tag_ok(&slot.anti_tag) {
		return Err(Error::AntiTagMismatch)
	}
	let age = age_days(slot.days);
	if age < 0 || age > max_age_days as i64 {
		return Err(Error::BadTimestamp(age))
	}
	let SlotData { packet_id, aes_key, info, .. } = slot;
	match info {
		PacketInfo::Intermediate(info) => {
			let residual = packet.shifted_stripped(&aes_key, &info.iv_base);
			Ok(Peeled::Intermediate { packet_id, next_hop: info.next_hop, packet: residual })
		},
		PacketInfo::Final(info) => {
			let plain = packet.decrypt_body(&aes_key, &info.body_iv, info.body_len as usize)?;
			Ok(Peeled::Final { packet_id, info, plain })
		},
	}
}

/// Build a packet from the exit inward.
///
/// Every hop's layer secrets are drawn first so the evolution of the
/// padding slots, keystream appended by each peel included, can be
/// simulated forward; the anti-tag digest each hop verifies is computed
/// over exactly the bytes that simulation predicts.
pub fn encode(plain: &[u8], chain: &[Hop], params: &FinalParams) -> Result<Packet, Error> {
	if chain.is_empty() || chain.len() > MAX_HOPS {
		return Err(Error::BadChainLength(chain.len()))
	}
	if plain.len() > BODY_BYTES {
		return Err(Error::MessageTooLarge(plain.len()))
	}
	if let Some(hop) = chain.iter().find(|hop| hop.address.len() > ADDRESS_BYTES) {
		return Err(Error::Parse(format!("Address {} is too long", hop.address)))
	}
	let hops = chain.len();

	struct Layer {
		key: [u8; KEY_BYTES],
		iv_base: [u8; IV_BASE_BYTES],
	}
	let layers: Vec<Layer> = (1..hops)
		.map(|_| Layer { key: random_bytes(), iv_base: random_bytes() })
		.collect();
	let exit_key: [u8; KEY_BYTES] = random_bytes();
	let body_iv: [u8; IV_BYTES] = random_bytes();

	// Simulate the padding slots forward to learn the exit's view of the
	// stack below its own header.
	let mut ghost = vec![0u8; HEADERS_BYTES];
	OsRng.fill_bytes(&mut ghost[hops * HEADER_BYTES..]);
	for layer in &layers {
		ghost.copy_within(HEADER_BYTES.., 0);
		ghost[HEADERS_BYTES - HEADER_BYTES..].fill(0);
		strip_stack(&mut ghost, &layer.key, &layer.iv_base);
	}

	// Body and header as the exit sees them.
	let mut body = vec![0u8; BODY_BYTES];
	body[..plain.len()].copy_from_slice(plain);
	OsRng.fill_bytes(&mut body[plain.len()..]);
	apply_layer(&mut body, &exit_key, &body_iv);

	let mut stack = vec![0u8; HEADERS_BYTES];
	stack[HEADER_BYTES..].copy_from_slice(&ghost[HEADER_BYTES..]);
	let slot = SlotData {
		packet_id: random_bytes(),
		aes_key: exit_key,
		days: epoch_days_now(),
		anti_tag: digest256(&[&stack[HEADER_BYTES..], &body[..]]),
		info: PacketInfo::Final(FinalInfo {
			delivery: params.delivery,
			body_len: plain.len() as u32,
			message_id: params.message_id,
			chunk_num: params.chunk_num,
			num_chunks: params.num_chunks,
			body_iv,
		}),
	};
	write_header(&mut stack[..HEADER_BYTES], &chain[hops - 1].public_key, &slot);

	// Walk the intermediates backwards. Slot `k` of the outgoing stack must
	// decrypt, after the hop's shift, to slot `k - 1` of the stack above.
	for (hop, layer) in layers.iter().enumerate().rev() {
		for slot in (1..MAX_HOPS).rev() {
			let (below, above) = stack.split_at_mut(slot * HEADER_BYTES);
			above[..HEADER_BYTES]
				.copy_from_slice(&below[(slot - 1) * HEADER_BYTES..slot * HEADER_BYTES]);
			apply_layer(&mut above[..HEADER_BYTES], &layer.key, &seq_iv(&layer.iv_base, slot as u32));
		}
		apply_layer(&mut body, &layer.key, &seq_iv(&layer.iv_base, BODY_IV_COUNTER));
		let slot = SlotData {
			packet_id: random_bytes(),
			aes_key: layer.key,
			days: epoch_days_now(),
			anti_tag: digest256(&[&stack[HEADER_BYTES..], &body[..]]),
			info: PacketInfo::Intermediate(IntermediateInfo {
				iv_base: layer.iv_base,
				next_hop: chain[hop + 1].address.clone(),
			}),
		};
		write_header(&mut stack[..HEADER_BYTES], &chain[hop].public_key, &slot);
	}

	let mut packet = Box::new([0u8; PACKET_BYTES]);
	packet[..HEADERS_BYTES].copy_from_slice(&stack);
	packet[HEADERS_BYTES..].copy_from_slice(&body);
	Ok(Packet(packet))
}

/// Encrypt `slot` to `recipient` and assemble a full header slot.
fn write_header(out: &mut [u8], recipient: &[u8; 32], slot: &SlotData) {
	debug_assert_eq!(out.len(), HEADER_BYTES);
	let (ephemeral_secret, ephemeral_public) = gen_keypair();
	let shared = shared_secret(&ephemeral_secret, recipient)
		.expect("A fresh ephemeral cannot produce a non-contributory exchange");
	let slot_keys = derive_slot_keys(&shared);
	let slot_iv: [u8; IV_BYTES] = random_bytes();

	let mut slot_bytes = encode_slot_data(slot);
	apply_layer(&mut slot_bytes, &slot_keys.encrypt, &slot_iv);

	out[..KEY_ID_BYTES].copy_from_slice(&key_id(recipient));
	out[EPH_OFFSET..SLOT_IV_OFFSET].copy_from_slice(ephemeral_public.as_bytes());
	out[SLOT_IV_OFFSET..SLOT_DATA_OFFSET].copy_from_slice(&slot_iv);
	out[SLOT_DATA_OFFSET..MAC_OFFSET].copy_from_slice(&slot_bytes);
	let mac = compute_mac(&slot_keys.mac, &out[EPH_OFFSET..MAC_OFFSET]);
	out[MAC_OFFSET..HEADER_PAD_OFFSET].copy_from_slice(&mac);
	OsRng.fill_bytes(&mut out[HEADER_PAD_OFFSET..]);
}

fn encode_slot_data(slot: &SlotData) -> [u8; SLOT_DATA_BYTES] {
	let mut raw = [0u8; SLOT_DATA_BYTES];
	let (tag, id, key, stamp, digest, info, _pad) = mut_array_refs![
		&mut raw,
		1,
		PACKET_ID_BYTES,
		KEY_BYTES,
		4,
		DIGEST_BYTES,
		PACKET_INFO_BYTES,
		11
	];
	*id = slot.packet_id;
	*key = slot.aes_key;
	stamp[..2].copy_from_slice(&slot.days.to_le_bytes());
	*digest = slot.anti_tag;
	match &slot.info {
		PacketInfo::Intermediate(inter) => {
			tag[0] = TYPE_INTERMEDIATE;
			let (iv_base, address, _pad) = mut_array_refs![info, IV_BASE_BYTES, ADDRESS_BYTES, 4];
			*iv_base = inter.iv_base;
			address[..inter.next_hop.len()].copy_from_slice(inter.next_hop.as_bytes());
		},
		PacketInfo::Final(fin) => {
			tag[0] = TYPE_FINAL;
			let (delivery, body_len, message_id, chunk_num, num_chunks, body_iv, _pad) =
				mut_array_refs![info, 1, 4, MESSAGE_ID_BYTES, 1, 1, IV_BYTES, 57];
			delivery[0] = fin.delivery;
			*body_len = fin.body_len.to_le_bytes();
			*message_id = fin.message_id;
			chunk_num[0] = fin.chunk_num;
			num_chunks[0] = fin.num_chunks;
			*body_iv = fin.body_iv;
		},
	}
	raw
}

fn decode_slot_data(raw: &[u8; SLOT_DATA_BYTES]) -> Result<SlotData, Error> {
	let (tag, id, key, stamp, digest, info, _pad) = array_refs![
		raw,
		1,
		PACKET_ID_BYTES,
		KEY_BYTES,
		4,
		DIGEST_BYTES,
		PACKET_INFO_BYTES,
		11
	];
	let days = u16::from_le_bytes([stamp[0], stamp[1]]);
	let info = match tag[0] {
		TYPE_INTERMEDIATE => {
			let (iv_base, address, _pad) = array_refs![info, IV_BASE_BYTES, ADDRESS_BYTES, 4];
			let end = address.iter().position(|b| *b == 0).unwrap_or(ADDRESS_BYTES);
			let next_hop = std::str::from_utf8(&address[..end])
				.map_err(|_| Error::SlotDecrypt)?
				.to_string();
			PacketInfo::Intermediate(IntermediateInfo { iv_base: *iv_base, next_hop })
		},
		TYPE_FINAL => {
			let (delivery, body_len, message_id, chunk_num, num_chunks, body_iv, _pad) =
				array_refs![info, 1, 4, MESSAGE_ID_BYTES, 1, 1, IV_BYTES, 57];
			PacketInfo::Final(FinalInfo {
				delivery: delivery[0],
				body_len: u32::from_le_bytes(*body_len),
				message_id: *message_id,
				chunk_num: chunk_num[0],
				num_chunks: num_chunks[0],
				body_iv: *body_iv,
			})
		},
		_ => return Err(Error::SlotDecrypt),
	};
	Ok(SlotData { packet_id: *id, aes_key: *key, days, anti_tag: *digest, info })
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Node {
		address: String,
		secret: StaticSecret,
		keys: HashMap<KeyId, StaticSecret>,
	}

	fn new_node(index: usize) -> Node {
		let (secret, public) = gen_keypair();
		let mut keys = HashMap::new();
		keys.insert(key_id(public.as_bytes()), secret.clone());
		Node { address: format!("mix{}@example.org", index), secret, keys }
	}

	fn chain_of(nodes: &[Node]) -> Vec<Hop> {
		nodes
			.iter()
			.map(|node| Hop {
				address: node.address.clone(),
				public_key: x25519_dalek::PublicKey::from(&node.secret).to_bytes(),
			})
			.collect()
	}

	#[test]
	fn peel_is_left_inverse_of_encode() {
		let payload = b"We must defend our own privacy if we expect to have any.";
		for hops in 1..=MAX_HOPS {
			let nodes: Vec<Node> = (0..hops).map(new_node).collect();
			let chain = chain_of(&nodes);
			let mut packet = encode(payload, &chain, &FinalParams::single()).unwrap();
			for (position, node) in nodes.iter().enumerate() {
				assert_eq!(packet.as_bytes().len(), PACKET_BYTES);
				match peel(&packet, &node.keys, 1).unwrap() {
					Peeled::Intermediate { next_hop, packet: residual, .. } => {
						assert!(position < hops - 1);
						assert_eq!(next_hop, nodes[position + 1].address);
						packet = residual;
					},
					Peeled::Final { info, plain, .. } => {
						assert_eq!(position, hops - 1);
						assert_eq!(info.delivery, DELIVERY_SMTP);
						assert_eq!(info.num_chunks, 1);
						assert_eq!(plain, payload);
					},
				}
			}
		}
	}

	#[test]
	fn tampered_body_fails_anti_tag() {
		let nodes: Vec<Node> = (0..3).map(new_node).collect();
		let chain = chain_of(&nodes);
		let packet = encode(b"payload", &chain, &FinalParams::single()).unwrap();
		let mut bytes = packet.as_bytes().to_vec();
		*bytes.last_mut().unwrap() ^= 1;
		let tampered = Packet::from_bytes(&bytes).unwrap();
		assert_eq!(peel(&tampered, &nodes[0].keys, 1).unwrap_err(), Error::AntiTagMismatch);
	}

	#[test]
	fn unknown_key_is_reported() {
		let nodes: Vec<Node> = (0..2).map(new_node).collect();
		let chain = chain_of(&nodes);
		let packet = encode(b"payload", &chain, &FinalParams::single()).unwrap();
		// Peel with the wrong node's keyring.
		assert!(matches!(
			peel(&packet, &nodes[1].keys, 1),
			Err(Error::KeyUnknown(_))
		));
	}

	#[test]
	fn wire_size_is_checked() {
		assert_eq!(
			Packet::from_bytes(&[0u8; PACKET_BYTES - 1]),
			Err(Error::SizeMismatch { wanted: PACKET_BYTES, got: PACKET_BYTES - 1 })
		);
	}

	#[test]
	fn oversized_payload_is_rejected() {
		let nodes: Vec<Node> = (0..1).map(new_node).collect();
		let chain = chain_of(&nodes);
		let body = vec![0u8; BODY_BYTES + 1];
		assert_eq!(
			encode(&body, &chain, &FinalParams::single()).unwrap_err(),
			Error::MessageTooLarge(BODY_BYTES + 1)
		);
	}

	#[test]
	fn slot_data_round_trips() {
		let slot = SlotData {
			packet_id: random_bytes(),
			aes_key: random_bytes(),
			days: epoch_days_now(),
			anti_tag: random_bytes(),
			info: PacketInfo::Intermediate(IntermediateInfo {
				iv_base: random_bytes(),
				next_hop: "mix@example.org".into(),
			}),
		};
		let raw = encode_slot_data(&slot);
		let decoded = decode_slot_data(&raw).unwrap();
		assert_eq!(decoded.packet_id, slot.packet_id);
		assert_eq!(decoded.aes_key, slot.aes_key);
		assert_eq!(decoded.days, slot.days);
		match decoded.info {
			PacketInfo::Intermediate(info) => assert_eq!(info.next_hop, "mix@example.org"),
			_ => panic!("Unexpected packet type"),
		}
	}

	#[test]
	fn future_stamp_is_rejected() {
		let nodes: Vec<Node> = (0..1).map(new_node).collect();
		let chain = chain_of(&nodes);
		let packet = encode(b"x", &chain, &FinalParams::single()).unwrap();
		// A max age of zero accepts only packets stamped today; this one is.
		assert!(peel(&packet, &nodes[0].keys, 0).is_ok());
	}
}

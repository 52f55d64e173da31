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

//! Per-packet decode pipeline.
//!
//! Each inbound packet is peeled, replay-checked, authenticated and aged
//! before it branches: intermediates are re-pooled for the next hop (or
//! for ourselves, when the chain loops back), finals are dummies to drop,
//! payloads to deliver, or chunks to file. Failures drop the packet with a
//! log line; nothing here unwinds the server tick.

use crate::{
	chain::{make_chain, ChainParams},
	chunk::{is_populated, ChunkDb},
	config::Config,
	error::Error,
	idlog::IdLog,
	keyring::Pubring,
	packet::{
		self, age_days, crypto::random_bytes, FinalInfo, Packet, PacketInfo, SecretLookup,
		DELIVERY_DUMMY, DELIVERY_SMTP,
	},
	pool::{Pool, INBOUND, OUTBOUND, PARTIAL},
};
use rand::{rngs::OsRng, Rng};

/// Probability, in 256ths, of injecting a dummy after a forward. A fixed
/// design constant; configurable values would fingerprint nodes.
pub const DUMMY_CHANCE: u8 = 55;

/// Daily throughput counters. Reset at midnight, reported at midnight and
/// hourly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
	pub in_mail: u32,
	pub in_yamn: u32,
	pub in_dummy: u32,
	pub in_remfoo: u32,
	pub out_mail: u32,
	pub out_yamn: u32,
	pub out_plain: u32,
	pub out_dummy: u32,
	pub out_randhop: u32,
	pub out_loop: u32,
}

impl Stats {
	pub fn report(&self) {
		log::info!(
			target: "yamn",
			"Stats: InMail={}, InYamn={}, InDummy={}, InRemFoo={}, OutMail={}, OutYamn={}, \
			 OutPlain={}, OutDummy={}, OutRandhop={}, OutLoop={}",
			self.in_mail,
			self.in_yamn,
			self.in_dummy,
			self.in_remfoo,
			self.out_mail,
			self.out_yamn,
			self.out_plain,
			self.out_dummy,
			self.out_randhop,
			self.out_loop,
		);
	}

	pub fn reset(&mut self) {
		*self = Self::default();
	}
}

/// Everything one decode needs. Borrowed per batch so the keyrings can sit
/// behind their locks.
pub struct DecodeContext<'a> {
	pub cfg: &'a Config,
	pub ring: &'a Pubring,
	pub secring: &'a dyn SecretLookup,
	pub pool: &'a Pool,
	pub idlog: &'a mut IdLog,
	pub chunks: &'a mut ChunkDb,
	pub stats: &'a mut Stats,
	/// Dummy injection after forwards. Off for client-mode flushing and
	/// deterministic tests.
	pub send_dummies: bool,
}

/// Decode one inbound packet. Errors are for the caller's log; the packet
/// is dropped either way.
pub fn decode_packet(ctx: &mut DecodeContext, raw: &[u8]) -> Result<(), Error> {
	let packet = Packet::from_bytes(raw)?;
	let slot = packet.open_header(ctx.secring)?;
	if !ctx.idlog.unique(&slot.packet_id)? {
		log::trace!(target: "yamn", "Discarding duplicate message (packet ID collision)");
		return Ok(())
	}
	if !packet.anti_tag_ok(&slot.anti_tag) {
		return Err(Error::AntiTagMismatch)
	}
	let age = age_days(slot.days);
	if age < 0 || age > ctx.cfg.max_age_days as i64 {
		return Err(Error::BadTimestamp(age))
	}

	match &slot.info {
		PacketInfo::Intermediate(info) => {
			let residual = packet.shifted_stripped(&slot.aes_key, &info.iv_base);
			if info.next_hop == ctx.cfg.address {
				// We are the next hop as well as the current one. Pool the
				// message inbound rather than mailing it back to ourselves.
				log::info!(
					target: "yamn",
					"Message loops back to us. Storing in pool instead of sending it.",
				);
				ctx.pool.write(INBOUND, None, residual.as_bytes())?;
				ctx.stats.out_loop += 1;
			} else {
				ctx.pool.write(OUTBOUND, Some(&info.next_hop), residual.as_bytes())?;
				ctx.stats.out_yamn += 1;
				if ctx.send_dummies && OsRng.gen::<u8>() < DUMMY_CHANCE {
					match send_dummy(ctx.cfg, ctx.ring, ctx.pool) {
						Ok(()) => ctx.stats.out_dummy += 1,
						Err(e) => log::debug!(target: "yamn", "Dummy injection failed: {}", e),
					}
				}
			}
			Ok(())
		},
		PacketInfo::Final(info) => {
			if info.delivery == DELIVERY_DUMMY {
				log::trace!(target: "yamn", "Discarding dummy message");
				ctx.stats.in_dummy += 1;
				return Ok(())
			}
			let plain = packet.decrypt_body(&slot.aes_key, &info.body_iv, info.body_len as usize)?;
			match info.delivery {
				DELIVERY_SMTP => {
					ctx.stats.in_yamn += 1;
					if !ctx.cfg.is_exit {
						if info.num_chunks == 1 {
							randhop(ctx, &plain)
						} else {
							// As per Mixmaster, multi-chunk messages cannot
							// randhop and are dropped.
							log::warn!(
								target: "yamn",
								"Randhopping doesn't support multi-chunk messages; dropping.",
							);
							Ok(())
						}
					} else {
						deliver_final(ctx, &plain, info)
					}
				},
				method => Err(Error::UnsupportedMethod(method)),
			}
		},
	}
}

/// Exit-side handling of a decrypted final payload: pool it for SMTP, or
/// file the chunk and assemble once every slot is present.
fn deliver_final(ctx: &mut DecodeContext, plain: &[u8], info: &FinalInfo) -> Result<(), Error> {
	if info.num_chunks == 1 {
		ctx.pool.write(OUTBOUND, None, plain)?;
		ctx.stats.out_plain += 1;
		return Ok(())
	}
	if info.chunk_num == 0 || info.chunk_num > info.num_chunks {
		return Err(Error::Parse(format!(
			"Chunk {} of {} is out of range",
			info.chunk_num, info.num_chunks,
		)))
	}
	let chunk_filename = ctx.pool.write(PARTIAL, None, plain)?;
	log::trace!(
		target: "yamn",
		"Pooled partial chunk. MsgID={}, Num={}, Parts={}, Filename={}",
		hex::encode(info.message_id),
		info.chunk_num,
		info.num_chunks,
		chunk_filename,
	);
	let mut slots = ctx.chunks.get(&info.message_id, info.num_chunks as usize)?;
	let slot = info.chunk_num as usize - 1;
	if slot >= slots.len() {
		// A chunk whose numbering disagrees with the stored record.
		return Err(Error::Parse(format!(
			"Chunk {} does not fit a {} slot record",
			info.chunk_num,
			slots.len(),
		)))
	}
	if !slots[slot].is_empty() {
		log::warn!(
			target: "yamn",
			"Duplicate chunk {} in MsgID {}",
			info.chunk_num,
			hex::encode(info.message_id),
		);
	}
	slots[slot] = chunk_filename;
	if is_populated(&slots) {
		match ctx.chunks.assemble(ctx.pool, &slots) {
			Ok(assembled) =>
				log::trace!(target: "yamn", "Assembled chunked message into {}", assembled),
			// Fall through so the bad chunk does not linger in the DB.
			Err(e) => log::warn!(target: "yamn", "Chunk assembly failed: {}", e),
		}
		ctx.chunks.delete(ctx.pool, &info.message_id)?;
		ctx.stats.out_plain += 1;
	} else {
		ctx.chunks.insert(&info.message_id, slots)?;
	}
	Ok(())
}

/// A non-exit node received plaintext: wrap it for a random exit-capable
/// peer rather than emitting it ourselves.
fn randhop(ctx: &mut DecodeContext, plain: &[u8]) -> Result<(), Error> {
	if plain.is_empty() {
		log::info!(target: "yamn", "Zero-byte message during randhop, ignoring it.");
		return Ok(())
	}
	let chain = make_chain(&["*"], ctx.ring, &ChainParams::from_config(ctx.cfg))?;
	let send_to = chain[0].address.clone();
	log::trace!(target: "yamn", "Performing a random hop to exit remailer {}.", send_to);
	let packet = packet::encode(plain, &chain, &packet::FinalParams::single())?;
	ctx.pool.write(OUTBOUND, Some(&send_to), packet.as_bytes())?;
	ctx.stats.out_randhop += 1;
	Ok(())
}

/// Build and pool one well-formed dummy: a two-hop message whose final
/// delivery method tells the exit to discard it.
pub fn send_dummy(cfg: &Config, ring: &Pubring, pool: &Pool) -> Result<(), Error> {
	let chain = make_chain(&["*", "*"], ring, &ChainParams::from_config(cfg))?;
	let send_to = chain[0].address.clone();
	let filler: [u8; 64] = random_bytes();
	let packet = packet::encode(&filler, &chain, &packet::FinalParams::dummy())?;
	pool.write(OUTBOUND, Some(&send_to), packet.as_bytes())?;
	Ok(())
}

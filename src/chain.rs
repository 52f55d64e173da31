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

//! Chain construction from the public ring.
//!
//! A chain specification lists hop names in delivery order; `*` asks for a
//! random peer meeting the latency and uptime thresholds. The final hop
//! must be exit capable and no peer appears twice.

use crate::{
	config::Config,
	error::Error,
	keyring::Pubring,
	packet::{Hop, MAX_HOPS},
};
use rand::{rngs::OsRng, seq::SliceRandom};
use std::collections::HashSet;

/// Selection thresholds for `*` hops.
#[derive(Clone, Copy)]
pub struct ChainParams {
	pub min_latency: u32,
	pub max_latency: u32,
	/// Percent.
	pub min_uptime: f32,
}

impl ChainParams {
	pub fn from_config(cfg: &Config) -> Self {
		Self {
			min_latency: cfg.min_latency,
			max_latency: cfg.max_latency,
			min_uptime: cfg.min_uptime,
		}
	}
}

/// Resolve a chain specification to concrete hops. Positions resolve from
/// the exit backwards so random picks cannot steal a peer a later,
/// explicitly named position needs.
pub fn make_chain(names: &[&str], ring: &Pubring, params: &ChainParams) -> Result<Vec<Hop>, Error> {
	if names.is_empty() || names.len() > MAX_HOPS {
		return Err(Error::BadChainLength(names.len()))
	}
	if names.len() > ring.count() {
		return Err(Error::InsufficientPeers { wanted: names.len(), have: ring.count() })
	}
	// Without stats there is nothing to filter on; every known peer is a
	// candidate.
	let (min_latency, max_latency, min_uptime) = if ring.have_stats() {
		(params.min_latency, params.max_latency, params.min_uptime)
	} else {
		(0, u32::MAX, 0.0)
	};

	let mut used: HashSet<String> = HashSet::new();
	let mut hops: Vec<Option<Hop>> = vec![None; names.len()];
	for (position, name) in names.iter().enumerate().rev() {
		let require_exit = position == names.len() - 1;
		let entry = if *name == "*" {
			let mut candidates = ring.candidates(min_latency, max_latency, min_uptime, require_exit);
			candidates.retain(|address| !used.contains(address));
			let address = candidates
				.choose(&mut OsRng)
				.ok_or(Error::InsufficientPeers { wanted: names.len(), have: used.len() })?;
			ring.get(address)?
		} else {
			let entry = ring.get(name)?;
			if require_exit && !entry.is_exit() {
				return Err(Error::Config(format!("{}: Exit hop is not exit capable", name)))
			}
			if used.contains(&entry.address) {
				return Err(Error::Config(format!("{}: Peer appears twice in chain", name)))
			}
			entry
		};
		used.insert(entry.address.clone());
		hops[position] = Some(Hop { address: entry.address.clone(), public_key: entry.public_key });
	}
	Ok(hops.into_iter().map(|hop| hop.expect("Every position was resolved")).collect())
}

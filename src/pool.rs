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

//! Message pool: the on-disk staging area whose random-subset release
//! realises the mixing property.
//!
//! One file per message. The name prefix encodes the role: `m` outbound,
//! `i` inbound for this remailer, `p` partial chunk awaiting assembly.
//! Filenames derive from the payload hash so duplicate writes coalesce.

use crate::{dates::short_date_now, error::Error, packet::crypto::digest256};
use rand::{rngs::OsRng, seq::SliceRandom};
use std::{
	fs,
	io::Write,
	path::{Path, PathBuf},
};

/// Outbound message, final or intermediate.
pub const OUTBOUND: &str = "m";
/// Inbound message destined for this remailer.
pub const INBOUND: &str = "i";
/// Partial message chunk needing assembly.
pub const PARTIAL: &str = "p";

const DATE_HEADER: &str = "Yamn-Pooled-Date: ";
const NEXT_HOP_HEADER: &str = "Yamn-Next-Hop: ";

/// A pool file read back from disk.
pub struct PoolEntry {
	pub filename: String,
	/// Value of the internal date line, `YYYY-MM-DD`.
	pub pooled: String,
	/// Recipient remailer for outbound packets; `None` for local and
	/// plain-mail entries.
	pub next_hop: Option<String>,
	pub payload: Vec<u8>,
}

pub struct Pool {
	dir: PathBuf,
}

impl Pool {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Write a payload under `prefix`. Identical payloads map to the same
	/// filename, silently deduplicating.
	pub fn write(
		&self,
		prefix: &str,
		next_hop: Option<&str>,
		payload: &[u8],
	) -> Result<String, Error> {
		let digest = digest256(&[payload]);
		let filename = format!("{}{}", prefix, hex::encode(&digest[..7]));
		let mut content = Vec::with_capacity(payload.len() + 128);
		content.extend_from_slice(DATE_HEADER.as_bytes());
		content.extend_from_slice(short_date_now().as_bytes());
		content.push(b'\n');
		if let Some(next_hop) = next_hop {
			content.extend_from_slice(NEXT_HOP_HEADER.as_bytes());
			content.extend_from_slice(next_hop.as_bytes());
			content.push(b'\n');
		}
		content.extend_from_slice(payload);
		let mut file = fs::File::create(self.dir.join(&filename))?;
		file.write_all(&content)?;
		file.sync_all()?;
		log::trace!(target: "yamn", "Pooled {}", filename);
		Ok(filename)
	}

	pub fn read(&self, filename: &str) -> Result<PoolEntry, Error> {
		let raw = fs::read(self.dir.join(filename))?;
		let (date_line, rest) = split_line(&raw)
			.ok_or_else(|| Error::Parse(format!("{}: Truncated pool file", filename)))?;
		let pooled = date_line
			.strip_prefix(DATE_HEADER.as_bytes())
			.and_then(|date| std::str::from_utf8(date).ok())
			.ok_or_else(|| Error::Parse(format!("{}: Missing pool date header", filename)))?
			.to_string();
		let (next_hop, payload) = if rest.starts_with(NEXT_HOP_HEADER.as_bytes()) {
			let (hop_line, payload) = split_line(rest)
				.ok_or_else(|| Error::Parse(format!("{}: Truncated pool file", filename)))?;
			let next_hop = std::str::from_utf8(&hop_line[NEXT_HOP_HEADER.len()..])
				.map_err(|_| Error::Parse(format!("{}: Bad next-hop header", filename)))?;
			(Some(next_hop.to_string()), payload)
		} else {
			(None, rest)
		};
		Ok(PoolEntry {
			filename: filename.to_string(),
			pooled,
			next_hop,
			payload: payload.to_vec(),
		})
	}

	pub fn delete(&self, filename: &str) {
		match fs::remove_file(self.dir.join(filename)) {
			Ok(()) => log::trace!(target: "yamn", "Deleted {} from pool", filename),
			Err(e) => log::error!(target: "yamn", "Failed to remove {}: {}", filename, e),
		}
	}

	/// Filenames under `prefix`, in no particular order.
	pub fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
		let mut files = Vec::new();
		for entry in fs::read_dir(&self.dir)? {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue
			}
			if let Ok(name) = entry.file_name().into_string() {
				if name.starts_with(prefix) {
					files.push(name);
				}
			}
		}
		Ok(files)
	}

	pub fn count(&self, prefix: &str) -> usize {
		self.list(prefix).map(|files| files.len()).unwrap_or(0)
	}

	/// The dynamic mix: nothing below `pool_min` entries, otherwise a
	/// uniform random `pool_rate` percent of the outbound pool.
	pub fn select_dynamic(&self, pool_min: usize, pool_rate: usize) -> Result<Vec<String>, Error> {
		let mut files = self.list(OUTBOUND)?;
		let size = files.len();
		if size < pool_min {
			log::trace!(
				target: "yamn",
				"Pool insufficiently populated to trigger sending. Require={}, Got={}",
				pool_min,
				size,
			);
			return Ok(Vec::new())
		}
		let wanted = size * pool_rate / 100;
		let (selected, _) = files.partial_shuffle(&mut OsRng, wanted);
		Ok(selected.to_vec())
	}

	/// Client-mode flush: everything, regardless of pool settings.
	pub fn select_all(&self) -> Result<Vec<String>, Error> {
		self.list(OUTBOUND)
	}
}

fn split_line(raw: &[u8]) -> Option<(&[u8], &[u8])> {
	let newline = raw.iter().position(|b| *b == b'\n')?;
	Some((&raw[..newline], &raw[newline + 1..]))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn new_pool() -> (tempfile::TempDir, Pool) {
		let dir = tempfile::tempdir().unwrap();
		let pool = Pool::new(dir.path());
		(dir, pool)
	}

	#[test]
	fn write_read_round_trip() {
		let (_dir, pool) = new_pool();
		let name = pool.write(OUTBOUND, Some("next@mix.org"), b"payload bytes").unwrap();
		assert!(name.starts_with(OUTBOUND));
		let entry = pool.read(&name).unwrap();
		assert_eq!(entry.next_hop.as_deref(), Some("next@mix.org"));
		assert_eq!(entry.payload, b"payload bytes");
		assert_eq!(entry.pooled.len(), 10);

		let local = pool.write(INBOUND, None, b"local").unwrap();
		let entry = pool.read(&local).unwrap();
		assert_eq!(entry.next_hop, None);
		assert_eq!(entry.payload, b"local");
	}

	#[test]
	fn duplicate_payloads_coalesce() {
		let (_dir, pool) = new_pool();
		let first = pool.write(OUTBOUND, Some("next@mix.org"), b"same payload").unwrap();
		let second = pool.write(OUTBOUND, Some("next@mix.org"), b"same payload").unwrap();
		assert_eq!(first, second);
		assert_eq!(pool.count(OUTBOUND), 1);
	}

	#[test]
	fn below_minimum_releases_nothing() {
		let (_dir, pool) = new_pool();
		for n in 0..10 {
			pool.write(OUTBOUND, None, format!("packet {}", n).as_bytes()).unwrap();
		}
		assert!(pool.select_dynamic(50, 10).unwrap().is_empty());
	}

	#[test]
	fn dynamic_release_selects_rate_share_of_distinct_files() {
		let (_dir, pool) = new_pool();
		for n in 0..200 {
			pool.write(OUTBOUND, None, format!("packet {}", n).as_bytes()).unwrap();
		}
		for _ in 0..20 {
			let selected = pool.select_dynamic(50, 10).unwrap();
			assert_eq!(selected.len(), 20);
			let distinct: HashSet<&String> = selected.iter().collect();
			assert_eq!(distinct.len(), 20);
		}
	}

	#[test]
	fn flush_selects_everything() {
		let (_dir, pool) = new_pool();
		for n in 0..7 {
			pool.write(OUTBOUND, None, format!("packet {}", n).as_bytes()).unwrap();
		}
		pool.write(INBOUND, None, b"not outbound").unwrap();
		assert_eq!(pool.select_all().unwrap().len(), 7);
	}

	#[test]
	fn prefixes_partition_the_listing() {
		let (_dir, pool) = new_pool();
		pool.write(OUTBOUND, None, b"a").unwrap();
		pool.write(INBOUND, None, b"b").unwrap();
		pool.write(PARTIAL, None, b"c").unwrap();
		assert_eq!(pool.count(OUTBOUND), 1);
		assert_eq!(pool.count(INBOUND), 1);
		assert_eq!(pool.count(PARTIAL), 1);
	}
}

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

//! Packet-ID replay log.
//!
//! An in-memory set over an append-mostly file of fixed records. Appends
//! are grouped and synced once per tick rather than per packet; expiry
//! compacts the file.

use crate::{dates::epoch_days_now, error::Error, packet::PACKET_ID_BYTES};
use std::{
	collections::HashMap,
	fs,
	io::Write,
	path::{Path, PathBuf},
};

const RECORD_BYTES: usize = PACKET_ID_BYTES + 2;

pub struct IdLog {
	path: PathBuf,
	expiry_days: u16,
	/// Packet ID to the day it was first seen.
	seen: HashMap<[u8; PACKET_ID_BYTES], u16>,
	file: fs::File,
	pending_sync: bool,
}

impl IdLog {
	/// Open or create the log, loading every stored record. A trailing
	/// partial record from an interrupted append is ignored.
	pub fn open(path: impl Into<PathBuf>, expiry_days: u16) -> Result<Self, Error> {
		let path = path.into();
		let mut seen = HashMap::new();
		match fs::read(&path) {
			Ok(raw) =>
				for record in raw.chunks_exact(RECORD_BYTES) {
					let mut id = [0u8; PACKET_ID_BYTES];
					id.copy_from_slice(&record[..PACKET_ID_BYTES]);
					let days =
						u16::from_le_bytes([record[PACKET_ID_BYTES], record[PACKET_ID_BYTES + 1]]);
					seen.insert(id, days);
				},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
			Err(e) => return Err(e.into()),
		}
		let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
		Ok(Self { path, expiry_days, seen, file, pending_sync: false })
	}

	pub fn len(&self) -> usize {
		self.seen.len()
	}

	pub fn is_empty(&self) -> bool {
		self.seen.is_empty()
	}

	/// Insert `id` and return true when it was absent. False means the
	/// caller is looking at a replay and must drop the packet.
	pub fn unique(&mut self, id: &[u8; PACKET_ID_BYTES]) -> Result<bool, Error> {
		if self.seen.contains_key(id) {
			return Ok(false)
		}
		let days = epoch_days_now();
		let mut record = [0u8; RECORD_BYTES];
		record[..PACKET_ID_BYTES].copy_from_slice(id);
		record[PACKET_ID_BYTES..].copy_from_slice(&days.to_le_bytes());
		self.file.write_all(&record)?;
		self.pending_sync = true;
		self.seen.insert(*id, days);
		Ok(true)
	}

	/// Flush grouped appends to disk. Called once per tick, before any of
	/// the packets recorded since the last sync leave the node.
	pub fn sync(&mut self) -> Result<(), Error> {
		if self.pending_sync {
			self.file.sync_data()?;
			self.pending_sync = false;
		}
		Ok(())
	}

	/// Drop entries older than the configured expiry and compact the file.
	/// Returns (remaining, deleted).
	pub fn expire(&mut self) -> Result<(usize, usize), Error> {
		let now = epoch_days_now() as i64;
		let expiry = self.expiry_days as i64;
		let before = self.seen.len();
		self.seen.retain(|_, days| now - *days as i64 <= expiry);
		let deleted = before - self.seen.len();

		let mut content = Vec::with_capacity(self.seen.len() * RECORD_BYTES);
		for (id, days) in &self.seen {
			content.extend_from_slice(id);
			content.extend_from_slice(&days.to_le_bytes());
		}
		let tmp = self.path.with_extension("tmp");
		fs::write(&tmp, content)?;
		fs::rename(&tmp, &self.path)?;
		self.file = fs::OpenOptions::new().append(true).open(&self.path)?;
		self.pending_sync = false;
		Ok((self.seen.len(), deleted))
	}
}

/// The log never holds secret material, but the path is operator data.
impl std::fmt::Debug for IdLog {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "IdLog({}, {} entries)", Path::new(&self.path).display(), self.seen.len())
	}
}

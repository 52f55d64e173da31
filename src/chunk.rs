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

//! Multi-chunk message reassembly.
//!
//! Exit messages larger than one body arrive as numbered chunks, each
//! pooled under the `p` prefix. A record per message ID tracks which slots
//! are filled; once every slot is, the payloads concatenate into a single
//! outbound pool file.

use crate::{
	dates::epoch_days_now,
	error::Error,
	packet::MESSAGE_ID_BYTES,
	pool::{Pool, OUTBOUND, PARTIAL},
};
use std::{collections::HashMap, fs, path::PathBuf};

struct ChunkRecord {
	/// Day of the most recent slot update; drives expiry.
	updated: u16,
	slots: Vec<String>,
}

pub struct ChunkDb {
	path: PathBuf,
	expiry_days: u16,
	records: HashMap<[u8; MESSAGE_ID_BYTES], ChunkRecord>,
}

/// True when every chunk slot holds a filename.
pub fn is_populated(slots: &[String]) -> bool {
	slots.iter().all(|slot| !slot.is_empty())
}

impl ChunkDb {
	/// Open or create the chunk database. Malformed lines are logged and
	/// skipped.
	pub fn open(path: impl Into<PathBuf>, expiry_days: u16) -> Result<Self, Error> {
		let path = path.into();
		let mut records = HashMap::new();
		match fs::read_to_string(&path) {
			Ok(text) =>
				for line in text.lines() {
					match parse_record(line) {
						Some((id, record)) => {
							records.insert(id, record);
						},
						None => log::warn!(target: "yamn", "Skipping corrupt chunk record"),
					}
				},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
			Err(e) => return Err(e.into()),
		}
		Ok(Self { path, expiry_days, records })
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// The slot vector for a message, created with `num_chunks` empty
	/// slots on first access.
	pub fn get(
		&mut self,
		message_id: &[u8; MESSAGE_ID_BYTES],
		num_chunks: usize,
	) -> Result<Vec<String>, Error> {
		if let Some(record) = self.records.get(message_id) {
			return Ok(record.slots.clone())
		}
		let record = ChunkRecord { updated: epoch_days_now(), slots: vec![String::new(); num_chunks] };
		let slots = record.slots.clone();
		self.records.insert(*message_id, record);
		self.save()?;
		Ok(slots)
	}

	/// Overwrite the slot vector for a message.
	pub fn insert(
		&mut self,
		message_id: &[u8; MESSAGE_ID_BYTES],
		slots: Vec<String>,
	) -> Result<(), Error> {
		self.records.insert(*message_id, ChunkRecord { updated: epoch_days_now(), slots });
		self.save()
	}

	/// Concatenate the payloads of every slot file into a new outbound
	/// pool file. Fails unless every slot is filled.
	pub fn assemble(&self, pool: &Pool, slots: &[String]) -> Result<String, Error> {
		if !is_populated(slots) {
			return Err(Error::Parse("Assembly attempted with unfilled chunk slots".into()))
		}
		let mut assembled = Vec::new();
		for slot in slots {
			assembled.extend_from_slice(&pool.read(slot)?.payload);
		}
		pool.write(OUTBOUND, None, &assembled)
	}

	/// Remove a record and the chunk files it references.
	pub fn delete(&mut self, pool: &Pool, message_id: &[u8; MESSAGE_ID_BYTES]) -> Result<(), Error> {
		if let Some(record) = self.records.remove(message_id) {
			for slot in record.slots.iter().filter(|slot| !slot.is_empty()) {
				pool.delete(slot);
			}
		}
		self.save()
	}

	/// Drop records whose last update is beyond the expiry window.
	/// Returns (retained, expired).
	pub fn expire(&mut self) -> Result<(usize, usize), Error> {
		let now = epoch_days_now() as i64;
		let expiry = self.expiry_days as i64;
		let before = self.records.len();
		self.records.retain(|_, record| now - record.updated as i64 <= expiry);
		let expired = before - self.records.len();
		if expired > 0 {
			self.save()?;
		}
		Ok((self.records.len(), expired))
	}

	/// Delete pooled chunk files no live record references. Returns
	/// (retained, deleted).
	pub fn housekeep(&self, pool: &Pool) -> Result<(usize, usize), Error> {
		let referenced: std::collections::HashSet<&String> =
			self.records.values().flat_map(|record| record.slots.iter()).collect();
		let mut retained = 0;
		let mut deleted = 0;
		for file in pool.list(PARTIAL)? {
			if referenced.contains(&file) {
				retained += 1;
			} else {
				pool.delete(&file);
				deleted += 1;
			}
		}
		Ok((retained, deleted))
	}

	fn save(&self) -> Result<(), Error> {
		let mut text = String::new();
		for (id, record) in &self.records {
			text.push_str(&format!(
				"{} {} {}\n",
				hex::encode(id),
				record.updated,
				record.slots.join(","),
			));
		}
		let tmp = self.path.with_extension("tmp");
		fs::write(&tmp, text)?;
		fs::rename(&tmp, &self.path)?;
		Ok(())
	}
}

fn parse_record(line: &str) -> Option<([u8; MESSAGE_ID_BYTES], ChunkRecord)> {
	let mut fields = line.splitn(3, ' ');
	let id = hex::decode(fields.next()?).ok()?;
	let id = <[u8; MESSAGE_ID_BYTES]>::try_from(id).ok()?;
	let updated: u16 = fields.next()?.parse().ok()?;
	let slots: Vec<String> = fields.next()?.split(',').map(str::to_string).collect();
	Some((id, ChunkRecord { updated, slots }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packet::crypto::random_bytes;

	fn setup() -> (tempfile::TempDir, Pool, ChunkDb) {
		let dir = tempfile::tempdir().unwrap();
		let pool = Pool::new(dir.path());
		let db = ChunkDb::open(dir.path().join("chunkdb"), 60).unwrap();
		(dir, pool, db)
	}

	#[test]
	fn out_of_order_assembly() {
		let (_dir, pool, mut db) = setup();
		let message_id = random_bytes();
		for (chunk, payload) in [(2usize, "middle "), (3, "end"), (1, "start ")] {
			let filename = pool.write(PARTIAL, None, payload.as_bytes()).unwrap();
			let mut slots = db.get(&message_id, 3).unwrap();
			assert!(slots[chunk - 1].is_empty());
			slots[chunk - 1] = filename;
			if is_populated(&slots) {
				let out = db.assemble(&pool, &slots).unwrap();
				let entry = pool.read(&out).unwrap();
				assert_eq!(entry.payload, b"start middle end");
				db.delete(&pool, &message_id).unwrap();
			} else {
				db.insert(&message_id, slots).unwrap();
			}
		}
		assert!(db.is_empty());
		// The referenced chunk files went with the record.
		assert_eq!(pool.count(PARTIAL), 0);
	}

	#[test]
	fn assembly_needs_every_slot() {
		let (_dir, pool, db) = setup();
		let slots = vec!["pabc".to_string(), String::new()];
		assert!(db.assemble(&pool, &slots).is_err());
	}

	#[test]
	fn expiry_and_housekeeping() {
		let (_dir, pool, mut db) = setup();
		let stale = random_bytes();
		let fresh = random_bytes();
		let stale_file = pool.write(PARTIAL, None, b"stale chunk").unwrap();
		db.insert(&stale, vec![stale_file.clone(), String::new()]).unwrap();
		db.insert(&fresh, vec![String::new(), String::new()]).unwrap();
		db.records.get_mut(&stale).unwrap().updated = epoch_days_now() - 100;

		let (retained, expired) = db.expire().unwrap();
		assert_eq!((retained, expired), (1, 1));

		// The stale record's file is now unreferenced.
		let (kept, deleted) = db.housekeep(&pool).unwrap();
		assert_eq!((kept, deleted), (0, 1));
		assert_eq!(pool.count(PARTIAL), 0);
	}

	#[test]
	fn survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chunkdb");
		let message_id = random_bytes();
		{
			let mut db = ChunkDb::open(&path, 60).unwrap();
			db.insert(&message_id, vec!["pfile".into(), String::new()]).unwrap();
		}
		let mut db = ChunkDb::open(&path, 60).unwrap();
		let slots = db.get(&message_id, 2).unwrap();
		assert_eq!(slots, vec!["pfile".to_string(), String::new()]);
	}
}

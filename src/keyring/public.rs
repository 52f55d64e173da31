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

//! Public keyring: peer mix keys from `pubring.mix` and reliability
//! figures from `mlist2.txt`.

use crate::{
	dates::{today, SHORT_DATE},
	error::Error,
	packet::crypto::key_id,
	KeyId,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::{collections::HashMap, fs, path::PathBuf, time::SystemTime};

const BEGIN_KEY: &str = "-----Begin Mix Key-----";
const END_KEY: &str = "-----End Mix Key-----";
const GENERATED_FORMAT: &str = "%a %d %b %Y %H:%M:%S GMT";

/// One peer remailer from the public ring.
#[derive(Clone, Debug)]
pub struct Entry {
	pub name: String,
	pub address: String,
	pub key_id: KeyId,
	pub version: String,
	pub caps: String,
	pub public_key: [u8; 32],
	pub from: NaiveDate,
	pub until: NaiveDate,
	/// Latency in minutes, from the stats file.
	pub latent: u32,
	/// Uptime in tenths of a percent, from the stats file.
	pub uptime: u32,
}

impl Entry {
	/// Middle-only nodes advertise `M` in their capability string.
	pub fn is_exit(&self) -> bool {
		!self.caps.contains('M')
	}

	/// The single-line form used in key files and remailer-conf replies.
	pub fn header_line(&self) -> String {
		format!(
			"{} {} {} {} {} {} {}",
			self.name,
			self.address,
			hex::encode(self.key_id),
			self.version,
			self.caps,
			self.from.format(SHORT_DATE),
			self.until.format(SHORT_DATE),
		)
	}
}

/// Parser phases for `pubring.mix` records. Any rejection resets to
/// `AwaitHeader`.
enum KeyPhase {
	AwaitHeader,
	AwaitBegin,
	AwaitKeyId,
	AwaitKey,
	AwaitEnd,
}

/// Parser phases for `mlist2.txt`.
enum StatPhase {
	AwaitGenerated,
	AwaitDashes,
	InStats,
	Done,
}

pub struct Pubring {
	pubring_file: PathBuf,
	stats_file: PathBuf,
	/// Consider expired keys (for stats consumers such as Echolot).
	use_expired: bool,
	/// Keyed by address.
	entries: HashMap<String, Entry>,
	/// Short name to address.
	xref: HashMap<String, String>,
	have_stats: bool,
	keys_imported: Option<SystemTime>,
	stats_imported: Option<SystemTime>,
	stats_generated: Option<DateTime<Utc>>,
}

impl Pubring {
	pub fn new(pubring_file: impl Into<PathBuf>, stats_file: impl Into<PathBuf>) -> Self {
		Self {
			pubring_file: pubring_file.into(),
			stats_file: stats_file.into(),
			use_expired: false,
			entries: HashMap::new(),
			xref: HashMap::new(),
			have_stats: false,
			keys_imported: None,
			stats_imported: None,
			stats_generated: None,
		}
	}

	pub fn use_expired(&mut self) {
		self.use_expired = true;
	}

	/// Number of known public keys.
	pub fn count(&self) -> usize {
		self.entries.len()
	}

	pub fn have_stats(&self) -> bool {
		self.have_stats
	}

	/// True if the imported stats were generated more than `hours` ago.
	pub fn stats_stale(&self, hours: i64) -> bool {
		match self.stats_generated {
			Some(generated) if self.have_stats =>
				Utc::now().signed_duration_since(generated).num_hours() > hours,
			_ => false,
		}
	}

	/// True if the pubring file changed since the last import.
	pub fn key_refresh(&self) -> bool {
		match (modified(&self.pubring_file), self.keys_imported) {
			(Some(modified), Some(imported)) => modified > imported,
			(Some(_), None) => true,
			(None, _) => false,
		}
	}

	/// True if the stats file changed since the last import.
	pub fn stat_refresh(&self) -> bool {
		match (modified(&self.stats_file), self.stats_imported) {
			(Some(modified), Some(imported)) => modified > imported,
			(Some(_), None) => true,
			(None, _) => false,
		}
	}

	/// Look up a remailer by address or by short name.
	pub fn get(&self, reference: &str) -> Result<&Entry, Error> {
		let address = if reference.contains('@') {
			reference
		} else {
			self.xref.get(reference).map(String::as_str).unwrap_or(reference)
		};
		self.entries
			.get(address)
			.ok_or_else(|| Error::Parse(format!("{}: Not found in public keyring", reference)))
	}

	/// Addresses matching the chain-building criteria. Uptime is in
	/// percent, stored figures in tenths.
	pub fn candidates(
		&self,
		min_latency: u32,
		max_latency: u32,
		min_uptime: f32,
		require_exit: bool,
	) -> Vec<String> {
		self.entries
			.values()
			.filter(|entry| !(require_exit && !entry.is_exit()))
			.filter(|entry| entry.latent >= min_latency && entry.latent <= max_latency)
			.filter(|entry| entry.uptime >= (min_uptime * 10.0) as u32)
			.map(|entry| entry.address.clone())
			.collect()
	}

	/// One header line per known key, for remailer-conf replies.
	pub fn key_list(&self) -> Vec<String> {
		self.entries.values().map(Entry::header_line).collect()
	}

	fn put(&mut self, entry: Entry) {
		self.xref.insert(entry.name.clone(), entry.address.clone());
		self.entries.insert(entry.address.clone(), entry);
	}

	/// Import `pubring.mix`, replacing the current entries. Malformed
	/// records are logged and skipped, never aborting the whole import.
	pub fn import_pubring(&mut self) -> Result<(), Error> {
		let text = fs::read_to_string(&self.pubring_file)?;
		let now = today();
		let mut fresh = Pubring::new(&self.pubring_file, &self.stats_file);
		let mut phase = KeyPhase::AwaitHeader;
		let mut pending: Option<Entry> = None;

		for line in text.lines() {
			match phase {
				KeyPhase::AwaitHeader => {
					let elements: Vec<&str> = line.split(' ').collect();
					// Seven fields mark a remailer header line.
					if elements.len() != 7 {
						continue
					}
					let from = match NaiveDate::parse_from_str(elements[5], SHORT_DATE) {
						Ok(date) => date,
						Err(_) => {
							log::warn!(target: "yamn", "Malformed valid-from date");
							continue
						},
					};
					if now < from {
						log::warn!(target: "yamn", "{}: Key not yet valid", elements[0]);
						continue
					}
					let until = match NaiveDate::parse_from_str(elements[6], SHORT_DATE) {
						Ok(date) => date,
						Err(_) => {
							log::warn!(target: "yamn", "Malformed valid-until date");
							continue
						},
					};
					if !self.use_expired && now > until {
						log::warn!(
							target: "yamn",
							"Key expired: Name={}, Key={}, Date={}",
							elements[0],
							elements[2],
							elements[6],
						);
						continue
					}
					let key_id = match decode_key_id(elements[2]) {
						Some(id) => id,
						None => {
							log::warn!(target: "yamn", "Keyid in header is not a hex key ID");
							continue
						},
					};
					pending = Some(Entry {
						name: elements[0].into(),
						address: elements[1].into(),
						key_id,
						version: elements[3].into(),
						caps: elements[4].into(),
						public_key: [0u8; 32],
						from,
						until,
						latent: 0,
						uptime: 0,
					});
					phase = KeyPhase::AwaitBegin;
				},
				KeyPhase::AwaitBegin =>
					if line == BEGIN_KEY {
						phase = KeyPhase::AwaitKeyId;
					},
				KeyPhase::AwaitKeyId => match decode_key_id(line) {
					Some(embedded)
						if Some(embedded) == pending.as_ref().map(|entry| entry.key_id) =>
						phase = KeyPhase::AwaitKey,
					Some(_) => {
						log::warn!(target: "yamn", "Keyid in header differs from keyid in pubkey");
						phase = KeyPhase::AwaitHeader;
					},
					None => {
						log::warn!(target: "yamn", "Keyid in pubkey is not hex");
						phase = KeyPhase::AwaitHeader;
					},
				},
				KeyPhase::AwaitKey => {
					let entry = pending.as_mut().expect("Key phase always follows a header");
					match hex::decode(line).ok().and_then(|raw| <[u8; 32]>::try_from(raw).ok()) {
						Some(public_key) if key_id(&public_key) == entry.key_id => {
							entry.public_key = public_key;
							phase = KeyPhase::AwaitEnd;
						},
						Some(_) => {
							log::warn!(
								target: "yamn",
								"{}: Keyid is not the hash of the public key",
								entry.name,
							);
							phase = KeyPhase::AwaitHeader;
						},
						None => {
							log::warn!(target: "yamn", "Unable to decode public key");
							phase = KeyPhase::AwaitHeader;
						},
					}
				},
				KeyPhase::AwaitEnd =>
					if line == END_KEY {
						fresh.put(pending.take().expect("End phase always follows a key"));
						phase = KeyPhase::AwaitHeader;
					},
			}
		}

		// Swap in the freshly built maps.
		self.entries = fresh.entries;
		self.xref = fresh.xref;
		self.have_stats = false;
		self.keys_imported = modified(&self.pubring_file);
		Ok(())
	}

	/// Import an `mlist2.txt` style stats file, attaching latency and
	/// uptime figures to known entries. Unknown names are skipped.
	pub fn import_stats(&mut self) -> Result<(), Error> {
		let text = fs::read_to_string(&self.stats_file)?;
		let mut phase = StatPhase::AwaitGenerated;
		let mut generated = None;

		for line in text.lines() {
			match phase {
				StatPhase::AwaitGenerated =>
					if let Some(rest) = line.strip_prefix("Generated: ") {
						let parsed = NaiveDateTime::parse_from_str(rest, GENERATED_FORMAT)
							.map_err(|e| {
								Error::Parse(format!("Failed to parse Generated date: {}", e))
							})?;
						generated = Some(parsed.and_utc());
						phase = StatPhase::AwaitDashes;
					},
				StatPhase::AwaitDashes =>
					if line.starts_with("----------") {
						phase = StatPhase::InStats;
					},
				StatPhase::InStats => {
					// Splitting at the % sign keeps trailing options from
					// changing the field count.
					let fields: Vec<&str> =
						line.split('%').next().unwrap_or("").split_whitespace().collect();
					if fields.is_empty() {
						phase = StatPhase::Done;
						continue
					}
					if fields.len() != 5 {
						log::warn!(
							target: "yamn",
							"Invalid stats line. Expected 5 elements, got {}",
							fields.len(),
						);
						continue
					}
					let name = fields[0];
					let address = match self.xref.get(name) {
						Some(address) => address.clone(),
						None => {
							log::warn!(target: "yamn", "{}: Stats for unknown remailer", name);
							continue
						},
					};
					let latent = match parse_latency(fields[2]) {
						Some(minutes) => minutes,
						None => {
							log::warn!(target: "yamn", "{}: Invalid latency", name);
							continue
						},
					};
					let uptime = match fields[4].parse::<f32>() {
						Ok(percent) if (0.0..=100.0).contains(&percent) =>
							(percent * 10.0) as u32,
						_ => {
							log::warn!(target: "yamn", "{}: Uptime out of range", name);
							continue
						},
					};
					if let Some(entry) = self.entries.get_mut(&address) {
						entry.latent = latent;
						entry.uptime = uptime;
					}
				},
				StatPhase::Done => break,
			}
		}

		if !matches!(phase, StatPhase::Done) {
			return Err(Error::Parse(format!(
				"Unexpected EOF reading {}",
				self.stats_file.display()
			)))
		}
		self.stats_generated = generated;
		self.stats_imported = modified(&self.stats_file);
		self.have_stats = true;
		Ok(())
	}
}

fn modified(path: &PathBuf) -> Option<SystemTime> {
	fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn decode_key_id(line: &str) -> Option<KeyId> {
	hex::decode(line).ok().and_then(|raw| KeyId::try_from(raw).ok())
}

/// Latency is `H:MM` with hours 0 to 99 and minutes 0 to 59; the hours
/// part may be empty.
fn parse_latency(field: &str) -> Option<u32> {
	let (hours, minutes) = field.split_once(':')?;
	let hours: u32 = if hours.is_empty() { 0 } else { hours.parse().ok()? };
	let minutes: u32 = minutes.parse().ok()?;
	if hours > 99 || minutes > 59 {
		return None
	}
	Some(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packet::crypto::gen_keypair;
	use std::io::Write;

	fn write_ring(entries: &[(&str, &str, [u8; 32], &str, &str, &str)]) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		for (name, address, public, caps, from, until) in entries {
			let id = hex::encode(key_id(public));
			writeln!(file, "{} {} {} 0.2.0 {} {} {}", name, address, id, caps, from, until)
				.unwrap();
			writeln!(file, "{}", BEGIN_KEY).unwrap();
			writeln!(file, "{}", id).unwrap();
			writeln!(file, "{}", hex::encode(public)).unwrap();
			writeln!(file, "{}", END_KEY).unwrap();
		}
		file
	}

	fn public() -> [u8; 32] {
		gen_keypair().1.to_bytes()
	}

	#[test]
	fn imports_and_indexes_by_name_and_address() {
		let ring = write_ring(&[
			("alpha", "alpha@mix.org", public(), "E", "2020-01-01", "2999-01-01"),
			("beta", "beta@mix.org", public(), "M", "2020-01-01", "2999-01-01"),
		]);
		let mut pubring = Pubring::new(ring.path(), "/nonexistent");
		pubring.import_pubring().unwrap();
		assert_eq!(pubring.count(), 2);
		assert_eq!(pubring.get("alpha").unwrap().address, "alpha@mix.org");
		assert_eq!(pubring.get("beta@mix.org").unwrap().name, "beta");
		assert!(pubring.get("gamma").is_err());
	}

	#[test]
	fn expired_keys_are_excluded_unless_requested() {
		let ring = write_ring(&[
			("old", "old@mix.org", public(), "E", "2019-01-01", "2019-12-31"),
			("new", "new@mix.org", public(), "E", "2020-01-01", "2999-01-01"),
		]);
		let mut pubring = Pubring::new(ring.path(), "/nonexistent");
		pubring.import_pubring().unwrap();
		assert_eq!(pubring.count(), 1);

		let mut with_expired = Pubring::new(ring.path(), "/nonexistent");
		with_expired.use_expired();
		with_expired.import_pubring().unwrap();
		assert_eq!(with_expired.count(), 2);
	}

	#[test]
	fn corrupt_record_recovers_at_next_header() {
		let good = public();
		let mut file = tempfile::NamedTempFile::new().unwrap();
		// A record whose embedded keyid contradicts its header.
		writeln!(
			file,
			"bad bad@mix.org {} 0.2.0 E 2020-01-01 2999-01-01",
			hex::encode(key_id(&public()))
		)
		.unwrap();
		writeln!(file, "{}", BEGIN_KEY).unwrap();
		writeln!(file, "{}", hex::encode([0u8; 16])).unwrap();
		writeln!(file, "{}", hex::encode([0u8; 32])).unwrap();
		writeln!(file, "{}", END_KEY).unwrap();
		writeln!(file, "good good@mix.org {} 0.2.0 E 2020-01-01 2999-01-01", hex::encode(key_id(&good)))
			.unwrap();
		writeln!(file, "{}", BEGIN_KEY).unwrap();
		writeln!(file, "{}", hex::encode(key_id(&good))).unwrap();
		writeln!(file, "{}", hex::encode(good)).unwrap();
		writeln!(file, "{}", END_KEY).unwrap();

		let mut pubring = Pubring::new(file.path(), "/nonexistent");
		pubring.import_pubring().unwrap();
		assert_eq!(pubring.count(), 1);
		assert!(pubring.get("good").is_ok());
	}

	#[test]
	fn stats_attach_latency_and_uptime() {
		let ring = write_ring(&[
			("alpha", "alpha@mix.org", public(), "E", "2020-01-01", "2999-01-01"),
			("beta", "beta@mix.org", public(), "M", "2020-01-01", "2999-01-01"),
		]);
		let mut stats = tempfile::NamedTempFile::new().unwrap();
		writeln!(stats, "Generated: Tue 07 Oct 2014 10:50:01 GMT").unwrap();
		writeln!(stats, "----------------------------------------").unwrap();
		writeln!(stats, "alpha alpha 1:30 ++++++++++++ 100.00%").unwrap();
		writeln!(stats, "beta beta :45 ++++++++++++  99.90%").unwrap();
		writeln!(stats, "ghost ghost 0:10 ++++++++++++  50.00%").unwrap();
		writeln!(stats).unwrap();

		let mut pubring = Pubring::new(ring.path(), stats.path());
		pubring.import_pubring().unwrap();
		pubring.import_stats().unwrap();
		assert!(pubring.have_stats());
		assert!(pubring.stats_stale(24));
		assert_eq!(pubring.get("alpha").unwrap().latent, 90);
		assert_eq!(pubring.get("alpha").unwrap().uptime, 1000);
		assert_eq!(pubring.get("beta").unwrap().latent, 45);

		// Exit-only selection drops the middle node.
		let exits = pubring.candidates(0, 120, 98.0, true);
		assert_eq!(exits, vec!["alpha@mix.org".to_string()]);
		let all = pubring.candidates(0, 120, 98.0, false);
		assert_eq!(all.len(), 2);
	}

	#[test]
	fn latency_parsing_bounds() {
		assert_eq!(parse_latency("1:30"), Some(90));
		assert_eq!(parse_latency(":45"), Some(45));
		assert_eq!(parse_latency("0:60"), None);
		assert_eq!(parse_latency("100:00"), None);
		assert_eq!(parse_latency("90"), None);
	}
}

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

//! Secret keyring: the local mix keypairs, their lifecycle and the
//! advertised public key file.

use crate::{
	config::Config,
	dates::{today, SHORT_DATE},
	error::Error,
	packet::{crypto, SecretLookup},
	KeyId, VERSION,
};
use chrono::{Days, NaiveDate};
use std::{collections::HashMap, fs, path::PathBuf};
use x25519_dalek::{PublicKey, StaticSecret};

const BEGIN_SECRET: &str = "-----Begin Mix Secret Key-----";
const END_SECRET: &str = "-----End Mix Secret Key-----";
const BEGIN_KEY: &str = "-----Begin Mix Key-----";
const END_KEY: &str = "-----End Mix Key-----";

/// A clock earlier than this means the host is misconfigured; generating
/// and advertising keys would poison the ring.
fn clock_sanity() -> NaiveDate {
	NaiveDate::from_ymd_opt(2021, 1, 1).expect("The sanity epoch is a valid date")
}

struct SecretEntry {
	/// Boxed to avoid leaving copies of the secret key around in memory
	/// when entries move.
	secret: Box<StaticSecret>,
	created: NaiveDate,
	expires: NaiveDate,
}

/// Outcome of a [`Secring::purge`] pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeCounts {
	pub active: usize,
	pub expiring: usize,
	pub expired: usize,
	pub purged: usize,
}

pub struct Secring {
	secring_file: PathBuf,
	pubkey_file: PathBuf,
	name: String,
	address: String,
	exit: bool,
	key_life_days: u16,
	key_grace_days: u16,
	keys: HashMap<KeyId, SecretEntry>,
	advertised: Option<KeyId>,
}

impl Secring {
	pub fn new(cfg: &Config) -> Self {
		Self {
			secring_file: cfg.files.secring.clone(),
			pubkey_file: cfg.files.pubkey.clone(),
			name: cfg.name.clone(),
			address: cfg.address.clone(),
			exit: cfg.is_exit,
			key_life_days: cfg.key_life_days,
			key_grace_days: cfg.key_grace_days,
			keys: HashMap::new(),
			advertised: None,
		}
	}

	pub fn count(&self) -> usize {
		self.keys.len()
	}

	pub fn advertised(&self) -> Option<KeyId> {
		self.advertised
	}

	/// The public half of a held key.
	pub fn public(&self, key_id: &KeyId) -> Option<[u8; 32]> {
		self.keys.get(key_id).map(|entry| PublicKey::from(&*entry.secret).to_bytes())
	}

	/// Load the secring file. A missing file is an empty ring; an
	/// unreadable or unparsable one is fatal to startup.
	pub fn import_secring(&mut self) -> Result<usize, Error> {
		let text = match fs::read_to_string(&self.secring_file) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(Error::Config(format!("Unreadable secring: {}", e))),
		};
		let mut lines = text.lines();
		while let Some(line) = lines.next() {
			if line != BEGIN_SECRET {
				continue
			}
			let record: Vec<&str> = lines.by_ref().take_while(|line| *line != END_SECRET).collect();
			match parse_secret_record(&record) {
				Ok((key_id, entry)) => {
					self.keys.insert(key_id, entry);
				},
				Err(e) => {
					return Err(Error::Config(format!("Corrupt secring record: {}", e)))
				},
			}
		}
		self.select_advertised();
		Ok(self.keys.len())
	}

	/// Generate a keypair, insert it, persist the ring and advertise the
	/// new public key.
	pub fn generate(&mut self) -> Result<KeyId, Error> {
		if today() < clock_sanity() {
			return Err(Error::Config("System clock looks wrong; refusing to generate".into()))
		}
		let (secret, public) = crypto::gen_keypair();
		let key_id = crypto::key_id(public.as_bytes());
		let created = today();
		let expires = created
			.checked_add_days(Days::new(self.key_life_days as u64))
			.expect("Key lifetime stays within the calendar");
		self.keys.insert(key_id, SecretEntry { secret: Box::new(secret), created, expires });
		self.advertised = Some(key_id);
		self.save_secring()?;
		self.write_public_key()?;
		Ok(key_id)
	}

	/// Classify every key by age, drop the ones past retention and rewrite
	/// the ring file. The newest active key becomes the advertised one.
	pub fn purge(&mut self) -> Result<PurgeCounts, Error> {
		let now = today();
		let grace = Days::new(self.key_grace_days as u64);
		let mut counts = PurgeCounts::default();
		self.keys.retain(|_, entry| {
			let expiring_from =
				entry.expires.checked_sub_days(grace).unwrap_or(entry.expires);
			let purged_from = entry.expires.checked_add_days(grace).expect("In-range date");
			if now < expiring_from {
				counts.active += 1;
			} else if now < entry.expires {
				counts.expiring += 1;
			} else if now < purged_from {
				counts.expired += 1;
			} else {
				counts.purged += 1;
				return false
			}
			true
		});
		self.select_advertised();
		self.save_secring()?;
		Ok(counts)
	}

	/// Write the advertised public key to the pubkey file via a temporary
	/// file and rename.
	pub fn write_public_key(&self) -> Result<(), Error> {
		let key_id = self
			.advertised
			.ok_or_else(|| Error::Config("No advertised key to publish".into()))?;
		let entry = self.keys.get(&key_id).expect("Advertised key is always present");
		let public = PublicKey::from(&*entry.secret);
		let caps = if self.exit { "E" } else { "M" };
		let mut text = String::new();
		text.push_str(&format!(
			"{} {} {} {} {} {} {}\n",
			self.name,
			self.address,
			hex::encode(key_id),
			VERSION,
			caps,
			entry.created.format(SHORT_DATE),
			entry.expires.format(SHORT_DATE),
		));
		text.push_str(&format!("{}\n{}\n{}\n{}\n", BEGIN_KEY, hex::encode(key_id), hex::encode(public.as_bytes()), END_KEY));
		let tmp = self.pubkey_file.with_extension("tmp");
		fs::write(&tmp, text)?;
		fs::rename(&tmp, &self.pubkey_file)?;
		log::info!(target: "yamn", "Advertising keyid: {}", hex::encode(key_id));
		Ok(())
	}

	/// The newest active key is advertised; a ring of only aging keys
	/// advertises nothing and the caller should generate.
	fn select_advertised(&mut self) {
		let now = today();
		let grace = Days::new(self.key_grace_days as u64);
		self.advertised = self
			.keys
			.iter()
			.filter(|(_, entry)| {
				now < entry.expires.checked_sub_days(grace).unwrap_or(entry.expires)
			})
			.max_by_key(|(_, entry)| entry.created)
			.map(|(key_id, _)| *key_id);
	}

	fn save_secring(&self) -> Result<(), Error> {
		let mut records: Vec<(&KeyId, &SecretEntry)> = self.keys.iter().collect();
		records.sort_by_key(|(_, entry)| entry.created);
		let mut text = String::new();
		for (key_id, entry) in records {
			text.push_str(BEGIN_SECRET);
			text.push('\n');
			text.push_str(&format!("Created: {}\n", entry.created.format(SHORT_DATE)));
			text.push_str(&format!("Expires: {}\n", entry.expires.format(SHORT_DATE)));
			text.push_str(&hex::encode(key_id));
			text.push('\n');
			text.push_str(&hex::encode(entry.secret.to_bytes()));
			text.push('\n');
			text.push_str(END_SECRET);
			text.push('\n');
		}
		let tmp = self.secring_file.with_extension("tmp");
		fs::write(&tmp, text)?;
		fs::rename(&tmp, &self.secring_file)?;
		Ok(())
	}
}

impl SecretLookup for Secring {
	fn secret(&self, key_id: &KeyId) -> Option<StaticSecret> {
		self.keys.get(key_id).map(|entry| (*entry.secret).clone())
	}
}

fn parse_secret_record(record: &[&str]) -> Result<(KeyId, SecretEntry), String> {
	if record.len() != 4 {
		return Err(format!("Expected 4 lines, got {}", record.len()))
	}
	let created = record[0]
		.strip_prefix("Created: ")
		.and_then(|date| NaiveDate::parse_from_str(date, SHORT_DATE).ok())
		.ok_or("Malformed Created date")?;
	let expires = record[1]
		.strip_prefix("Expires: ")
		.and_then(|date| NaiveDate::parse_from_str(date, SHORT_DATE).ok())
		.ok_or("Malformed Expires date")?;
	let key_id: KeyId = hex::decode(record[2])
		.ok()
		.and_then(|raw| KeyId::try_from(raw).ok())
		.ok_or("Malformed key ID")?;
	let raw: [u8; 32] = hex::decode(record[3])
		.ok()
		.and_then(|raw| <[u8; 32]>::try_from(raw).ok())
		.ok_or("Malformed secret key")?;
	let secret = StaticSecret::from(raw);
	let public = PublicKey::from(&secret);
	if crypto::key_id(public.as_bytes()) != key_id {
		return Err("Key ID is not the hash of the public key".into())
	}
	Ok((key_id, SecretEntry { secret: Box::new(secret), created, expires }))
}

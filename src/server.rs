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

//! The supervisory loop.
//!
//! One tick every `loop_seconds`: drain the inbound pool, drain the mail
//! source, then run whichever of the midnight, daily and hourly chores are
//! due. Pool release runs detached on its own thread. A stop flag lets the
//! current tick finish before the loop exits.

use crate::{
	armor::{armor, dearmor},
	chunk::ChunkDb,
	config::Config,
	decoder::{decode_packet, DecodeContext, Stats},
	error::Error,
	idlog::IdLog,
	keyring::{Pubring, Secring},
	mail::{Delivery, DeliveryError, MailSource, ServiceRequest},
	pool::{Pool, INBOUND},
};
use chrono::{Datelike, Utc};
use parking_lot::{Mutex, RwLock};
use std::{
	fs,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread,
	time::{Duration, Instant},
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

pub struct Server {
	cfg: Config,
	pool: Arc<Pool>,
	pubring: Arc<RwLock<Pubring>>,
	secring: Secring,
	idlog: IdLog,
	chunks: ChunkDb,
	stats: Arc<Mutex<Stats>>,
	delivery: Arc<dyn Delivery>,
	source: Box<dyn MailSource>,
	stop: Arc<AtomicBool>,
}

impl Server {
	/// Bring the node up: directories, keyrings, stores, and a usable
	/// advertised key. Failures here are fatal; the embedding binary
	/// should exit non-zero.
	pub fn new(
		cfg: Config,
		delivery: Arc<dyn Delivery>,
		source: Box<dyn MailSource>,
	) -> Result<Self, Error> {
		create_dirs(&cfg)?;

		let mut pubring = Pubring::new(&cfg.files.pubring, &cfg.files.mlist2);
		if cfg.accept_expired_public {
			pubring.use_expired();
		}
		if let Err(e) = pubring.import_pubring() {
			log::warn!(target: "yamn", "Public keyring import failed: {}", e);
		}
		if cfg.files.mlist2.is_file() {
			if let Err(e) = pubring.import_stats() {
				log::warn!(target: "yamn", "Stats import failed: {}", e);
			}
		}

		let mut secring = Secring::new(&cfg);
		secring.import_secring()?;

		log::trace!(target: "yamn", "Opening ID log: {}", cfg.files.idlog.display());
		let idlog = IdLog::open(&cfg.files.idlog, cfg.id_expiry_days)?;
		log::trace!(target: "yamn", "Opening chunk DB: {}", cfg.files.chunkdb.display());
		let chunks = ChunkDb::open(&cfg.files.chunkdb, cfg.chunk_expiry_days)?;

		let mut server = Self {
			pool: Arc::new(Pool::new(&cfg.files.pooldir)),
			pubring: Arc::new(RwLock::new(pubring)),
			secring,
			idlog,
			chunks,
			stats: Arc::new(Mutex::new(Stats::default())),
			delivery,
			source,
			stop: Arc::new(AtomicBool::new(false)),
			cfg,
		};
		server.expire_idlog();
		server.clean_chunks();
		server.nag_operator();
		server.purge_or_generate()?;
		log::info!(target: "yamn", "Secret keyring contains {} keys", server.secring.count());
		Ok(server)
	}

	/// Raising this flag lets the current tick finish, then stops the
	/// loop and the release thread.
	pub fn stop_handle(&self) -> Arc<AtomicBool> {
		self.stop.clone()
	}

	pub fn stats(&self) -> Stats {
		self.stats.lock().clone()
	}

	/// Run the node. In daemon mode this loops until the stop flag rises;
	/// otherwise it performs a single pass of remailer functions plus one
	/// dynamic pool release.
	pub fn run(&mut self) -> Result<(), Error> {
		let release = if self.cfg.daemon {
			log::info!(target: "yamn", "Starting YAMN server: {}", self.cfg.name);
			log::info!(target: "yamn", "Detaching pool processing");
			let pool = self.pool.clone();
			let delivery = self.delivery.clone();
			let stats = self.stats.clone();
			let stop = self.stop.clone();
			let (pool_min, pool_rate) = (self.cfg.pool_min, self.cfg.pool_rate);
			let interval = self.cfg.loop_seconds;
			Some(thread::spawn(move || {
				while !stop.load(Ordering::Relaxed) {
					send_pool(&pool, delivery.as_ref(), &stats, pool_min, pool_rate, false);
					sleep_interruptibly(interval, &stop);
				}
			}))
		} else {
			log::info!(
				target: "yamn",
				"Performing routine remailer functions for: {}",
				self.cfg.name,
			);
			None
		};

		let mut day_of_month = Utc::now().day();
		let mut daily = Instant::now();
		let mut hourly = Instant::now();
		loop {
			if !self.cfg.files.pooldir.is_dir() {
				return Err(Error::Config(format!(
					"Pool directory {} has gone away",
					self.cfg.files.pooldir.display(),
				)))
			}
			self.tick();

			if Utc::now().day() != day_of_month {
				log::info!(target: "yamn", "Performing midnight events");
				self.purge_or_generate()?;
				self.expire_idlog();
				self.clean_chunks();
				let mut stats = self.stats.lock();
				stats.report();
				stats.reset();
				day_of_month = Utc::now().day();
			}
			if daily.elapsed() > DAY {
				log::info!(target: "yamn", "Performing daily events");
				self.nag_operator();
				daily = Instant::now();
			}
			if hourly.elapsed() > HOUR {
				log::trace!(target: "yamn", "Performing hourly events");
				self.refresh_rings();
				self.stats.lock().report();
				hourly = Instant::now();
			}

			if !self.cfg.daemon {
				break
			}
			sleep_interruptibly(self.cfg.loop_seconds, &self.stop);
			if self.stop.load(Ordering::Relaxed) {
				break
			}
		}

		if let Some(handle) = release {
			self.stop.store(true, Ordering::Relaxed);
			let _ = handle.join();
		} else {
			self.flush_pool(false);
		}
		Ok(())
	}

	/// One pass of remailer functions: the inbound pool, then the maildir.
	fn tick(&mut self) {
		self.process_inbound_pool();
		self.process_mail();
		// Replay records must be durable before their packets leave.
		if let Err(e) = self.idlog.sync() {
			log::error!(target: "yamn", "ID log sync failed: {}", e);
		}
	}

	/// Release pool messages now. `flush` ignores the pool's size and
	/// rate settings (client mode).
	pub fn flush_pool(&self, flush: bool) {
		send_pool(
			&self.pool,
			self.delivery.as_ref(),
			&self.stats,
			self.cfg.pool_min,
			self.cfg.pool_rate,
			flush,
		);
	}

	fn process_inbound_pool(&mut self) {
		let files = match self.pool.list(INBOUND) {
			Ok(files) => files,
			Err(e) => {
				log::warn!(target: "yamn", "Unable to access inbound pool: {}", e);
				return
			},
		};
		let size = files.len();
		let mut processed = 0;
		for filename in files {
			match self.pool.read(&filename) {
				Ok(entry) => {
					if let Err(e) = self.decode(&entry.payload) {
						log::warn!(target: "yamn", "{}", e);
					} else {
						processed += 1;
					}
				},
				Err(e) =>
					log::warn!(target: "yamn", "Failed to read {} from pool: {}", filename, e),
			}
			self.pool.delete(&filename);
		}
		if size > 0 {
			log::trace!(
				target: "yamn",
				"Inbound pool processing complete. Read={}, Decoded={}",
				size,
				processed,
			);
		}
	}

	fn process_mail(&mut self) {
		let messages = match self.source.unseen() {
			Ok(messages) => messages,
			Err(e) => {
				log::warn!(target: "yamn", "Reading mail source failed: {}", e);
				return
			},
		};
		if messages.is_empty() {
			return
		}
		log::trace!(target: "yamn", "Reading {} messages from the mail source", messages.len());
		self.stats.lock().in_mail += messages.len() as u32;
		for mail in messages {
			if ServiceRequest::is_service(&mail.subject) {
				match ServiceRequest::parse(&mail.subject) {
					Some(request) => match self.delivery.service_reply(&request, &mail.from) {
						Ok(()) => self.stats.lock().in_remfoo += 1,
						Err(e) =>
							log::info!(target: "yamn", "Failed to answer {:?}: {}", request, e),
					},
					None => {
						let mut subject = mail.subject;
						subject.truncate(20);
						log::info!(target: "yamn", "Ignoring request for {}", subject);
					},
				}
				continue
			}
			// Not a service request, so assume a remailer message.
			match dearmor(&mail.body) {
				Ok(payload) =>
					if let Err(e) = self.decode(&payload) {
						log::info!(target: "yamn", "{}", e);
					},
				Err(e) => log::info!(target: "yamn", "{}", e),
			}
		}
	}

	fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
		let ring = self.pubring.read();
		let mut stats = self.stats.lock();
		let mut ctx = DecodeContext {
			cfg: &self.cfg,
			ring: &ring,
			secring: &self.secring,
			pool: self.pool.as_ref(),
			idlog: &mut self.idlog,
			chunks: &mut self.chunks,
			stats: &mut stats,
			send_dummies: true,
		};
		decode_packet(&mut ctx, payload)
	}

	/// Purge the secret ring; with no active key left, generate and
	/// advertise a fresh one, otherwise rewrite the published key so it
	/// reflects the current configuration.
	fn purge_or_generate(&mut self) -> Result<(), Error> {
		let counts = self.secring.purge()?;
		log::info!(
			target: "yamn",
			"Key purge complete. Active={}, Expiring={}, Expired={}, Purged={}",
			counts.active,
			counts.expiring,
			counts.expired,
			counts.purged,
		);
		if counts.active == 0 {
			log::info!(target: "yamn", "Generating and advertising a new key pair");
			let key_id = self.secring.generate()?;
			log::info!(target: "yamn", "Generated new keypair with keyid: {}", hex::encode(key_id));
		} else {
			self.secring.write_public_key()?;
		}
		Ok(())
	}

	fn expire_idlog(&mut self) {
		match self.idlog.expire() {
			Ok((remaining, deleted)) =>
				log::info!(target: "yamn", "ID log: Expired={}, Contains={}", deleted, remaining),
			Err(e) => log::warn!(target: "yamn", "ID log expiry failed: {}", e),
		}
	}

	fn clean_chunks(&mut self) {
		match self.chunks.expire() {
			Ok((retained, expired)) if expired > 0 => log::info!(
				target: "yamn",
				"Chunk expiry complete. Retained={}, Expired={}",
				retained,
				expired,
			),
			Ok(_) => (),
			Err(e) => log::warn!(target: "yamn", "Chunk expiry failed: {}", e),
		}
		match self.chunks.housekeep(&self.pool) {
			Ok((retained, deleted)) if deleted > 0 => log::info!(
				target: "yamn",
				"Stranded chunk deletion: Retained={}, Deleted={}",
				retained,
				deleted,
			),
			Ok(_) => (),
			Err(e) => log::warn!(target: "yamn", "Chunk housekeeping failed: {}", e),
		}
	}

	/// Reimport whichever of the keyring and stats files changed on disk.
	/// Old figures beat none, so failures only warn.
	fn refresh_rings(&mut self) {
		let mut ring = self.pubring.write();
		if ring.key_refresh() {
			log::trace!(target: "yamn", "Reimporting public keyring");
			if let Err(e) = ring.import_pubring() {
				log::warn!(target: "yamn", "Public keyring reimport failed: {}", e);
			} else if self.cfg.files.mlist2.is_file() {
				if let Err(e) = ring.import_stats() {
					log::warn!(target: "yamn", "Stats reimport failed: {}", e);
				}
			}
		} else if ring.stat_refresh() {
			if let Err(e) = ring.import_stats() {
				log::warn!(target: "yamn", "Stats reimport failed: {}", e);
			}
		}
	}

	/// Warn the operator about poor practice.
	fn nag_operator(&self) {
		if self.cfg.loop_seconds < 60 {
			log::warn!(
				target: "yamn",
				"Loop time of {} is excessively low. A higher setting is recommended.",
				self.cfg.loop_seconds,
			);
		}
		if self.cfg.pool_rate > 90 {
			log::warn!(
				target: "yamn",
				"Your pool rate of {} is excessively high. Unless testing, a lower setting is \
				 recommended.",
				self.cfg.pool_rate,
			);
		}
	}
}

/// One release pass: pick the files, mail them, and drop what was sent or
/// can never send.
fn send_pool(
	pool: &Pool,
	delivery: &dyn Delivery,
	stats: &Mutex<Stats>,
	pool_min: usize,
	pool_rate: usize,
	flush: bool,
) {
	let selected = if flush { pool.select_all() } else { pool.select_dynamic(pool_min, pool_rate) };
	let selected = match selected {
		Ok(selected) => selected,
		Err(e) => {
			log::warn!(target: "yamn", "Reading pool failed: {}", e);
			return
		},
	};
	for filename in selected {
		let entry = match pool.read(&filename) {
			Ok(entry) => entry,
			Err(e) => {
				log::warn!(target: "yamn", "Failed to read {} from pool: {}", filename, e);
				continue
			},
		};
		let result = match &entry.next_hop {
			Some(next_hop) => armor(&entry.payload)
				.map_err(|e| DeliveryError::Permanent(e.to_string()))
				.and_then(|armored| delivery.deliver_packet(next_hop, &armored)),
			None => delivery.deliver_plain(&entry.payload),
		};
		match result {
			Ok(()) => {
				stats.lock().out_mail += 1;
				pool.delete(&filename);
			},
			Err(DeliveryError::Permanent(e)) => {
				log::warn!(target: "yamn", "Pool mailing failed permanently: {}", e);
				pool.delete(&filename);
			},
			Err(DeliveryError::Transient(e)) =>
				log::warn!(target: "yamn", "Pool mailing failed: {}", e),
		}
	}
}

fn sleep_interruptibly(seconds: u64, stop: &AtomicBool) {
	for _ in 0..seconds {
		if stop.load(Ordering::Relaxed) {
			return
		}
		thread::sleep(Duration::from_secs(1));
	}
}

fn create_dirs(cfg: &Config) -> Result<(), Error> {
	let mut dirs = vec![cfg.files.pooldir.clone()];
	for sub in ["new", "cur", "tmp"] {
		dirs.push(cfg.files.maildir.join(sub));
	}
	for parent in [&cfg.files.idlog, &cfg.files.chunkdb, &cfg.files.secring, &cfg.files.pubkey] {
		if let Some(parent) = parent.parent() {
			dirs.push(parent.to_path_buf());
		}
	}
	for dir in dirs {
		fs::create_dir_all(&dir)
			.map_err(|e| Error::Config(format!("Failed to create {}: {}", dir.display(), e)))?;
	}
	Ok(())
}

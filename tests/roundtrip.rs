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

//! End-to-end remailer scenarios: multi-hop round trips, replay and loop
//! handling, chunk reassembly and cover traffic.

use std::{fs, io::Write};
use yamn::{
	armor::{armor, dearmor},
	chain::{make_chain, ChainParams},
	chunk::ChunkDb,
	config::Config,
	decoder::{decode_packet, send_dummy, DecodeContext, Stats},
	idlog::IdLog,
	keyring::{Pubring, Secring},
	packet::{self, FinalParams, Hop},
	pool::{Pool, INBOUND, OUTBOUND, PARTIAL},
	Error, PACKET_BYTES,
};

fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// A remailer node with its own config, stores and freshly generated key.
struct Node {
	cfg: Config,
	_dir: tempfile::TempDir,
	pool: Pool,
	secring: Secring,
	idlog: IdLog,
	chunks: ChunkDb,
	stats: Stats,
}

impl Node {
	fn new(name: &str, exit: bool) -> Node {
		let dir = tempfile::tempdir().unwrap();
		let mut cfg = Config::new(name, format!("{}@mix.example", name), dir.path());
		cfg.is_exit = exit;
		fs::create_dir_all(&cfg.files.pooldir).unwrap();
		let mut secring = Secring::new(&cfg);
		secring.generate().unwrap();
		Node {
			pool: Pool::new(&cfg.files.pooldir),
			secring,
			idlog: IdLog::open(&cfg.files.idlog, cfg.id_expiry_days).unwrap(),
			chunks: ChunkDb::open(&cfg.files.chunkdb, cfg.chunk_expiry_days).unwrap(),
			stats: Stats::default(),
			_dir: dir,
			cfg,
		}
	}

	/// The advertised key record, exactly as published.
	fn key_record(&self) -> String {
		fs::read_to_string(&self.cfg.files.pubkey).unwrap()
	}

	fn hop(&self) -> Hop {
		let key_id = self.secring.advertised().unwrap();
		Hop {
			address: self.cfg.address.clone(),
			public_key: self.secring.public(&key_id).unwrap(),
		}
	}

	fn decode(&mut self, ring: &Pubring, raw: &[u8]) -> Result<(), Error> {
		let mut ctx = DecodeContext {
			cfg: &self.cfg,
			ring,
			secring: &self.secring,
			pool: &self.pool,
			idlog: &mut self.idlog,
			chunks: &mut self.chunks,
			stats: &mut self.stats,
			send_dummies: false,
		};
		decode_packet(&mut ctx, raw)
	}

	fn outbound(&self) -> Vec<yamn::pool::PoolEntry> {
		let mut files = self.pool.list(OUTBOUND).unwrap();
		files.sort();
		files.iter().map(|file| self.pool.read(file).unwrap()).collect()
	}
}

/// A pubring built from the published key records of `nodes`.
fn ring_for(nodes: &[&Node]) -> (tempfile::NamedTempFile, Pubring) {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	for node in nodes {
		write!(file, "{}", node.key_record()).unwrap();
	}
	let mut ring = Pubring::new(file.path(), "/nonexistent");
	ring.import_pubring().unwrap();
	(file, ring)
}

fn params() -> ChainParams {
	ChainParams { min_latency: 0, max_latency: 120, min_uptime: 98.0 }
}

#[test]
fn three_random_intermediates_round_trip() {
	init_log();
	let mut nodes: Vec<Node> =
		["a", "b", "c", "d", "e"].iter().map(|name| Node::new(name, true)).collect();
	let (_file, ring) = ring_for(&nodes.iter().collect::<Vec<_>>());
	assert_eq!(ring.count(), 5);

	let chain = make_chain(&["*", "*", "*"], &ring, &params()).unwrap();
	let packet = packet::encode(b"HELLO", &chain, &FinalParams::single()).unwrap();

	// Mail the packet along the chain, armored in transit at every hop.
	let mut raw = packet.as_bytes().to_vec();
	for (position, hop) in chain.iter().enumerate() {
		raw = dearmor(&armor(&raw).unwrap()).unwrap();
		let node = nodes.iter_mut().find(|node| node.cfg.address == hop.address).unwrap();
		node.decode(&ring, &raw).unwrap();
		let outbound = node.outbound();
		assert_eq!(outbound.len(), 1);
		if position < chain.len() - 1 {
			assert_eq!(node.stats.out_yamn, 1);
			assert_eq!(outbound[0].next_hop.as_deref(), Some(chain[position + 1].address.as_str()));
			assert_eq!(outbound[0].payload.len(), PACKET_BYTES);
			raw = outbound[0].payload.clone();
		} else {
			// The exit recovered the plaintext, byte for byte.
			assert_eq!(node.stats.out_plain, 1);
			assert_eq!(outbound[0].next_hop, None);
			assert_eq!(outbound[0].payload, b"HELLO");
		}
	}
}

#[test]
fn replayed_packet_is_dropped_silently() {
	init_log();
	let mut first = Node::new("first", true);
	let second = Node::new("second", true);
	let (_file, ring) = ring_for(&[&first, &second]);

	let chain = vec![first.hop(), second.hop()];
	let packet = packet::encode(b"once only", &chain, &FinalParams::single()).unwrap();

	first.decode(&ring, packet.as_bytes()).unwrap();
	assert_eq!(first.pool.count(OUTBOUND), 1);
	// The second submission hits the replay log and vanishes.
	first.decode(&ring, packet.as_bytes()).unwrap();
	assert_eq!(first.pool.count(OUTBOUND), 1);
	assert_eq!(first.stats.out_yamn, 1);
	assert_eq!(first.idlog.len(), 1);
}

#[test]
fn chain_looping_back_stores_inbound() {
	init_log();
	let mut node = Node::new("looper", true);
	let other = Node::new("other", true);
	let (_file, ring) = ring_for(&[&node, &other]);

	// The node is both the current and the next hop.
	let chain = vec![node.hop(), node.hop()];
	let packet = packet::encode(b"LOOP", &chain, &FinalParams::single()).unwrap();

	node.decode(&ring, packet.as_bytes()).unwrap();
	assert_eq!(node.stats.out_loop, 1);
	assert_eq!(node.pool.count(INBOUND), 1);
	assert_eq!(node.pool.count(OUTBOUND), 0);

	// Processing the inbound pool completes delivery locally.
	let inbound = node.pool.list(INBOUND).unwrap();
	let residual = node.pool.read(&inbound[0]).unwrap();
	assert_eq!(residual.payload.len(), PACKET_BYTES);
	node.decode(&ring, &residual.payload).unwrap();
	assert_eq!(node.stats.out_plain, 1);
	assert_eq!(node.outbound()[0].payload, b"LOOP");
}

#[test]
fn chunks_reassemble_out_of_order() {
	init_log();
	let mut exit = Node::new("exit", true);
	let (_file, ring) = ring_for(&[&exit]);
	let chain = vec![exit.hop()];
	let message_id: [u8; 16] = rand::random();

	let parts: [(&[u8], u8); 3] = [(b"BBB ", 2), (b"CCC", 3), (b"AAA ", 1)];
	for (n, (payload, chunk_num)) in parts.iter().enumerate() {
		let packet = packet::encode(
			payload,
			&chain,
			&FinalParams::chunk(message_id, *chunk_num, 3),
		)
		.unwrap();
		exit.decode(&ring, packet.as_bytes()).unwrap();
		if n < 2 {
			assert_eq!(exit.pool.count(OUTBOUND), 0);
		}
	}

	// The last chunk triggered assembly, in slot order, and the record
	// and its partial files went away.
	let outbound = exit.outbound();
	assert_eq!(outbound.len(), 1);
	assert_eq!(outbound[0].payload, b"AAA BBB CCC");
	assert_eq!(exit.stats.out_plain, 1);
	assert_eq!(exit.stats.in_yamn, 3);
	assert!(exit.chunks.is_empty());
	assert_eq!(exit.pool.count(PARTIAL), 0);
}

#[test]
fn expired_entry_is_no_candidate_but_still_decodes() {
	init_log();
	let mut node = Node::new("aging", true);

	// Publish the node's key with a validity window that ended yesterday.
	let record = node.key_record();
	let mut lines: Vec<String> = record.lines().map(str::to_string).collect();
	let mut fields: Vec<String> = lines[0].split(' ').map(str::to_string).collect();
	fields[6] = (chrono::Utc::now().date_naive() - chrono::Days::new(1))
		.format("%Y-%m-%d")
		.to_string();
	lines[0] = fields.join(" ");
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(file, "{}", lines.join("\n")).unwrap();

	let mut ring = Pubring::new(file.path(), "/nonexistent");
	ring.import_pubring().unwrap();
	assert_eq!(ring.count(), 0);
	assert!(ring.candidates(0, u32::MAX, 0.0, false).is_empty());

	// Diagnostic consumers may accept expired keys.
	let mut lenient = Pubring::new(file.path(), "/nonexistent");
	lenient.use_expired();
	lenient.import_pubring().unwrap();
	assert_eq!(lenient.count(), 1);

	// A packet encrypted to the expired key-ID still decodes: secret-ring
	// lookup is independent of the public validity window.
	let chain = vec![node.hop()];
	let packet = packet::encode(b"still here", &chain, &FinalParams::single()).unwrap();
	node.decode(&ring, packet.as_bytes()).unwrap();
	assert_eq!(node.outbound()[0].payload, b"still here");
}

#[test]
fn dummies_travel_and_die_at_the_exit() {
	init_log();
	let mut nodes: Vec<Node> =
		["x", "y", "z"].iter().map(|name| Node::new(name, true)).collect();
	let (_file, ring) = ring_for(&nodes.iter().collect::<Vec<_>>());

	// Inject one dummy from node x.
	send_dummy(&nodes[0].cfg, &ring, &nodes[0].pool).unwrap();
	let outbound = nodes[0].outbound();
	assert_eq!(outbound.len(), 1);
	let first_hop = outbound[0].next_hop.clone().unwrap();
	let mut raw = outbound[0].payload.clone();
	// Hand the file to the mailer so pool listings below stay unambiguous
	// even when the random chain starts at the injecting node.
	nodes[0].pool.delete(&outbound[0].filename);

	// First hop forwards it like any other packet.
	let relay = nodes.iter_mut().find(|node| node.cfg.address == first_hop).unwrap();
	relay.decode(&ring, &raw).unwrap();
	assert_eq!(relay.stats.out_yamn, 1);
	let forwarded = relay.outbound();
	let next_hop = forwarded[0].next_hop.clone().unwrap();
	raw = forwarded[0].payload.clone();

	// The exit recognises the delivery method and discards it.
	let exit = nodes.iter_mut().find(|node| node.cfg.address == next_hop).unwrap();
	exit.decode(&ring, &raw).unwrap();
	assert_eq!(exit.stats.in_dummy, 1);
	assert_eq!(exit.pool.count(OUTBOUND), 0);
}

#[test]
fn non_exit_randhops_plaintext() {
	init_log();
	let mut middle = Node::new("middle", false);
	let out = Node::new("out", true);
	let (_file, ring) = ring_for(&[&middle, &out]);

	// A final SMTP packet arriving at a non-exit node.
	let chain = vec![middle.hop()];
	let packet = packet::encode(b"needs an exit", &chain, &FinalParams::single()).unwrap();
	middle.decode(&ring, packet.as_bytes()).unwrap();
	assert_eq!(middle.stats.out_randhop, 1);

	// The randhopped packet goes to the only exit-capable peer.
	let outbound = middle.outbound();
	assert_eq!(outbound.len(), 1);
	assert_eq!(outbound[0].next_hop.as_deref(), Some("out@mix.example"));
	assert_eq!(outbound[0].payload.len(), PACKET_BYTES);
}

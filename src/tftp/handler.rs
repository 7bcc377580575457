//! The two data-handler contracts an operation drives: a receive *sink*
//! and a transmit *source*. These are narrow capability traits rather than
//! a class hierarchy — a concrete type may implement both independently.
//!
//! Implementations are plain, synchronous calls: the operation driver
//! invokes them from within its single reactor task, matching the "packet
//! encode/decode and handler invocations are synchronous" concurrency rule.
//! `reset()` is always called exactly once before the first I/O and
//! `finished()` exactly once before the operation is dropped, regardless of
//! outcome.

use std::fs::File;
use std::io::{Read, Write};

/// Accepts a file (or file-like stream) being written by the peer.
pub trait Sink {
	/// Called once before the first `receive`/`accept_transfer_size` call.
	fn reset(&mut self);

	/// The peer announced (or the negotiation inferred) a transfer size.
	/// Returning `false` fails the operation with `HandlerReject`.
	fn accept_transfer_size(&mut self, size: u64) -> bool;

	/// Delivers one block of payload, in order, exactly once per block.
	fn receive(&mut self, bytes: &[u8]) -> Result<(), String>;

	/// Called exactly once, regardless of how the operation ended.
	fn finished(&mut self);
}

/// Produces the bytes of a file (or file-like stream) being read by the
/// peer, one block at a time.
pub trait Source {
	/// Called once before the first `next_block` call.
	fn reset(&mut self);

	/// The total size of the data to be sent, if known up front.
	fn transfer_size(&mut self) -> Option<u64>;

	/// Returns the next block, at most `max_len` bytes. A short block
	/// (including empty) signals end of data and is the terminal DATA.
	fn next_block(&mut self, max_len: usize) -> Result<Vec<u8>, String>;

	/// Called exactly once, regardless of how the operation ended.
	fn finished(&mut self);
}

/// A `Sink` that writes received blocks straight to a file.
pub struct FileSink {
	file: File,
	bytes_written: u64,
}

impl FileSink {
	pub fn new(file: File) -> Self {
		Self { file, bytes_written: 0 }
	}
}

impl Sink for FileSink {
	fn reset(&mut self) {
		self.bytes_written = 0;
	}

	fn accept_transfer_size(&mut self, _size: u64) -> bool {
		true
	}

	fn receive(&mut self, bytes: &[u8]) -> Result<(), String> {
		self.file.write_all(bytes).map_err(|e| e.to_string())?;
		self.bytes_written += bytes.len() as u64;
		Ok(())
	}

	fn finished(&mut self) {
		let _ = self.file.flush();
	}
}

/// A `Source` that reads blocks straight from a file.
pub struct FileSource {
	file: File,
	size: Option<u64>,
}

impl FileSource {
	pub fn new(file: File) -> std::io::Result<Self> {
		let size = file.metadata()?.len();
		Ok(Self { file, size: Some(size) })
	}
}

impl Source for FileSource {
	fn reset(&mut self) {}

	fn transfer_size(&mut self) -> Option<u64> {
		self.size
	}

	fn next_block(&mut self, max_len: usize) -> Result<Vec<u8>, String> {
		let mut buf = vec![0u8; max_len];
		let mut total = 0;
		while total < max_len {
			match self.file.read(&mut buf[total..]) {
				Ok(0) => break,
				Ok(n) => total += n,
				Err(e) => return Err(e.to_string()),
			}
		}
		buf.truncate(total);
		Ok(buf)
	}

	fn finished(&mut self) {}
}

/// A `Sink` backed by an in-memory buffer, used by tests in place of a
/// real file.
#[derive(Debug, Default)]
pub struct MemorySink {
	pub buf: Vec<u8>,
	pub accepted_size: Option<u64>,
	pub reset_calls: u32,
	pub finished_calls: u32,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Sink for MemorySink {
	fn reset(&mut self) {
		self.reset_calls += 1;
		self.buf.clear();
	}

	fn accept_transfer_size(&mut self, size: u64) -> bool {
		self.accepted_size = Some(size);
		true
	}

	fn receive(&mut self, bytes: &[u8]) -> Result<(), String> {
		self.buf.extend_from_slice(bytes);
		Ok(())
	}

	fn finished(&mut self) {
		self.finished_calls += 1;
	}
}

/// A `Source` backed by an in-memory buffer, used by tests in place of a
/// real file.
#[derive(Debug, Default)]
pub struct MemorySource {
	data: Vec<u8>,
	offset: usize,
	pub reset_calls: u32,
	pub finished_calls: u32,
}

impl MemorySource {
	pub fn new(data: Vec<u8>) -> Self {
		Self { data, offset: 0, reset_calls: 0, finished_calls: 0 }
	}
}

impl Source for MemorySource {
	fn reset(&mut self) {
		self.reset_calls += 1;
		self.offset = 0;
	}

	fn transfer_size(&mut self) -> Option<u64> {
		Some(self.data.len() as u64)
	}

	fn next_block(&mut self, max_len: usize) -> Result<Vec<u8>, String> {
		let end = (self.offset + max_len).min(self.data.len());
		let block = self.data[self.offset..end].to_vec();
		self.offset = end;
		Ok(block)
	}

	fn finished(&mut self) {
		self.finished_calls += 1;
	}
}

/// A `Sink` that discards everything it receives. Useful for load-testing
/// writes or deliberately draining a transfer without storing it.
#[derive(Debug, Default)]
pub struct NullSink {
	pub bytes_received: u64,
}

impl Sink for NullSink {
	fn reset(&mut self) {
		self.bytes_received = 0;
	}

	fn accept_transfer_size(&mut self, _size: u64) -> bool {
		true
	}

	fn receive(&mut self, bytes: &[u8]) -> Result<(), String> {
		self.bytes_received += bytes.len() as u64;
		Ok(())
	}

	fn finished(&mut self) {}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Seek;

	#[test]
	fn memory_source_yields_short_final_block() {
		let mut src = MemorySource::new(b"ABCDEFGHIJ".to_vec());
		assert_eq!(src.next_block(4).unwrap(), b"ABCD");
		assert_eq!(src.next_block(4).unwrap(), b"EFGH");
		assert_eq!(src.next_block(4).unwrap(), b"IJ");
		assert_eq!(src.next_block(4).unwrap(), b"");
	}

	#[test]
	fn memory_sink_accumulates_in_order() {
		let mut sink = MemorySink::new();
		sink.reset();
		sink.receive(b"AB").unwrap();
		sink.receive(b"CD").unwrap();
		sink.finished();
		assert_eq!(sink.buf, b"ABCD");
		assert_eq!(sink.reset_calls, 1);
		assert_eq!(sink.finished_calls, 1);
	}

	#[test]
	fn null_sink_counts_without_storing() {
		let mut sink = NullSink::default();
		sink.receive(b"hello").unwrap();
		sink.receive(b"world").unwrap();
		assert_eq!(sink.bytes_received, 10);
	}

	#[test]
	fn file_source_reports_size_and_reads_full_content() {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(b"0123456789").unwrap();
		tmp.seek(std::io::SeekFrom::Start(0)).unwrap();

		let mut src = FileSource::new(tmp).unwrap();
		assert_eq!(src.transfer_size(), Some(10));
		assert_eq!(src.next_block(4).unwrap(), b"0123");
		assert_eq!(src.next_block(4).unwrap(), b"4567");
		assert_eq!(src.next_block(4).unwrap(), b"89");
	}

	#[test]
	fn file_sink_writes_received_blocks() {
		let tmp = tempfile::tempfile().unwrap();
		let mut sink = FileSink::new(tmp.try_clone().unwrap());
		sink.reset();
		sink.receive(b"hello ").unwrap();
		sink.receive(b"world").unwrap();
		sink.finished();

		let mut check = tmp;
		check.seek(std::io::SeekFrom::Start(0)).unwrap();
		let mut contents = String::new();
		check.read_to_string(&mut contents).unwrap();
		assert_eq!(contents, "hello world");
	}
}

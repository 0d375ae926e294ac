use serde::ser::{Serialize, SerializeSeq, SerializeStruct, Serializer};
use std::collections::VecDeque;

use crate::lifecycle::GrowingValue;

pub const DEFAULT_PAGES: usize = 50;
// 80x24, one VT100 screen.
pub const DEFAULT_PAGE_SIZE: usize = 80 * 24;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
	pub index: u64,
	pub timestamp: u64,
	pub text: String,
}

/// Bounded, paged capture of a process's combined stdout/stderr.
///
/// Page indices only ever grow; once more than `capacity` pages are held the
/// lowest surviving index is evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleLog {
	pages: VecDeque<Page>,
	next_index: u64,
	capacity: usize,
	page_size: usize,
}

impl Default for ConsoleLog {
	fn default() -> Self {
		Self::new(DEFAULT_PAGES, DEFAULT_PAGE_SIZE)
	}
}

impl ConsoleLog {
	pub fn new(capacity: usize, page_size: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			pages: VecDeque::with_capacity(capacity),
			next_index: 0,
			capacity,
			page_size: page_size.max(1),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn page_size(&self) -> usize {
		self.page_size
	}

	pub fn len(&self) -> usize {
		self.pages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pages.is_empty()
	}

	pub fn first_page(&self) -> Option<u64> {
		self.pages.front().map(|p| p.index)
	}

	pub fn last_page(&self) -> Option<u64> {
		self.pages.back().map(|p| p.index)
	}

	pub fn pages(&self) -> impl Iterator<Item = &Page> {
		self.pages.iter()
	}

	/// Appends a page at the next index and returns that index.
	pub fn add(&mut self, text: &str, timestamp: u64) -> u64 {
		let index = self.next_index;
		self.next_index += 1;
		self.pages.push_back(Page {
			index,
			timestamp,
			text: truncate(text, self.page_size).to_string(),
		});
		while self.pages.len() > self.capacity {
			self.pages.pop_front();
		}
		index
	}

	pub fn text(&self, index: u64) -> &str {
		self.page(index).map(|p| p.text.as_str()).unwrap_or("")
	}

	pub fn timestamp(&self, index: u64) -> u64 {
		self.page(index).map(|p| p.timestamp).unwrap_or(0)
	}

	fn page(&self, index: u64) -> Option<&Page> {
		let first = self.first_page()?;
		let offset = index.checked_sub(first)?;
		self.pages.get(usize::try_from(offset).ok()?)
	}
}

impl GrowingValue for ConsoleLog {
	/// Index the next page will get; everything below it has been seen.
	fn latest(&self) -> u64 {
		self.next_index
	}

	fn added_content(&self, relative_to: u64) -> Self {
		Self {
			pages: self.pages.iter().filter(|p| p.index >= relative_to).cloned().collect(),
			next_index: self.next_index,
			capacity: self.capacity,
			page_size: self.page_size,
		}
	}
}

impl Serialize for Page {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut s = serializer.serialize_struct("Page", 3)?;
		s.serialize_field("page", &self.index)?;
		s.serialize_field("timestamp", &self.timestamp)?;
		s.serialize_field("text", &self.text)?;
		s.end()
	}
}

impl Serialize for ConsoleLog {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut seq = serializer.serialize_seq(Some(self.pages.len()))?;
		for page in &self.pages {
			seq.serialize_element(page)?;
		}
		seq.end()
	}
}

fn truncate(text: &str, max_bytes: usize) -> &str {
	if text.len() <= max_bytes {
		return text;
	}
	let mut end = max_bytes;
	while !text.is_char_boundary(end) {
		end -= 1;
	}
	&text[..end]
}

//! Values that know how much they have grown since they were last reported.

use serde::Serialize;
use std::ops::{Add, AddAssign, Sub, SubAssign};

pub trait GrowingValue: Sized {
	/// Baseline to store after this value has been reported.
	fn latest(&self) -> u64;

	/// What is new relative to a previously stored baseline.
	fn added_content(&self, relative_to: u64) -> Self;
}

/// Monotonically non-decreasing integer (runtime, cpu time, exits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Counter(u64);

impl Counter {
	pub fn new(value: u64) -> Self {
		Self(value)
	}

	pub fn value(&self) -> u64 {
		self.0
	}
}

impl GrowingValue for Counter {
	fn latest(&self) -> u64 {
		self.0
	}

	// A counter that went backwards was reset (e.g. the process restarted).
	fn added_content(&self, relative_to: u64) -> Self {
		Self(self.0.saturating_sub(relative_to))
	}
}

impl Add<u64> for Counter {
	type Output = Counter;

	fn add(self, rhs: u64) -> Counter {
		Counter(self.0.saturating_add(rhs))
	}
}

impl AddAssign<u64> for Counter {
	fn add_assign(&mut self, rhs: u64) {
		*self = *self + rhs;
	}
}

/// Point-in-time integer (resident memory, open files).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Gauge(u64);

impl Gauge {
	pub fn new(value: u64) -> Self {
		Self(value)
	}

	pub fn value(&self) -> u64 {
		self.0
	}
}

impl GrowingValue for Gauge {
	fn latest(&self) -> u64 {
		0
	}

	fn added_content(&self, _relative_to: u64) -> Self {
		*self
	}
}

impl Add<u64> for Gauge {
	type Output = Gauge;

	fn add(self, rhs: u64) -> Gauge {
		Gauge(self.0.saturating_add(rhs))
	}
}

impl Sub<u64> for Gauge {
	type Output = Gauge;

	fn sub(self, rhs: u64) -> Gauge {
		Gauge(self.0.saturating_sub(rhs))
	}
}

impl AddAssign<u64> for Gauge {
	fn add_assign(&mut self, rhs: u64) {
		*self = *self + rhs;
	}
}

impl SubAssign<u64> for Gauge {
	fn sub_assign(&mut self, rhs: u64) {
		*self = *self - rhs;
	}
}

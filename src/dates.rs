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

//! Day-granularity time helpers shared by the wire format and the stores.

use chrono::{NaiveDate, Utc};

/// Date format used by keyring records and pool headers.
pub const SHORT_DATE: &str = "%Y-%m-%d";

fn epoch() -> NaiveDate {
	NaiveDate::from_ymd_opt(1970, 1, 1).expect("The epoch is a valid date")
}

/// Whole days since the Unix epoch for `date`.
pub fn epoch_days(date: NaiveDate) -> u16 {
	date.signed_duration_since(epoch()).num_days().clamp(0, u16::MAX as i64) as u16
}

/// Whole days since the Unix epoch, now.
pub fn epoch_days_now() -> u16 {
	epoch_days(Utc::now().date_naive())
}

/// Today, UTC.
pub fn today() -> NaiveDate {
	Utc::now().date_naive()
}

/// `YYYY-MM-DD` for today.
pub fn short_date_now() -> String {
	today().format(SHORT_DATE).to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn days_count_from_epoch() {
		assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
		assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 2, 1).unwrap()), 31);
		assert!(epoch_days_now() > 20000);
	}
}

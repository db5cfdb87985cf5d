//! String extension helpers.

use crate::utils::is_number_padding;
use std::io::Cursor;
use std::str::FromStr;

/// Extension methods on `str`.
pub trait StrExt {
    /// Encode the text as UTF-8 into an in-memory stream at position 0.
    fn as_stream(&self) -> Cursor<Vec<u8>>;

    /// Remove every space character (U+0020). Other whitespace is kept.
    fn remove_spaces(&self) -> String;

    /// Probe whether the text parses as `T`.
    ///
    /// Leading and trailing ASCII whitespace is tolerated. Any parse failure
    /// yields `false`; this helper never reports an error.
    ///
    /// ```rust
    /// use extkit_lib::StrExt;
    ///
    /// assert!("00000000000001".can_convert_to::<i32>());
    /// assert!(!"9223372036854775807".can_convert_to::<i32>());
    /// assert!("9223372036854775807".can_convert_to::<i64>());
    /// ```
    fn can_convert_to<T: FromStr>(&self) -> bool;
}

impl StrExt for str {
    fn as_stream(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.as_bytes().to_vec())
    }

    fn remove_spaces(&self) -> String {
        self.replace(' ', "")
    }

    fn can_convert_to<T: FromStr>(&self) -> bool {
        self.trim_matches(is_number_padding).parse::<T>().is_ok()
    }
}

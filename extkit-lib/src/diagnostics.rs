//! Human-readable log text for errors.
//!
//! [`ErrorData`] attaches key/value diagnostics to any error;
//! [`ErrorLogExt::to_log_string`] renders an error, its source chain and all
//! attached data.

use std::error::Error;
use std::fmt::{self, Write};

/// An error annotated with key/value diagnostic data.
///
/// Displays exactly like the wrapped error and shares its source, so
/// wrapping does not add a line to the rendered chain.
#[derive(Debug)]
pub struct ErrorData {
    inner: Box<dyn Error + Send + Sync + 'static>,
    data: Vec<(String, String)>,
}

impl ErrorData {
    /// Wrap `error` with no data attached yet.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self {
            inner: error.into(),
            data: Vec::new(),
        }
    }

    /// Attach a key/value pair. A repeated key replaces the earlier value.
    pub fn with_data<K: Into<String>, V: fmt::Display>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.data.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.data.push((key, value)),
        }
        self
    }

    /// The attached data in insertion order.
    pub fn data(&self) -> &[(String, String)] {
        &self.data
    }

    /// The wrapped error.
    pub fn inner(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error for ErrorData {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Render errors for logs. Never fails.
pub trait ErrorLogExt {
    /// The error message, one `Caused by:` line per source, and a
    /// `DataCollection:` block when any error in the chain carries data.
    ///
    /// ```rust
    /// use extkit_lib::{ErrorData, ErrorLogExt};
    ///
    /// let err = ErrorData::new("order rejected").with_data("order_id", 42);
    /// assert_eq!(
    ///     err.to_log_string(),
    ///     "order rejected\nDataCollection:\n    order_id: 42\n"
    /// );
    /// ```
    fn to_log_string(&self) -> String;
}

impl<E: Error + 'static> ErrorLogExt for E {
    fn to_log_string(&self) -> String {
        render(self)
    }
}

impl ErrorLogExt for dyn Error + 'static {
    fn to_log_string(&self) -> String {
        render(self)
    }
}

impl ErrorLogExt for dyn Error + Send + Sync + 'static {
    fn to_log_string(&self) -> String {
        render(self)
    }
}

fn render(error: &(dyn Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut data = Vec::new();
    collect_data(error, &mut data);

    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\nCaused by: {}", cause);
        collect_data(cause, &mut data);
        source = cause.source();
    }

    if data.is_empty() {
        return text;
    }

    text.push_str("\nDataCollection:\n");
    for (key, value) in data {
        let _ = writeln!(text, "    {}: {}", key, value);
    }
    text
}

/// Gather data from `error`, looking through nested `ErrorData` wrappers.
fn collect_data(error: &(dyn Error + 'static), data: &mut Vec<(String, String)>) {
    let mut current = error;
    while let Some(annotated) = current.downcast_ref::<ErrorData>() {
        data.extend(annotated.data.iter().cloned());
        current = &*annotated.inner;
    }
}

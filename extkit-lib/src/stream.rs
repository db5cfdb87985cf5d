//! Helpers for seekable byte streams.
//!
//! A "stream" here is anything implementing [`Read`] + [`Seek`]; the helpers
//! that produce a stream return an in-memory `Cursor<Vec<u8>>` positioned at
//! the start.

use crate::error::ExtensionsError;
use crate::utils::ensure_not_blank;
use crate::xml::{XmlDocument, XmlElement};
use std::io::{BufRead, BufReader, Cursor, Lines, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use tracing::warn;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Restores a stream's position when dropped.
///
/// Derefs to the stream, so it can be read and repositioned freely
/// while the guard is alive.
pub struct PositionGuard<'a, S: Seek> {
    stream: &'a mut S,
    origin: u64,
}

impl<'a, S: Seek> PositionGuard<'a, S> {
    /// Record the current position of `stream`.
    pub fn new(stream: &'a mut S) -> Result<Self, ExtensionsError> {
        let origin = stream.stream_position()?;
        Ok(Self { stream, origin })
    }

    /// The position the stream returns to.
    pub fn origin(&self) -> u64 {
        self.origin
    }
}

impl<S: Seek> Deref for PositionGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.stream
    }
}

impl<S: Seek> DerefMut for PositionGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.stream
    }
}

impl<S: Seek> Drop for PositionGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.stream.seek(SeekFrom::Start(self.origin)) {
            warn!(origin = self.origin, error = %e, "failed to restore stream position");
        }
    }
}

/// Run `read` against `stream` and put the stream back where it was.
///
/// The position is restored on every exit path: a normal return, an `Err`
/// produced by `read`, or a panic unwinding through it.
pub fn scoped_read<S, R, F>(stream: &mut S, read: F) -> Result<R, ExtensionsError>
where
    S: Seek,
    F: FnOnce(&mut S) -> R,
{
    let mut guard = PositionGuard::new(stream)?;
    Ok(read(&mut *guard))
}

/// Decode the whole stream as UTF-8 text.
///
/// Reads from the beginning regardless of the current position and leaves
/// the stream at position 0. A leading byte order mark is skipped.
pub fn read_to_string<S: Read + Seek>(source: &mut S) -> Result<String, ExtensionsError> {
    source.rewind()?;
    let bytes = scoped_read(source, |stream| {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).map(|_| bytes)
    })??;

    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    Ok(std::str::from_utf8(body)?.to_owned())
}

/// Copy the whole stream into a new, independent in-memory stream.
///
/// Both streams are left at position 0.
pub fn copy_stream<S: Read + Seek>(source: &mut S) -> Result<Cursor<Vec<u8>>, ExtensionsError> {
    source.rewind()?;
    let bytes = scoped_read(source, |stream| {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).map(|_| bytes)
    })??;

    Ok(Cursor::new(bytes))
}

/// Parse an XML document from the current position, then rewind the stream.
pub fn read_document<S: Read + Seek>(source: &mut S) -> Result<XmlDocument, ExtensionsError> {
    let parsed = XmlDocument::from_reader(&mut *source);
    source.rewind()?;
    parsed
}

/// Lazily iterate over the lines of a stream, from its current position.
///
/// Line terminators (`\n` or `\r\n`) are not included. The iterator is
/// single-pass and ends at end of stream.
pub fn lines<R: Read>(source: R) -> Lines<BufReader<R>> {
    BufReader::new(source).lines()
}

/// Insert `<tag_name>value</tag_name>` as the first child of the document's
/// root and return the result as a new stream.
///
/// The source stream is parsed from the beginning; its position is restored
/// afterwards and it remains usable.
///
/// # Errors
///
/// `InvalidArgument` for a blank value or a blank or invalid tag name, `Xml`
/// when the stream does not hold a well-formed document.
pub fn add_node_to_root<S: Read + Seek>(
    source: &mut S,
    tag_name: &str,
    value: &str,
) -> Result<Cursor<Vec<u8>>, ExtensionsError> {
    ensure_not_blank("tag_name", tag_name)?;
    ensure_not_blank("value", value)?;
    let element = XmlElement::with_text(tag_name, value)?;

    let mut document = {
        let mut guard = PositionGuard::new(source)?;
        guard.rewind()?;
        XmlDocument::from_reader(&mut *guard)?
    };

    document.root_mut().prepend_child(element);
    Ok(document.to_stream())
}

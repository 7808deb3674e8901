//! Provides an immutable view of a cached byte payload.
//!
//! A [ByteView](ByteView) is what a cache lookup hands back to a caller. It is cheap to clone
//! (the payload is reference counted) while still guaranteeing that nobody can reach through it
//! and mutate the bytes held by the cache: every extraction ([to_vec](ByteView::to_vec),
//! [Display](std::fmt::Display)) yields a fresh copy and the internal buffer is never exposed.
//!
//! # Examples
//!
//! ```
//! # use callisto::view::ByteView;
//! let view = ByteView::from("630");
//!
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.to_vec(), b"630".to_vec());
//! assert_eq!(view.to_string(), "630");
//! ```
use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// Holds an immutable view of a byte payload.
///
/// A **ByteView** is meant to be used as a value type. Cloning it only bumps a reference count,
/// which is what makes storing the same payload in a cache and handing it to many callers cheap.
///
/// Note that a view handed out by a cache can never be used to mutate the cached bytes - there
/// simply is no accessor which leaks the internal buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Returns the length of the viewed payload in bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use callisto::view::ByteView;
    /// assert_eq!(ByteView::from("hello").len(), 5);
    /// assert_eq!(ByteView::default().len(), 0);
    /// ```
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the viewed payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the payload as an owned byte vector.
    ///
    /// This always copies so that the returned buffer is entirely detached from the cache.
    ///
    /// # Examples
    ///
    /// ```
    /// # use callisto::view::ByteView;
    /// let view = ByteView::from(vec![1u8, 2, 3]);
    /// let mut copy = view.to_vec();
    /// copy[0] = 42;
    ///
    /// // Mutating the copy leaves the view untouched...
    /// assert_eq!(view.to_vec(), vec![1u8, 2, 3]);
    /// ```
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::ByteView;

    #[test]
    fn extraction_always_copies() {
        let view = ByteView::from("immutable");
        let mut first = view.to_vec();
        first.clear();

        assert_eq!(view.to_vec(), b"immutable".to_vec());
        assert_eq!(view.len(), 9);
    }

    #[test]
    fn clones_share_the_payload() {
        let view = ByteView::from(vec![0u8; 1024]);
        let clone = view.clone();

        assert_eq!(view, clone);
        assert_eq!(clone.len(), 1024);
    }

    #[test]
    fn string_form_is_lossy_utf8() {
        assert_eq!(ByteView::from("Tom").to_string(), "Tom");
        assert_eq!(ByteView::from(vec![0xff, 0xfe]).to_string(), "\u{fffd}\u{fffd}");
    }
}

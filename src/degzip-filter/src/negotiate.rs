//! Content-Encoding negotiation for request bodies.

use http::{
    header::{Entry, HeaderName},
    HeaderMap, HeaderValue,
};

/// The header that announces a compressed request body.
pub const CONTENT_ENCODING: &str = "content-encoding";

/// A request header table which can be scanned and edited in place.
///
/// Tables preserve insertion order and may contain the same name
/// more than once. Names compare case-insensitively.
pub trait HeaderTable {
    /// Finds the first `name` header whose value satisfies `matches`
    /// and replaces that value with `value`.
    ///
    /// Returns whether a replacement took place.
    fn replace_first<P>(&mut self, name: &str, matches: P, value: &'static str) -> bool
    where
        P: FnMut(&[u8]) -> bool;
}

impl HeaderTable for HeaderMap {
    fn replace_first<P>(&mut self, name: &str, mut matches: P, value: &'static str) -> bool
    where
        P: FnMut(&[u8]) -> bool,
    {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            return false;
        };
        let Entry::Occupied(mut entry) = self.entry(name) else {
            return false;
        };

        match entry.iter_mut().find(|v| matches(v.as_bytes())) {
            Some(v) => {
                *v = HeaderValue::from_static(value);
                true
            }
            None => false,
        }
    }
}

impl HeaderTable for [(String, String)] {
    fn replace_first<P>(&mut self, name: &str, mut matches: P, value: &'static str) -> bool
    where
        P: FnMut(&[u8]) -> bool,
    {
        let found = self
            .iter_mut()
            .find(|(k, v)| k.eq_ignore_ascii_case(name) && matches(v.as_bytes()));

        match found {
            Some((_, v)) => {
                value.clone_into(v);
                true
            }
            None => false,
        }
    }
}

impl HeaderTable for Vec<(String, String)> {
    #[inline]
    fn replace_first<P>(&mut self, name: &str, matches: P, value: &'static str) -> bool
    where
        P: FnMut(&[u8]) -> bool,
    {
        self.as_mut_slice().replace_first(name, matches, value)
    }
}

/// Whether a request body should be inflated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// The body is gzip-encoded; the header now says `identity`.
    Applicable,
    /// The body is left alone.
    NotApplicable,
}

impl Negotiation {
    /// Whether the body will be inflated.
    #[inline]
    pub fn is_applicable(self) -> bool {
        self == Self::Applicable
    }
}

/// Inspects the request headers for a gzip-encoded body.
///
/// The first `Content-Encoding: gzip` entry is rewritten to
/// `identity` since the body will no longer be compressed once it
/// leaves the filter. Any other encoding, including lists such as
/// `gzip, br`, is not handled and leaves the headers untouched.
pub fn negotiate<H>(headers: &mut H) -> Negotiation
where
    H: HeaderTable + ?Sized,
{
    let rewritten = headers.replace_first(
        CONTENT_ENCODING,
        |value| value.eq_ignore_ascii_case(b"gzip"),
        "identity",
    );

    if rewritten {
        log::debug!("request body is gzip-encoded");
        Negotiation::Applicable
    } else {
        Negotiation::NotApplicable
    }
}

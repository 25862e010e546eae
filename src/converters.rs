use bytes::Bytes;

use crate::cache::parse_charset;
use crate::error::{Error, Result};
use crate::request::ResponseConverter;
use crate::transport::NetworkResponse;

/// Hands the raw response body through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

impl ResponseConverter<Bytes> for BytesConverter {
    fn convert(&self, response: &NetworkResponse) -> Result<Bytes> {
        Ok(response.data.clone())
    }
}

/// Decodes the body as text, honoring the `Content-Type` charset.
///
/// UTF-8 and ISO-8859-1 are decoded exactly; any other declared charset is
/// decoded as UTF-8 with replacement characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl ResponseConverter<String> for StringConverter {
    fn convert(&self, response: &NetworkResponse) -> Result<String> {
        let charset = parse_charset(&response.headers);
        decode_text(&response.data, &charset)
    }
}

fn decode_text(data: &[u8], charset: &str) -> Result<String> {
    if charset.eq_ignore_ascii_case("utf-8")
        || charset.eq_ignore_ascii_case("utf8")
        || charset.eq_ignore_ascii_case("us-ascii")
    {
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::parse(format!("body is not valid {charset}")))
    } else if charset.eq_ignore_ascii_case("iso-8859-1")
        || charset.eq_ignore_ascii_case("latin1")
    {
        // every latin-1 byte maps to the code point of the same value
        Ok(data.iter().map(|&b| b as char).collect())
    } else {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

/// Decodes the body as JSON into any deserializable type.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy)]
pub struct JsonConverter<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[cfg(feature = "json")]
impl<T> JsonConverter<T> {
    /// Creates the converter.
    pub fn new() -> Self {
        Self { _marker: std::marker::PhantomData }
    }
}

#[cfg(feature = "json")]
impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl<T> ResponseConverter<T> for JsonConverter<T>
where
    T: serde::de::DeserializeOwned + Send + Sync,
{
    fn convert(&self, response: &NetworkResponse) -> Result<T> {
        serde_json::from_slice(&response.data)
            .map_err(|err| Error::parse(err.to_string()))
    }
}

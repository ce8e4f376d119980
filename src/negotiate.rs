//! Post-execution content negotiation for synchronous calls.

use crate::capture::ResponseCapture;
use crate::sniff::detect_content_type;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

/// Content type used when the body looks like a JSON object
pub const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Fill in the headers a function may have left out.
///
/// - a missing or empty `Content-Type` is derived from the body: `{` as
///   first byte means JSON, anything else goes through the content sniffer
/// - `Content-Length` is always the exact buffered length, replacing any
///   value the function set
pub fn negotiate(capture: &mut ResponseCapture) {
    let has_content_type = capture
        .headers()
        .get(CONTENT_TYPE)
        .is_some_and(|v| !v.is_empty());

    if !has_content_type {
        let content_type = if capture.body().first() == Some(&b'{') {
            JSON_UTF8
        } else {
            detect_content_type(capture.body())
        };
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    let len = capture.len();
    capture
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::io::Write;

    fn capture_with(body: &[u8]) -> ResponseCapture {
        let mut capture = ResponseCapture::detached();
        capture.write_all(body).unwrap();
        capture
    }

    #[test]
    fn test_json_object_body() {
        let mut capture = capture_with(br#"{"a":1}"#);
        negotiate(&mut capture);
        assert_eq!(capture.headers()[CONTENT_TYPE], JSON_UTF8);
        assert_eq!(capture.headers()[CONTENT_LENGTH], "7");
    }

    #[test]
    fn test_plain_body_is_sniffed() {
        let mut capture = capture_with(b"hello world");
        negotiate(&mut capture);
        assert_eq!(
            capture.headers()[CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(capture.headers()[CONTENT_LENGTH], "11");
    }

    #[test]
    fn test_preset_content_type_wins() {
        let mut capture = capture_with(br#"{"a":1}"#);
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/x-custom"));
        negotiate(&mut capture);
        assert_eq!(capture.headers()[CONTENT_TYPE], "text/x-custom");
    }

    #[test]
    fn test_empty_content_type_is_replaced() {
        let mut capture = capture_with(b"<html><p>x");
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(""));
        negotiate(&mut capture);
        assert_eq!(capture.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[test]
    fn test_stale_content_length_is_overwritten() {
        let mut capture = ResponseCapture::new(
            crate::buffer_pool::PooledBuffer::unpooled(),
            HeaderMap::new(),
        );
        capture
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("9999"));
        capture.write_all(b"abc").unwrap();
        negotiate(&mut capture);
        assert_eq!(capture.headers()[CONTENT_LENGTH], "3");
        assert_eq!(capture.headers().get_all(CONTENT_LENGTH).iter().count(), 1);
    }

    #[test]
    fn test_empty_body() {
        let mut capture = capture_with(b"");
        negotiate(&mut capture);
        assert_eq!(capture.headers()[CONTENT_LENGTH], "0");
        assert!(!capture.headers()[CONTENT_TYPE].is_empty());
    }
}

use std::io;

use bytes::{BufMut, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

use crate::ResponseBody;

/// The response being built by redirectors and handlers.
///
/// Everything is buffered; the server turns the writer into an
/// `http::Response` once dispatch returns. Session cookies are kept apart
/// from the other headers so a session saved twice in one request emits one
/// `Set-Cookie` header.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<(String, HeaderValue)>,
    body: BytesMut,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), cookies: Vec::new(), body: BytesMut::new() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replaces any value already set for `name`.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Sets the `Set-Cookie` header for cookie `name`, replacing an earlier
    /// one for the same cookie.
    pub fn set_cookie(&mut self, name: &str, value: HeaderValue) {
        match self.cookies.iter_mut().find(|(cookie, _)| cookie == name) {
            Some(slot) => slot.1 = value,
            None => self.cookies.push((name.to_owned(), value)),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&HeaderValue> {
        self.cookies.iter().find(|(cookie, _)| cookie == name).map(|(_, value)| value)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.body.put_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        let Self { status, mut headers, cookies, body } = self;

        if !body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, sniff_content_type(&body));
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        for (_, cookie) in cookies {
            headers.append(SET_COOKIE, cookie);
        }

        let mut response = Response::new(ResponseBody::once(body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn sniff_content_type(body: &[u8]) -> HeaderValue {
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).map_or(body, |i| &body[i..]);
    if start.first() == Some(&b'<') {
        HeaderValue::from_static("text/html; charset=utf-8")
    } else {
        HeaderValue::from_static("text/plain; charset=utf-8")
    }
}

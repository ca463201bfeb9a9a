use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use bytes::Bytes;
use http::header::{
    CONNECTION, CONTENT_LENGTH, HOST, HeaderName, HeaderValue, TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method, Uri};

use crate::body::COPY_BUFFER_SIZE;

pub enum RequestBody {
    Buffered(Bytes),
    /// A live reader. It is consumed by the first attempt and can never be
    /// replayed, so requests carrying one are not retried.
    Stream(Box<dyn Read + Send>),
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::Buffered(Bytes::new())
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(bytes) => formatter
                .debug_tuple("Buffered")
                .field(&bytes.len())
                .finish(),
            Self::Stream(_) => formatter.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connection_close: bool,
    timeout: Option<Duration>,
    body: RequestBody,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            connection_close: false,
            timeout: None,
            body: RequestBody::default(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn head(uri: Uri) -> Self {
        Self::new(Method::HEAD, uri)
    }

    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: Uri) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn delete(uri: Uri) -> Self {
        Self::new(Method::DELETE, uri)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    pub fn body_stream(mut self, reader: impl Read + Send + 'static) -> Self {
        self.body = RequestBody::Stream(Box::new(reader));
        self
    }

    /// Bounds connection acquisition for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn body_ref(&self) -> &RequestBody {
        &self.body
    }

    pub fn is_body_stream(&self) -> bool {
        matches!(self.body, RequestBody::Stream(_))
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    pub fn set_connection_close(&mut self, connection_close: bool) {
        self.connection_close = connection_close;
    }

    /// True when the caller asked for the connection to be closed, either with
    /// the flag or an explicit `Connection: close` header.
    pub fn connection_close(&self) -> bool {
        self.connection_close || has_close_token(&self.headers)
    }

    pub(crate) fn write_to<W: Write>(
        &mut self,
        writer: &mut W,
        options: &WriteOptions<'_>,
    ) -> io::Result<()> {
        let target = request_target(&self.uri, options.normalize_path);
        write!(writer, "{} {} HTTP/1.1\r\n", self.method, target)?;

        if !self.headers.contains_key(HOST)
            && let Some(authority) = self.uri.authority()
        {
            write_header(writer, HOST.as_str(), authority.as_str().as_bytes(), options)?;
        }
        if !self.headers.contains_key(USER_AGENT) && !options.user_agent.is_empty() {
            write_header(
                writer,
                USER_AGENT.as_str(),
                options.user_agent.as_bytes(),
                options,
            )?;
        }
        for (name, value) in &self.headers {
            if *name == CONTENT_LENGTH
                || *name == TRANSFER_ENCODING
                || (*name == CONNECTION && self.connection_close)
            {
                continue;
            }
            write_header(writer, name.as_str(), value.as_bytes(), options)?;
        }
        if self.connection_close {
            write_header(writer, CONNECTION.as_str(), b"close", options)?;
        }

        match &mut self.body {
            RequestBody::Buffered(bytes) => {
                if !bytes.is_empty() || !matches!(self.method, Method::GET | Method::HEAD) {
                    let length = bytes.len().to_string();
                    write_header(writer, CONTENT_LENGTH.as_str(), length.as_bytes(), options)?;
                }
                writer.write_all(b"\r\n")?;
                writer.write_all(bytes)?;
            }
            RequestBody::Stream(reader) => {
                write_header(writer, TRANSFER_ENCODING.as_str(), b"chunked", options)?;
                writer.write_all(b"\r\n")?;
                write_chunked(reader, writer)?;
            }
        }
        Ok(())
    }
}

pub(crate) struct WriteOptions<'a> {
    pub(crate) user_agent: &'a str,
    pub(crate) normalize_header_names: bool,
    pub(crate) normalize_path: bool,
}

/// Sets `Connection: close` on a request for the lifetime of the guard.
///
/// The flag is only touched when the caller had not asked for closure
/// already, and it is cleared again on drop, on every exit path.
pub(crate) struct ForcedClose<'a> {
    request: &'a mut Request,
    forced: bool,
}

impl<'a> ForcedClose<'a> {
    pub(crate) fn new(request: &'a mut Request, force: bool) -> Self {
        let forced = force && !request.connection_close();
        if forced {
            request.connection_close = true;
        }
        Self { request, forced }
    }

    pub(crate) fn forced(&self) -> bool {
        self.forced
    }
}

impl Deref for ForcedClose<'_> {
    type Target = Request;

    fn deref(&self) -> &Request {
        &*self.request
    }
}

impl DerefMut for ForcedClose<'_> {
    fn deref_mut(&mut self) -> &mut Request {
        &mut *self.request
    }
}

impl Drop for ForcedClose<'_> {
    fn drop(&mut self) {
        if self.forced {
            self.request.connection_close = false;
        }
    }
}

pub(crate) fn has_close_token(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|text| {
                text.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("close"))
            })
            .unwrap_or(false)
    })
}

fn write_header<W: Write>(
    writer: &mut W,
    name: &str,
    value: &[u8],
    options: &WriteOptions<'_>,
) -> io::Result<()> {
    if options.normalize_header_names {
        writer.write_all(canonical_header_name(name).as_bytes())?;
    } else {
        writer.write_all(name.as_bytes())?;
    }
    writer.write_all(b": ")?;
    writer.write_all(value)?;
    writer.write_all(b"\r\n")
}

fn write_chunked<W: Write>(reader: &mut Box<dyn Read + Send>, writer: &mut W) -> io::Result<()> {
    let mut chunk = [0_u8; COPY_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        write!(writer, "{read:x}\r\n")?;
        writer.write_all(&chunk[..read])?;
        writer.write_all(b"\r\n")?;
    }
    writer.write_all(b"0\r\n\r\n")
}

/// `content-type` -> `Content-Type`.
pub(crate) fn canonical_header_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper = true;
    for character in name.chars() {
        if upper {
            canonical.push(character.to_ascii_uppercase());
        } else {
            canonical.push(character.to_ascii_lowercase());
        }
        upper = character == '-';
    }
    canonical
}

fn request_target(uri: &Uri, normalize: bool) -> String {
    let path = match uri.path() {
        "" => "/",
        path => path,
    };
    let path = if normalize {
        normalize_path(path)
    } else {
        path.to_owned()
    };
    match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}

/// Collapses repeated slashes and resolves `.` and `..` segments.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = path.ends_with('/');
    for segment in path.split('/') {
        match segment {
            "" => {}
            "." => trailing_slash = true,
            ".." => {
                segments.pop();
                trailing_slash = true;
            }
            segment => {
                segments.push(segment);
                trailing_slash = false;
            }
        }
    }
    if path.ends_with('/') {
        trailing_slash = true;
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() || trailing_slash {
        normalized.push('/');
    }
    normalized
}

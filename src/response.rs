use std::io::{BufRead, Read};

use http::header::{CONNECTION, CONTENT_LENGTH, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};

use crate::body::BodyLength;
use crate::error::HostCopyError;
use crate::request::has_close_token;

const MAX_HEADER_BYTES: u64 = 64 * 1024;
const MAX_HEADERS: usize = 64;

/// Response metadata for one call. The body itself goes to the caller's sink;
/// only its length is kept here.
#[derive(Clone, Debug, Default)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body_length: u64,
    skip_body: bool,
    connection_close: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response that only wants the header; the body is left on the wire
    /// and the connection is never reused for it.
    pub fn headers_only() -> Self {
        Self {
            skip_body: true,
            ..Self::default()
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body bytes delivered to the sink by the last call, chunk framing
    /// excluded. Only meaningful once the call has returned.
    pub fn body_length(&self) -> u64 {
        self.body_length
    }

    pub fn skip_body(&self) -> bool {
        self.skip_body
    }

    pub fn set_skip_body(&mut self, skip_body: bool) {
        self.skip_body = skip_body;
    }

    /// True when the server asked for the connection to be closed.
    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    /// Blanks the response, keeping only the caller's skip-body choice.
    pub(crate) fn reset(&mut self) {
        let skip_body = self.skip_body;
        *self = Self {
            skip_body,
            ..Self::default()
        };
    }

    pub(crate) fn set_body_length(&mut self, body_length: u64) {
        self.body_length = body_length;
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub(crate) fn status_forbids_body(&self) -> bool {
        self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
    }

    pub(crate) fn body_framing(&self) -> Result<BodyLength, HostCopyError> {
        if let Some(last_coding) = self
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .last()
        {
            return Ok(if last_coding.eq_ignore_ascii_case("chunked") {
                BodyLength::Chunked
            } else {
                BodyLength::CloseDelimited
            });
        }

        let mut declared = None;
        for value in self.headers.get_all(CONTENT_LENGTH) {
            let length = value
                .to_str()
                .ok()
                .and_then(|text| text.trim().parse::<u64>().ok())
                .ok_or_else(|| HostCopyError::invalid_header("malformed content-length"))?;
            match declared {
                Some(previous) if previous != length => {
                    return Err(HostCopyError::invalid_header(
                        "conflicting content-length values",
                    ));
                }
                _ => declared = Some(length),
            }
        }
        Ok(declared.map_or(BodyLength::CloseDelimited, BodyLength::Fixed))
    }

    /// Reads and parses one response header block, replacing status, version
    /// and headers.
    pub(crate) fn read_head<R: BufRead + ?Sized>(
        &mut self,
        source: &mut R,
    ) -> Result<(), HostCopyError> {
        let block = read_head_block(source)?;

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut raw_headers);
        match parsed.parse(&block) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(HostCopyError::invalid_header("incomplete response header"));
            }
            Err(error) => return Err(HostCopyError::invalid_header(error.to_string())),
        }

        let code = parsed
            .code
            .ok_or_else(|| HostCopyError::invalid_header("missing status code"))?;
        self.status = StatusCode::from_u16(code)
            .map_err(|_| HostCopyError::invalid_header(format!("invalid status code {code}")))?;
        self.version = match parsed.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        self.headers.clear();
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
                HostCopyError::invalid_header(format!("invalid header name {}", header.name))
            })?;
            let value = HeaderValue::from_bytes(header.value).map_err(|_| {
                HostCopyError::invalid_header(format!("invalid value for header {}", header.name))
            })?;
            self.headers.append(name, value);
        }

        self.connection_close = has_close_token(&self.headers)
            || (self.version == Version::HTTP_10 && !has_keep_alive_token(&self.headers));
        Ok(())
    }

    pub(crate) fn force_connection_close(&mut self) {
        self.connection_close = true;
    }
}

fn has_keep_alive_token(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|text| {
                text.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("keep-alive"))
            })
            .unwrap_or(false)
    })
}

fn read_head_block<R: BufRead + ?Sized>(source: &mut R) -> Result<Vec<u8>, HostCopyError> {
    let mut block = Vec::with_capacity(512);
    loop {
        let line_start = block.len();
        let remaining = MAX_HEADER_BYTES.saturating_sub(line_start as u64);
        if remaining == 0 {
            return Err(HostCopyError::invalid_header(
                "response header exceeds 64 KiB",
            ));
        }

        let read = Read::take(&mut *source, remaining)
            .read_until(b'\n', &mut block)
            .map_err(|source| HostCopyError::ReadHeader { source })?;
        if read == 0 {
            if block.is_empty() {
                return Err(HostCopyError::no_response_bytes());
            }
            return Err(HostCopyError::invalid_header(
                "connection closed inside response header",
            ));
        }

        let line = &block[line_start..];
        if !line.ends_with(b"\n") {
            if block.len() as u64 >= MAX_HEADER_BYTES {
                return Err(HostCopyError::invalid_header(
                    "response header exceeds 64 KiB",
                ));
            }
            return Err(HostCopyError::invalid_header(
                "connection closed inside response header",
            ));
        }
        if line == b"\r\n" || line == b"\n" {
            if line_start == 0 {
                // Stray CRLF left over before the status line.
                block.clear();
                continue;
            }
            return Ok(block);
        }
    }
}

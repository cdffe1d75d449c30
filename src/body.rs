//! Body reader: fixed-length and chunked transfer-encoding decode with
//! trailers (§4.3).
//!
//! Built on [`crate::scanner::Scanner`], swapping its split function between
//! line mode and fixed-count mode the way the teacher's memcached parser
//! swaps between command-line and data-block reads in
//! `protocols/memcached/handler.rs`.

use crate::error::BodyError;
use crate::headers::{is_forbidden_trailer_header, Headers};
use crate::scanner::{RecvProvider, ScanLines, ScanNumBytes, ScanOutcome, Scanner};

/// Which decoder applies to a request/response, selected from its headers
/// (§4.3 "Selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Empty,
    Fixed(usize),
    Chunked,
}

/// Inspect `transfer-encoding`/`content-length` to choose a decode strategy.
pub fn select_mode(headers: &Headers, max_size: usize) -> Result<BodyMode, BodyError> {
    if let Some(te) = headers.get("transfer-encoding") {
        if te
            .rsplit(',')
            .next()
            .unwrap_or("")
            .trim()
            .eq_ignore_ascii_case("chunked")
        {
            return Ok(BodyMode::Chunked);
        }
        return Err(BodyError::BadReadCount);
    }

    if let Some(cl) = headers.get("content-length") {
        let n: usize = cl.trim().parse().map_err(|_| BodyError::BadReadCount)?;
        if n > max_size {
            return Err(BodyError::TooLong);
        }
        return Ok(BodyMode::Fixed(n));
    }

    Ok(BodyMode::Empty)
}

/// Decode the body for a request/response whose headers select `mode`,
/// pulling bytes from `scanner`. On a chunked body, `headers` is rewritten
/// in place per §4.3 step 6.
pub fn read_body<P: RecvProvider>(
    mode: BodyMode,
    headers: &mut Headers,
    scanner: &mut Scanner<P>,
    max_size: usize,
) -> Result<Vec<u8>, BodyError> {
    match mode {
        BodyMode::Empty => Ok(Vec::new()),
        BodyMode::Fixed(n) => read_fixed(scanner, n),
        BodyMode::Chunked => read_chunked(scanner, headers, max_size),
    }
}

fn read_fixed<P: RecvProvider>(scanner: &mut Scanner<P>, n: usize) -> Result<Vec<u8>, BodyError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut split = ScanNumBytes::new(n);
    match scanner.scan(&mut split) {
        ScanOutcome::Token(start, len) => Ok(scanner.token(start, len).to_vec()),
        ScanOutcome::Error(e) => Err(e.into()),
    }
}

fn read_line<P: RecvProvider>(scanner: &mut Scanner<P>) -> Result<Vec<u8>, BodyError> {
    match scanner.scan(&mut ScanLines) {
        ScanOutcome::Token(start, len) => Ok(scanner.token(start, len).to_vec()),
        ScanOutcome::Error(e) => Err(e.into()),
    }
}

fn read_chunked<P: RecvProvider>(
    scanner: &mut Scanner<P>,
    headers: &mut Headers,
    max_size: usize,
) -> Result<Vec<u8>, BodyError> {
    let mut body = Vec::new();

    loop {
        let size_line = read_line(scanner)?;
        let size_str = match size_line.iter().position(|&b| b == b';') {
            Some(pos) => &size_line[..pos],
            None => &size_line[..],
        };
        let size_str = std::str::from_utf8(size_str).map_err(|_| BodyError::BadReadCount)?;
        let chunk_size =
            usize::from_str_radix(size_str.trim(), 16).map_err(|_| BodyError::BadReadCount)?;

        if chunk_size == 0 {
            return read_trailers(scanner, headers, body);
        }

        if body.len() + chunk_size > max_size {
            return Err(BodyError::TooLong);
        }

        let chunk = read_fixed(scanner, chunk_size)?;
        body.extend_from_slice(&chunk);

        let trailing_crlf = read_line(scanner)?;
        if !trailing_crlf.is_empty() {
            return Err(BodyError::BadReadCount);
        }
    }
}

fn read_trailers<P: RecvProvider>(
    scanner: &mut Scanner<P>,
    headers: &mut Headers,
    body: Vec<u8>,
) -> Result<Vec<u8>, BodyError> {
    loop {
        let line = read_line(scanner)?;
        if line.is_empty() {
            headers.finish_chunked_trailer(body.len());
            return Ok(body);
        }

        let line = std::str::from_utf8(&line).map_err(|_| BodyError::BadReadCount)?;
        let colon = line.find(':').ok_or(BodyError::BadReadCount)?;
        let name = line[..colon].trim();
        if name.is_empty() || name.starts_with(|c: char| c.is_whitespace()) {
            return Err(BodyError::BadReadCount);
        }
        let value = line[colon + 1..].trim_start();
        let lower = name.to_ascii_lowercase();
        if is_forbidden_trailer_header(&lower) {
            return Err(BodyError::BadReadCount);
        }
        headers.set(&lower, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;

    struct Cursor {
        data: Vec<u8>,
        pos: usize,
    }

    impl Cursor {
        fn new(data: &[u8]) -> Self {
            Cursor {
                data: data.to_vec(),
                pos: 0,
            }
        }
    }

    impl RecvProvider for Cursor {
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ScanError> {
            let remaining = self.data.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn fixed_length_reads_exact_payload() {
        let mut headers = Headers::new();
        headers.set("content-length", "5");
        let cursor = Cursor::new(b"hello");
        let mut scanner = Scanner::new(cursor, 1024);
        let mode = select_mode(&headers, 1000).unwrap();
        assert_eq!(mode, BodyMode::Fixed(5));
        let body = read_body(mode, &mut headers, &mut scanner, 1000).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn fixed_length_over_max_is_too_long() {
        let mut headers = Headers::new();
        headers.set("content-length", "100000");
        assert_eq!(select_mode(&headers, 1000), Err(BodyError::TooLong));
    }

    #[test]
    fn chunked_decode_yields_concatenated_chunks_and_trailer() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");
        headers.set("trailer", "x-trailer");
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\nx-trailer: v\r\n\r\n";
        let cursor = Cursor::new(wire);
        let mut scanner = Scanner::new(cursor, 8192);
        let mode = select_mode(&headers, 1000).unwrap();
        assert_eq!(mode, BodyMode::Chunked);
        let body = read_body(mode, &mut headers, &mut scanner, 1000).unwrap();
        assert_eq!(body, b"hello world");
        assert_eq!(headers.get("content-length"), Some("11"));
        assert_eq!(headers.get("x-trailer"), Some("v"));
        assert!(!headers.contains("trailer"));
        assert!(!headers.contains("transfer-encoding"));
    }

    #[test]
    fn chunked_rejects_forbidden_trailer_header() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");
        let wire = b"2\r\nhi\r\n0\r\ncontent-length: 99\r\n\r\n";
        let cursor = Cursor::new(wire);
        let mut scanner = Scanner::new(cursor, 8192);
        let mode = select_mode(&headers, 1000).unwrap();
        let err = read_body(mode, &mut headers, &mut scanner, 1000).unwrap_err();
        assert_eq!(err, BodyError::BadReadCount);
    }

    #[test]
    fn chunked_extension_is_stripped() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");
        let wire = b"5;ext=1\r\nhello\r\n0\r\n\r\n";
        let cursor = Cursor::new(wire);
        let mut scanner = Scanner::new(cursor, 8192);
        let mode = select_mode(&headers, 1000).unwrap();
        let body = read_body(mode, &mut headers, &mut scanner, 1000).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn chunked_over_max_is_too_long() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");
        let wire = b"a\r\n0123456789\r\n0\r\n\r\n";
        let cursor = Cursor::new(wire);
        let mut scanner = Scanner::new(cursor, 8192);
        let mode = select_mode(&headers, 1000).unwrap();
        let err = read_body(mode, &mut headers, &mut scanner, 5).unwrap_err();
        assert_eq!(err, BodyError::TooLong);
    }

    #[test]
    fn no_framing_headers_is_empty_body() {
        let headers = Headers::new();
        assert_eq!(select_mode(&headers, 1000).unwrap(), BodyMode::Empty);
    }
}

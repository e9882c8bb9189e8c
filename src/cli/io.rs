//! Line-delimited JSON I/O
//!
//! - Input: one `RpcRequest` object per line
//! - Output: one `RpcResponse` object per line
//! - UTF-8 only; blank lines are ignored

use std::io::{BufRead, Write};

use serde::Serialize;

use super::errors::{CliError, CliResult};
use crate::rpc::RpcRequest;

/// One input line: a request, or the reason it could not be parsed
#[derive(Debug)]
pub enum RequestLine {
    Request(RpcRequest),
    Malformed(String),
}

/// Iterate the request lines of `reader`.
///
/// A line that is not a valid request is yielded as `Malformed`; only a
/// read failure ends the stream with an error.
pub fn read_requests<R: BufRead>(reader: R) -> impl Iterator<Item = CliResult<RequestLine>> {
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| {
            let line = line.map_err(CliError::from)?;
            Ok(match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => RequestLine::Request(request),
                Err(e) => RequestLine::Malformed(e.to_string()),
            })
        })
}

/// Write one value as a single JSON line and flush
pub fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> CliResult<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write a CLI-level error line
pub fn write_error<W: Write>(writer: &mut W, error: &CliError) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": error.code_str(),
        "message": error.message()
    });
    write_json(writer, &response)
}

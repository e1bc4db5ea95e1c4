//! The persistent request loop.
//!
//! Consumes line-delimited JSON requests and produces exactly one response
//! line per non-blank request line, in arrival order, flushed immediately so
//! a supervising process can read responses incrementally.  No request
//! failure ever terminates the loop; it ends only when the input stream is
//! exhausted.

use std::io::{BufRead, Write};

use serde_json::Value;
use tracing::{info, warn};

use framecreate_diffusion::Engine;

use crate::cache::PipelineCache;
use crate::config::Config;
use crate::error::WorkerError;
use crate::executor::run_generate;
use crate::protocol::{GenerateRequest, Response};

/// Serve requests from `input` until end of stream.
pub fn serve<R, W>(
    engine: &dyn Engine,
    config: &Config,
    input: R,
    output: &mut W,
) -> std::io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut cache = PipelineCache::new();
    for line in input.lines() {
        // A line that is not valid UTF-8 cannot be valid JSON either;
        // report it like any other malformed line instead of tearing the
        // loop down mid-stream.
        let line = match line {
            Ok(line) => line,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                let response = Response::from_error(&WorkerError::InvalidJson(serde_json::Error::io(err)));
                write_response(output, &response)?;
                continue;
            }
            Err(err) => return Err(err),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(engine, &mut cache, config, line);
        write_response(output, &response)?;
    }
    info!("request stream exhausted, shutting down");
    Ok(())
}

/// Process one request line.  Every failure is converted to an error
/// response here; nothing escapes to the loop.
fn handle_line(
    engine: &dyn Engine,
    cache: &mut PipelineCache,
    config: &Config,
    line: &str,
) -> Response {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => return Response::from_error(&WorkerError::InvalidJson(err)),
    };

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    match action.as_str() {
        "reload" => {
            cache.clear();
            engine.reclaim_memory();
            info!("pipeline cache cleared");
            Response::ok_empty()
        }
        "generate" => {
            let request: GenerateRequest = match serde_json::from_value(value) {
                Ok(request) => request,
                Err(err) => return Response::error_message(err.to_string()),
            };
            match run_generate(engine, cache, config, &request) {
                Ok(path) => Response::ok(path.display().to_string()),
                Err(err) => {
                    warn!(error = %err, "generate request failed");
                    Response::from_error(&err)
                }
            }
        }
        _ => Response::from_error(&WorkerError::UnknownAction(action)),
    }
}

/// Write one response line and flush it.
pub fn write_response<W: Write>(output: &mut W, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *output, response)?;
    output.write_all(b"\n")?;
    output.flush()
}

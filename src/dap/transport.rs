//! DAP transport abstraction layer.
//! Supports both stdio (editor spawns the adapter) and TCP (server mode).
//!
//! Reading and writing are split so that the editor reader runs on its own
//! thread while the session writes responses and events.

use crate::dap::tracer::FileTracer;
use anyhow::anyhow;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

/// Source of Content-Length framed DAP messages.
pub trait MessageReader: Send {
    fn read_message(&mut self) -> anyhow::Result<Value>;
}

/// Sink of Content-Length framed DAP messages.
pub trait MessageWriter: Send {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()>;
}

pub struct ContentLengthReader<R> {
    reader: R,
    tracer: Option<FileTracer>,
}

impl<R: BufRead + Send> ContentLengthReader<R> {
    pub fn new(reader: R, tracer: Option<FileTracer>) -> Self {
        Self { reader, tracer }
    }
}

impl<R: BufRead + Send> MessageReader for ContentLengthReader<R> {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(anyhow!("DAP connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        if let Some(tracer) = &self.tracer {
            tracer.inbound(&msg);
        }
        Ok(msg)
    }
}

pub struct ContentLengthWriter<W> {
    writer: W,
    tracer: Option<FileTracer>,
}

impl<W: Write + Send> ContentLengthWriter<W> {
    pub fn new(writer: W, tracer: Option<FileTracer>) -> Self {
        Self { writer, tracer }
    }
}

impl<W: Write + Send> MessageWriter for ContentLengthWriter<W> {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        if let Some(tracer) = &self.tracer {
            tracer.outbound(message);
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }
}

pub type StdioReader = ContentLengthReader<BufReader<std::io::Stdin>>;
pub type StdioWriter = ContentLengthWriter<std::io::Stdout>;

/// Transport over the adapter's own stdin/stdout.
pub fn stdio(tracer: Option<FileTracer>) -> (StdioReader, StdioWriter) {
    (
        ContentLengthReader::new(BufReader::new(std::io::stdin()), tracer.clone()),
        ContentLengthWriter::new(std::io::stdout(), tracer),
    )
}

pub type TcpReader = ContentLengthReader<BufReader<TcpStream>>;
pub type TcpWriter = ContentLengthWriter<TcpStream>;

/// Transport over an accepted editor connection.
pub fn tcp(stream: TcpStream, tracer: Option<FileTracer>) -> anyhow::Result<(TcpReader, TcpWriter)> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((
        ContentLengthReader::new(reader, tracer.clone()),
        ContentLengthWriter::new(stream, tracer),
    ))
}

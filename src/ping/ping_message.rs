use std::fmt::{Display, Formatter};
use std::io;
use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};


pub const PING_DELIMITER: u8 = b'\n';
const PING_PREFIX: &str = "ping ";
const RECEIVER_SEPARATOR: char = '>';
const SEQ_SEPARATOR: char = '#';


/// A single ping. On the wire, it is one ASCII line: `ping <sender>><receiver>#<seq>\n`, e.g.
///  `ping AA>BB#1\n`.
///
/// Sender and receiver are short tokens identifying the two ends of the stream (typically suffixes
///  of their node ids). They must be non-empty and must not contain whitespace, `>` or `#`, which
///  is checked on construction so that every message can be decoded from its encoding.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PingMessage {
    sender: String,
    receiver: String,
    seq: u64,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum PingDecodeError {
    #[error("line does not start with \"ping \"")]
    MissingPrefix,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("missing separator {0:?}")]
    MissingSeparator(char),
    #[error("invalid token {0:?}")]
    InvalidToken(String),
    #[error("invalid sequence number {0:?}")]
    InvalidSeq(String),
    #[error("line is not terminated by the delimiter")]
    MissingDelimiter,
}

impl PingMessage {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, seq: u64) -> Result<PingMessage, PingDecodeError> {
        let sender = sender.into();
        let receiver = receiver.into();
        for token in [&sender, &receiver] {
            if !is_valid_token(token) {
                return Err(PingDecodeError::InvalidToken(token.clone()));
            }
        }

        Ok(PingMessage {
            sender,
            receiver,
            seq,
        })
    }

    /// The same sender and receiver with a different sequence number
    pub fn with_seq(&self, seq: u64) -> PingMessage {
        PingMessage {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            seq,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The message's wire representation, including the trailing delimiter
    pub fn encode(&self) -> String {
        // NB: the trailing delimiter is what allows the receiver to read the message
        format!("{}{}{}{}{}{}{}", PING_PREFIX, self.sender, RECEIVER_SEPARATOR, self.receiver, SEQ_SEPARATOR, self.seq, PING_DELIMITER as char)
    }

    /// Decodes a single delimited line as produced by [PingMessage::encode]
    pub fn decode(line: &str) -> Result<PingMessage, PingDecodeError> {
        let line = line.strip_suffix(PING_DELIMITER as char)
            .ok_or(PingDecodeError::MissingDelimiter)?;
        let rest = line.strip_prefix(PING_PREFIX)
            .ok_or(PingDecodeError::MissingPrefix)?;
        let (tokens, seq) = rest.rsplit_once(SEQ_SEPARATOR)
            .ok_or(PingDecodeError::MissingSeparator(SEQ_SEPARATOR))?;
        let (sender, receiver) = tokens.split_once(RECEIVER_SEPARATOR)
            .ok_or(PingDecodeError::MissingSeparator(RECEIVER_SEPARATOR))?;

        let seq = if seq.bytes().all(|b| b.is_ascii_digit()) {
            u64::from_str(seq).map_err(|_| PingDecodeError::InvalidSeq(seq.to_string()))?
        }
        else {
            return Err(PingDecodeError::InvalidSeq(seq.to_string()));
        };

        PingMessage::new(sender, receiver, seq)
    }
}

impl Display for PingMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}#{}", self.sender, RECEIVER_SEPARATOR, self.receiver, self.seq)
    }
}

pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_graphic() && c != RECEIVER_SEPARATOR && c != SEQ_SEPARATOR)
}


/// What reading a line from a stream produced
#[derive(Debug, Eq, PartialEq)]
pub enum ReadPing {
    Ping(PingMessage),
    /// a complete line that is not a valid ping
    Malformed { line: String, error: PingDecodeError },
}

/// Reads delimited lines from the reading half of a stream, one ping per line.
///
/// A read only completes once a full line including its delimiter is available. Bytes of a
///  partial line are kept until the rest of the line arrives; if the stream ends in the middle
///  of a line, that is an error rather than a (partial) message.
pub struct PingReader<R: AsyncRead + Unpin> {
    reader: BufReader<R>,
    max_line_len: usize,
    buf: Vec<u8>,
}

impl <R: AsyncRead + Unpin> PingReader<R> {
    pub fn new(reader: R, max_line_len: usize) -> PingReader<R> {
        PingReader {
            reader: BufReader::new(reader),
            max_line_len,
            buf: Vec::new(),
        }
    }

    /// Blocks until the next complete line is available.
    ///
    /// NB: This is cancellation safe: if the returned future is dropped before completion, the
    ///      part of the line that was read so far is kept for the next call.
    pub async fn read_ping(&mut self) -> io::Result<ReadPing> {
        loop {
            if self.buf.last() == Some(&PING_DELIMITER) {
                break;
            }

            let remaining = self.max_line_len.saturating_sub(self.buf.len());
            if remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, format!("line exceeds maximum length of {} bytes", self.max_line_len)));
            }

            let num_read = AsyncReadExt::take(&mut self.reader, remaining as u64)
                .read_until(PING_DELIMITER, &mut self.buf).await?;
            if num_read == 0 {
                let msg = if self.buf.is_empty() { "stream closed" } else { "stream closed in the middle of a line" };
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg));
            }
        }

        let line = std::mem::take(&mut self.buf);
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                let line = String::from_utf8_lossy(e.as_bytes()).into_owned();
                return Ok(ReadPing::Malformed { line, error: PingDecodeError::InvalidUtf8 });
            }
        };

        match PingMessage::decode(&line) {
            Ok(ping) => Ok(ReadPing::Ping(ping)),
            Err(error) => Ok(ReadPing::Malformed { line, error }),
        }
    }
}

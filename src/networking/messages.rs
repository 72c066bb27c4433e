use crate::constants::CONTROL_HEADER_BYTES;
use crate::networking::endpoint::Endpoint;
use std::fmt::Display;
use thiserror::Error;

/// Errors produced while decoding wire messages. A message failing to decode
/// is logged and dropped; nothing propagates past the handler.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("empty message")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{message} message is missing the <{field}> field")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },
    #[error("{message} message has a malformed <{field}> field: '{value}'")]
    InvalidField {
        message: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("control header is not valid ASCII text")]
    BinaryHeader,
}

///
/// The three UDP datagram types. Whitespace-separated ASCII, terminated by
/// the datagram boundary:
///
/// - `DISCOVERY <file_name> <total_chunks> <ttl> <origin_host>:<origin_port>`
/// - `RESPONSE <file_name> <declared_rate> <chunk_id>*`
/// - `REQUEST <file_name> <requester_stream_port> <chunk_id>+`
///
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Datagram {
    /// Flooded query for a file, answered directly to `origin`.
    Discovery {
        file_name: String,
        total_chunks: usize,
        ttl: u32,
        origin: Endpoint,
    },
    /// Advertisement of the chunks the sender holds, at its declared rate.
    Response {
        file_name: String,
        declared_rate: usize,
        chunk_ids: Vec<u32>,
    },
    /// Instruction to push the listed chunks to the sender's stream port.
    Request {
        file_name: String,
        stream_port: u16,
        chunk_ids: Vec<u32>,
    },
}

fn parse_field<T: std::str::FromStr>(
    token: Option<&str>,
    message: &'static str,
    field: &'static str,
) -> Result<T, WireError> {
    let token = token.ok_or(WireError::MissingField { message, field })?;
    token.parse().map_err(|_| WireError::InvalidField {
        message,
        field,
        value: token.to_string(),
    })
}

fn parse_chunk_ids<'a>(
    tokens: impl Iterator<Item = &'a str>,
    message: &'static str,
) -> Result<Vec<u32>, WireError> {
    tokens
        .map(|token| {
            token.parse().map_err(|_| WireError::InvalidField {
                message,
                field: "chunk_id",
                value: token.to_string(),
            })
        })
        .collect()
}

impl Datagram {
    /// Decodes one datagram. The payload must already be trimmed to the
    /// received length.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let mut tokens = text.split_whitespace();
        let command = tokens.next().ok_or(WireError::Empty)?;

        match command {
            "DISCOVERY" => Ok(Datagram::Discovery {
                file_name: parse_field(tokens.next(), "DISCOVERY", "file_name")?,
                total_chunks: parse_field(tokens.next(), "DISCOVERY", "total_chunks")?,
                ttl: parse_field(tokens.next(), "DISCOVERY", "ttl")?,
                origin: parse_field(tokens.next(), "DISCOVERY", "origin")?,
            }),
            "RESPONSE" => Ok(Datagram::Response {
                file_name: parse_field(tokens.next(), "RESPONSE", "file_name")?,
                declared_rate: parse_field(tokens.next(), "RESPONSE", "declared_rate")?,
                chunk_ids: parse_chunk_ids(tokens, "RESPONSE")?,
            }),
            "REQUEST" => {
                let file_name = parse_field(tokens.next(), "REQUEST", "file_name")?;
                let stream_port = parse_field(tokens.next(), "REQUEST", "stream_port")?;
                let chunk_ids = parse_chunk_ids(tokens, "REQUEST")?;
                if chunk_ids.is_empty() {
                    return Err(WireError::MissingField {
                        message: "REQUEST",
                        field: "chunk_id",
                    });
                }
                Ok(Datagram::Request {
                    file_name,
                    stream_port,
                    chunk_ids,
                })
            }
            other => Err(WireError::UnknownCommand(other.to_string())),
        }
    }
}

impl Display for Datagram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datagram::Discovery {
                file_name,
                total_chunks,
                ttl,
                origin,
            } => write!(f, "DISCOVERY {} {} {} {}", file_name, total_chunks, ttl, origin),
            Datagram::Response {
                file_name,
                declared_rate,
                chunk_ids,
            } => {
                write!(f, "RESPONSE {} {}", file_name, declared_rate)?;
                for chunk_id in chunk_ids {
                    write!(f, " {}", chunk_id)?;
                }
                Ok(())
            }
            Datagram::Request {
                file_name,
                stream_port,
                chunk_ids,
            } => {
                write!(f, "REQUEST {} {}", file_name, stream_port)?;
                for chunk_id in chunk_ids {
                    write!(f, " {}", chunk_id)?;
                }
                Ok(())
            }
        }
    }
}

///
/// The TCP control header announcing one chunk push:
/// `PUT <file_name> <chunk_id> <sender_declared_rate> <chunk_size>`,
/// NUL-padded to exactly [`CONTROL_HEADER_BYTES`]. The fixed size is a wire
/// contract shared with the receive side.
///
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PutHeader {
    pub file_name: String,
    pub chunk_id: u32,
    pub declared_rate: usize,
    pub chunk_size: usize,
}

impl PutHeader {
    /// Serializes the header into its fixed-size NUL-padded buffer.
    pub fn encode(&self) -> [u8; CONTROL_HEADER_BYTES] {
        let text = format!(
            "PUT {} {} {} {}",
            self.file_name, self.chunk_id, self.declared_rate, self.chunk_size
        );
        let mut buffer = [0u8; CONTROL_HEADER_BYTES];
        let len = text.len().min(CONTROL_HEADER_BYTES);
        buffer[..len].copy_from_slice(&text.as_bytes()[..len]);
        buffer
    }

    /// Decodes a full header buffer, ignoring the NUL padding.
    pub fn parse(buffer: &[u8]) -> Result<Self, WireError> {
        let text_end = buffer
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(buffer.len());
        let text = std::str::from_utf8(&buffer[..text_end]).map_err(|_| WireError::BinaryHeader)?;

        let mut tokens = text.split_whitespace();
        match tokens.next() {
            Some("PUT") => {}
            Some(other) => return Err(WireError::UnknownCommand(other.to_string())),
            None => return Err(WireError::Empty),
        }

        Ok(PutHeader {
            file_name: parse_field(tokens.next(), "PUT", "file_name")?,
            chunk_id: parse_field(tokens.next(), "PUT", "chunk_id")?,
            declared_rate: parse_field(tokens.next(), "PUT", "declared_rate")?,
            chunk_size: parse_field(tokens.next(), "PUT", "chunk_size")?,
        })
    }
}

//! Wire format: one line, `<section>;<secret>;<message-body>\n`.
//!
//! The body is everything after the second `;` and may itself contain `;`.

use crate::{errors::Error, Result};

pub const SEPARATOR: char = ';';

/// One parsed request line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingRequest {
    pub section: String,
    pub secret: String,
    pub payload: String,
}

/// Failure replies written back to the peer. Success is silent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    IllegalFormat,
    NoSuchSection,
    BadPassword,
}

impl Reply {
    pub fn text(self) -> &'static str {
        match self {
            Reply::IllegalFormat => "Illegal format...",
            Reply::NoSuchSection => "No such section...",
            Reply::BadPassword => "Bad password...",
        }
    }

    /// Reply including the line terminator.
    pub fn line(self) -> String {
        format!("{}\n", self.text())
    }

    pub fn for_error(err: &Error) -> Option<Self> {
        match err {
            Error::Format => Some(Reply::IllegalFormat),
            Error::NoSuchSection(_) => Some(Reply::NoSuchSection),
            Error::BadPassword => Some(Reply::BadPassword),
            _ => None,
        }
    }
}

/// Strip exactly one line terminator (`\n` or `\r\n`).
pub fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parse one request line. The terminator, if present, is stripped first.
pub fn parse_line(line: &str) -> Result<IncomingRequest> {
    let line = strip_terminator(line);
    let mut parts = line.splitn(3, SEPARATOR);

    let (Some(section), Some(secret), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Format);
    };

    Ok(IncomingRequest {
        section: section.to_string(),
        secret: secret.to_string(),
        payload: payload.to_string(),
    })
}

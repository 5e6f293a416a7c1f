//! Command and result line types, and the classification rule that
//! tells a `ServerIO` reader loop which bucket an inbound line belongs
//! to (§4.5 of the specification).

use crate::codec::value::ArgumentMap;
use crate::error::{Error, ErrorKind, Result};

/// An inbound or outbound command line: `<id> <NAME> <key>=<value> …`.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub id: u64,
    pub name: String,
    pub args: ArgumentMap,
}

impl Command {
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            format!("{} {}", self.id, self.name)
        } else {
            format!("{} {} {}", self.id, self.name, self.args.render())
        }
    }
}

/// An inbound or outbound result line: `<id> <completed> <errorCode> <payload>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultLine {
    pub id: u64,
    pub completed: bool,
    pub error: ErrorKind,
    pub payload: String,
}

impl ResultLine {
    pub fn render(&self) -> String {
        format!(
            "{} {} {} {}",
            self.id,
            if self.completed { 1 } else { 0 },
            self.error.code(),
            self.payload
        )
        .trim_end()
        .to_string()
    }

    /// Returns `Err` if this result carries a non-`None` error kind,
    /// otherwise `Ok(&payload)`. Mirrors `executeCommand`'s contract
    /// of surfacing handler errors as a `Result<T, Error>`.
    pub fn into_payload(self) -> Result<String> {
        if self.error.is_none() {
            Ok(self.payload)
        } else {
            Err(Error::protocol(self.error, self.payload))
        }
    }
}

/// The classification of one inbound line, per §4.5.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundLine {
    Command(Command),
    Result(ResultLine),
}

/// Classifies and parses a single line (without its trailing newline).
///
/// - First token numeric, second token a bare word starting with a
///   letter → a command.
/// - First token numeric, second token `0`/`1`, third token numeric →
///   a result.
/// - Otherwise → malformed.
pub fn parse_line(line: &str) -> Result<InboundLine> {
    let mut parts = line.splitn(3, ' ');
    let id_tok = parts
        .next()
        .ok_or_else(|| Error::Malformed("empty line".into()))?;
    let id: u64 = id_tok
        .parse()
        .map_err(|_| Error::Malformed(format!("expected numeric id, got '{id_tok}'")))?;

    let rest = parts.next().unwrap_or("");
    let tail = parts.next().unwrap_or("");

    if rest == "0" || rest == "1" {
        // Result line: <id> <completed> <errorCode> <payload>
        let completed = rest == "1";
        let mut tail_parts = tail.splitn(2, ' ');
        let code_tok = tail_parts
            .next()
            .ok_or_else(|| Error::Malformed(format!("missing error code in: {line}")))?;
        let code: u16 = code_tok
            .parse()
            .map_err(|_| Error::Malformed(format!("expected numeric error code, got '{code_tok}'")))?;
        let error = ErrorKind::from_code(code)
            .ok_or_else(|| Error::Malformed(format!("unknown error code {code}")))?;
        let payload = tail_parts.next().unwrap_or("").to_string();

        Ok(InboundLine::Result(ResultLine {
            id,
            completed,
            error,
            payload,
        }))
    } else if rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        let name = rest.to_string();
        let args = ArgumentMap::parse(tail)?;
        Ok(InboundLine::Command(Command { id, name, args }))
    } else {
        Err(Error::Malformed(format!("unrecognized line shape: {line}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_command_line() {
        let parsed = parse_line("1 JOB_NEW name='t' jobUUID=u1").unwrap();
        match parsed {
            InboundLine::Command(cmd) => {
                assert_eq!(cmd.id, 1);
                assert_eq!(cmd.name, "JOB_NEW");
                assert_eq!(cmd.args.get("jobUUID"), Some("u1"));
            },
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn classifies_result_line() {
        let parsed = parse_line("2 1 0 state=running doneCount=0").unwrap();
        match parsed {
            InboundLine::Result(r) => {
                assert_eq!(r.id, 2);
                assert!(r.completed);
                assert!(r.error.is_none());
                assert_eq!(r.payload, "state=running doneCount=0");
            },
            _ => panic!("expected result"),
        }
    }

    #[test]
    fn round_trips_command_render() {
        let mut args = ArgumentMap::new();
        args.set("jobUUID", "u1");
        let cmd = Command { id: 5, name: "JOB_STATUS".into(), args };
        let rendered = cmd.render();
        let reparsed = parse_line(&rendered).unwrap();
        assert_eq!(reparsed, InboundLine::Command(cmd));
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_line("not-a-number FOO").is_err());
        assert!(parse_line("1 ").is_err());
    }
}

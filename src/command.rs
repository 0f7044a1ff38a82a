//! The textual command language of the gateway.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Commands acting on the session itself.
pub enum Control {
    Exit,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Commands run against the session's node.
pub enum Query {
    PutValue,
    GetValue,
    AddProvider,
    GetProviders,
    FindPeer,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Control(Control),
    Query(Query),
}

impl Verb {
    pub const ALL: [Verb; 8] = [
        Verb::Query(Query::PutValue),
        Verb::Query(Query::GetValue),
        Verb::Query(Query::AddProvider),
        Verb::Query(Query::GetProviders),
        Verb::Query(Query::FindPeer),
        Verb::Query(Query::Ping),
        Verb::Control(Control::Exit),
        Verb::Control(Control::Reset),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Control(Control::Exit) => "exit",
            Verb::Control(Control::Reset) => "reset",
            Verb::Query(Query::PutValue) => "put-value",
            Verb::Query(Query::GetValue) => "get-value",
            Verb::Query(Query::AddProvider) => "add-provider",
            Verb::Query(Query::GetProviders) => "get-providers",
            Verb::Query(Query::FindPeer) => "find-peer",
            Verb::Query(Query::Ping) => "ping",
        }
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unrecognized command: {s}")))
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Verb::Query(*self).fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A parsed command line: the verb and everything after it.
pub struct Command {
    pub verb: Verb,
    pub args: Vec<String>,
}

/// Parse a command line as received in the `q` query parameter.
///
/// HTML entities are decoded and `+` stands for a space. Arguments are
/// separated by single spaces, so repeated spaces yield empty arguments.
pub fn parse_cmd(line: &str) -> Result<Command> {
    let line = html_escape::decode_html_entities(line).replace('+', " ");

    if line.is_empty() {
        return Err(Error::validation("no command provided. use ?q=<cmd>"));
    }

    let mut tokens = line.split(' ').map(str::to_string);
    let head = tokens.next().unwrap_or_default();
    let args: Vec<String> = tokens.collect();

    if head != "reset" && head != "exit" && args.is_empty() {
        return Err(Error::validation("command format: <command> <arg>..."));
    }

    let verb = head.parse()?;

    Ok(Command { verb, args })
}

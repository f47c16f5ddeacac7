//! Line protocol: one command per line, arguments separated by whitespace.
//! The trailing argument of SET, QWATCH, QUNWATCH and QUERY takes the rest of
//! the line so values and queries may contain spaces.

use anyhow::bail;
use qwatch::SubscriberId;
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: String },
    Del { key: String },
    Get { key: String },
    Watch { client: SubscriberId, query: String },
    Unwatch { client: SubscriberId, query: String },
    Query { query: String },
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Command> {
        let (name, rest) = split_word(line.trim());
        let name = name.to_ascii_uppercase();

        let command = match name.as_str() {
            "SET" => {
                let (key, value) = split_word(rest);
                if key.is_empty() || value.is_empty() {
                    bail!("wrong number of arguments for 'set' command");
                }
                Command::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            "DEL" | "GET" => {
                let (key, extra) = split_word(rest);
                if key.is_empty() || !extra.is_empty() {
                    bail!("wrong number of arguments for '{}' command", name.to_lowercase());
                }
                let key = key.to_string();
                if name == "DEL" {
                    Command::Del { key }
                } else {
                    Command::Get { key }
                }
            }
            "QWATCH" | "QUNWATCH" => {
                let (client, query) = split_word(rest);
                if client.is_empty() || query.is_empty() {
                    bail!("wrong number of arguments for '{}' command", name.to_lowercase());
                }
                let client = SmolStr::new(client);
                let query = query.to_string();
                if name == "QWATCH" {
                    Command::Watch { client, query }
                } else {
                    Command::Unwatch { client, query }
                }
            }
            "QUERY" => {
                if rest.is_empty() {
                    bail!("wrong number of arguments for 'query' command");
                }
                Command::Query {
                    query: rest.to_string(),
                }
            }
            "" => bail!("empty command"),
            _ => bail!("unknown command '{}'", name),
        };
        Ok(command)
    }
}

/// First whitespace-delimited word and the trimmed remainder.
fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    }
}

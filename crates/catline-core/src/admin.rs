//! Administrative commands over the section registry.
//!
//! Messenger adapters parse their own command syntax and hand the command
//! name plus its argument string to [`AdminCommand::parse`].

use crate::{errors::Error, sections::SharedRegistry};

pub const OK_REPLY: &str = "The operation succeeded.";
pub const NO_SUCH_SECTION_REPLY: &str = "Error: no such section";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Define {
        name: String,
        secret: String,
        destination: String,
    },
    Kill {
        name: String,
    },
    List,
    Show {
        name: String,
    },
}

impl AdminCommand {
    /// Parse `name` + `args`. Returns `None` for commands this module does not own,
    /// `Some(Err(usage))` for known commands with bad arguments.
    pub fn parse(name: &str, args: &str) -> Option<std::result::Result<Self, String>> {
        let mut words = args.split_whitespace();
        let parsed = match name {
            "sectiondata" => {
                // The destination is the rest of the line and may contain spaces.
                let (name, rest) = next_word(args);
                let (secret, rest) = next_word(rest);
                let dest = rest.trim();
                if name.is_empty() || secret.is_empty() || dest.is_empty() {
                    Err(usage("sectiondata"))
                } else {
                    Ok(Self::Define {
                        name: name.to_string(),
                        secret: secret.to_string(),
                        destination: dest.to_string(),
                    })
                }
            }
            "sectionkill" => match (words.next(), words.next()) {
                (Some(name), None) => Ok(Self::Kill {
                    name: name.to_string(),
                }),
                _ => Err(usage("sectionkill")),
            },
            "sectionlist" => match words.next() {
                None => Ok(Self::List),
                Some(_) => Err(usage("sectionlist")),
            },
            "sectionshow" => match (words.next(), words.next()) {
                (Some(name), None) => Ok(Self::Show {
                    name: name.to_string(),
                }),
                _ => Err(usage("sectionshow")),
            },
            _ => return None,
        };
        Some(parsed)
    }

    /// Run the command and render the reply text.
    pub async fn execute(self, registry: &SharedRegistry) -> String {
        match self {
            Self::Define {
                name,
                secret,
                destination,
            } => match registry
                .lock()
                .await
                .define(&name, &secret, &destination)
                .await
            {
                Ok(()) => {
                    tracing::info!(section = %name, %destination, "section defined");
                    OK_REPLY.to_string()
                }
                Err(e) => error_reply(e),
            },
            Self::Kill { name } => match registry.lock().await.remove(&name).await {
                Ok(()) => {
                    tracing::info!(section = %name, "section killed");
                    OK_REPLY.to_string()
                }
                Err(e) => error_reply(e),
            },
            Self::List => {
                let names = registry.lock().await.list();
                if names.is_empty() {
                    return "No sections defined".to_string();
                }
                names
                    .iter()
                    .map(|n| n.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Self::Show { name } => match registry.lock().await.show(&name) {
                Ok(dest) => format!("{name} -> {dest}"),
                Err(e) => error_reply(e),
            },
        }
    }
}

pub fn help_text() -> String {
    ["sectiondata", "sectionkill", "sectionlist", "sectionshow"]
        .iter()
        .map(|c| usage(c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split off the first whitespace-delimited word, returning it and the remainder.
fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

fn usage(cmd: &str) -> String {
    match cmd {
        "sectiondata" => "Usage: /sectiondata <section> <password> <destination>",
        "sectionkill" => "Usage: /sectionkill <section>",
        "sectionlist" => "Usage: /sectionlist",
        "sectionshow" => "Usage: /sectionshow <section>",
        _ => "Unknown command",
    }
    .to_string()
}

fn error_reply(e: Error) -> String {
    match e {
        Error::NoSuchSection(_) => NO_SUCH_SECTION_REPLY.to_string(),
        Error::InvalidSection(reason) => format!("Error: {reason}"),
        Error::Persistence(reason) => {
            tracing::error!("failed to persist sections: {reason}");
            format!("Error: could not save sections: {reason}")
        }
        other => format!("Error: {other}"),
    }
}

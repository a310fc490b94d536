//! Session, login and server-wide administrative commands.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::types::{Info, Ticket, User};
use super::Perforce;
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::{Buffer, OutputHandler, Protocol, Record};

/// Ticket issued by `login -a -p`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Login {
    pub ticket: String,
    pub expires: DateTime<Utc>,
}

#[derive(Default)]
struct LoginOutput {
    ticket: String,
    expiration_secs: i64,
}

impl OutputHandler for LoginOutput {
    fn output_info(&mut self, _level: u8, info: &str) -> P4Result<()> {
        self.ticket = info.trim().to_string();
        Ok(())
    }

    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        if let Some(value) = stats.get("TicketExpiration") {
            self.expiration_secs = value
                .parse()
                .map_err(|_| P4Error::parse(value.as_str(), "TicketExpiration seconds"))?;
        }
        Ok(())
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

pub fn parse_info(out: &str) -> Info {
    let fields: HashMap<&str, &str> = out
        .lines()
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k, v.trim()))
        .collect();
    let get = |k: &str| fields.get(k).map(|v| v.to_string()).unwrap_or_default();
    Info {
        user: get("User name"),
        client: get("Client name"),
        host: get("Client host"),
        root: get("Client root"),
    }
}

/// `name (user) id` lines. Lines with fewer words are skipped.
pub fn parse_tickets(out: &str) -> Vec<Ticket> {
    out.lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split(' ').collect();
            if words.len() < 3 {
                return None;
            }
            Some(Ticket {
                name: words[0].to_string(),
                user: words[1]
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .to_string(),
                id: words[2].trim().to_string(),
            })
        })
        .collect()
}

/// `user <email> (Real Name) accessed YYYY/MM/DD` lines. Lines with fewer
/// than five words are skipped.
pub fn parse_users(out: &str) -> Vec<User> {
    out.lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split(' ').collect();
            if words.len() < 5 {
                return None;
            }
            let name = words[2..words.len() - 2].join(" ");
            Some(User {
                user: words[0].to_string(),
                email: words[1]
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
                name: name
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .to_string(),
                accessed: words[words.len() - 1].to_string(),
            })
        })
        .collect()
}

impl Perforce {
    /// User, workspace, host and root of the current session.
    pub fn info(&self) -> P4Result<Info> {
        Ok(parse_info(&self.exec_cmd(&["info"])?))
    }

    /// Log `user` in on all hosts and return the printed ticket.
    pub fn login(&self, user: &str) -> P4Result<Login> {
        let mut cb = LoginOutput::default();
        self.run_handler("login", ["-a", "-p", user], &mut cb)?;
        Ok(Login {
            ticket: cb.ticket,
            expires: Utc::now() + Duration::seconds(cb.expiration_secs),
        })
    }

    pub fn tickets<S: AsRef<str>>(&self, args: &[S]) -> P4Result<Vec<Ticket>> {
        let mut cmd = vec!["tickets".to_string()];
        cmd.extend(args.iter().map(|a| a.as_ref().to_string()));
        Ok(parse_tickets(&self.exec_cmd(&cmd)?))
    }

    pub fn users(&self) -> P4Result<Vec<User>> {
        Ok(parse_users(&self.exec_cmd(&["users"])?))
    }

    /// `set key=value` in the client's registry/environment file.
    pub fn set(&self, key: &str, value: &str) -> P4Result<()> {
        self.exec_cmd(&["set", &format!("{key}={value}")])?;
        Ok(())
    }

    pub fn trust<S: AsRef<str>>(&self, args: &[S]) -> P4Result<()> {
        let mut cmd = vec!["trust".to_string()];
        cmd.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.exec_cmd(&cmd)?;
        Ok(())
    }

    /// Add `values` as keywords of index `name`/`attrib`.
    pub fn index<S: AsRef<str>>(&self, name: &str, attrib: u32, values: &[S]) -> P4Result<()> {
        self.run_index(vec!["-a".into(), attrib.to_string(), name.to_string()], values)
    }

    pub fn index_delete<S: AsRef<str>>(&self, name: &str, attrib: u32, values: &[S]) -> P4Result<()> {
        self.run_index(
            vec!["-a".into(), attrib.to_string(), "-d".into(), name.to_string()],
            values,
        )
    }

    fn run_index<S: AsRef<str>>(&self, args: Vec<String>, values: &[S]) -> P4Result<()> {
        let input: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
        let mut buffer = Buffer::new(Some(input.join(" ").into_bytes()));
        self.run_handler("index", args, &mut buffer)
    }
}

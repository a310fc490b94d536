//! Workspace (client) specifications.
//!
//! A spec is a sequence of `Field:` entries. Most fields hold one line;
//! `Description`, `View` and `ChangeView` hold the indented lines that follow
//! them. A new field starts at a non-indented line whose first word ends in
//! `:`. Serialization writes the single-line fields in a fixed order, so
//! parse -> serialize -> parse is stable.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::types::named_enum;
use super::Perforce;
use crate::core::error::{P4Error, P4Result};

named_enum!(
    /// Workspace option; each has an inverse (`allwrite`/`noallwrite`).
    ClientOption, "client option" {
        AllWrite => "allwrite",
        Clobber => "clobber",
        Compress => "compress",
        Locked => "locked",
        Modtime => "modtime",
        Rmdir => "rmdir",
        NoAllWrite => "noallwrite",
        NoClobber => "noclobber",
        NoCompress => "nocompress",
        Unlocked => "unlocked",
        NoModtime => "nomodtime",
        NoRmdir => "normdir",
    }
);

impl ClientOption {
    pub fn inverse(self) -> ClientOption {
        use ClientOption::*;
        match self {
            AllWrite => NoAllWrite,
            Clobber => NoClobber,
            Compress => NoCompress,
            Locked => Unlocked,
            Modtime => NoModtime,
            Rmdir => NoRmdir,
            NoAllWrite => AllWrite,
            NoClobber => Clobber,
            NoCompress => Compress,
            Unlocked => Locked,
            NoModtime => Modtime,
            NoRmdir => Rmdir,
        }
    }
}

/// Add `option`, replacing its inverse in place if present. Adding an
/// option that is already set does nothing.
pub fn append_client_option(options: &mut Vec<ClientOption>, option: ClientOption) {
    let inverse = option.inverse();
    for existing in options.iter_mut() {
        if *existing == option {
            return;
        }
        if *existing == inverse {
            *existing = option;
            return;
        }
    }
    options.push(option);
}

/// One `View:` line: depot pattern mapped to a workspace pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Client {
    pub client: String,
    pub owner: String,
    pub root: String,
    pub options: Vec<ClientOption>,
    pub submit_options: Vec<String>,
    pub line_end: String,
    pub view: Vec<ViewEntry>,

    pub host: String,
    /// Lines joined with `\n`, without the form indentation.
    pub description: String,
    pub alt_roots: Vec<String>,
    pub stream: String,
    pub stream_at_change: String,
    pub server_id: String,
    pub change_view: Vec<String>,
}

fn invalid(msg: impl Into<String>) -> P4Error {
    P4Error::InvalidClient(msg.into())
}

/// Split on whitespace, keeping double-quoted words (paths with spaces)
/// together without their quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

fn quote(path: &str) -> String {
    if path.contains(char::is_whitespace) {
        format!("\"{path}\"")
    } else {
        path.to_string()
    }
}

/// Field name when `line` opens a new field.
fn field_name(line: &str) -> Option<&str> {
    if line.starts_with(char::is_whitespace) || line.starts_with('#') {
        return None;
    }
    let first = line.split_whitespace().next()?;
    first.strip_suffix(':')
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

impl Client {
    /// Check the mandatory fields.
    pub fn verify(&self) -> P4Result<()> {
        if self.client.is_empty() {
            return Err(invalid("missing Client"));
        }
        if self.owner.is_empty() {
            return Err(invalid("missing Owner"));
        }
        if self.root.is_empty() {
            return Err(invalid("missing Root"));
        }
        if self.options.is_empty() {
            return Err(invalid("missing Options"));
        }
        if self.submit_options.is_empty() {
            return Err(invalid("missing SubmitOptions"));
        }
        if self.line_end.is_empty() {
            return Err(invalid("missing LineEnd"));
        }
        if self.view.is_empty() {
            return Err(invalid("missing View"));
        }
        Ok(())
    }

    pub fn set_option(&mut self, option: ClientOption) {
        append_client_option(&mut self.options, option);
    }

    /// Parse `client -o` output and check the mandatory fields.
    pub fn parse(text: &str) -> P4Result<Client> {
        let mut client = Client::default();
        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            i += 1;
            if is_blank_or_comment(line) {
                continue;
            }
            let Some(field) = field_name(line) else {
                return Err(invalid(format!("wrong line: {}", line.trim())));
            };

            // Indented block following the field header.
            let start = i;
            while i < lines.len() && field_name(lines[i]).is_none() {
                i += 1;
            }
            let block = &lines[start..i];

            match field {
                "Description" => {
                    let mut desc: Vec<&str> = block
                        .iter()
                        .map(|&l| l.strip_prefix('\t').unwrap_or(l))
                        .collect();
                    while desc.last().is_some_and(|l| l.trim().is_empty()) {
                        desc.pop();
                    }
                    client.description = desc.join("\n");
                }
                "View" => {
                    for entry in block.iter().filter(|l| !is_blank_or_comment(l)) {
                        let tokens = tokenize(entry);
                        let [source, destination] = <[String; 2]>::try_from(tokens)
                            .map_err(|_| invalid(format!("wrong view entry: {}", entry.trim())))?;
                        client.view.push(ViewEntry { source, destination });
                    }
                }
                "ChangeView" => {
                    client.change_view = block
                        .iter()
                        .filter(|l| !is_blank_or_comment(l))
                        .map(|l| l.trim().to_string())
                        .collect();
                }
                _ => {
                    i = start;
                    client.apply_single(field, line)?;
                }
            }
        }

        client.verify()?;
        Ok(client)
    }

    fn apply_single(&mut self, field: &str, line: &str) -> P4Result<()> {
        let tokens = tokenize(line);
        if tokens.len() < 2 {
            return Err(invalid(format!("wrong line: {}", line.trim())));
        }
        let single = || -> P4Result<String> {
            if tokens.len() != 2 {
                return Err(invalid(format!("wrong line: {}", line.trim())));
            }
            Ok(tokens[1].clone())
        };
        match field {
            "Client" => self.client = single()?,
            "Owner" => self.owner = single()?,
            "Root" => self.root = single()?,
            "LineEnd" => self.line_end = single()?,
            "Host" => self.host = single()?,
            "Stream" => self.stream = single()?,
            "StreamAtChange" => self.stream_at_change = single()?,
            "ServerID" => self.server_id = single()?,
            "Options" => {
                for name in &tokens[1..] {
                    let option = ClientOption::from_str(name)
                        .map_err(|_| invalid(format!("client option {name:?} doesn't exist")))?;
                    self.set_option(option);
                }
            }
            "SubmitOptions" => self.submit_options = tokens[1..].to_vec(),
            "AltRoots" => self.alt_roots = tokens[1..].to_vec(),
            // Update, Access, Type and other server-maintained fields.
            _ => {}
        }
        Ok(())
    }
}

impl FromStr for Client {
    type Err = P4Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Client::parse(s)
    }
}

fn write_single(f: &mut fmt::Formatter<'_>, name: &str, value: &str) -> fmt::Result {
    if value.is_empty() {
        Ok(())
    } else {
        writeln!(f, "{name}:\t{value}")
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_single(f, "Client", &self.client)?;
        write_single(f, "Owner", &self.owner)?;
        write_single(f, "Host", &self.host)?;
        if !self.description.is_empty() {
            writeln!(f, "Description:")?;
            for line in self.description.lines() {
                writeln!(f, "\t{line}")?;
            }
        }
        write_single(f, "Root", &quote(&self.root))?;
        let options: Vec<&str> = self.options.iter().map(|o| o.name()).collect();
        write_single(f, "Options", &options.join(" "))?;
        write_single(f, "SubmitOptions", &self.submit_options.join(" "))?;
        write_single(f, "LineEnd", &self.line_end)?;
        let alt_roots: Vec<String> = self.alt_roots.iter().map(|r| quote(r)).collect();
        write_single(f, "AltRoots", &alt_roots.join(" "))?;
        write_single(f, "Stream", &self.stream)?;
        write_single(f, "StreamAtChange", &self.stream_at_change)?;
        write_single(f, "ServerID", &self.server_id)?;
        if !self.view.is_empty() {
            writeln!(f, "View:")?;
            for entry in &self.view {
                writeln!(f, "\t{} {}", quote(&entry.source), quote(&entry.destination))?;
            }
        }
        if !self.change_view.is_empty() {
            writeln!(f, "ChangeView:")?;
            for line in &self.change_view {
                writeln!(f, "\t{line}")?;
            }
        }
        Ok(())
    }
}

/// `Client <name> <YYYY/MM/DD> root <root> '<description>'`
static CLIENTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Client\s(.+)\s(\d+)/(\d+)/(\d+)\sroot\s(.+)\s'(.*)'").expect("clients pattern")
});

/// Workspace names from `clients`, sorted. Any other non-empty line is an
/// error.
pub fn parse_clients(out: &str) -> P4Result<Vec<String>> {
    let mut names = Vec::new();
    for (i, line) in out.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let caps = CLIENTS_RE
            .captures(line)
            .ok_or_else(|| P4Error::parse(line, format!("client listing at line {i}")))?;
        names.push(caps[1].to_string());
    }
    names.sort();
    Ok(names)
}

impl Perforce {
    /// Spec of workspace `name`, or of the current one when `name` is empty.
    pub fn client(&self, name: &str) -> P4Result<Client> {
        let mut args = vec!["client", "-o"];
        if !name.is_empty() {
            args.push(name);
        }
        Client::parse(&self.exec_cmd(&args)?)
    }

    /// Create or update a workspace from `client`.
    pub fn client_set(&self, client: &Client) -> P4Result<String> {
        client.verify()?;
        self.exec_with_stdin(&["client", "-i"], client.to_string().into_bytes())
    }

    pub fn clients(&self) -> P4Result<Vec<String>> {
        parse_clients(&self.exec_cmd(&["clients"])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "# A Perforce Client Specification.
#
#  Client:      The client name.

Client:\talice-ws

Update:\t2024/01/02 10:11:12

Owner:\talice

Host:\tbox

Description:
\tCreated by alice.
\tNote: second line

Root:\t/home/alice/ws

Options:\tnoallwrite noclobber nocompress unlocked nomodtime normdir

SubmitOptions:\tsubmitunchanged

LineEnd:\tlocal

View:
\t//depot/main/... //alice-ws/main/...
\t\"//depot/with space/...\" \"//alice-ws/with space/...\"

";

    #[test]
    fn parses_fields_and_blocks() {
        let c = Client::parse(SPEC).unwrap();
        assert_eq!(c.client, "alice-ws");
        assert_eq!(c.host, "box");
        assert_eq!(c.description, "Created by alice.\nNote: second line");
        assert_eq!(c.options.len(), 6);
        assert_eq!(c.view[1].source, "//depot/with space/...");
    }

    #[test]
    fn serializes_in_fixed_order() {
        let c = Client::parse(SPEC).unwrap();
        insta::assert_snapshot!(c.to_string(), @r#"
        Client:	alice-ws
        Owner:	alice
        Host:	box
        Description:
        	Created by alice.
        	Note: second line
        Root:	/home/alice/ws
        Options:	noallwrite noclobber nocompress unlocked nomodtime normdir
        SubmitOptions:	submitunchanged
        LineEnd:	local
        View:
        	//depot/main/... //alice-ws/main/...
        	"//depot/with space/..." "//alice-ws/with space/..."
        "#);
        assert_eq!(Client::parse(&c.to_string()).unwrap(), c);
    }

    #[test]
    fn missing_mandatory_field_fails() {
        let without_view = SPEC.split("View:").next().unwrap();
        let err = Client::parse(without_view).unwrap_err();
        assert_eq!(err.to_string(), "invalid client spec: missing View");
    }

    #[test]
    fn unknown_option_rejected() {
        let spec = SPEC.replace("normdir", "rmdirs");
        assert!(Client::parse(&spec).is_err());
    }

    #[test]
    fn option_replaces_inverse() {
        let mut options = vec![ClientOption::Clobber, ClientOption::Rmdir];
        append_client_option(&mut options, ClientOption::NoClobber);
        append_client_option(&mut options, ClientOption::Rmdir);
        append_client_option(&mut options, ClientOption::Locked);
        assert_eq!(
            options,
            vec![ClientOption::NoClobber, ClientOption::Rmdir, ClientOption::Locked]
        );
        for o in ClientOption::ALL {
            assert_eq!(o.inverse().inverse(), *o);
        }
    }

    #[test]
    fn clients_sorted_and_strict() {
        let out = "Client zeta 2023/05/01 root /z 'Created by z. '\nClient alpha 2022/01/01 root /a ''\n";
        assert_eq!(parse_clients(out).unwrap(), vec!["alpha", "zeta"]);
        assert!(parse_clients("garbage\n").is_err());
    }
}

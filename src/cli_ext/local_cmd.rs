//! Subcommands that never contact a server: the line diff of two local
//! files and client spec validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;
use tracing::debug;

use crate::api::Client;
use crate::cli::{AppContext, DiffArgs};
use crate::core::diff::{self, DiffTag};

fn read_text(path: &Path) -> Result<String>
{
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// File content as diff lines; the final newline does not open an extra
/// empty line.
fn file_lines(text: &str) -> Vec<&str>
{
    diff::split_lines(text.strip_suffix('\n').unwrap_or(text))
}

pub fn diff(
    args: DiffArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let from = read_text(&args.from)?;
    let to = read_text(&args.to)?;
    let lines = diff::diff_lines(&file_lines(&from), &file_lines(&to))
        .with_context(|| format!("Failed to diff {} and {}", args.from.display(), args.to.display()))?;

    let inserted = lines
        .iter()
        .filter(|l| l.tag == DiffTag::Insert)
        .count();
    let deleted = lines
        .iter()
        .filter(|l| l.tag == DiffTag::Delete)
        .count();
    debug!(lines = lines.len(), inserted, deleted, "diff computed");

    if args.json
    {
        let out = json!({
            "from": args.from.display().to_string(),
            "to": args.to.display().to_string(),
            "inserted": inserted,
            "deleted": deleted,
            "lines": lines,
        });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }

    print!("{}", diff::render(&lines, ctx.color()));
    if !ctx.quiet
    {
        eprintln!("{inserted} insertion(s), {deleted} deletion(s)");
    }
    Ok(())
}

pub fn client_check(
    file: &Path,
    json: bool,
    ctx: &AppContext,
) -> Result<()>
{
    let text = read_text(file)?;
    let client = Client::parse(&text).with_context(|| format!("Invalid client spec in {}", file.display()))?;

    if json
    {
        println!("{}", serde_json::to_string_pretty(&client)?);
        return Ok(());
    }

    if !ctx.quiet
    {
        let status = if ctx.color()
        {
            "ok".green().to_string()
        }
        else
        {
            "ok".to_string()
        };
        println!(
            "{} {} (root {}, {} view line(s))",
            status,
            client.client,
            client.root,
            client.view.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn trailing_newline_is_not_a_line()
    {
        assert_eq!(file_lines("a\nb\n"), vec!["a", "b"]);
        assert_eq!(file_lines("a\nb"), vec!["a", "b"]);
        assert!(file_lines("").is_empty());
        assert_eq!(file_lines("\n\n"), vec!["", ""]);
    }
}

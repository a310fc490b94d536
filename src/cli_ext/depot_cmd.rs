//! Subcommands that talk to the depot server through a [`Perforce`] handle.
//!
//! Handlers write to a caller-supplied sink so the same code serves the
//! binary (stdout) and tests (a buffer over a mock server).

use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::{Map, Value};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{debug, instrument};

use crate::api::{GrepMatch, GrepStatus, Perforce};
use crate::cli::{
    AppContext, ChangeCommand, ClientCommand, Commands, DescribeArgs, FstatArgs, GrepArgs, HaveArgs, KeyCommand,
};
use crate::core::exec::StatsTable;
use crate::infra::config::load_config;

/// Build the handle for this run from `p4kit.toml` / `P4KIT_*` and the
/// global credential flags.
pub fn connect(
    user: Option<&str>,
    password: Option<&str>,
) -> Result<Perforce>
{
    let config = load_config()?;
    debug!(exe = %config.server.exe, "connecting");
    let p4 = Perforce::new(&config);
    Ok(match user
    {
        Some(user) => p4.for_user(user, password.unwrap_or_default()),
        None => p4,
    })
}

/// Run one server subcommand. Offline subcommands are rejected.
pub fn run(
    p4: &Perforce,
    command: Commands,
    ctx: &AppContext,
    out: &mut dyn Write,
) -> Result<()>
{
    match command
    {
        Commands::Describe(args) => describe(p4, args, ctx, out),
        Commands::Fstat(args) => fstat(p4, args, out),
        Commands::Key(args) => key(p4, args.command, out),
        Commands::Have(args) => have(p4, args, out),
        Commands::Grep(args) => grep(p4, args, ctx, out),
        Commands::Change(args) => change(p4, args.command, out),
        Commands::Unshelve(args) =>
        {
            let text = p4
                .verified_unshelve(args.cl)
                .with_context(|| format!("Refusing to unshelve change {}", args.cl))?;
            write!(out, "{text}")?;
            Ok(())
        }
        Commands::Client(args) => match args.command
        {
            ClientCommand::Show { name, json } => client_show(p4, name, json, out),
            ClientCommand::Check { .. } => anyhow::bail!("client check runs offline"),
        },
        Commands::Login(args) =>
        {
            let login = p4
                .login(&args.user)
                .with_context(|| format!("Login failed for {}", args.user))?;
            if args.json
            {
                writeln!(out, "{}", serde_json::to_string_pretty(&login)?)?;
            }
            else
            {
                writeln!(out, "{}", login.ticket)?;
                writeln!(out, "expires {}", login.expires.format("%Y/%m/%d %H:%M:%S"))?;
            }
            Ok(())
        }
        Commands::Exec(args) =>
        {
            p4.exec_cmd_with_output(&args.args, out)
                .with_context(|| format!("p4 {} failed", args.args.join(" ")))?;
            Ok(())
        }
        Commands::Diff(_) | Commands::Init(_) | Commands::Completions(_) =>
        {
            anyhow::bail!("not a server command")
        }
    }
}

fn bold(
    text: String,
    ctx: &AppContext,
) -> String
{
    if ctx.color() { text.bold().to_string() } else { text }
}

fn describe(
    p4: &Perforce,
    args: DescribeArgs,
    ctx: &AppContext,
    out: &mut dyn Write,
) -> Result<()>
{
    let descs = if args.shelved
    {
        p4.describe_shelved(&args.changes)
    }
    else
    {
        p4.describe(&args.changes)
    }
    .context("describe failed")?;

    if args.json
    {
        writeln!(out, "{}", serde_json::to_string_pretty(&descs)?)?;
        return Ok(());
    }

    for d in &descs
    {
        let header = format!("Change {} by {}@{} on {}", d.cl, d.user, d.client, d.date);
        writeln!(out, "{} *{}*\n", bold(header, ctx), d.status)?;
        for line in d.description.lines()
        {
            writeln!(out, "\t{line}")?;
        }
        let heading = if d.shelved { "Shelved files ..." } else { "Affected files ..." };
        writeln!(out, "\n{heading}\n")?;
        for f in &d.files
        {
            writeln!(out, "... {}#{} {}", f.depot_path, f.revision, f.action)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[derive(Tabled)]
struct FstatRow
{
    file: String,
    have: String,
    head: u32,
    action: String,
    #[tabled(rename = "type")]
    file_type: String,
    opened: String,
}

fn fstat(
    p4: &Perforce,
    args: FstatArgs,
    out: &mut dyn Write,
) -> Result<()>
{
    let result = p4.fstat(&args.args).context("fstat failed")?;
    if args.json
    {
        writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        return Ok(());
    }

    let rows: Vec<FstatRow> = result
        .file_stats
        .iter()
        .map(|s| FstatRow {
            file: s.depot_file.clone(),
            have: if s.have_rev == 0 { "-".into() } else { s.have_rev.to_string() },
            head: s.head_rev,
            action: s.head_action.clone(),
            file_type: s.head_type.clone(),
            opened: if s.action.is_empty() { String::new() } else { format!("{} ({})", s.action, s.change) },
        })
        .collect();
    writeln!(out, "{}", Table::new(rows).with(Style::sharp()))?;
    if !result.desc.is_empty()
    {
        writeln!(out, "{}", result.desc)?;
    }
    Ok(())
}

fn key(
    p4: &Perforce,
    command: KeyCommand,
    out: &mut dyn Write,
) -> Result<()>
{
    match command
    {
        KeyCommand::Get { key } =>
        {
            let value = p4
                .key_get(&key)
                .with_context(|| format!("Failed to read key {key}"))?;
            writeln!(out, "{value}")?;
        }
        KeyCommand::Set { key, value } =>
        {
            p4.key_set(&key, &value)
                .with_context(|| format!("Failed to set key {key}"))?;
        }
        KeyCommand::Inc { key } =>
        {
            let value = p4
                .key_inc(&key)
                .with_context(|| format!("Failed to increment key {key}"))?;
            writeln!(out, "{value}")?;
        }
        KeyCommand::Cas { key, old, new } =>
        {
            p4.key_cas(&key, &old, &new)
                .with_context(|| format!("Key {key} no longer holds {old}"))?;
        }
        KeyCommand::List { pattern, json } =>
        {
            let keys = p4
                .keys(&pattern)
                .with_context(|| format!("Failed to list keys matching {pattern}"))?;
            if json
            {
                let map: Map<String, Value> = keys
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                writeln!(out, "{}", serde_json::to_string_pretty(&map)?)?;
            }
            else
            {
                for (k, v) in &keys
                {
                    writeln!(out, "{k} = {v}")?;
                }
            }
        }
    }
    Ok(())
}

fn have(
    p4: &Perforce,
    args: HaveArgs,
    out: &mut dyn Write,
) -> Result<()>
{
    let files = p4.have(&args.patterns).context("have failed")?;
    if args.json
    {
        writeln!(out, "{}", serde_json::to_string_pretty(&files)?)?;
        return Ok(());
    }
    for f in &files
    {
        writeln!(out, "{}#{} - {}", f.depot_path, f.revision, f.local_path)?;
    }
    Ok(())
}

fn spinner(ctx: &AppContext) -> ProgressBar
{
    if ctx.quiet
    {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[instrument(skip_all, fields(pattern = %args.pattern, root = %args.root))]
fn grep(
    p4: &Perforce,
    args: GrepArgs,
    ctx: &AppContext,
    out: &mut dyn Write,
) -> Result<()>
{
    let (status, results) = GrepStatus::new();
    let pb = spinner(ctx);

    let outcome = thread::scope(|scope| {
        let worker = scope.spawn(|| p4.grep_large(&args.pattern, &args.root, !args.ignore_case, &status));
        while !worker.is_finished()
        {
            let (checked, total) = status.progress();
            pb.set_message(format!("{checked}/{total} files searched"));
            thread::sleep(Duration::from_millis(50));
        }
        worker.join()
    });
    pb.finish_and_clear();

    outcome
        .map_err(|_| anyhow::anyhow!("grep worker panicked"))?
        .with_context(|| format!("grep failed under {}", args.root))?;

    let mut matches: Vec<GrepMatch> = results.try_iter().flatten().collect();
    matches.sort_by(|a, b| (&a.depot_path, a.line_number).cmp(&(&b.depot_path, b.line_number)));

    if args.json
    {
        writeln!(out, "{}", serde_json::to_string_pretty(&matches)?)?;
        return Ok(());
    }
    for m in &matches
    {
        let location = format!("{}#{}:{}", m.depot_path, m.revision, m.line_number);
        let location = if ctx.color() { location.magenta().to_string() } else { location };
        writeln!(out, "{location}:{}", m.contents)?;
    }
    if !ctx.quiet
    {
        let (checked, total) = status.progress();
        eprintln!("{} match(es), {checked}/{total} files searched", matches.len());
    }
    Ok(())
}

fn change(
    p4: &Perforce,
    command: ChangeCommand,
    out: &mut dyn Write,
) -> Result<()>
{
    match command
    {
        ChangeCommand::New { message } =>
        {
            let cl = p4.change(&message).context("Failed to create changelist")?;
            writeln!(out, "{cl}")?;
        }
        ChangeCommand::Update { cl, message } =>
        {
            p4.change_update(&message, cl)
                .with_context(|| format!("Failed to update change {cl}"))?;
            writeln!(out, "Change {cl} updated.")?;
        }
    }
    Ok(())
}

fn client_show(
    p4: &Perforce,
    name: Option<String>,
    json: bool,
    out: &mut dyn Write,
) -> Result<()>
{
    let name = match name
    {
        Some(name) => name,
        None => p4.info().context("Failed to read session info")?.client,
    };
    let client = p4
        .client(&name)
        .with_context(|| format!("Failed to read client {name}"))?;
    if json
    {
        writeln!(out, "{}", serde_json::to_string_pretty(&client)?)?;
    }
    else
    {
        write!(out, "{client}")?;
    }
    Ok(())
}

#[derive(Tabled)]
struct StatRow
{
    command: String,
    count: u64,
    #[tabled(rename = "mean ms")]
    mean: String,
    #[tabled(rename = "min ms")]
    min: String,
    #[tabled(rename = "max ms")]
    max: String,
}

fn millis(us: u64) -> String
{
    format!("{:.2}", us as f64 / 1000.0)
}

/// Per-command timing table; empty when nothing ran.
pub fn render_stats(stats: &StatsTable) -> String
{
    if stats.is_empty()
    {
        return String::new();
    }
    let rows: Vec<StatRow> = stats
        .iter()
        .map(|(command, s)| StatRow {
            command: command.clone(),
            count: s.count,
            mean: millis(s.mean_us()),
            min: millis(s.min_us),
            max: millis(s.max_us),
        })
        .collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::core::exec::CommandStat;

    #[test]
    fn stats_table_lists_each_command()
    {
        let mut stats = StatsTable::new();
        stats.insert(
            "fstat".into(),
            CommandStat {
                count: 2,
                min_us: 1000,
                max_us: 3000,
                total_us: 4000,
            },
        );
        let table = render_stats(&stats);
        assert!(table.contains("fstat"));
        assert!(table.contains("2.00"));
        assert!(table.contains("mean ms"));
        assert!(render_stats(&StatsTable::new()).is_empty());
    }
}

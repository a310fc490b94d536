use clap::Parser;
use p4kit::cli::Cli;
use p4kit::cli_ext::depot_cmd;
use p4kit::mock::MockServer;

mod util;
use util::seeded_server;

/// Run one `p4k` command line against `server`, returning stdout.
fn run(
    server: &MockServer,
    argv: &[&str],
) -> anyhow::Result<String>
{
    let cli = Cli::parse_from(std::iter::once("p4k").chain(argv.iter().copied()));
    let ctx = cli.context();
    let mut out = Vec::new();
    depot_cmd::run(&server.perforce(), cli.command, &ctx, &mut out)?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn key_subcommands_share_state()
{
    let server = MockServer::new();

    assert_eq!(run(&server, &["key", "set", "build", "41"]).unwrap(), "");
    assert_eq!(run(&server, &["key", "inc", "build"]).unwrap(), "42\n");
    assert_eq!(run(&server, &["key", "get", "build"]).unwrap(), "42\n");

    let err = run(&server, &["key", "cas", "build", "41", "50"]).unwrap_err();
    assert!(format!("{err:#}").contains("no longer holds 41"), "{err:#}");
    run(&server, &["key", "cas", "build", "42", "50"]).unwrap();
    assert_eq!(server.key("build").as_deref(), Some("50"));

    server.set_key("build.date", "today");
    assert_eq!(
        run(&server, &["key", "list", "build*"]).unwrap(),
        "build = 50\nbuild.date = today\n"
    );
    let json: serde_json::Value =
        serde_json::from_str(&run(&server, &["key", "list", "--json", "build.*"]).unwrap()).unwrap();
    assert_eq!(json["build.date"], "today");
}

#[test]
fn change_new_prints_number()
{
    let server = seeded_server();

    let out = run(&server, &["change", "new", "-m", "from the cli"]).unwrap();
    let cl: u32 = out.trim().parse().unwrap();
    assert_eq!(server.change_status(cl).as_deref(), Some("pending"));

    let out = run(&server, &["change", "update", &cl.to_string(), "-m", "reworded"]).unwrap();
    assert_eq!(out, format!("Change {cl} updated.\n"));
}

#[test]
fn describe_lists_affected_files()
{
    let server = seeded_server();

    let out = run(&server, &["--no-color", "describe", "1"]).unwrap();
    assert!(out.starts_with("Change 1 by alice@alice-ws on "), "{out}");
    assert!(out.contains("*submitted*"));
    assert!(out.contains("Affected files ..."));
    assert!(out.contains("... //depot/readme.txt#1 add"));

    let json: serde_json::Value = serde_json::from_str(&run(&server, &["describe", "--json", "1", "2"]).unwrap()).unwrap();
    assert_eq!(json.as_array().map(Vec::len), Some(2));
    assert_eq!(json[1]["files"][0]["depot_path"], "//depot/src/main.rs");
}

#[test]
fn fstat_renders_a_table()
{
    let server = seeded_server();

    let out = run(&server, &["fstat", "//depot/src/..."]).unwrap();
    assert!(out.contains("//depot/src/lib.rs"));
    assert!(out.contains("//depot/src/main.rs"));
    assert!(out.contains("type"));

    let json: serde_json::Value = serde_json::from_str(&run(&server, &["fstat", "--json", "//depot/readme.txt"]).unwrap()).unwrap();
    assert_eq!(json["file_stats"][0]["head_rev"], 1);
}

#[test]
fn have_lists_local_paths()
{
    let server = seeded_server();

    let out = run(&server, &["have", "//depot/src/..."]).unwrap();
    assert_eq!(
        out,
        "//depot/src/lib.rs#1 - /ws/src/lib.rs\n//depot/src/main.rs#1 - /ws/src/main.rs\n"
    );
}

#[test]
fn grep_reports_sorted_matches()
{
    let server = seeded_server();

    let out = run(&server, &["--quiet", "--no-color", "grep", "run", "//depot"]).unwrap();
    assert_eq!(
        out,
        "//depot/docs/guide.md#1:3:run the tool\n\
         //depot/src/lib.rs#1:1:pub fn run() {}\n\
         //depot/src/main.rs#1:2:    run();\n"
    );
}

#[test]
fn exec_passes_output_through()
{
    let server = seeded_server();

    let out = run(&server, &["exec", "sizes", "-s", "//depot/src/..."]).unwrap();
    assert!(out.starts_with("//depot/src/... 2 files"), "{out}");

    let err = run(&server, &["exec", "frobnicate"]).unwrap_err();
    assert!(format!("{err:#}").contains("Unknown command."), "{err:#}");
}

#[test]
fn client_show_defaults_to_the_session_client()
{
    let server = MockServer::new();

    let out = run(&server, &["client", "show"]).unwrap();
    assert!(out.starts_with("Client:\talice-ws\n"), "{out}");
    assert!(out.contains("//depot/... //alice-ws/..."));
}

#[test]
fn unshelve_checks_the_workspace_first()
{
    let server = seeded_server();
    let p4 = server.perforce();
    let cl = p4
        .change("shelf")
        .unwrap();
    p4.edit(&["//depot/readme.txt"], cl)
        .unwrap();
    p4.exec_cmd(&["shelve", "-c", &cl.to_string()])
        .unwrap();
    p4.revert(&["//depot/readme.txt"], &[])
        .unwrap();
    server.add_file("//depot/readme.txt", "newer\n");

    let err = run(&server, &["unshelve", &cl.to_string()]).unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains(&format!("Refusing to unshelve change {cl}")), "{text}");
    assert!(text.contains("out of date"), "{text}");
}

#[test]
fn offline_commands_are_rejected()
{
    let server = MockServer::new();
    assert!(run(&server, &["init"]).is_err());
    assert!(run(&server, &["client", "check", "spec.txt"]).is_err());
    assert!(server.history().is_empty());
}

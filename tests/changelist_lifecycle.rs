use p4kit::P4Error;
use p4kit::api::ActionType;

mod util;
use util::seeded_server;

const NO_OPTIONS: &[&str] = &[];

#[test]
fn edit_and_submit_moves_head_and_have()
{
    let server = seeded_server();
    let p4 = server.perforce();

    let cl = p4
        .change("Tweak readme\n\nLonger body")
        .unwrap();
    assert_eq!(server.change_status(cl).as_deref(), Some("pending"));

    p4.edit(&["//depot/readme.txt"], cl)
        .unwrap();
    server.write_workspace("//depot/readme.txt", "hello again\n");

    let opened = p4
        .opened(Some(cl.to_string().as_str()))
        .unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].path, "//depot/readme.txt");
    assert_eq!(opened[0].status, ActionType::Edit);
    assert_eq!(opened[0].cl, cl);

    let desc = p4
        .describe(&[cl])
        .unwrap();
    assert_eq!(desc[0].cl, cl);
    assert!(desc[0].description.starts_with("Tweak readme"));
    assert_eq!(desc[0].files[0].depot_path, "//depot/readme.txt");
    assert_eq!(desc[0].files[0].action, "edit");

    let out = p4
        .submit(cl, NO_OPTIONS)
        .unwrap();
    assert!(out.contains(&format!("Change {cl} submitted.")));
    assert_eq!(server.change_status(cl).as_deref(), Some("submitted"));
    assert_eq!(server.head_rev("//depot/readme.txt"), Some(2));
    assert_eq!(server.have_rev("//depot/readme.txt"), Some(2));
}

#[test]
fn description_update_keeps_files()
{
    let server = seeded_server();
    let p4 = server.perforce();

    let cl = p4
        .change("first draft")
        .unwrap();
    p4.edit(&["//depot/src/main.rs"], cl)
        .unwrap();
    p4.change_update("final wording", cl)
        .unwrap();

    let desc = p4
        .describe(&[cl])
        .unwrap();
    assert!(desc[0].description.starts_with("final wording"));
    assert_eq!(server.opened("//depot/src/main.rs"), Some((cl, "edit".to_string())));
}

#[test]
fn submit_with_stale_file_is_rejected()
{
    let server = seeded_server();
    let p4 = server.perforce();

    let cl = p4
        .change("stale edit")
        .unwrap();
    p4.edit(&["//depot/src/lib.rs"], cl)
        .unwrap();
    server.submit_remote("//depot/src/lib.rs", "pub fn run() { remote(); }\n");

    let err = p4
        .submit(cl, NO_OPTIONS)
        .unwrap_err();
    assert!(err.to_string().contains("must resolve"), "{err}");
    assert_eq!(server.change_status(cl).as_deref(), Some("pending"));
}

#[test]
fn changes_are_listed_newest_first_with_dates()
{
    let server = seeded_server();
    let p4 = server.perforce();
    p4.change("pending work")
        .unwrap();

    let all = p4
        .changes(NO_OPTIONS)
        .unwrap();
    assert_eq!(all.len(), 5);
    assert!(all[0].cl > all[1].cl);
    assert_eq!(all[0].status, "pending");
    for c in &all
    {
        assert_eq!(c.date.len(), "2024/01/02 10:11:12".len(), "{}", c.date);
    }

    let submitted = p4
        .changes(&["-s", "submitted"])
        .unwrap();
    assert_eq!(submitted.len(), 4);
}

/// Shelve an edit of the readme in a fresh changelist, then revert the
/// workspace copy.
fn shelve_readme_edit(server: &p4kit::MockServer) -> u32
{
    let p4 = server.perforce();
    let cl = p4
        .change("shelved edit")
        .unwrap();
    p4.edit(&["//depot/readme.txt"], cl)
        .unwrap();
    server.write_workspace("//depot/readme.txt", "shelved content\n");
    p4.exec_cmd(&["shelve", "-c", &cl.to_string()])
        .unwrap();
    p4.revert(&["//depot/readme.txt"], NO_OPTIONS)
        .unwrap();
    cl
}

#[test]
fn verified_unshelve_restores_shelved_content()
{
    let server = seeded_server();
    let cl = shelve_readme_edit(&server);
    assert_eq!(server.workspace("//depot/readme.txt").as_deref(), Some(&b"hello depot\n"[..]));

    let shelved = server
        .perforce()
        .describe_shelved(&[cl])
        .unwrap();
    assert_eq!(shelved[0].files.len(), 1);
    assert_eq!(shelved[0].files[0].revision, 1);

    server
        .perforce()
        .verified_unshelve(cl)
        .unwrap();
    assert_eq!(
        server.workspace("//depot/readme.txt").as_deref(),
        Some(&b"shelved content\n"[..])
    );
    assert_eq!(server.opened("//depot/readme.txt"), Some((0, "edit".to_string())));
}

#[test]
fn verified_unshelve_refuses_newer_workspace_file()
{
    let server = seeded_server();
    let cl = shelve_readme_edit(&server);
    server.add_file("//depot/readme.txt", "newer\n");
    server.clear_history();

    let err = server
        .perforce()
        .verified_unshelve(cl)
        .unwrap_err();
    match err
    {
        P4Error::OutOfDate { path, have, change_rev } =>
        {
            assert_eq!(path, "//depot/readme.txt");
            assert_eq!((have, change_rev), (2, 1));
        }
        other => panic!("expected OutOfDate, got {other:?}"),
    }
    assert!(!server.commands().iter().any(|c| c == "unshelve"));
    assert_eq!(server.workspace("//depot/readme.txt").as_deref(), Some(&b"newer\n"[..]));
}

#[test]
fn move_reports_new_path()
{
    let server = seeded_server();
    let p4 = server.perforce();

    let cl = p4
        .change("rename lib")
        .unwrap();
    p4.edit(&["//depot/src/lib.rs"], cl)
        .unwrap();
    let moved = p4
        .move_file(cl, "//depot/src/lib.rs", "//depot/src/core.rs")
        .unwrap();

    assert_eq!(moved, "//depot/src/core.rs");
    assert_eq!(server.opened("//depot/src/core.rs"), Some((cl, "move/add".to_string())));
    assert_eq!(server.opened("//depot/src/lib.rs"), Some((cl, "move/delete".to_string())));
}

#[test]
fn edits_are_split_into_bounded_calls()
{
    let server = seeded_server();
    let p4 = server.perforce_with(p4kit::Settings {
        paths_per_call: 2,
        ..p4kit::Settings::default()
    });
    server.clear_history();

    let paths = ["//depot/readme.txt", "//depot/src/main.rs", "//depot/src/lib.rs"];
    let out = p4
        .edit(&paths, 0)
        .unwrap();

    assert_eq!(out.lines().count(), 3);
    let edits: Vec<String> = server
        .history()
        .into_iter()
        .filter(|c| c.command() == "edit")
        .map(|c| c.line)
        .collect();
    assert_eq!(edits.len(), 2);
    assert!(edits[1].ends_with("//depot/src/lib.rs"));
}

// Focused CLI parsing tests (tests command-line parsing only, not business logic)

use clap::Parser;
use wsfs::cli::{Cli, Commands};

#[test]
fn test_all_commands_parse() {
    let test_cases = vec![
        vec!["wsfs", "serve"],
        vec!["wsfs", "serve", "--root", "/srv", "--listen", "0.0.0.0:9000"],
        vec!["wsfs", "ls"],
        vec!["wsfs", "ls", "--long", "/dir"],
        vec!["wsfs", "cat", "--url", "ws://host:1/", "/a.txt"],
        vec!["wsfs", "stat", "/a.txt"],
        vec!["wsfs", "put", "local.txt", "/remote.txt"],
    ];

    for args in test_cases {
        Cli::try_parse_from(&args).unwrap_or_else(|e| panic!("Failed to parse {:?}: {}", args, e));
    }
}

#[test]
fn test_serve_with_all_options() {
    let cli = Cli::try_parse_from([
        "wsfs",
        "serve",
        "--root",
        "/srv/files",
        "--read-only",
        "--hide-uid-gid",
        "--readdir-budget",
        "4096",
    ])
    .unwrap();
    match cli.cmd {
        Commands::Serve(args) => {
            assert_eq!(args.root, "/srv/files");
            assert_eq!(args.listen, "127.0.0.1:4000");
            assert!(args.read_only);
            assert!(args.hide_uid_gid);
            assert_eq!(args.readdir_budget, Some(4096));
        }
        other => panic!("expected serve, got {:?}", other),
    }
}

#[test]
fn test_client_commands_default_url() {
    let cli = Cli::try_parse_from(["wsfs", "ls"]).unwrap();
    match cli.cmd {
        Commands::Ls(args) => {
            assert_eq!(args.connect.url, "ws://127.0.0.1:4000/");
            assert_eq!(args.path, "/");
            assert!(!args.long);
        }
        other => panic!("expected ls, got {:?}", other),
    }
}

#[test]
fn test_missing_arguments_rejected() {
    assert!(Cli::try_parse_from(["wsfs", "cat"]).is_err());
    assert!(Cli::try_parse_from(["wsfs", "put", "only-one"]).is_err());
    assert!(Cli::try_parse_from(["wsfs", "serve", "--readdir-budget", "lots"]).is_err());
}

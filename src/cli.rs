use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: bool,  // global --verbose
    pub stats: bool,    // global --stats
}

impl AppContext {
    /// Colors are used unless disabled by flag or `NO_COLOR`.
    pub fn color(&self) -> bool {
        !self.no_color && std::env::var_os("NO_COLOR").is_none()
    }
}

#[derive(Parser)]
#[command(name = "p4k")]
#[command(about = "Typed front end for a Perforce depot, with an offline line diff")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log debug output to stderr (overridden by P4KIT_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print per-command timings on exit
    #[arg(long, global = true)]
    pub stats: bool,

    /// Run server commands as this user
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Password or ticket for --user
    #[arg(short = 'P', long, global = true, requires = "user")]
    pub password: Option<String>,
}

impl Cli {
    pub fn context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            verbose: self.verbose,
            stats: self.stats,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Line diff of two local files (no server needed)
    Diff(DiffArgs),

    /// Show changelists and the files they touch
    Describe(DescribeArgs),

    /// Show file metadata
    Fstat(FstatArgs),

    /// Read and update server keys
    Key(KeyArgs),

    /// List files synced to the workspace
    Have(HaveArgs),

    /// Search file contents under a depot path, sharding large trees
    Grep(GrepArgs),

    /// Create or update pending changelists
    Change(ChangeArgs),

    /// Unshelve a changelist after checking nothing newer is overwritten
    Unshelve(UnshelveArgs),

    /// Show or validate client workspace specs
    Client(ClientArgs),

    /// Obtain a ticket for a user
    Login(LoginArgs),

    /// Run a raw command line and print its output
    Exec(ExecArgs),

    /// Initialize a p4kit.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Original file
    pub from: PathBuf,

    /// Changed file
    pub to: PathBuf,

    /// Emit the edit script as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Changelist numbers
    #[arg(required = true)]
    pub changes: Vec<u32>,

    /// Describe shelved files instead of submitted/pending ones
    #[arg(short = 'S', long)]
    pub shelved: bool,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct FstatArgs {
    /// Arguments passed to fstat, e.g. `-e 12 //depot/...`
    #[arg(required = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommand,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Print a key's value
    Get { key: String },

    /// Set a key
    Set { key: String, value: String },

    /// Increment a numeric key and print the new value
    Inc { key: String },

    /// Set a key only if it still holds OLD
    Cas { key: String, old: String, new: String },

    /// List keys matching a pattern
    List {
        /// Key pattern; `*` matches anything
        #[arg(default_value = "*")]
        pattern: String,

        /// JSON output
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct HaveArgs {
    /// File patterns; the whole workspace when omitted
    pub patterns: Vec<String>,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GrepArgs {
    /// Regular expression
    pub pattern: String,

    /// Depot directory to search, e.g. //depot/src
    pub root: String,

    /// Case-insensitive match
    #[arg(short, long)]
    pub ignore_case: bool,

    /// JSON output (one array of matches)
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ChangeArgs {
    #[command(subcommand)]
    pub command: ChangeCommand,
}

#[derive(Subcommand, Debug)]
pub enum ChangeCommand {
    /// Create a pending changelist and print its number
    New {
        /// Description
        #[arg(short, long)]
        message: String,
    },

    /// Replace the description of a changelist
    Update {
        cl: u32,

        /// New description
        #[arg(short, long)]
        message: String,
    },
}

#[derive(Args, Debug)]
pub struct UnshelveArgs {
    /// Shelved changelist
    pub cl: u32,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Print a client spec (the current client when NAME is omitted)
    Show {
        name: Option<String>,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Parse and validate a spec file without contacting the server
    Check {
        file: PathBuf,

        /// JSON output
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    pub user: String,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command and arguments, e.g. `sync -n //depot/...`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_keeps_hyphenated_arguments() {
        let cli = Cli::try_parse_from(["p4k", "exec", "sync", "-n", "//depot/..."]).unwrap();
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.args, vec!["sync", "-n", "//depot/..."]);
    }

    #[test]
    fn password_requires_user() {
        assert!(Cli::try_parse_from(["p4k", "-P", "pw", "have"]).is_err());
        let cli = Cli::try_parse_from(["p4k", "--user", "bob", "-P", "pw", "have"]).unwrap();
        assert_eq!(cli.user.as_deref(), Some("bob"));
    }
}

use anyhow::Result;
use clap::Parser;
use p4kit::cli::{Cli, ClientArgs, ClientCommand, Commands};
use p4kit::cli_ext::{depot_cmd, local_cmd};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = cli.context();
    p4kit::infra::logging::init(ctx.verbose);

    match cli.command {
        Commands::Diff(args) => local_cmd::diff(args, &ctx),
        Commands::Client(ClientArgs {
            command: ClientCommand::Check { file, json },
        }) => local_cmd::client_check(&file, json, &ctx),
        Commands::Init(args) => p4kit::infra::config::init(args, &ctx),
        Commands::Completions(args) => p4kit::completion::run(args, &ctx),
        command => {
            let p4 = depot_cmd::connect(cli.user.as_deref(), cli.password.as_deref())?;
            let res = depot_cmd::run(&p4, command, &ctx, &mut std::io::stdout().lock());
            let table = depot_cmd::render_stats(&p4.stats());
            if ctx.stats && !table.is_empty() {
                eprintln!("{table}");
            }
            res
        }
    }
}

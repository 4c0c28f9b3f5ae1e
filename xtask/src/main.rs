use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the nodeup workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the test suite
    Test,
    /// Run the nodeup CLI, forwarding any arguments
    Run {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            let status = Command::new("cargo").args(["build", "--workspace"]).status()?;
            if !status.success() {
                anyhow::bail!("Build failed");
            }
        }
        Commands::Test => {
            let status = Command::new("cargo").args(["test", "--workspace"]).status()?;
            if !status.success() {
                anyhow::bail!("Tests failed");
            }
        }
        Commands::Run { args } => {
            let status = Command::new("cargo")
                .args(["run", "-p", "nodeup-cli", "--"])
                .args(args)
                .status()?;
            if !status.success() {
                anyhow::bail!("Run failed");
            }
        }
    }

    Ok(())
}

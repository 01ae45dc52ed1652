//! CLI argument structures

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run command-line tasks on a pool of compute nodes
#[derive(Parser, Debug)]
#[command(name = "batchrun")]
#[command(about = "batchrun - Run command-line tasks on a pool of compute nodes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a run file and print the plan it produces
    Validate {
        /// Run file to check
        run_file: PathBuf,
    },
    /// Execute a run file
    Run {
        /// Run file to execute
        run_file: PathBuf,

        /// Directory holding the local grid and blob store
        /// (defaults to `.batchrun` next to the run file)
        #[arg(short = 'w', long)]
        workspace: Option<PathBuf>,

        /// Keep the pool, job and input container after the run
        #[arg(long)]
        no_cleanup: bool,

        /// Log progress instead of drawing a progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_flags() {
        let cli = Cli::try_parse_from([
            "batchrun",
            "-vv",
            "run",
            "run.yml",
            "--workspace",
            "/tmp/ws",
            "--no-cleanup",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                run_file,
                workspace,
                no_cleanup,
                quiet,
            } => {
                assert_eq!(run_file, PathBuf::from("run.yml"));
                assert_eq!(workspace, Some(PathBuf::from("/tmp/ws")));
                assert!(no_cleanup);
                assert!(!quiet);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["batchrun"]).is_err());
    }
}

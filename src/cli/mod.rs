//! CLI module for eks-synth
//!
//! Subcommands:
//! - `eks-synth synth` - Synthesize the stack template
//! - `eks-synth plan` - Summarize what would be synthesized
//! - `eks-synth validate` - Check settings and cached lookups
//! - `eks-synth context` - Manage the context file

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::template::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "eks-synth")]
#[command(about = "Synthesize EKS cluster stacks with on-demand or spot capacity")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the context file (default: ~/.eks-synth/context.yaml)
    #[arg(long, global = true, env = "EKS_SYNTH_CONTEXT_FILE", value_name = "FILE")]
    pub context_file: Option<String>,

    /// Context override, e.g. -c spot_only=1 (repeatable)
    #[arg(short = 'c', long = "context", global = true, value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Target account (falls back to AWS_ACCOUNT_ID)
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Target region (falls back to AWS_REGION, then AWS_DEFAULT_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Path to a .env file loaded before resolving the environment
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synthesize the stack template
    Synth(SynthArgs),

    /// Show the network, capacity strategy and resources that would be synthesized
    Plan,

    /// Validate settings and cached lookups
    Validate,

    /// Manage the context file
    Context(ContextArgs),
}

/// Arguments for the synth command
#[derive(Parser, Debug)]
pub struct SynthArgs {
    /// Output format when printing to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Write a cloud assembly (template + manifest.json) into this directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List stored context values
    List,

    /// Show a stored value
    Get {
        /// Context key
        key: String,
    },

    /// Store a value
    Set {
        /// Context key
        key: String,

        /// Value
        value: String,
    },

    /// Remove a stored value
    Unset {
        /// Context key
        key: String,
    },

    /// List cached lookup results
    Lookups,

    /// Record the result of a VPC lookup
    #[command(name = "record-vpc")]
    RecordVpc(RecordVpcArgs),
}

/// Arguments for recording a VPC lookup result
#[derive(Parser, Debug)]
pub struct RecordVpcArgs {
    /// Record the answer for the default VPC lookup
    #[arg(long, conflicts_with = "vpc_id", required_unless_present = "vpc_id")]
    pub default: bool,

    /// Record the answer for a lookup by VPC id
    #[arg(long)]
    pub vpc_id: Option<String>,

    /// Id of the VPC the lookup resolved to
    #[arg(long)]
    pub resolved_id: String,

    /// Availability zones (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub azs: Vec<String>,

    /// Public subnet ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub public_subnets: Vec<String>,

    /// Private subnet ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub private_subnets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synth_defaults() {
        let cli = Cli::parse_from(["eks-synth", "synth"]);
        match cli.command {
            Commands::Synth(args) => {
                assert_eq!(args.format, OutputFormat::Json);
                assert!(args.output.is_none());
            }
            _ => panic!("Expected Synth command"),
        }
    }

    #[test]
    fn test_parse_synth_yaml_to_dir() {
        let cli = Cli::parse_from(["eks-synth", "synth", "--format", "yaml", "-o", "cdk.out"]);
        match cli.command {
            Commands::Synth(args) => {
                assert_eq!(args.format, OutputFormat::Yaml);
                assert_eq!(args.output, Some(PathBuf::from("cdk.out")));
            }
            _ => panic!("Expected Synth command"),
        }
    }

    #[test]
    fn test_parse_overrides_are_global() {
        let cli = Cli::parse_from([
            "eks-synth",
            "plan",
            "-c",
            "spot_only=1",
            "--context",
            "default_capacity=3",
            "--account",
            "123456789012",
        ]);
        assert!(matches!(cli.command, Commands::Plan));
        assert_eq!(cli.overrides, vec!["spot_only=1", "default_capacity=3"]);
        assert_eq!(cli.account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn test_parse_context_set() {
        let cli = Cli::parse_from(["eks-synth", "context", "set", "instance_type", "c5.large"]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::Set { key, value } => {
                    assert_eq!(key, "instance_type");
                    assert_eq!(value, "c5.large");
                }
                _ => panic!("Expected Set action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_parse_record_vpc() {
        let cli = Cli::parse_from([
            "eks-synth",
            "context",
            "record-vpc",
            "--vpc-id",
            "vpc-123",
            "--resolved-id",
            "vpc-123",
            "--azs",
            "us-west-2a,us-west-2b",
            "--private-subnets",
            "subnet-1,subnet-2",
        ]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::RecordVpc(record) => {
                    assert!(!record.default);
                    assert_eq!(record.vpc_id.as_deref(), Some("vpc-123"));
                    assert_eq!(record.azs, vec!["us-west-2a", "us-west-2b"]);
                    assert!(record.public_subnets.is_empty());
                    assert_eq!(record.private_subnets.len(), 2);
                }
                _ => panic!("Expected RecordVpc action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_record_vpc_needs_a_lookup_kind() {
        let result = Cli::try_parse_from([
            "eks-synth",
            "context",
            "record-vpc",
            "--resolved-id",
            "vpc-1",
        ]);
        assert!(result.is_err());

        let both = Cli::try_parse_from([
            "eks-synth",
            "context",
            "record-vpc",
            "--default",
            "--vpc-id",
            "vpc-1",
            "--resolved-id",
            "vpc-1",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_verbose_global() {
        let cli = Cli::parse_from(["eks-synth", "-vvv", "validate"]);
        assert_eq!(cli.verbose, 3);
    }
}

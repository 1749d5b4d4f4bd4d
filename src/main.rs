use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use eks_synth::cli::{
    context_get, context_list, context_set, context_unset, format_context_list,
    format_lookup_list, format_plan, format_validation_result, lookup_list, parse_overrides,
    plan, record_vpc, run_synth, run_validation, write_output, Cli, CommandError, CommandResult, Commands,
    ContextAction, RecordVpcArgs, SynthArgs,
};
use eks_synth::config::{load_settings, validate_settings, ValidationSeverity};
use eks_synth::context::{default_context_path, expand_path, load_context_from, save_context_to};
use eks_synth::network::{VpcLookup, VpcLookupResult};
use eks_synth::stack::{write_assembly, Environment};

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(1);
    }
}

fn emit(text: &str) -> CommandResult<()> {
    write_output(&mut io::stdout().lock(), text)?;
    Ok(())
}

fn context_path(cli: &Cli) -> CommandResult<PathBuf> {
    match cli.context_file {
        Some(ref raw) => Ok(expand_path(raw)?),
        None => Ok(default_context_path()),
    }
}

fn run(cli: Cli) -> CommandResult<()> {
    let path = context_path(&cli)?;
    let env = Environment::with_env_fallback(cli.account.clone(), cli.region.clone());
    let overrides = parse_overrides(&cli.overrides)?;

    match cli.command {
        Commands::Synth(ref args) => synth(&path, &overrides, &env, args),
        Commands::Plan => {
            let loaded = load_settings(&path, &overrides)?;
            let summary = plan(&loaded.settings, &env, &loaded.file.lookups)?;
            emit(&format_plan(&summary))
        }
        Commands::Validate => {
            let loaded = load_settings(&path, &overrides)?;
            let result = run_validation(&loaded.settings, &env, &loaded.file.lookups);
            emit(&format_validation_result(
                &result,
                &loaded.settings.stack_name,
            ))?;
            let errors = result
                .messages
                .iter()
                .filter(|m| m.severity == ValidationSeverity::Error)
                .count();
            if errors > 0 {
                return Err(CommandError::ValidationFailed(errors));
            }
            Ok(())
        }
        Commands::Context(ref args) => context(&path, &env, &args.action),
    }
}

fn synth(
    path: &Path,
    overrides: &[(String, String)],
    env: &Environment,
    args: &SynthArgs,
) -> CommandResult<()> {
    let loaded = load_settings(path, overrides)?;
    for msg in validate_settings(&loaded.settings).messages {
        match msg.severity {
            ValidationSeverity::Info => info!("[{}] {}", msg.code, msg.message),
            _ => warn!("[{}] {}", msg.code, msg.message),
        }
    }

    let template = run_synth(&loaded.settings, env, &loaded.file.lookups)?;
    match args.output {
        Some(ref dir) => {
            let written = write_assembly(dir, &loaded.settings.stack_name, env, &template)?;
            emit(&format!("{}\n", written.display()))?;
        }
        None => {
            emit(&format!("{}\n", template.render(args.format)?))?;
        }
    }
    Ok(())
}

fn context(path: &Path, env: &Environment, action: &ContextAction) -> CommandResult<()> {
    let mut file = load_context_from(path)?;

    match action {
        ContextAction::List => {
            return emit(&format_context_list(&context_list(&file)));
        }
        ContextAction::Get { key } => {
            return emit(&format!("{}\n", context_get(&file, key)?));
        }
        ContextAction::Lookups => {
            return emit(&format_lookup_list(&lookup_list(&file)));
        }
        ContextAction::Set { key, value } => {
            context_set(&mut file, key, value)?;
            info!("Set {}={}", key, value);
        }
        ContextAction::Unset { key } => {
            context_unset(&mut file, key)?;
            info!("Unset {}", key);
        }
        ContextAction::RecordVpc(args) => {
            let key = record_vpc(&mut file, &lookup_for(args), env, result_for(args))?;
            emit(&format!("Recorded {}\n", key))?;
        }
    }

    save_context_to(&file, path)?;
    Ok(())
}

fn lookup_for(args: &RecordVpcArgs) -> VpcLookup {
    match args.vpc_id {
        Some(ref id) if !args.default => VpcLookup::ById(id.clone()),
        _ => VpcLookup::Default,
    }
}

fn result_for(args: &RecordVpcArgs) -> VpcLookupResult {
    VpcLookupResult {
        vpc_id: args.resolved_id.clone(),
        availability_zones: args.azs.clone(),
        public_subnet_ids: args.public_subnets.clone(),
        private_subnet_ids: args.private_subnets.clone(),
    }
}

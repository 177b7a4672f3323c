// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Weft secret store server binary.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use weft_common_secret::SecretString;
use weft_server::output::{render_rotation_reports, render_secret_table};
use weft_server::version::format_version_info;
use weft_server::{init_tracing, ServerContext};
use weft_server_config::ServerConfig;
use weft_server_secrets::{Caller, Scope, SecretsError, SecretsService, ServerKey};

/// Weft server - encrypted secret store for workflow projects.
#[derive(Parser, Debug)]
#[command(name = "weft-server", about = "Weft secret store server", version)]
struct Args {
	/// Config file to load instead of /etc/weft/server.toml
	#[arg(long, global = true, env = "WEFT_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Open the database, run the startup key rotation check and wait for shutdown
	Start,
	/// Re-encrypt every project from WEFT_SERVER_OLD_APP_KEY to WEFT_SERVER_APP_KEY
	Rotate,
	/// Print a freshly generated server key as hex
	Keygen,
	/// Manage project secrets
	Secret {
		#[command(subcommand)]
		command: SecretCommand,
	},
	/// Show version and build information
	Version,
}

#[derive(Subcommand, Debug)]
enum SecretCommand {
	/// Create or update a secret
	Set(SetArgs),
	/// List secrets of a project
	List(ListArgs),
	/// Delete a secret
	Delete(DeleteArgs),
}

#[derive(ClapArgs, Debug)]
struct ScopeArgs {
	/// Project the secret belongs to
	#[arg(long, short = 'p', env = "WEFT_PROJECT")]
	project: String,

	/// Namespace within the project; omit for a project-level secret
	#[arg(long, short = 'n', env = "WEFT_NAMESPACE")]
	namespace: Option<String>,
}

impl ScopeArgs {
	fn scope(&self) -> anyhow::Result<Scope> {
		Ok(Scope::parse(&self.project, self.namespace.as_deref())?)
	}
}

#[derive(ClapArgs, Debug)]
struct SetArgs {
	name: String,

	/// Secret value; read from --file or stdin when omitted
	value: Option<String>,

	#[command(flatten)]
	scope: ScopeArgs,

	/// Read the value from a file
	#[arg(long, conflicts_with = "value")]
	file: Option<PathBuf>,

	/// The value is already base64 encoded
	#[arg(long)]
	base64: bool,

	/// Only update an existing secret
	#[arg(long, conflicts_with = "force")]
	update_only: bool,

	/// Update the secret if it already exists
	#[arg(long)]
	force: bool,
}

#[derive(ClapArgs, Debug)]
struct ListArgs {
	#[command(flatten)]
	scope: ScopeArgs,

	/// Include secrets reserved for the server itself
	#[arg(long)]
	include_system: bool,
}

#[derive(ClapArgs, Debug)]
struct DeleteArgs {
	name: String,

	#[command(flatten)]
	scope: ScopeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	// Subcommands that need neither configuration nor a database
	match args.command {
		Some(Command::Version) => {
			println!("{}", format_version_info());
			return Ok(());
		}
		Some(Command::Keygen) => {
			let key = ServerKey::generate().context("failed to generate key")?;
			println!("{}", key.to_hex().expose());
			return Ok(());
		}
		_ => {}
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = load_config(args.config.as_ref())?;
	init_tracing(&config.logging)?;

	tracing::info!(database = %config.database.url, "starting weft-server");
	let ctx = ServerContext::open(config).await?;

	match args.command.unwrap_or(Command::Start) {
		Command::Start => start(&ctx).await,
		Command::Rotate => {
			let reports = ctx.rotate_keys().await?;
			print!("{}", render_rotation_reports(&reports));
			if reports.iter().any(|r| r.outcome.is_aborted()) {
				anyhow::bail!("key rotation aborted for at least one project");
			}
			Ok(())
		}
		Command::Secret { command } => secret(&ctx, command).await,
		Command::Version | Command::Keygen => Ok(()),
	}
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServerConfig> {
	let config = match path {
		Some(path) => weft_server_config::load_config_with_file(path.clone()),
		None => weft_server_config::load_config(),
	};
	config.context("failed to load server configuration")
}

async fn start(ctx: &ServerContext) -> anyhow::Result<()> {
	ctx.run_startup_rotation().await;

	tracing::info!("weft-server ready");
	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for shutdown signal")?;
	tracing::info!("shutting down");
	Ok(())
}

async fn secret(ctx: &ServerContext, command: SecretCommand) -> anyhow::Result<()> {
	let service = SecretsService::new(ctx.store.clone(), ctx.keys.current.clone());

	match command {
		SecretCommand::Set(args) => {
			let scope = args.scope.scope()?;
			let value = read_value(&args)?;

			let (info, action) = if args.update_only {
				(
					service
						.update(&scope, &args.name, &value, args.base64, Caller::User)
						.await,
					"updated",
				)
			} else {
				match service
					.create(&scope, &args.name, &value, args.base64, Caller::User)
					.await
				{
					Err(SecretsError::DuplicateName(_)) if args.force => (
						service
							.update(&scope, &args.name, &value, args.base64, Caller::User)
							.await,
						"updated",
					),
					Err(SecretsError::DuplicateName(name)) => {
						anyhow::bail!("secret {name} already exists in {scope}; pass --force to update it")
					}
					other => (other, "created"),
				}
			};
			let info = info
				.inspect_err(log_failure)
				.with_context(|| format!("failed to set secret {} in {scope}", args.name))?;
			println!("Secret {} {action} in {scope} (digest {})", info.name, info.digest);
		}
		SecretCommand::List(args) => {
			let scope = args.scope.scope()?;
			let secrets = match &scope.namespace {
				Some(_) => service.list_visible(&scope, args.include_system).await,
				None => service.list(&scope.project, args.include_system).await,
			}
			.inspect_err(log_failure)
			.with_context(|| format!("failed to list secrets of {scope}"))?;
			print!("{}", render_secret_table(&scope.project, &secrets));
		}
		SecretCommand::Delete(args) => {
			let scope = args.scope.scope()?;
			service
				.delete(&scope, &args.name, Caller::User)
				.await
				.inspect_err(log_failure)
				.with_context(|| format!("failed to delete secret {} from {scope}", args.name))?;
			println!("Secret {} deleted from {scope}", args.name);
		}
	}
	Ok(())
}

fn log_failure(err: &SecretsError) {
	if err.is_internal() {
		tracing::error!(error = %err, "secret operation failed");
	} else if err.is_validation() {
		tracing::warn!(error = %err, "secret request rejected");
	} else {
		tracing::debug!(error = %err, "secret operation failed");
	}
}

/// The value from the argument, `--file`, or stdin, in that order.
fn read_value(args: &SetArgs) -> anyhow::Result<SecretString> {
	if let Some(value) = &args.value {
		return Ok(SecretString::from(value.as_str()));
	}
	if let Some(path) = &args.file {
		return Ok(weft_common_config::read_secret_file(path)?);
	}

	let mut buf = String::new();
	std::io::stdin()
		.read_to_string(&mut buf)
		.context("failed to read secret value from stdin")?;
	if buf.ends_with('\n') {
		buf.pop();
		if buf.ends_with('\r') {
			buf.pop();
		}
	}
	Ok(SecretString::new(buf))
}

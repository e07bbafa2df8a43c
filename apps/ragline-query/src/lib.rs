use std::{fs, io, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::WrapErr;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use ragline_pipeline::{QueryPlan, RagClient};

#[derive(Debug, Parser)]
#[command(
	version = ragline_cli::VERSION,
	rename_all = "kebab",
	styles = ragline_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// JSON query plan: `{"entity_type": .., "steps": [{"op": ..}, ..]}`.
	#[arg(long, short = 'p', value_name = "FILE")]
	pub plan: PathBuf,
	/// Print the planned steps and their Cypher without contacting any backend.
	#[arg(long, conflicts_with_all = ["count", "metadata"])]
	pub explain: bool,
	/// Print the number of results before pagination.
	#[arg(long, conflicts_with = "metadata")]
	pub count: bool,
	/// Include per-operation execution metadata.
	#[arg(long)]
	pub metadata: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = ragline_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

	let raw = fs::read_to_string(&args.plan)
		.wrap_err_with(|| format!("Failed to read query plan {}.", args.plan.display()))?;
	let plan: QueryPlan = serde_json::from_str(&raw)
		.wrap_err_with(|| format!("Failed to parse query plan {}.", args.plan.display()))?;
	let client = RagClient::from_config(&config)?;
	let builder = plan.into_builder(&client);

	tracing::info!(
		entity_type = builder.entity_type(),
		operations = builder.operations().len(),
		"Running query plan."
	);

	let output: Value = if args.explain {
		serde_json::to_value(builder.explain()?)?
	} else if args.count {
		json!({ "count": builder.count().await? })
	} else if args.metadata {
		serde_json::to_value(builder.execute_with_metadata().await?)?
	} else {
		serde_json::to_value(builder.execute().await?)?
	};

	println!("{}", serde_json::to_string_pretty(&output)?);

	Ok(())
}

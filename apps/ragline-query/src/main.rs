use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = ragline_query::Args::parse();

	ragline_query::run(args).await
}

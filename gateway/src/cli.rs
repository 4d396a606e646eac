use clap::Parser;
use tracing::Level;

#[derive(Parser)]
#[command(version)]
pub struct CliOpts {
	/// Path to the yaml configuration file
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<String>,
	/// Websocket server port
	#[arg(short, long)]
	pub port: Option<u16>,
	/// Websocket server host
	#[arg(long)]
	pub host: Option<String>,
	/// Upstream node websocket endpoint, can be repeated (overrides configured endpoints)
	#[arg(short, long = "upstream", value_name = "URL")]
	pub upstreams: Vec<String>,
	/// Run a clean gateway, deleting existing db_path folder
	#[arg(long)]
	pub clean: bool,
	/// Path to the db_path, where RocksDB stores its data
	#[arg(long)]
	pub db_path: Option<String>,
	/// Log level
	#[arg(long)]
	pub verbosity: Option<Level>,
	/// Set logs format to JSON
	#[arg(long)]
	pub logs_json: bool,
}

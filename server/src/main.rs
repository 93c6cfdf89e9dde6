mod config;
mod graphql;
mod http;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use platform_obs::{ObsConfig, init_tracing};
use tracing::info;

use crate::{
    config::AppConfig,
    graphql::TodoStore,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(
    name = "gateway-server",
    version,
    about = "GraphQL gateway with directive-based field authorization"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + GraphQL server.
    Serve(ServeCommand),
    /// Print the executable GraphQL schema.
    #[command(name = "schema:print")]
    SchemaPrint {
        #[arg(long, value_name = "FILE", help = "Destination file path")]
        output: Option<PathBuf>,
    },
    /// List guarded fields and their directives.
    #[command(name = "policies:print")]
    PoliciesPrint,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

impl From<ServeCommand> for ServeConfig {
    fn from(value: ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing(ObsConfig::from_env("gateway-server")?)?;
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(cmd) => run_server(cmd).await,
        Command::SchemaPrint { output } => schema_print(output),
        Command::PoliciesPrint => policies_print(),
    }
}

async fn run_server(cmd: ServeCommand) -> Result<()> {
    let config = Arc::new(AppConfig::load()?);
    let identity = config.auth.clone().into_provider()?;
    let schema = graphql::build_schema(Arc::new(TodoStore::new()))?;
    let state = AppState {
        schema,
        identity,
        config,
    };
    http::serve(cmd.into(), state).await
}

fn schema_print(path: Option<PathBuf>) -> Result<()> {
    let sdl = graphql::build_schema(Arc::new(TodoStore::new()))?.sdl();
    match path {
        Some(path) => {
            std::fs::write(&path, sdl)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "schema snapshot written");
        }
        None => print!("{sdl}"),
    }
    Ok(())
}

fn policies_print() -> Result<()> {
    let policies = graphql::load_policies()?;
    for (coordinate, directives) in policies.iter() {
        let rendered = directives
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        println!("{coordinate}: {rendered}");
    }
    Ok(())
}

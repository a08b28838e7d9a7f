use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use splitlab_http::serve;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7800;

#[derive(Parser)]
#[command(name = "splitlab", about = "A/B experiment tracking and significance server")]
struct Cli {
    /// Persist experiments under this directory. In-memory when unset.
    #[arg(long, env = "SPLITLAB_DATA_DIR")]
    data_dir: Option<String>,
    #[arg(long, env = "SPLITLAB_BIND_ADDR")]
    bind_addr: Option<String>,
    #[arg(long, env = "SPLITLAB_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let bind_addr = resolve_bind_addr(&cli, &matches)
        .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
    std::env::set_var("SPLITLAB_BIND_ADDR", &bind_addr);
    match resolve_data_dir(&cli) {
        Some(dir) => std::env::set_var("SPLITLAB_DATA_DIR", dir),
        None => std::env::remove_var("SPLITLAB_DATA_DIR"),
    }
    serve().await
}

fn resolve_data_dir(cli: &Cli) -> Option<String> {
    cli.data_dir
        .as_deref()
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
}

/// Command-line flags beat environment; `--bind-addr` beats `--port`.
fn resolve_bind_addr(cli: &Cli, matches: &ArgMatches) -> Result<String, String> {
    let bind_on_cli = is_set_on_command_line(matches, "bind_addr");
    let port_on_cli = is_set_on_command_line(matches, "port");

    if bind_on_cli && port_on_cli {
        return Err("--bind-addr cannot be used with --port".to_string());
    }

    if port_on_cli {
        if let Some(port) = cli.port {
            return Ok(format!("{DEFAULT_HOST}:{port}"));
        }
    }

    if let Some(bind_addr) = &cli.bind_addr {
        return Ok(bind_addr.clone());
    }

    if let Some(port) = cli.port {
        return Ok(format!("{DEFAULT_HOST}:{port}"));
    }

    Ok(format!("{DEFAULT_HOST}:{DEFAULT_PORT}"))
}

fn is_set_on_command_line(matches: &ArgMatches, arg: &str) -> bool {
    matches.value_source(arg) == Some(ValueSource::CommandLine)
}

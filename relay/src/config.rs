//! Relay configuration: a much smaller surface than origin's, since the
//! relay has no filesystem of its own to point at (spec.md §6).

use bpaf::{construct, OptionParser, Parser};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub port: Option<u16>,
    pub host: Option<String>,
}

fn cli_parser() -> OptionParser<CliArgs> {
    let port = bpaf::long("port")
        .help("HTTP/WebSocket port to listen on")
        .argument::<u16>("PORT")
        .optional();
    let host = bpaf::long("host")
        .help("HTTP/WebSocket host/interface to bind")
        .argument::<String>("HOST")
        .optional();

    construct!(CliArgs { port, host })
        .to_options()
        .descr("Cloud relay for the origin-to-mobile tunnel")
}

pub fn parse_cli() -> CliArgs {
    cli_parser().run()
}

/// Resolve a `Config` from, in descending precedence: `overrides`, `cli`,
/// `env_lookup` (injected so this stays a pure, testable function), and
/// finally the hardcoded defaults.
pub fn resolve(
    overrides: Option<ConfigOverrides>,
    cli: CliArgs,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Config {
    let overrides = overrides.unwrap_or_default();

    let host = overrides.host.unwrap_or_else(|| {
        cli.host
            .clone()
            .or_else(|| env_lookup("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    });

    let port = overrides.port.unwrap_or_else(|| {
        cli.port
            .or_else(|| env_lookup("PORT").and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    });

    Config { host, port }
}

pub fn load() -> Config {
    resolve(None, parse_cli(), |key| std::env::var(key).ok())
}

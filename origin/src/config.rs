//! Configuration precedence: in-process injection > CLI flags > env vars
//! > OS-specific defaults (spec.md §6).

use std::path::PathBuf;

use bpaf::{construct, OptionParser, Parser};

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_CACHE_MAX_SIZE: u64 = 500;
const DEFAULT_CACHE_TTL: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub music_roots: Vec<PathBuf>,
    pub serato_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub cache_max_size: u64,
    pub cache_ttl: u64,
    pub read_only: bool,
    /// The relay's `/ws/desktop` WebSocket URL. Absent means the origin
    /// serves its HTTP API directly and never opens the tunnel (spec.md
    /// names no dedicated env var for this, so `RELAY_URL` follows the
    /// same precedence chain as everything else in this module).
    pub relay_url: Option<String>,
    /// Require every checkable tag (artist/title/duration) to match during
    /// filename-based path resolution. See `library::resolver::ResolverConfig`.
    pub resolver_strict: bool,
}

/// Fields a caller (tests, or an embedding application) may set directly,
/// bypassing CLI/env/OS defaults entirely for that field.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub music_roots: Option<Vec<PathBuf>>,
    pub serato_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cache_max_size: Option<u64>,
    pub cache_ttl: Option<u64>,
    pub read_only: Option<bool>,
    pub relay_url: Option<String>,
    pub resolver_strict: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub serato_path: Option<PathBuf>,
    pub music_paths: Option<String>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub cache_max_size: Option<u64>,
    pub cache_ttl: Option<u64>,
    pub read_only: bool,
    pub relay_url: Option<String>,
    pub resolver_strict: bool,
}

fn cli_parser() -> OptionParser<CliArgs> {
    let serato_path = bpaf::long("serato-path")
        .help("Path to the Serato-style database directory")
        .argument::<PathBuf>("PATH")
        .optional();
    let music_paths = bpaf::long("music-paths")
        .help("Comma-separated list of music root directories")
        .argument::<String>("PATHS")
        .optional();
    let port = bpaf::long("port")
        .help("HTTP port to listen on")
        .argument::<u16>("PORT")
        .optional();
    let host = bpaf::long("host")
        .help("HTTP host/interface to bind")
        .argument::<String>("HOST")
        .optional();
    let cache_max_size = bpaf::long("cache-max-size")
        .help("Upper bound on resolver cache entries")
        .argument::<u64>("N")
        .optional();
    let cache_ttl = bpaf::long("cache-ttl")
        .help("Resolver cache entry lifetime, in seconds")
        .argument::<u64>("SECONDS")
        .optional();
    let read_only = bpaf::long("read-only")
        .help("Refuse crate-mutating requests")
        .switch();
    let relay_url = bpaf::long("relay-url")
        .help("WebSocket URL of the relay's /ws/desktop endpoint")
        .argument::<String>("URL")
        .optional();
    let resolver_strict = bpaf::long("resolver-strict")
        .help("Require artist, title, and duration to all match when resolving moved files")
        .switch();

    construct!(CliArgs {
        serato_path,
        music_paths,
        port,
        host,
        cache_max_size,
        cache_ttl,
        read_only,
        relay_url,
        resolver_strict,
    })
    .to_options()
    .descr("Local library bridge server")
}

pub fn parse_cli() -> CliArgs {
    cli_parser().run()
}

fn os_default_music_root() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn os_default_serato_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Music").join("_Serato_"))
}

/// Resolve a `Config` from, in descending precedence: `overrides`, `cli`,
/// `env_lookup` (injected so this stays a pure, testable function), and
/// finally OS-specific defaults.
pub fn resolve(
    overrides: Option<ConfigOverrides>,
    cli: CliArgs,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Config {
    let overrides = overrides.unwrap_or_default();

    let music_roots = overrides.music_roots.unwrap_or_else(|| {
        cli.music_paths
            .clone()
            .or_else(|| env_lookup("MUSIC_PATHS"))
            .map(|paths| paths.split(',').map(PathBuf::from).collect())
            .or_else(|| env_lookup("MUSIC_PATH").map(|p| vec![PathBuf::from(p)]))
            .unwrap_or_else(|| vec![os_default_music_root()])
    });

    let serato_path = overrides.serato_path.or_else(|| {
        cli.serato_path
            .clone()
            .or_else(|| env_lookup("SERATO_PATH").map(PathBuf::from))
            .or_else(os_default_serato_path)
    });

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

    let cache_max_size = overrides.cache_max_size.unwrap_or_else(|| {
        cli.cache_max_size
            .or_else(|| env_lookup("CACHE_MAX_SIZE").and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_CACHE_MAX_SIZE)
    });

    let cache_ttl = overrides.cache_ttl.unwrap_or_else(|| {
        cli.cache_ttl
            .or_else(|| env_lookup("CACHE_TTL").and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_CACHE_TTL)
    });

    let read_only = overrides.read_only.unwrap_or(cli.read_only);

    let relay_url = overrides
        .relay_url
        .or_else(|| cli.relay_url.clone().or_else(|| env_lookup("RELAY_URL")));

    let resolver_strict = overrides.resolver_strict.unwrap_or_else(|| {
        if cli.resolver_strict {
            true
        } else {
            env_lookup("RESOLVER_STRICT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        }
    });

    Config {
        music_roots,
        serato_path,
        host,
        port,
        cache_max_size,
        cache_ttl,
        read_only,
        relay_url,
        resolver_strict,
    }
}

pub fn load() -> Config {
    resolve(None, parse_cli(), |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> CliArgs {
        CliArgs {
            serato_path: None,
            music_paths: None,
            port: None,
            host: None,
            cache_max_size: None,
            cache_ttl: None,
            read_only: false,
            relay_url: None,
            resolver_strict: false,
        }
    }

    #[test]
    fn injection_wins_over_everything() {
        let overrides = ConfigOverrides {
            port: Some(1111),
            ..Default::default()
        };
        let mut cli = empty_cli();
        cli.port = Some(2222);
        let config = resolve(Some(overrides), cli, |k| {
            (k == "PORT").then(|| "3333".to_string())
        });
        assert_eq!(config.port, 1111);
    }

    #[test]
    fn cli_wins_over_env() {
        let mut cli = empty_cli();
        cli.port = Some(2222);
        let config = resolve(None, cli, |k| (k == "PORT").then(|| "3333".to_string()));
        assert_eq!(config.port, 2222);
    }

    #[test]
    fn env_wins_over_os_default() {
        let config = resolve(None, empty_cli(), |k| {
            (k == "PORT").then(|| "3333".to_string())
        });
        assert_eq!(config.port, 3333);
    }

    #[test]
    fn falls_back_to_os_default_port() {
        let config = resolve(None, empty_cli(), |_| None);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn music_paths_env_is_comma_split() {
        let config = resolve(None, empty_cli(), |k| {
            (k == "MUSIC_PATHS").then(|| "/a,/b,/c".to_string())
        });
        assert_eq!(
            config.music_roots,
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
    }
}

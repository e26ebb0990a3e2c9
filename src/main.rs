use std::{error::Error, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio_util::sync::CancellationToken;
use veil::Redact;

use mpdirc::{
    chat::Irc,
    config::Config,
    gateway::Gateway,
    player::Mpd,
    signal::{self, ShutdownSignal},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
///
/// Every option overrides the configuration file, which overrides the
/// built-in defaults.
#[derive(Clone, Default, PartialEq, Eq, Parser, Redact)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// TOML file with `[player]` and `[chat]` tables. Command line options
    /// take precedence over its values.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "MPDIRC_CONFIG")]
    config: Option<String>,

    /// MPD host name or address
    ///
    /// [default: localhost]
    #[arg(long, value_name = "HOST", value_hint = ValueHint::Hostname, env = "MPDIRC_MPD_HOST")]
    mpd_host: Option<String>,

    /// MPD port
    ///
    /// [default: 6600]
    #[arg(long, value_name = "PORT", env = "MPDIRC_MPD_PORT")]
    mpd_port: Option<u16>,

    /// MPD password
    #[arg(long, value_name = "PASSWORD", env = "MPDIRC_MPD_PASSWORD", hide_env_values = true)]
    #[redact]
    mpd_password: Option<String>,

    /// IRC server host name or address
    #[arg(long, value_name = "HOST", value_hint = ValueHint::Hostname, env = "MPDIRC_IRC_HOST")]
    irc_host: Option<String>,

    /// IRC server port
    ///
    /// [default: 6667]
    #[arg(long, value_name = "PORT", env = "MPDIRC_IRC_PORT")]
    irc_port: Option<u16>,

    /// IRC nickname
    ///
    /// An underscore is appended for as long as the nickname is taken.
    ///
    /// [default: mpdirc]
    #[arg(short, long, value_name = "NICK", env = "MPDIRC_IRC_NICK")]
    nick: Option<String>,

    /// IRC channel to join
    #[arg(long, value_name = "CHANNEL", env = "MPDIRC_IRC_CHANNEL")]
    channel: Option<String>,

    /// IRC server password
    #[arg(long, value_name = "PASSWORD", env = "MPDIRC_IRC_PASSWORD", hide_env_values = true)]
    #[redact]
    irc_password: Option<String>,

    /// Do not announce tracks as they start
    ///
    /// Announcements can still be switched on from the channel.
    #[arg(long, default_value_t = false)]
    no_announce: bool,

    /// Stay in the foreground instead of detaching
    #[arg(short, long, default_value_t = false)]
    foreground: bool,

    /// Seconds between reconnection attempts
    ///
    /// [default: 30]
    #[arg(long, value_name = "SECONDS")]
    reconnect_interval: Option<u64>,

    /// Prefix that marks channel messages as commands
    ///
    /// [default: !]
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from defaults, the configuration file and the
/// command line, in increasing order of precedence.
fn load_config(args: Args) -> mpdirc::error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(host) = args.mpd_host {
        config.player.host = host;
    }
    if let Some(port) = args.mpd_port {
        config.player.port = port;
    }
    if args.mpd_password.is_some() {
        config.player.password = args.mpd_password;
    }

    if let Some(host) = args.irc_host {
        config.chat.host = host;
    }
    if let Some(port) = args.irc_port {
        config.chat.port = port;
    }
    if let Some(nick) = args.nick {
        config.chat.nick = nick;
    }
    if let Some(channel) = args.channel {
        config.chat.channel = channel;
    }
    if args.irc_password.is_some() {
        config.chat.password = args.irc_password;
    }

    if args.no_announce {
        config.announce = false;
    }
    if args.foreground {
        config.foreground = true;
    }
    if let Some(seconds) = args.reconnect_interval {
        config.reconnect_interval = Duration::from_secs(seconds);
    }
    if let Some(prefix) = args.prefix {
        config.command_prefix = prefix;
    }

    config.validate()
}

/// Detaches from the terminal. Standard streams stay open so that logging
/// keeps working when redirected.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn daemonize() -> Result<(), Box<dyn Error>> {
    nix::unistd::daemon(true, true)?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn daemonize() -> Result<(), Box<dyn Error>> {
    info!("running in the foreground, detaching is not supported on this platform");
    Ok(())
}

/// Main application loop.
///
/// Runs the gateway until a shutdown signal arrives or a link fails for good.
///
/// # Errors
///
/// Returns an error when signal handlers cannot be registered, or when the
/// gateway ended with a terminal error such as an MPD server that is too old.
async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let mut signals = signal::Handler::new()?;
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let watcher = tokio::spawn(async move {
        let signal: ShutdownSignal = signals.recv().await;
        info!("received {signal}");
        token.cancel();
    });

    let player = Mpd::new(&config.player, config.timeout);
    let chat = Irc::new(&config.chat, config.timeout);
    let mut gateway = Gateway::new(&config, player, chat);

    let result = gateway.run(shutdown).await;
    watcher.abort();

    result.map_err(Into::into)
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, detaches unless asked not to, and starts the main application
/// loop. The runtime is only built after detaching, as forking does not
/// carry its threads over.
fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    debug!("Config {config:#?}");

    if !config.foreground {
        if let Err(e) = daemonize() {
            error!("failed to detach: {e}");
            process::exit(1);
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("{e}");
        process::exit(1);
    }

    info!("stopped");
}

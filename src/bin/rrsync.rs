//! Command-line entry point: parses a remote spec, picks SSH or daemon
//! transport, and drives one [`session::SessionDriver`] operation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use session::{
    build_remote_command, list_modules, CancellationFlag, ClientConfig, DaemonCredentials, NullCallbacks,
    SessionDriver,
};
use transport::{SocketChannel, SshChannel};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "rrsync", about = "rsync protocol 29/30 client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increases log verbosity; repeat for more detail.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Downloads `remote` into `local`.
    Download(TransferArgs),
    /// Uploads `local` to `remote`.
    Upload(TransferArgs),
    /// Removes `remote` on the peer.
    Remove(EndpointArgs),
    /// Creates a directory at `remote` on the peer.
    Mkdir(EndpointArgs),
    /// Creates a symlink at `remote` on the peer pointing to `target`.
    Link {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Symlink target text.
        target: String,
    },
    /// Lists the modules a daemon exports.
    ListModules {
        /// `host` or `host:port`.
        host: String,
    },
}

#[derive(clap::Args)]
struct EndpointArgs {
    /// `user@host:path`, `host::module/path`, or `rsync://host/module/path`.
    remote: String,
}

#[derive(clap::Args)]
struct TransferArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,

    /// Local directory to sync with.
    local: PathBuf,

    /// Recurse into subdirectories.
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Delete local entries absent from the remote list (download only).
    #[arg(long)]
    delete: bool,

    /// Caps the remote-to-local transfer rate, in kilobytes per second.
    #[arg(long, default_value_t = 0)]
    bwlimit: u32,

    /// Caps the local-to-remote transfer rate, in kilobytes per second.
    #[arg(long, default_value_t = 0)]
    upload_limit: u32,

    /// Remote alternate-base directory for unchanged-file hardlinking;
    /// repeatable.
    #[arg(long = "link-dest")]
    link_dest: Vec<String>,

    /// Restrict the operation to these remote-relative paths.
    #[arg(long = "only")]
    only: Vec<String>,

    /// Daemon account password, if the module requires authentication.
    #[arg(long)]
    password: Option<String>,
}

enum Endpoint {
    Ssh { user: String, host: String, path: String },
    Daemon { host: String, module: String, path: String },
}

fn parse_endpoint(spec: &str) -> Endpoint {
    if let Some(rest) = spec.strip_prefix("rsync://") {
        let (host, module_and_path) = rest.split_once('/').unwrap_or((rest, ""));
        let (module, path) = module_and_path.split_once('/').unwrap_or((module_and_path, ""));
        return Endpoint::Daemon {
            host: host.to_string(),
            module: module.to_string(),
            path: path.to_string(),
        };
    }
    if let Some((host, module_and_path)) = spec.split_once("::") {
        let (module, path) = module_and_path.split_once('/').unwrap_or((module_and_path, ""));
        return Endpoint::Daemon {
            host: host.to_string(),
            module: module.to_string(),
            path: path.to_string(),
        };
    }
    let (user_host, path) = spec.split_once(':').unwrap_or((spec, "."));
    let (user, host) = user_host.split_once('@').unwrap_or(("", user_host));
    Endpoint::Ssh {
        user: user.to_string(),
        host: host.to_string(),
        path: path.to_string(),
    }
}

fn build_config(args: &TransferArgs) -> ClientConfig {
    let mut builder = ClientConfig::builder()
        .download_limit_kbps(args.bwlimit)
        .upload_limit_kbps(args.upload_limit)
        .deleting(args.delete);
    for path in &args.link_dest {
        builder = builder.add_backup_path(path.clone());
    }
    if !args.only.is_empty() {
        builder = builder.include_only(args.only.iter().cloned().collect::<HashSet<_>>());
    }
    builder.build()
}

fn ssh_connect(host: &str, user: &str, command: String) -> Result<SshChannel, transport::ChannelError> {
    let addr = if host.contains(':') { host.to_string() } else { format!("{host}:22") };
    let mut channel = SshChannel::connect(&addr, user, None, |_server, _fingerprint| true)?;
    channel.create_channel(&command)?;
    Ok(channel)
}

fn run(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Command::Download(args) | Command::Upload(args) => {
            let downloading = matches!(cli.command, Command::Download(_));
            let endpoint = parse_endpoint(&args.endpoint.remote);
            let config = build_config(args);
            let fs = platform::UnixFilesystem::new();
            let cancel = CancellationFlag::new();

            match endpoint {
                Endpoint::Ssh { user, host, path } => {
                    let command = build_remote_command(&path, downloading, args.recursive, &config);
                    let channel = ssh_connect(&host, &user, command).map_err(|e| e.to_string())?;
                    let mut driver = SessionDriver::connect_ssh(
                        channel,
                        cancel,
                        fs,
                        args.local.clone(),
                        NullCallbacks,
                        config,
                        downloading,
                        args.delete,
                    )
                    .map_err(|e| e.to_string())?;
                    if downloading {
                        driver.download().map_err(|e| e.to_string())?;
                    } else {
                        driver.upload().map_err(|e| e.to_string())?;
                    }
                }
                Endpoint::Daemon { host, module, path } => {
                    let addr = if host.contains(':') { host.clone() } else { format!("{host}:873") };
                    let channel = SocketChannel::connect(&addr).map_err(|e| e.to_string())?;
                    let command = build_remote_command(&path, downloading, args.recursive, &config);
                    let command_args: Vec<String> = command.split(' ').map(str::to_string).collect();
                    let credentials = args.password.as_ref().map(|password| DaemonCredentials {
                        user: "rrsync",
                        password: password.as_str(),
                    });
                    let mut driver = SessionDriver::connect_daemon(
                        channel,
                        cancel,
                        fs,
                        args.local.clone(),
                        NullCallbacks,
                        config,
                        &module,
                        credentials,
                        &command_args,
                        downloading,
                        args.delete,
                    )
                    .map_err(|e| e.to_string())?;
                    if downloading {
                        driver.download().map_err(|e| e.to_string())?;
                    } else {
                        driver.upload().map_err(|e| e.to_string())?;
                    }
                }
            }
            Ok(())
        }
        Command::Remove(args) => with_upload_side_driver(&args.remote, |driver, path| driver.remove(path)),
        Command::Mkdir(args) => with_upload_side_driver(&args.remote, |driver, path| driver.mkdir(path)),
        Command::Link { endpoint, target } => {
            with_upload_side_driver(&endpoint.remote, |driver, path| driver.link(path, target))
        }
        Command::ListModules { host } => {
            let addr = if host.contains(':') { host.clone() } else { format!("{host}:873") };
            let channel = SocketChannel::connect(&addr).map_err(|e| e.to_string())?;
            let mut callbacks = NullCallbacks;
            let modules = list_modules(channel, CancellationFlag::new(), &mut callbacks).map_err(|e| e.to_string())?;
            for module in modules {
                println!("{module}");
            }
            Ok(())
        }
    }
}

/// Remove/mkdir/link all run as a bare `--server` session over SSH, no
/// sender/recursive flags, since they operate on a single synthetic entry.
fn with_upload_side_driver(
    remote: &str,
    op: impl FnOnce(&mut SessionDriver<SshChannel, platform::UnixFilesystem, NullCallbacks>, &str) -> Result<(), session::SessionError>,
) -> Result<(), String> {
    let endpoint = parse_endpoint(remote);
    let Endpoint::Ssh { user, host, path } = endpoint else {
        return Err("remove/mkdir/link require an ssh-style remote spec".to_string());
    };
    let config = ClientConfig::builder().build();
    let command = build_remote_command(".", false, false, &config);
    let channel = ssh_connect(&host, &user, command).map_err(|e| e.to_string())?;
    let fs = platform::UnixFilesystem::new();
    let mut driver = SessionDriver::connect_ssh(
        channel,
        CancellationFlag::new(),
        fs,
        PathBuf::from("."),
        NullCallbacks,
        config,
        false,
        false,
    )
    .map_err(|e| e.to_string())?;
    op(&mut driver, &path).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();
    logging_sink::install(Box::new(logging_sink::TracingSink));

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("rrsync: {message}");
            ExitCode::FAILURE
        }
    }
}

//! mlink - adapter CLI for Cache, IRIS, and YottaDB.
//!
//! Opens a connection the way an embedding runtime would, runs wire
//! operations against it, and prints the replies. Connection parameters
//! come from flags or from a named profile in `mlink.toml`.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mlink::config::MlinkConfig;
use mlink::hub::{Hub, Op};
use mlink::protocol::{ReplyBuffer, RequestBuilder, DEFAULT_REPLY_CAPACITY, INVALID_SLOT};

#[derive(Parser)]
#[command(name = "mlink")]
#[command(version)]
#[command(about = "In-process adapter for Cache, IRIS, and YottaDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script of operations, one per line, over one connection
    Exec {
        /// Script file; reads standard input when omitted
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Profile name to load from mlink.toml
        #[arg(long)]
        profile: Option<String>,

        /// Config file path (default: search upwards for mlink.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Engine name: cache, iris, or yottadb
        #[arg(long)]
        engine: Option<String>,

        /// Engine installation path
        #[arg(long)]
        path: Option<String>,

        /// Username for Cache/IRIS authentication
        #[arg(long)]
        username: Option<String>,

        /// Password for Cache/IRIS authentication
        #[arg(long)]
        password: Option<String>,

        /// Namespace to switch to after open (Cache/IRIS)
        #[arg(long)]
        namespace: Option<String>,

        /// Input device for the authentication profile
        #[arg(long)]
        input_device: Option<String>,

        /// Output device for the authentication profile
        #[arg(long)]
        output_device: Option<String>,

        /// Debug trace sink: a file path, stderr, or stdout
        #[arg(long)]
        debug: Option<String>,

        /// Environment block applied before the engine loads
        #[arg(long)]
        env: Option<String>,

        /// Connection slot index
        #[arg(long, default_value = "0")]
        slot: u32,

        /// Emit one JSON record per operation instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Run one operation against an engine
    Op {
        /// Operation name (set, get, next, previous, delete, defined,
        /// increment, function, getnamespace, setnamespace, version, ...)
        #[arg(value_name = "OP")]
        name: String,

        /// Operation arguments: global reference first, then subscripts
        /// and values
        #[arg(value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Profile name to load from mlink.toml
        #[arg(long)]
        profile: Option<String>,

        /// Config file path (default: search upwards for mlink.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Engine name: cache, iris, or yottadb
        #[arg(long)]
        engine: Option<String>,

        /// Engine installation path
        #[arg(long)]
        path: Option<String>,

        /// Username for Cache/IRIS authentication
        #[arg(long)]
        username: Option<String>,

        /// Password for Cache/IRIS authentication
        #[arg(long)]
        password: Option<String>,

        /// Namespace to switch to after open (Cache/IRIS)
        #[arg(long)]
        namespace: Option<String>,

        /// Input device for the authentication profile
        #[arg(long)]
        input_device: Option<String>,

        /// Output device for the authentication profile
        #[arg(long)]
        output_device: Option<String>,

        /// Debug trace sink: a file path, stderr, or stdout
        #[arg(long)]
        debug: Option<String>,

        /// Environment block applied before the engine loads
        #[arg(long)]
        env: Option<String>,

        /// Connection slot index
        #[arg(long, default_value = "0")]
        slot: u32,

        /// Emit one JSON record per operation instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// List profiles found in mlink.toml
    Profiles {
        /// Config file path (default: search upwards for mlink.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the adapter version banner
    Version,
}

/// Connection flags, merged with an optional mlink.toml profile into the
/// nine open-request arguments. A flag always wins over the profile.
struct ConnectFlags {
    profile: Option<String>,
    config: Option<PathBuf>,
    engine: Option<String>,
    path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    namespace: Option<String>,
    input_device: Option<String>,
    output_device: Option<String>,
    debug: Option<String>,
    env: Option<String>,
}

impl ConnectFlags {
    fn resolve(self) -> Result<[String; 9]> {
        let base = match &self.profile {
            Some(name) => {
                let config = match &self.config {
                    Some(path) => MlinkConfig::load(path)?,
                    None => MlinkConfig::load_from_cwd()?,
                };
                config.profile(name)?.clone()
            }
            None => Default::default(),
        };
        let mut resolved = base.arguments().map(str::to_string);
        let flags = [
            self.engine,
            self.path,
            self.username,
            self.password,
            self.namespace,
            self.input_device,
            self.output_device,
            self.debug,
            self.env,
        ];
        for (field, flag) in resolved.iter_mut().zip(flags) {
            if let Some(value) = flag {
                *field = value;
            }
        }
        Ok(resolved)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Exec {
            file,
            profile,
            config,
            engine,
            path,
            username,
            password,
            namespace,
            input_device,
            output_device,
            debug,
            env,
            slot,
            json,
        } => cmd_exec(
            file.as_deref(),
            ConnectFlags {
                profile,
                config,
                engine,
                path,
                username,
                password,
                namespace,
                input_device,
                output_device,
                debug,
                env,
            },
            slot,
            json,
        ),
        Commands::Op {
            name,
            args,
            profile,
            config,
            engine,
            path,
            username,
            password,
            namespace,
            input_device,
            output_device,
            debug,
            env,
            slot,
            json,
        } => cmd_op(
            &name,
            &args,
            ConnectFlags {
                profile,
                config,
                engine,
                path,
                username,
                password,
                namespace,
                input_device,
                output_device,
                debug,
                env,
            },
            slot,
            json,
        ),
        Commands::Profiles { config } => cmd_profiles(config.as_deref()),
        Commands::Version => cmd_version(),
    }
}

fn cmd_version() -> Result<()> {
    let mut reply = ReplyBuffer::with_capacity(256);
    Hub::global().version(0, &mut reply);
    println!("{}", String::from_utf8_lossy(reply.as_bytes()));
    Ok(())
}

fn cmd_profiles(config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => MlinkConfig::load(path)?,
        None => MlinkConfig::load_from_cwd()?,
    };
    if config.profile.is_empty() {
        println!("no profiles configured");
        return Ok(());
    }
    for name in config.profile_names() {
        let profile = &config.profile[name];
        println!("{:<16} {:<8} {}", name, profile.engine, profile.path);
    }
    Ok(())
}

fn cmd_op(name: &str, args: &[String], flags: ConnectFlags, slot: u32, json: bool) -> Result<()> {
    let op = Op::from_name(name).with_context(|| format!("unknown operation '{}'", name))?;
    let arguments = flags.resolve()?;
    let hub = Hub::global();

    // With no engine named, run against the vacant slot; version and the
    // loopback operations still answer there.
    let opened = !arguments[0].is_empty();
    if opened {
        open_connection(hub, slot, &arguments)?;
    }

    let (rc, reply) = run_op(hub, slot, op, args);
    let ok = report(op, rc, &reply, json);

    if opened {
        close_connection(hub, slot);
    }
    if !ok {
        bail!("operation '{}' failed", op.name());
    }
    Ok(())
}

fn cmd_exec(file: Option<&Path>, flags: ConnectFlags, slot: u32, json: bool) -> Result<()> {
    let script = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read script {}", path.display()))?,
        None => {
            let mut text = String::new();
            io::stdin().lock().read_to_string(&mut text)?;
            text
        }
    };

    let arguments = flags.resolve()?;
    if arguments[0].is_empty() {
        bail!("exec needs an engine; pass --engine/--path or --profile");
    }
    let hub = Hub::global();
    open_connection(hub, slot, &arguments)?;

    let mut failures = 0usize;
    for (number, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else { continue };
        let op = match Op::from_name(name) {
            Some(Op::Open) | Some(Op::Close) => {
                eprintln!("line {}: the session is managed for you, skipping", number + 1);
                continue;
            }
            Some(op) => op,
            None => {
                eprintln!("line {}: unknown operation '{}'", number + 1, name);
                failures += 1;
                continue;
            }
        };
        let args: Vec<String> = words.map(str::to_string).collect();
        let (rc, reply) = run_op(hub, slot, op, &args);
        if !report(op, rc, &reply, json) {
            failures += 1;
        }
    }

    close_connection(hub, slot);
    if failures > 0 {
        bail!("{} operation(s) failed", failures);
    }
    Ok(())
}

fn open_connection(hub: &Hub, slot: u32, arguments: &[String; 9]) -> Result<()> {
    let mut builder = RequestBuilder::new(slot, DEFAULT_REPLY_CAPACITY as u32);
    for value in arguments {
        builder = builder.str_arg(value.as_bytes());
    }
    let mut reply = ReplyBuffer::with_capacity(DEFAULT_REPLY_CAPACITY);
    hub.execute(Op::Open, &builder.finish(), &mut reply);
    let view = reply.view();
    if view.is_error() {
        bail!("open failed: {}", view.to_text());
    }
    Ok(())
}

fn close_connection(hub: &Hub, slot: u32) {
    let request = RequestBuilder::new(slot, DEFAULT_REPLY_CAPACITY as u32).finish();
    let mut reply = ReplyBuffer::with_capacity(64);
    hub.execute(Op::Close, &request, &mut reply);
}

fn run_op(hub: &Hub, slot: u32, op: Op, args: &[String]) -> (i32, ReplyBuffer) {
    let mut builder = RequestBuilder::new(slot, DEFAULT_REPLY_CAPACITY as u32);
    for arg in args {
        builder = builder.str_arg(arg.as_bytes());
    }
    let mut reply = ReplyBuffer::with_capacity(DEFAULT_REPLY_CAPACITY);
    let rc = hub.execute(op, &builder.finish(), &mut reply);
    (rc, reply)
}

/// Print one operation's outcome. Returns false when it failed.
fn report(op: Op, rc: i32, reply: &ReplyBuffer, json: bool) -> bool {
    if rc == INVALID_SLOT {
        eprintln!("{}: no connection in the addressed slot", op.name());
        return false;
    }
    let view = reply.view();
    if json {
        let record = serde_json::json!({
            "op": op.name(),
            "status": rc,
            "error": view.is_error(),
            "value": view.to_text(),
        });
        println!("{}", record);
        return rc == 0 && !view.is_error();
    }
    if view.is_error() {
        eprintln!("{}: {}", op.name(), view.to_text());
        return false;
    }
    println!("{}", view.to_text());
    true
}

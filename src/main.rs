use clap::{Args as ClapArgs, Parser, Subcommand};
use remote_device::config::ConfigLoader;
use remote_device::{
    logging, Args, Config, DeviceError, DeviceResult, Discovery, IdentityFilter, IdentityValue,
    PortScanner, Session, SystemPorts, TransportOpener,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "remote-device",
    version,
    about = "Discover and call methods on serial-attached firmware.",
    long_about = "Finds devices that expose a method table over a serial line, lists their methods and invokes them. Results are printed as JSON on stdout; logs go to stderr (set RUST_LOG to adjust)."
)]
struct Cli {
    /// Configuration file (default: REMOTE_DEVICE_CONFIG, ./remote_device.toml, user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Probe only these ports, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    ports: Vec<String>,

    /// Override the configured baud rate
    #[arg(short, long, global = true)]
    baud_rate: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial ports discovery would probe.
    Ports,
    /// Probe ports and print every matching device.
    Discover {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print the method table of one device.
    Methods {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Invoke one method and print its result.
    Call {
        #[command(flatten)]
        target: TargetArgs,

        /// Call name, wire name or numeric id
        method: String,

        /// Positional arguments; each is parsed as JSON, or taken as text
        args: Vec<String>,

        /// Named arguments as a JSON object
        #[arg(long, conflicts_with = "args")]
        named: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct FilterArgs {
    /// Accept devices with this name (repeatable)
    #[arg(long)]
    name: Vec<String>,

    /// Accept devices with this form factor (repeatable)
    #[arg(long)]
    form_factor: Vec<String>,

    /// Accept devices with this serial number (repeatable)
    #[arg(long)]
    serial_number: Vec<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> IdentityFilter {
        let mut filter = IdentityFilter::any();
        for name in &self.name {
            filter = filter.name(IdentityValue::parse(name));
        }
        for form_factor in &self.form_factor {
            filter = filter.form_factor(IdentityValue::parse(form_factor));
        }
        for serial in &self.serial_number {
            filter = filter.serial_number(IdentityValue::parse(serial));
        }
        filter
    }
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
    /// Connect to this port instead of discovering
    #[arg(short, long)]
    port: Option<String>,

    #[command(flatten)]
    filter: FilterArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path),
        None => ConfigLoader::load(),
    };
    let mut config = match loader {
        Ok(loader) => loader.into_config(),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    if let Some(baud_rate) = cli.baud_rate {
        config.connection.baud_rate = baud_rate;
    }
    if !cli.ports.is_empty() {
        config.discovery.ports = Some(cli.ports.clone());
    }

    match run(cli.command, &config) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> DeviceResult<String> {
    let ports = SystemPorts;
    let discovery = Discovery::from_config(&ports, config)?;

    let output = match command {
        Command::Ports => {
            let candidates = match &config.discovery.ports {
                Some(explicit) => explicit.clone(),
                None => PortScanner::from_config(&config.discovery)?
                    .filter(ports.list_available_ports()?),
            };
            json!(candidates)
        }
        Command::Discover { filter } => {
            let mut report = discovery.discover(None, &filter.to_filter())?;
            let devices: Vec<Value> = report
                .matches()
                .into_iter()
                .map(|m| json!({"port": m.port, "identity": m.identity}))
                .collect();
            for session in &mut report.sessions {
                session.close();
            }
            json!({
                "devices": devices,
                "tried": report.tried,
                "rejected": report
                    .rejected
                    .iter()
                    .map(|r| json!({"port": r.port, "reason": r.reason}))
                    .collect::<Vec<_>>(),
            })
        }
        Command::Methods { target } => {
            let session = open_target(&discovery, &target)?;
            let methods: Vec<Value> = session
                .method_table()
                .iter()
                .map(|m| {
                    json!({
                        "id": m.id,
                        "call_name": m.call_name,
                        "wire_name": m.wire_name,
                        "parameters": m.parameters,
                    })
                })
                .collect();
            json!({
                "port": session.port(),
                "generation": session.generation(),
                "identity": session.identity(),
                "methods": methods,
            })
        }
        Command::Call {
            target,
            method,
            args,
            named,
        } => {
            let mut session = open_target(&discovery, &target)?;
            let args = parse_args(&method, &args, named.as_deref())?;
            debug!(%method, ?args, "Invoking");
            match method.parse::<u64>() {
                Ok(id) => session.invoke(id, args)?,
                Err(_) => session.invoke(method.as_str(), args)?,
            }
        }
    };

    serde_json::to_string_pretty(&output)
        .map_err(|e| DeviceError::invalid_arguments("output", e.to_string()))
}

fn open_target(discovery: &Discovery<'_>, target: &TargetArgs) -> DeviceResult<Session> {
    let filter = target.filter.to_filter();
    match &target.port {
        Some(port) => discovery.connect(port, &filter),
        None => discovery.find_one(None, &filter),
    }
}

fn parse_args(method: &str, args: &[String], named: Option<&str>) -> DeviceResult<Args> {
    if let Some(named) = named {
        return match serde_json::from_str::<Value>(named) {
            Ok(Value::Object(map)) => Ok(Args::Named(map)),
            _ => Err(DeviceError::invalid_arguments(
                method,
                "--named expects a JSON object",
            )),
        };
    }
    Ok(Args::Positional(
        args.iter()
            .map(|a| serde_json::from_str(a).unwrap_or_else(|_| Value::String(a.clone())))
            .collect(),
    ))
}

//! XBee Settings Tool
//!
//! Reads the network settings of a radio and optionally changes its PAN ID.
//!
//! Usage:
//!   cargo run --example xbee_settings -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config FILE     JSON protocol configuration
//!   --command-mode    Use the AT command mode instead of API frames
//!   --escaped         API frames use escaping (AP=2)
//!   --set-pan HEX     Write a new PAN ID and save it
//!
//! Set `RUST_LOG=xbee_core=debug` to see the exchanges.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use xbee_core::params::{pan_id_value, ParameterMap, ParameterValue};
use xbee_core::protocol::{
    ApiClient, ApiMode, CommandModeSession, ProtocolConfig, SerialTransport, Transport,
};

const READ_MNEMONICS: [&str; 5] = ["ID", "DH", "DL", "SH", "SL"];

struct Options {
    port_name: String,
    baud_rate: Option<u32>,
    config_path: Option<String>,
    command_mode: bool,
    escaped: bool,
    new_pan_id: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    let mut config = match &options.config_path {
        Some(path) => ProtocolConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => ProtocolConfig::default(),
    };
    if let Some(baud_rate) = options.baud_rate {
        config.baud_rate = baud_rate;
    }
    if options.escaped {
        config.api_mode = ApiMode::Escaped;
    }
    let new_pan_id = options
        .new_pan_id
        .as_deref()
        .map(pan_id_value)
        .transpose()
        .context("invalid PAN ID")?;

    println!("XBee Settings Tool");
    println!();
    println!("  Port:       {}", options.port_name);
    println!("  Baud rate:  {}", config.baud_rate);
    println!(
        "  Mode:       {}",
        if options.command_mode {
            "command mode"
        } else {
            "API frames"
        }
    );
    println!();

    let mut transport = SerialTransport::open(&options.port_name, config.baud_rate)
        .with_context(|| format!("opening {}", options.port_name))?;
    println!("✓ Port opened");

    let values = if options.command_mode {
        with_command_mode(&mut transport, config, new_pan_id.as_ref())?
    } else {
        with_api_frames(transport, config, new_pan_id.as_ref())?
    };

    print_settings(&values);
    Ok(())
}

fn with_api_frames<T: Transport>(
    transport: T,
    config: ProtocolConfig,
    new_pan_id: Option<&ParameterValue>,
) -> Result<Vec<ParameterValue>> {
    let mut client = ApiClient::new(transport, config).with_parameters(ParameterMap::common());

    if let Some(pan_id) = new_pan_id {
        client.write_parameter("ID", pan_id).context("writing ID")?;
        client.write_to_flash().context("saving settings")?;
        println!("✓ PAN ID set to {}", pan_id);
    }

    READ_MNEMONICS
        .iter()
        .map(|mn| {
            client
                .read_parameter(mn)
                .with_context(|| format!("reading {}", mn))
        })
        .collect()
}

fn with_command_mode<T: Transport>(
    transport: &mut T,
    config: ProtocolConfig,
    new_pan_id: Option<&ParameterValue>,
) -> Result<Vec<ParameterValue>> {
    println!("Entering command mode ({} ms guard time)...", config.guard_time_ms);
    let session = CommandModeSession::new(transport, config).with_parameters(ParameterMap::common());

    let values = session.run(|s| {
        if let Some(pan_id) = new_pan_id {
            s.write_parameter("ID", pan_id)?;
            s.write_to_flash()?;
        }
        READ_MNEMONICS
            .iter()
            .map(|mn| s.read_parameter(mn))
            .collect::<Result<Vec<_>, _>>()
    })?;

    if let Some(pan_id) = new_pan_id {
        println!("✓ PAN ID set to {}", pan_id);
    }
    Ok(values)
}

fn print_settings(values: &[ParameterValue]) {
    let get = |i: usize| values.get(i).and_then(ParameterValue::as_u64).unwrap_or(0);

    println!();
    println!("  PAN ID:         {}", values[0]);
    println!("  Destination:    {:08X}{:08X}", get(1), get(2));
    println!("  Serial number:  {:08X}{:08X}", get(3), get(4));
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        port_name: "/dev/ttyUSB0".to_string(),
        baud_rate: None,
        config_path: None,
        command_mode: false,
        escaped: false,
        new_pan_id: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                options.port_name = value_of(&args, i, "--port")?.to_string();
            }
            "--baud" | "-b" => {
                i += 1;
                options.baud_rate = Some(
                    value_of(&args, i, "--baud")?
                        .parse()
                        .context("--baud expects a number")?,
                );
            }
            "--config" | "-c" => {
                i += 1;
                options.config_path = Some(value_of(&args, i, "--config")?.to_string());
            }
            "--set-pan" => {
                i += 1;
                options.new_pan_id = Some(value_of(&args, i, "--set-pan")?.to_string());
            }
            "--command-mode" => {
                options.command_mode = true;
            }
            "--escaped" => {
                options.escaped = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            arg if !arg.starts_with('-') => {
                options.port_name = arg.to_string();
            }
            other => {
                eprintln!("Unknown option: {}", other);
            }
        }
        i += 1;
    }
    Ok(Some(options))
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("{} expects a value", flag))
}

fn print_help() {
    println!("XBee Settings Tool");
    println!();
    println!("Usage: xbee_settings [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: /dev/ttyUSB0)");
    println!("  --baud, -b RATE     Baud rate (default: 9600)");
    println!("  --config, -c FILE   JSON protocol configuration");
    println!("  --command-mode      Use AT command mode instead of API frames");
    println!("  --escaped           API frames use escaping (AP=2)");
    println!("  --set-pan HEX       Write a new PAN ID and save it");
    println!("  --help, -h          Show this help");
}

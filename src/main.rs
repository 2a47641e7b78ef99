use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use jbcfe::transport::{Baudrate, SerialTransport};
use jbcfe::{Action, Register, SessionConfig, Station, UpdateOptions, Value};

#[derive(Parser)]
#[clap(
    name = "jbcfe",
    about = "Talk to JBC fume extractor stations over their serial link",
    version
)]
struct Cli {
    /// Serial port, the first one found when omitted
    #[clap(short, long, global = true)]
    port: Option<String>,
    /// Line speed
    #[clap(short, long, global = true, value_enum, default_value_t = Baudrate::default())]
    baud: Baudrate,
    /// Session settings (YAML)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log every frame
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Show device id, firmware and state
    Info,
    /// Read a register
    Read { register: Register },
    /// Write a register
    Write { register: Register, value: String },
    /// Run a reset action
    Action { action: Action },
    /// Update the station firmware
    Flash {
        /// Firmware file: raw binary, hex text, Intel HEX or ELF
        path: PathBuf,
        /// Load address for raw binaries
        #[clap(long, default_value_t = 0, value_parser = parse_address)]
        base_address: u32,
        /// Skip the station error check
        #[clap(long)]
        force: bool,
    },
}

fn parse_address(s: &str) -> Result<u32> {
    let n = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(n)
}

fn connect(cli: &Cli) -> Result<Station<SerialTransport>> {
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let transport = match &cli.port {
        Some(port) => SerialTransport::open(port, cli.baud)?,
        None => SerialTransport::open_any(cli.baud)?,
    };
    let station = Station::new(transport, config);
    station.open().context("station did not answer")?;
    Ok(station)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let command = match &cli.command {
        Commands::Ports => {
            let ports = SerialTransport::scan_ports()?;
            if ports.is_empty() {
                log::warn!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            return Ok(());
        }
        command => command,
    };

    let station = connect(&cli)?;
    match command {
        Commands::Ports => {}
        Commands::Info => {
            let identity = station.identify()?;
            println!("device id:   {}", identity.device_id);
            println!("firmware:    {}", identity.firmware);
            println!("name:        {}", station.device_name()?);
            println!("error code:  {}", station.read(Register::StationError)?);
        }
        Commands::Read { register } => {
            println!("{}", station.read(*register)?);
        }
        Commands::Write { register, value } => {
            let value = Value::parse(register.kind(), value)
                .with_context(|| format!("invalid value for {}", register))?;
            station.write(*register, value)?;
            log::info!("{} set", register);
        }
        Commands::Action { action } => {
            station.execute(*action)?;
        }
        Commands::Flash {
            path,
            base_address,
            force,
        } => {
            let image = jbcfe::format::read_firmware_from_file(path, *base_address)?;
            log::info!(
                "Firmware size: {} bytes in {} block(s)",
                image.len(),
                image.blocks().len()
            );

            let bar = ProgressBar::new(image.len() as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({eta})",
                )?
                .progress_chars("#>-"),
            );
            let result = station.flash_firmware(image, UpdateOptions { force: *force }, |done, _| {
                bar.set_position(done as u64)
            });
            match result {
                Ok(_) => bar.finish_with_message("done"),
                Err(e) => {
                    bar.abandon();
                    return Err(e.into());
                }
            }
            log::info!("Firmware updated");
        }
    }
    station.close()?;

    Ok(())
}

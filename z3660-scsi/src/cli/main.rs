mod error;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser, ValueEnum};
use log::{info, LevelFilter};
use simplelog::{ConfigBuilder, LevelPadding, WriteLogger};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use time::macros::format_description;

use z3660_scsi::{Command as IoCommand, DriverConfig, IoRequest, ScsiCmd,
                 SimulatedController, Z3660Device, NUM_UNITS};
use z3660_scsi::query::DeviceQueryResult;
use z3660_scsi::request::DriveGeometry;
use z3660_scsi::scsi::{self, opcode};
use z3660_scsi::store::FileStore;
use z3660_utils::hexprint::hex_block;
use z3660_utils::read_be::ReadBE;

use crate::error::CliError;

const IMAGES: &str = "IMAGES";
const BLOCK_SIZE: &str = "BLOCK_SIZE";
const CHIP_RAM: &str = "CHIP_RAM";
const LOG_PATH: &str = "LOG_PATH";
const LOG_LEVEL: &str = "LOG_LEVEL";
const UNIT: &str = "UNIT";
const OFFSET: &str = "OFFSET";
const LENGTH: &str = "LENGTH";
const SCSI: &str = "SCSI";
const PAGE: &str = "PAGE";
const INPUT_PATH: &str = "INPUT_PATH";
const OUTPUT_PATH: &str = "OUTPUT_PATH";

/// Bus address reported for buffers with `--chip-ram`. It is below the
/// controller's DMA limit, so every transfer goes through the scratch window.
const CHIP_RAM_ADDRESS: u32 = 0x0001_0000;

/// Possible log levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum)]
enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
}

/// Mode pages that can be requested.
#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum)]
enum Page {
    FORMAT,
    RIGID,
}

fn unit_arg() -> Arg {
    Arg::new(UNIT)
        .help("The unit to address.")
        .short('u')
        .long("unit")
        .action(ArgAction::Set)
        .default_value("0")
        .value_parser(value_parser!(u8).range(..NUM_UNITS as i64))
}

fn scsi_arg() -> Arg {
    Arg::new(SCSI)
        .help("Transfer with SCSI READ(10)/WRITE(10) instead of a plain \
               block request. The offset is then rounded down to a 512-byte \
               sector.")
        .long("scsi")
        .action(ArgAction::SetTrue)
}

fn cli() -> Command {
    // Hack to make the build dirty when the toml changes.
    include_str!("../../Cargo.toml");

    clap::command!()
        .max_term_width(100)
        .after_help("\
Drives a simulated Z3660 SCSI controller through the same register protocol \
the native driver uses. Each --image becomes a unit, numbered from 0 in the \
order given. Images must be a whole number of blocks. Writes go straight \
to the image file.")
        .subcommand_required(true)
        .arg(Arg::new(IMAGES)
            .help("A disk image to attach as the next unit.")
            .short('i')
            .long("image")
            .global(true)
            .action(ArgAction::Append)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new(BLOCK_SIZE)
            .help("Block size of every attached image, in bytes.")
            .short('b')
            .long("block-size")
            .global(true)
            .action(ArgAction::Set)
            .default_value("512")
            .value_parser(value_parser!(u32).range(1..)))
        .arg(Arg::new(CHIP_RAM)
            .help("Pretend every buffer is in chip RAM, so transfers are \
                   staged through the scratch window instead of DMA.")
            .long("chip-ram")
            .global(true)
            .action(ArgAction::SetTrue))
        .arg(Arg::new(LOG_PATH)
            .help("If set, a debug log will be written to the given path.")
            .short('l')
            .long("log")
            .global(true)
            .action(ArgAction::Set)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new(LOG_LEVEL)
            .help("Set the log level. Has no effect without \
                   specifying --log as well. Case insensitive.")
            .short('L')
            .long("log-level")
            .global(true)
            .action(ArgAction::Set)
            .default_value("TRACE")
            .value_parser(value_parser!(LogLevel))
            .ignore_case(true))
        .subcommand(Command::new("units")
            .about("List the units that probed present."))
        .subcommand(Command::new("geometry")
            .about("Show a unit's drive geometry.")
            .arg(unit_arg()))
        .subcommand(Command::new("inquiry")
            .about("Send SCSI INQUIRY to a unit.")
            .arg(unit_arg()))
        .subcommand(Command::new("capacity")
            .about("Send SCSI READ CAPACITY(10) to a unit.")
            .arg(unit_arg()))
        .subcommand(Command::new("mode-sense")
            .about("Send SCSI MODE SENSE(6) to a unit.")
            .arg(unit_arg())
            .arg(Arg::new(PAGE)
                .help("The mode page to fetch.")
                .short('p')
                .long("page")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(Page))
                .ignore_case(true)))
        .subcommand(Command::new("read")
            .about("Read bytes from a unit and dump them.")
            .arg(unit_arg())
            .arg(Arg::new(OFFSET)
                .help("Byte offset to read from.")
                .long("offset")
                .action(ArgAction::Set)
                .default_value("0")
                .value_parser(value_parser!(u64)))
            .arg(Arg::new(LENGTH)
                .help("Number of bytes to read.")
                .long("length")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u32)))
            .arg(Arg::new(OUTPUT_PATH)
                .help("Write the data to this file instead of dumping it.")
                .short('o')
                .long("output")
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf)))
            .arg(scsi_arg()))
        .subcommand(Command::new("write")
            .about("Write the contents of a file to a unit.")
            .arg(unit_arg())
            .arg(Arg::new(OFFSET)
                .help("Byte offset to write at.")
                .long("offset")
                .action(ArgAction::Set)
                .default_value("0")
                .value_parser(value_parser!(u64)))
            .arg(Arg::new(INPUT_PATH)
                .help("File holding the data to write.")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(PathBuf)))
            .arg(scsi_arg()))
        .subcommand(Command::new("query")
            .about("Show what the device reports about itself."))
}

/// Initialise logging to the given file.
fn init_logging(logfile: File, level: LevelFilter) -> Result<(), CliError> {
    let config = ConfigBuilder::new()
        .set_level_padding(LevelPadding::Right)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond digits:6]"))
        .build();

    WriteLogger::init(level, config, logfile)
        .map_err(|e| CliError(format!("Failed to initialise logging: {}", e)))
}

/// Build the simulated controller from the global options and attach to it.
fn open_device(args: &ArgMatches) -> Result<Z3660Device<SimulatedController>, CliError> {
    let block_size = *args.get_one::<u32>(BLOCK_SIZE).unwrap();
    let images: Vec<&PathBuf> = args.get_many::<PathBuf>(IMAGES)
        .map(|paths| paths.collect())
        .unwrap_or_default();
    if images.len() > NUM_UNITS {
        return Err(CliError(format!(
            "At most {} images can be attached, got {}.", NUM_UNITS, images.len())));
    }

    let mut builder = SimulatedController::builder();
    for (index, path) in images.into_iter().enumerate() {
        let store = FileStore::open(path, block_size)
            .map_err(|e| {
                CliError(format!("Couldn't open image '{}': {}", path.display(), e))
            })?;
        info!("Unit {} is '{}'.", index, path.display());
        builder = builder.unit(index, store, block_size);
    }
    if args.get_flag(CHIP_RAM) {
        builder = builder.buffer_address(CHIP_RAM_ADDRESS);
    }
    Ok(Z3660Device::attach(builder.build(), &DriverConfig::default()))
}

/// Perform a request, naming the unit in any error.
fn perform(device: &mut Z3660Device<SimulatedController>,
           req: &mut IoRequest) -> Result<(), CliError> {
    let unit = req.unit;
    device.perform_io(req)
        .map_err(|e| CliError(format!("Unit {}: {}", unit, e)))
}

/// Send a CDB and return the bytes of the response that were filled in.
fn scsi_command(device: &mut Z3660Device<SimulatedController>, unit: u8,
                cdb: &[u8], response_len: usize) -> Result<Vec<u8>, CliError> {
    let mut response = vec![0; response_len];
    let mut req = IoRequest::with_command(IoCommand::ScsiCmd, unit)
        .scsi(ScsiCmd::new(cdb, Some(&mut response)));
    perform(device, &mut req)?;
    let actual = req.scsi_cmd().map_or(0, |cmd| cmd.actual) as usize;
    response.truncate(actual);
    Ok(response)
}

/// Build a READ(10) or WRITE(10) for `len` bytes at byte `offset`.
fn rw10_cdb(op: u8, offset: u64, len: usize) -> Result<[u8; 10], CliError> {
    let block = u32::try_from(offset >> 9)
        .map_err(|_| CliError(format!("Offset {:#X} is beyond a 10-byte CDB.", offset)))?;
    let count = u16::try_from(len >> 9)
        .map_err(|_| CliError(format!("{} bytes is too many for one SCSI transfer.", len)))?;
    let mut cdb = [0u8; 10];
    cdb[0] = op;
    cdb[2..6].copy_from_slice(&block.to_be_bytes());
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    Ok(cdb)
}

fn geometry(device: &mut Z3660Device<SimulatedController>,
            unit: u8) -> Result<DriveGeometry, CliError> {
    let mut geometry = DriveGeometry::default();
    let mut req = IoRequest::with_command(IoCommand::GetGeometry, unit).geometry(&mut geometry);
    perform(device, &mut req)?;
    Ok(geometry)
}

/// Main run function; returns an exit code.
fn run(args: ArgMatches, out: &mut dyn Write) -> u8 {
    return match _run(args, out) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e.0);
            1
        }
    };

    fn _run(args: ArgMatches, out: &mut dyn Write) -> Result<(), CliError> {
        // Initialise logging if configured.
        if let Some(log_path) = args.get_one::<PathBuf>(LOG_PATH) {
            let logfile = File::create(log_path)
                .map_err(|e| CliError(format!("Failed to create log file: {}", e)))?;
            let level = match args.get_one::<LogLevel>(LOG_LEVEL).unwrap() {
                LogLevel::TRACE => LevelFilter::Trace,
                LogLevel::DEBUG => LevelFilter::Debug,
                LogLevel::INFO => LevelFilter::Info,
            };
            init_logging(logfile, level)?;
        }

        let mut device = open_device(&args)?;
        let (name, sub_args) = args.subcommand().unwrap();
        let unit = sub_args.try_get_one::<u8>(UNIT).ok().flatten().copied().unwrap_or(0);

        match name {
            "units" => {
                let present: Vec<u8> = device.units().present().map(|u| u.unit_num).collect();
                if present.is_empty() {
                    writeln!(out, "No units present.")?;
                }
                for unit in present {
                    let g = geometry(&mut device, unit)?;
                    writeln!(out, "Unit {}: {} blocks of {} bytes ({} cylinders, {} heads, {} sectors)",
                             unit, g.total_sectors, g.sector_size, g.cylinders, g.heads,
                             g.track_sectors)?;
                }
            }
            "geometry" => {
                let g = geometry(&mut device, unit)?;
                writeln!(out, "Sector size:    {}", g.sector_size)?;
                writeln!(out, "Total sectors:  {}", g.total_sectors)?;
                writeln!(out, "Cylinders:      {}", g.cylinders)?;
                writeln!(out, "Heads:          {}", g.heads)?;
                writeln!(out, "Track sectors:  {}", g.track_sectors)?;
                writeln!(out, "Cyl sectors:    {}", g.cyl_sectors)?;
            }
            "inquiry" => {
                let cdb = [opcode::INQUIRY, 0, 0, 0, scsi::INQUIRY_LEN as u8, 0];
                let response = scsi_command(&mut device, unit, &cdb, scsi::INQUIRY_LEN)?;
                writeln!(out, "{}", hex_block(&response, 0))?;
            }
            "capacity" => {
                let cdb = [opcode::READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0];
                let response = scsi_command(&mut device, unit, &cdb, scsi::CAPACITY_LEN)?;
                writeln!(out, "Last block: {}", response.be_u32_at(0))?;
                writeln!(out, "Block size: {}", response.be_u32_at(4))?;
            }
            "mode-sense" => {
                let page: u8 = match sub_args.get_one::<Page>(PAGE).unwrap() {
                    Page::FORMAT => 0x03,
                    Page::RIGID => 0x04,
                };
                let cdb = [opcode::MODE_SENSE_6, 0, page, 0, scsi::MODE_SENSE_LEN as u8, 0];
                let response = scsi_command(&mut device, unit, &cdb, scsi::MODE_SENSE_LEN)?;
                writeln!(out, "{}", hex_block(&response, 0))?;
            }
            "read" => {
                let offset = *sub_args.get_one::<u64>(OFFSET).unwrap();
                let length = *sub_args.get_one::<u32>(LENGTH).unwrap();
                let data = if sub_args.get_flag(SCSI) {
                    let cdb = rw10_cdb(opcode::READ_10, offset, length as usize)?;
                    scsi_command(&mut device, unit, &cdb, length as usize)?
                } else {
                    let mut data = vec![0; length as usize];
                    let mut req = IoRequest::with_command(IoCommand::NsRead64, unit)
                        .buffer(&mut data)
                        .offset(offset);
                    perform(&mut device, &mut req)?;
                    data
                };
                info!("Read {} bytes from unit {}.", data.len(), unit);
                match sub_args.get_one::<PathBuf>(OUTPUT_PATH) {
                    Some(path) => fs::write(path, &data)
                        .map_err(|e| {
                            CliError(format!("Failed to write '{}': {}", path.display(), e))
                        })?,
                    None => writeln!(out, "{}", hex_block(&data, offset as usize))?,
                }
            }
            "write" => {
                let offset = *sub_args.get_one::<u64>(OFFSET).unwrap();
                let path = sub_args.get_one::<PathBuf>(INPUT_PATH).unwrap();
                let mut data = fs::read(path)
                    .map_err(|e| {
                        CliError(format!("Couldn't open input file '{}': {}", path.display(), e))
                    })?;
                let written = if sub_args.get_flag(SCSI) {
                    let cdb = rw10_cdb(opcode::WRITE_10, offset, data.len())?;
                    let mut req = IoRequest::with_command(IoCommand::ScsiCmd, unit)
                        .scsi(ScsiCmd::new(&cdb, Some(&mut data)));
                    perform(&mut device, &mut req)?;
                    req.scsi_cmd().map_or(0, |cmd| cmd.actual)
                } else {
                    let mut req = IoRequest::with_command(IoCommand::NsWrite64, unit)
                        .buffer(&mut data)
                        .offset(offset);
                    perform(&mut device, &mut req)?;
                    req.actual
                };
                writeln!(out, "Wrote {} bytes to unit {}.", written, unit)?;
            }
            "query" => {
                let mut result = DeviceQueryResult::default();
                let mut req = IoRequest::with_command(IoCommand::DeviceQuery, unit)
                    .device_query(&mut result);
                perform(&mut device, &mut req)?;
                writeln!(out, "Device type: {}", result.device_type)?;
                writeln!(out, "Supported commands:")?;
                for code in result.supported_commands {
                    writeln!(out, "  {:#06X}", code)?;
                }
            }
            _ => unreachable!(),
        }

        Ok(())
    }
}

fn main() {
    let args = cli().get_matches();
    std::process::exit(run(args, &mut io::stdout()).into());
}

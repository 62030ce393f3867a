use clap::{Arg, ArgAction, Command};
use dmg_core::GameBoy;
use log::{error, info};
use std::io::{self, Write};

fn main() {
    env_logger::init();

    let matches = Command::new("dmg-core")
        .version("0.1.0")
        .about("Fetch/execute driver for the DMG-01 CPU core.")
        .arg(
            Arg::new("rom")
                .short('r')
                .long("rom")
                .value_name("FILE")
                .help("ROM image to load.")
                .required(true),
        )
        .arg(
            Arg::new("testing")
                .short('t')
                .long("testing")
                .help("No-op: this core has no boot ROM, every run starts post-boot.")
                .action(ArgAction::SetTrue),
        )
        .arg_required_else_help(true)
        .get_matches();

    let rom_path = matches.get_one::<String>("rom").unwrap();
    let rom = match std::fs::read(rom_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read ROM {}: {}", rom_path, e);
            std::process::exit(1);
        }
    };

    let mut gb = match GameBoy::power_on(rom) {
        Ok(gb) => gb,
        Err(e) => {
            error!("failed to load cartridge: {}", e);
            std::process::exit(1);
        }
    };
    gb.log_cartridge_header();

    info!("running fetch/execute loop; serial output prints to stdout");
    let stdout = io::stdout();
    loop {
        match gb.step() {
            Ok(_) => {
                let bytes = gb.take_serial_output();
                if !bytes.is_empty() {
                    let mut handle = stdout.lock();
                    handle.write_all(&bytes).ok();
                    handle.flush().ok();
                }
            }
            Err(e) => {
                error!("{}", e);
                break;
            }
        }
    }
}

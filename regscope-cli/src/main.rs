use std::path;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use regscope::{DeviceIndex, Radix, ToJson};

#[derive(Parser)]
#[command(version, about, long_about = None, author = clap::crate_authors!(), subcommand_required = true)]
struct Cli {
    /// CMSIS-SVD source file for memory map metadata
    #[arg(long, required = true)]
    svd: path::PathBuf,

    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load and resolve the description without doing anything else
    DryRun,
    /// List all peripherals with their base addresses and register counts
    Ls {
        #[arg(long, default_value = "alpha")]
        sorting: Sorting,
    },
    /// List the registers of a peripheral, sorted by address
    Regs { peripheral: String },
    /// List the fields of a register
    Fields { peripheral: String, register: String },
    /// Format a raw register value
    Fmt {
        peripheral: String,
        register: String,
        #[arg(value_parser = clap_num::maybe_hex::<u64>)]
        value: u64,
        /// Output base: d, x, o, b, s or their long names
        #[arg(long, short, default_value = "x", value_parser = parse_radix)]
        radix: Radix,
    },
    /// Find the register at or nearest below an address
    Addr {
        #[arg(value_parser = clap_num::maybe_hex::<u64>)]
        address: u64,
    },
    /// Print the resolved model as JSON
    Dump {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        pretty: bool,
    },
}

#[derive(Clone, Copy)]
enum Sorting {
    Preserve,
    Alpha,
}

impl ValueEnum for Sorting {
    fn value_variants<'a>() -> &'a [Self] {
        &[Sorting::Alpha, Sorting::Preserve]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        use clap::builder::PossibleValue;
        match self {
            Sorting::Alpha => Some(PossibleValue::new("alpha")),
            Sorting::Preserve => Some(PossibleValue::new("preserve")),
        }
    }
}

fn parse_radix(s: &str) -> Result<Radix, String> {
    s.parse()
        .map_err(|_| format!("unknown radix {s:?}, expected one of d, x, o, b, s"))
}

fn load(path: &path::Path) -> anyhow::Result<DeviceIndex> {
    let text = fs_err::read_to_string(path)?;
    regscope::load(&text).with_context(|| format!("could not load {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();
    debug!("loading {}", cli.svd.display());

    let Some(cmd) = &cli.command else {
        println!("Nothing to do. Please issue a subcommand.");
        return Ok(());
    };

    match cmd {
        Command::DryRun => match load(&cli.svd) {
            Ok(_) => println!("regscope: dry run completed successfully"),
            Err(e) => println!("regscope: exited unsuccessfully: {e:?}"),
        },
        Command::Ls { sorting } => ls(&load(&cli.svd)?, *sorting),
        Command::Regs { peripheral } => regs(&load(&cli.svd)?, peripheral)?,
        Command::Fields {
            peripheral,
            register,
        } => fields(&load(&cli.svd)?, peripheral, register)?,
        Command::Fmt {
            peripheral,
            register,
            value,
            radix,
        } => {
            let index = load(&cli.svd)?;
            let reg = index.register(peripheral, register)?;
            print!("{}", regscope::format_register(reg, *value, *radix));
        }
        Command::Addr { address } => {
            let index = load(&cli.svd)?;
            let reg = index.register_containing(*address)?;
            let delta = address - reg.address();
            if delta == 0 {
                println!("{:#010x} {}", reg.address(), reg.path.join("."));
            } else {
                println!(
                    "{:#010x} {} + {delta:#x}",
                    reg.address(),
                    reg.path.join(".")
                );
            }
        }
        Command::Dump { pretty } => {
            let json = load(&cli.svd)?.device().to_json();
            if *pretty {
                println!("{}", json.pretty(2));
            } else {
                println!("{json}");
            }
        }
    }

    Ok(())
}

fn ls(index: &DeviceIndex, sorting: Sorting) {
    let mut peripherals = index.peripherals().iter().collect::<Vec<_>>();
    if peripherals.is_empty() {
        println!("regscope: no peripherals found in input");
        return;
    }
    match sorting {
        Sorting::Preserve => { /* do nothing */ }
        Sorting::Alpha => peripherals.sort_by(|a, b| a.name.cmp(&b.name)),
    };
    let longest = peripherals.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for p in peripherals {
        println!(
            "{: <longest$} {:#010x} {}",
            p.name,
            p.base_address,
            p.registers().len()
        );
    }
}

fn regs(index: &DeviceIndex, peripheral: &str) -> anyhow::Result<()> {
    let regs = index.registers_by_address(peripheral)?;
    let longest = regs
        .iter()
        .map(|r| r.path.name_in_periph().len())
        .max()
        .unwrap_or(0);
    for reg in regs {
        println!(
            "{: <longest$} {:#010x} {:>2} {:<14} {}",
            reg.path.name_in_periph(),
            reg.address(),
            reg.bit_width(),
            reg.access().as_str(),
            reg.description
        );
    }
    Ok(())
}

fn fields(index: &DeviceIndex, peripheral: &str, register: &str) -> anyhow::Result<()> {
    let reg = index.register(peripheral, register)?;
    let longest = reg.fields.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for field in &reg.fields {
        let bits = if field.bit_width == 1 {
            format!("[{}]", field.bit_offset)
        } else {
            format!(
                "[{}:{}]",
                field.bit_offset + field.bit_width - 1,
                field.bit_offset
            )
        };
        println!(
            "{: <longest$} {bits:<7} {:<14} {}",
            field.name,
            field.access.value.as_str(),
            field.description
        );
        for value in &field.enumerated_values {
            match value.value {
                Some(v) => println!("    {v:>4} {}", value.name),
                None => println!("    {:>4} {}", "*", value.name),
            }
        }
    }
    Ok(())
}

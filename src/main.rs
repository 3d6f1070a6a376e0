use std::env;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context};
use num_traits::FromPrimitive;

use crate::vm::cycles::estimate_cycles;
use crate::vm::decoder::decode_instruction;
use crate::vm::flags::flag_string;
use crate::vm::memory::{Memory, SEGMENT_SIZE};
use crate::vm::registers::{Reg, RegisterFile, REGISTER_COUNT};
use crate::vm::render::format_instruction;
use crate::vm::simulator::{simulate, SimulationStep};

mod utils;
mod vm;

const USAGE: &str = "Usage: sim8086 [-exec] [-dump] [-showclocks] input_file";

#[derive(Default)]
struct Arguments {
    input_path: String,
    execute_mode: bool,
    dump_memory: bool,
    show_clocks: bool,
}

// Options are case-insensitive and only recognized before the
// positional input path.
fn parse_arguments(args: &[String]) -> Result<Arguments, String> {
    let mut parsed = Arguments {
        input_path: args[args.len() - 1].clone(),
        ..Arguments::default()
    };

    for arg in &args[..args.len() - 1] {
        match arg.to_lowercase().as_str() {
            "-exec" => parsed.execute_mode = true,
            "-dump" => parsed.dump_memory = true,
            "-showclocks" => parsed.show_clocks = true,
            _ => return Err(format!("Unrecognized argument '{arg}'.\n\n{USAGE}")),
        }
    }

    Ok(parsed)
}

fn format_simulation_step(step: &SimulationStep) -> String {
    const COLUMN_WIDTH: usize = 20;

    let register_column = match step.destination {
        Some(destination) if step.new_value != step.old_value => format!(
            "{}:{:#x}->{:#x}",
            destination.name(),
            step.old_value,
            step.new_value
        ),
        _ => String::new(),
    };

    let ip_column = format!("ip:{:#x}->{:#x}", step.old_ip, step.new_ip);

    let mut line = format!("{register_column:<COLUMN_WIDTH$}{ip_column:<COLUMN_WIDTH$}");
    if step.new_flags != step.old_flags {
        let flags_column = format!(
            "flags:{}->{}",
            flag_string(step.old_flags),
            flag_string(step.new_flags)
        );
        line += &format!("{flags_column:<10}");
    }

    line
}

fn format_cycle_estimate(current: i32, base: i32, ea: i32, total: i32) -> String {
    let mut estimate = format!("Clocks: {current:+} = {total}");
    if ea != 0 {
        estimate += &format!(" ({base} + {ea}ea)");
    }
    format!("{estimate:<28}")
}

fn format_register_contents(registers: &RegisterFile) -> String {
    let mut contents = String::new();

    for index in 0..REGISTER_COUNT {
        let value = registers.word(index);
        if value == 0 {
            continue;
        }

        let Some(reg) = Reg::from_usize(index) else {
            continue;
        };
        if reg == Reg::Flags {
            contents += &format!("{: >8}: {}\n", reg.name(), flag_string(value));
        } else {
            contents += &format!("{: >8}: {:#06x} ({})\n", reg.name(), value, value);
        }
    }

    contents
}

fn run(args: &Arguments) -> anyhow::Result<()> {
    let program = fs::read(&args.input_path)
        .with_context(|| format!("cannot open binary file '{}'", args.input_path))?;
    if program.len() > SEGMENT_SIZE {
        bail!("instructions must fit within a single memory segment");
    }

    let file_name = Path::new(&args.input_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input_path.clone());
    let action = if args.execute_mode { "execution" } else { "decoding" };
    println!("--- {file_name} {action} ---\n");

    let mut registers = RegisterFile::new();
    let mut memory = Memory::new();

    // Program image lives at the bottom of memory: CS = 0.
    let code_origin: u32 = 0;
    registers.set_word(Reg::Cs, (code_origin >> 4) as u16);
    memory.copy_data(code_origin as usize, &program);

    let mut cursor = Cursor::new(program.as_slice());
    let mut total_cycles: i32 = 0;

    while (cursor.position() as usize) < program.len() {
        let address = cursor.position() as u32;
        let inst = decode_instruction(&mut cursor, address)?;

        let asm_line = format_instruction(&inst);
        if !args.execute_mode {
            println!("{asm_line}");
            continue;
        }
        print!("{asm_line:<24}");

        let step = simulate(&inst, &mut registers, &mut memory)?;

        let delta = step.new_ip as i64 - step.old_ip as i64 - inst.size as i64;
        if delta != 0 {
            log::debug!(
                "taken branch at {:#06x}: repositioning cursor by {}",
                inst.address,
                delta
            );
            cursor.set_position((cursor.position() as i64 + delta) as u64);
        }

        print!(" ; ");
        if args.show_clocks {
            let estimate = estimate_cycles(&inst)?;
            let current = estimate.base + estimate.ea;
            total_cycles += current;
            print!(
                "{} | ",
                format_cycle_estimate(current, estimate.base, estimate.ea, total_cycles)
            );
        }
        println!("{}", format_simulation_step(&step));
    }

    if args.execute_mode {
        println!("\nFinal registers:");
        print!("{}", format_register_contents(&registers));

        if args.dump_memory {
            const DUMP_FILENAME: &str = "dump.data";
            fs::write(DUMP_FILENAME, memory.as_slice())
                .context("cannot write to memory dump file")?;
            log::debug!("dumped {} bytes", memory.as_slice().len());
            println!("\nSaved memory to '{DUMP_FILENAME}'.");
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("{USAGE}");
        return ExitCode::FAILURE;
    }

    let parsed = match parse_arguments(&args[1..]) {
        Ok(parsed) => parsed,
        Err(message) => {
            println!("{message}");
            return ExitCode::FAILURE;
        }
    };

    match run(&parsed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            println!("ERROR!! {error:#}");
            ExitCode::FAILURE
        }
    }
}

use std::path::PathBuf;
use std::process::exit;

use env_logger::Env;
use log::error;
use structopt::StructOpt;

use tomasulo_emulator::cpu::{load_cpu_config, CPUConfig, SimReport, CPU};
use tomasulo_emulator::error::SimError;
use tomasulo_emulator::instructions::instructions::Program;
use tomasulo_emulator::loader::loader::load;

#[derive(StructOpt, Debug)]
#[structopt(name = "Tomasulo CPU Emulator")]
struct Opt {
    /// Path of the program to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file; built-in defaults are used when absent
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Overrides the deadlock cycle bound of the config
    #[structopt(short, long)]
    max_cycles: Option<u64>,
}

fn main() {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let opt = Opt::from_args();

    let mut cpu_config = match &opt.config {
        Some(path) => {
            let cpu_config_path = path.to_string_lossy();
            match load_cpu_config(&cpu_config_path) {
                Ok(config) => config,
                Err(err) => {
                    error!("Failed to load {}. Cause: {}", cpu_config_path, err);
                    exit(1);
                }
            }
        }
        None => CPUConfig::default(),
    };

    if let Some(max_cycles) = opt.max_cycles {
        cpu_config.max_cycles = max_cycles;
    }

    let path = opt.file.to_string_lossy();
    println!("Loading {}", path);
    let program = match load(&path) {
        Ok(p) => p,
        Err(err) => {
            error!("Loading program '{}' failed: {}", path, err);
            exit(1);
        }
    };

    let mut cpu = match CPU::new(&cpu_config, program.clone()) {
        Ok(cpu) => cpu,
        Err(err) => {
            error!("{}", err);
            exit(1);
        }
    };

    match cpu.run() {
        Ok(report) => print_report(&program, &report),
        Err(err) => {
            print_report(&program, &cpu.report());
            print_failure(&err);
            exit(2);
        }
    }
}

fn cell(cycle: Option<u64>) -> String {
    cycle.map_or_else(|| "-".to_string(), |c| c.to_string())
}

fn print_report(program: &Program, report: &SimReport) {
    println!();
    println!("{:<4}{:<24}{:>7}{:>7}{:>7}{:>7}", "#", "Instruction", "Issue", "Start", "End", "WB");
    for (index, (instr, timing)) in program.code.iter().zip(&report.timings).enumerate() {
        let text = format!("{} {},{},{}",
                           instr.opcode, instr.sink, instr.source[0], instr.source[1]);
        println!("{:<4}{:<24}{:>7}{:>7}{:>7}{:>7}",
                 index,
                 text,
                 cell(timing.issue),
                 cell(timing.exec_start),
                 cell(timing.exec_end),
                 cell(timing.write_back));
    }

    println!();
    println!("Registers:");
    for (name, value) in report.registers.iter() {
        println!("  {} = {}", name, value);
    }

    for fault in &report.faults {
        println!("Fault: {}", fault);
    }

    println!();
    println!("Cycles: {}, issue stalls: {}, bus stalls: {}",
             report.cycles, report.perf.rs_stall_cnt, report.perf.cdb_stall_cnt);
}

fn print_failure(err: &SimError) {
    println!("Simulation failed: {}", err);
    if let SimError::Deadlock(report) = err {
        for stuck in &report.stuck {
            println!("  {}", stuck);
        }
    }
}

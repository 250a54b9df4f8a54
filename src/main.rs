use std::fs;
use std::io;

use clap::{CommandFactory, Parser};
use esorun::befunge::{GridOverflow, Underflow};
use esorun::config::Config;
use esorun::error::Error;
use esorun::interpreter::{Limits, Stop};
use esorun::registry::{self, Entry};

#[derive(Parser)]
#[command(name = "esorun", about = "Run esoteric programming language source files")]
struct Cli {
    /// Source files to run, one after another.
    files: Vec<String>,

    /// List all available languages.
    #[arg(short = 'L', long)]
    list: bool,

    /// Interpret the given file(s) in this language instead of going by extension.
    #[arg(short, long)]
    lang: Option<String>,

    /// Stop each program after this many steps.
    #[arg(long)]
    step_limit: Option<u64>,

    /// Random seed for reproducibility.
    #[arg(long)]
    seed: Option<u64>,

    /// Brainfuck cell width in bits.
    #[arg(long, default_value_t = 8, conflicts_with = "unbounded_cells")]
    cell_bits: u32,

    /// Brainfuck cells never wrap.
    #[arg(long)]
    unbounded_cells: bool,

    /// Monkeys: drop lines that carry a trailing comment.
    #[arg(long)]
    strict: bool,

    /// Befunge: drop source outside the 80x25 grid instead of failing.
    #[arg(long)]
    truncate_grid: bool,

    /// Befunge: popping an empty stack yields 0.
    #[arg(long)]
    zero_on_underflow: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default();
        config.brainfuck.cell_bits = (!self.unbounded_cells).then_some(self.cell_bits);
        if self.truncate_grid {
            config.befunge.overflow = GridOverflow::Truncate;
        }
        if self.zero_on_underflow {
            config.befunge.underflow = Underflow::Zero;
        }
        config.monkeys.strict = self.strict;
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

fn list_languages() {
    println!("Available languages:");
    for entry in registry::entries() {
        println!("  - {} ({})", entry.language, entry.extension);
    }
}

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Config(_) => 1,
        Error::Parse(_) => 3,
        Error::Fault(_) | Error::Io(_) => 4,
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list {
        list_languages();
        return;
    }
    if cli.files.is_empty() {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("{e}");
            std::process::exit(4);
        }
        return;
    }

    // Resolve every file before running any of them.
    let mut jobs: Vec<(&Entry, &str)> = Vec::new();
    for file in &cli.files {
        match registry::select(file, cli.lang.as_deref()) {
            Ok(entry) => jobs.push((entry, file.as_str())),
            Err(e) => {
                eprintln!("{e}");
                eprintln!("Please specify a language using --lang.");
                std::process::exit(1);
            }
        }
    }

    let config = cli.config();
    let limits = Limits {
        step_limit: cli.step_limit,
        cancel: None,
    };

    for (entry, file) in jobs {
        let source = match fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{file}: {e}");
                std::process::exit(2);
            }
        };

        let result = (entry.build)(Box::new(io::stdin()), Box::new(io::stdout()), &config)
            .and_then(|mut interp| interp.run(&source, &limits));
        match result {
            Ok(summary) => {
                if summary.stop == Stop::StepLimit {
                    log::warn!("{file}: step limit reached after {} steps", summary.steps);
                } else {
                    log::info!("{file}: {} steps ({:?})", summary.steps, summary.stop);
                }
            }
            Err(e) => {
                eprintln!("{file}: {e}");
                std::process::exit(exit_code(&e));
            }
        }
    }
}

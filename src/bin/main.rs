use std::env;

use simi::debugger::{ConsoleInput, Debugger};
use simi::Simi;

const USAGE: &str = "[--debug] [--catch-all] [--break <file>:<line>]... <script>...";

struct Options {
    debug: bool,
    catch_all: bool,
    breakpoints: Vec<(String, u32)>,
    scripts: Vec<String>,
}

fn parse_args(args: Vec<String>) -> Option<Options> {
    let mut options = Options { debug: false, catch_all: false, breakpoints: vec![], scripts: vec![] };
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => options.debug = true,
            "--catch-all" => options.catch_all = true,
            "--break" => {
                let target = args.next()?;
                let (file, line) = target.rsplit_once(':')?;
                options.breakpoints.push((file.to_owned(), line.parse().ok()?));
            }
            _ if arg.starts_with("--") => return None,
            _ => options.scripts.push(arg),
        }
    }

    if options.scripts.is_empty() {
        None
    } else {
        Some(options)
    }
}

/// Diagnostics go to stderr when `RUST_LOG` is set, e.g. `RUST_LOG=simi=debug`.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_level(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> Result<(), anyhow::Error> {
    init_tracing();

    let Some(options) = parse_args(env::args().skip(1).collect()) else {
        let bin_name = env!("CARGO_BIN_NAME");
        println!("Usage: {} {}", bin_name, USAGE);
        std::process::exit(64);
    };

    let mut simi = Simi::new();
    if options.debug || options.catch_all || !options.breakpoints.is_empty() {
        let mut debugger = Debugger::new(Box::new(ConsoleInput)).with_catch_all(options.catch_all);
        for (file, line) in &options.breakpoints {
            debugger.add_breakpoint(file, *line);
        }
        simi = simi.with_debugger(debugger);
    }

    simi.run_files(&options.scripts)?;

    if simi.had_error() {
        std::process::exit(65);
    }
    if simi.had_runtime_error() {
        std::process::exit(70);
    }
    Ok(())
}

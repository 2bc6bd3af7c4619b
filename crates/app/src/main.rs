mod capture;
mod classify;
mod cli;
mod config;
mod consumer;
mod encode;
mod producer;
mod telemetry;
mod viewer;
mod watchdog;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let args: Vec<String> = std::env::args().collect();
    if cli::handle_commands(&args)? {
        return Ok(());
    }

    eprintln!("{}", cli::USAGE);
    std::process::exit(2);
}

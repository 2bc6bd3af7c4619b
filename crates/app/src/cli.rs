use anyhow::Result;

use crate::{config, consumer, producer, viewer};

pub(crate) const USAGE: &str = "jetpilot <produce|control|view> [flags]\n\n\
Run `jetpilot help` for per-command flags.";

pub(crate) fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("produce") => {
            let config = config::ProducerConfig::from_args(args)?;
            producer::run(config)?;
            Ok(true)
        }
        Some("control") => {
            let config = config::ControlConfig::from_args(args)?;
            consumer::run(config)?;
            Ok(true)
        }
        Some("view") => {
            let config = config::ViewerConfig::from_args(args)?;
            viewer::run(config)?;
            Ok(true)
        }
        Some("help") | Some("--help") => {
            print_help();
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn print_help() {
    println!("{}\n", USAGE);
    println!("{}\n", config::PRODUCE_USAGE);
    println!("{}\n", config::CONTROL_USAGE);
    println!("{}", config::VIEW_USAGE);
}

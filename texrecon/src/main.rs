use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use structopt::StructOpt;

use texrecon::texrecon::{texrecon_with_params, TexreconParams};

fn main() {
    let params = TexreconParams::from_args();

    let level = if params.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("warning: failed to initialize logging: {}", err);
    }

    if let Err(err) = texrecon_with_params(&params) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

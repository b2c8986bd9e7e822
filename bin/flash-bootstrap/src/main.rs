use env_logger::Env;
use getopts::Options;
use std::{
    env,
    error::Error,
    io::{stderr, stdout, Write},
    process::exit,
};

mod boot;
mod bootsector;
mod catalog;
mod config;
use config::Config;
mod errors;
mod media;
use media::{HostMedia, ImageCache, ImageSource, LocalImage};
mod patcher;
mod pipeline;
use pipeline::Pipeline;
mod window;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program: String = args[0].clone();
    let opts = config::options();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program, &opts, &mut stderr());
            exit(2);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, &opts, &mut stdout());
        exit(0);
    }

    if !matches.free.is_empty() {
        eprintln!("Error: unknown argument {}", matches.free[0]);
        print_usage(&program, &opts, &mut stderr());
        exit(2);
    }

    let config = match Config::from_matches(&matches) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(&program, &opts, &mut stderr());
            exit(2);
        }
    };

    let default_filter = if config.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    // Child tools are parsed by their English output.
    env::set_var("LANG", "C");

    if let Err(e) = run(&config) {
        eprintln!("\nflash-bootstrap: {}.", e);
        exit(1);
    }
}

fn print_usage<W: Write>(program: &str, opts: &Options, writer: &mut W) {
    let brief = format!(
        "Flash a single-board computer OS image to an SDCard, set up to run a script on first boot.\n\
    Usage: {} [options] --sdcard <device>",
        program
    );
    let _ = write!(writer, "{}", opts.usage(&brief));
}

fn run(config: &Config) -> Result<(), Box<dyn Error>> {
    log::info!("Provisioning {} onto {}", config.distro, config.sdcard);

    let source: Box<dyn ImageSource> = match &config.image {
        Some(path) => Box::new(LocalImage { path: path.clone() }),
        None => Box::new(ImageCache { dir: config.cache_dir.clone() }),
    };

    Pipeline::new(config, source.as_ref(), &HostMedia).run()
}

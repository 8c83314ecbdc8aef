//! flat-fs command shell
mod error;
mod image;
mod shell;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::ExitCode;

use clap::{value_parser, Arg, ArgMatches, Command};
use flat_fs::FsConfig;

use error::ShellError;
use shell::Shell;

fn main() -> ExitCode {
    env_logger::init();
    match flat_fs_shell() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("session aborted: {}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn cli() -> Command {
    Command::new("FlatFileSystem shell")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Read commands from FILE instead of stdin"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write responses to FILE instead of stdout"),
        )
        .arg(
            Arg::new("open-files")
                .long("open-files")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .default_value("25")
                .help("Open file table size, root directory included"),
        )
}

fn flat_fs_shell() -> Result<(), ShellError> {
    let matches: ArgMatches = cli().get_matches();
    let config = FsConfig {
        open_files: matches
            .get_one::<usize>("open-files")
            .copied()
            .unwrap_or(FsConfig::default().open_files),
        ..FsConfig::default()
    };

    let input: Box<dyn BufRead> = match matches.get_one::<String>("input") {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match matches.get_one::<String>("output") {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    log::debug!("starting shell with {:?}", config);
    Shell::new(output, config).run(input)
}

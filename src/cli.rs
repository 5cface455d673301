use std::ffi::OsString;

use clap::{App, Arg, ArgMatches};

pub fn parse_arg_matches<'a, I, T>(arguments: I) -> ArgMatches<'a>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    App::new("autopull")
        .version(env!("CARGO_PKG_VERSION"))
        .about(
            "Keep a working copy in sync with a remote branch and restart a chain of commands whenever it changes.",
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to the JSON configuration file.")
                .default_value("conf.json")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Increase log verbosity (-v for debug, -vv for trace).")
                .multiple(true)
                .takes_value(false),
        )
        .arg(
            Arg::with_name("log_format")
                .long("log-format")
                .help("Format of log output on stderr [default: compact]")
                .possible_values(&["compact", "json"])
                .default_value("compact")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("check")
                .long("check")
                .help("Validate the configuration file and exit.")
                .takes_value(false),
        )
        .get_matches_from(arguments)
}

use clap::{Arg, ArgAction, Command};

pub(super) const DEFAULT_BULK_SIZE: usize = 1000;

pub(super) fn root_cli() -> Command {
    Command::new("logship")
        .author("Logship Authors")
        .about("Ships newline-delimited JSON records from stdin to CloudWatch Logs")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Path to a JSON configuration document (overrides LOGSHIP_CONFIG_OBJECT)")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("log-group")
                .long("log-group")
                .help("Log group name template, e.g. app-%{env}")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("log-stream")
                .long("log-stream")
                .help("Log stream name template, e.g. host-%{host}")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("message-template")
                .long("message-template")
                .help("Template for the event message; the whole record as JSON when omitted")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .help("AWS region")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("endpoint-url")
                .long("endpoint-url")
                .help("CloudWatch Logs endpoint, e.g. a local emulator")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("bulk-size")
                .long("bulk-size")
                .help("Number of input lines shipped together")
                .action(ArgAction::Set)
                .default_value("1000")
                .value_parser(clap::value_parser!(usize)),
        )
}

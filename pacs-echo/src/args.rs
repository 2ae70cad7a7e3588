//! Command line argument parsing.
//!
//! Arguments take the form `-flag=value`,
//! are matched case-insensitively against a fixed [`SCHEMA`],
//! and may appear in any order.
//! Parsing is a pure function over the raw tokens:
//! the schema holds no per-invocation state.
use std::collections::HashMap;
use std::num::ParseIntError;

use snafu::{ensure, OptionExt, ResultExt, Snafu};

/// The character separating a flag from its value.
pub const VALUE_DELIMITER: char = '=';

/// Static description of a recognized command line flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArgumentSpec {
    /// the flag, including its leading dash
    pub name: &'static str,
    /// whether the flag accepts a value after the delimiter
    pub has_value: bool,
    /// whether an empty value is a validation error
    pub not_empty: bool,
    /// whether the flag must be given
    pub required: bool,
    /// one line shown in the help listing
    pub description: &'static str,
}

pub const HELP: &str = "-help";
pub const HOST: &str = "-host";
pub const PORT: &str = "-port";
pub const CLIENT_AE: &str = "-clientae";
pub const HOST_AE: &str = "-hostae";

/// All flags understood by the program, in help listing order.
pub static SCHEMA: &[ArgumentSpec] = &[
    ArgumentSpec {
        name: HELP,
        has_value: true,
        not_empty: false,
        required: false,
        description: "Help",
    },
    ArgumentSpec {
        name: HOST,
        has_value: true,
        not_empty: true,
        required: true,
        description: "Host address",
    },
    ArgumentSpec {
        name: PORT,
        has_value: true,
        not_empty: true,
        required: true,
        description: "Host address port",
    },
    ArgumentSpec {
        name: CLIENT_AE,
        has_value: true,
        not_empty: true,
        required: true,
        description: "Client AE title",
    },
    ArgumentSpec {
        name: HOST_AE,
        has_value: true,
        not_empty: true,
        required: true,
        description: "Host AE title",
    },
];

#[derive(Debug, Snafu, PartialEq)]
pub enum Error {
    /// Empty command line
    EmptyCommandLine,

    #[snafu(display("argument {} must have a non-empty value", flag))]
    EmptyValue { flag: &'static str },

    #[snafu(display(
        "One or more required arguments not found: {}",
        flags.join(", ")
    ))]
    MissingRequired { flags: Vec<&'static str> },

    #[snafu(display("port argument must be integer value, got `{}`", value))]
    InvalidPort {
        value: String,
        source: ParseIntError,
    },

    #[snafu(display("port {} is outside of the TCP port range", port))]
    PortOutOfRange { port: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The outcome of a successful scan over the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// `-help` was given somewhere in the command line
    Help,
    /// all required flags were supplied
    Values(ArgumentValues),
}

/// Values collected during one parse.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArgumentValues {
    values: HashMap<&'static str, String>,
    ignored: Vec<String>,
}

impl ArgumentValues {
    /// Retrieve the value supplied for the given flag.
    pub fn get(&self, flag: &str) -> Option<&str> {
        self.values.get(flag).map(String::as_str)
    }

    /// Tokens which matched none of the known flags.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Retrieve the value of a flag known to be present
    /// after required flag validation.
    fn required(&self, flag: &'static str) -> Result<&str> {
        self.get(flag)
            .context(MissingRequiredSnafu { flags: vec![flag] })
    }

    pub fn host(&self) -> Result<&str> {
        self.required(HOST)
    }

    pub fn client_ae_title(&self) -> Result<&str> {
        self.required(CLIENT_AE)
    }

    pub fn host_ae_title(&self) -> Result<&str> {
        self.required(HOST_AE)
    }

    /// Retrieve the port,
    /// which must be a base-10 integer within the TCP port range.
    pub fn port(&self) -> Result<u16> {
        let value = self.required(PORT)?;
        let port: i64 = value.parse().context(InvalidPortSnafu { value })?;
        u16::try_from(port).ok().context(PortOutOfRangeSnafu { port })
    }
}

/// Split a raw token into its normalized key and optional value.
fn split_token(token: &str) -> (String, Option<&str>) {
    match token.split_once(VALUE_DELIMITER) {
        Some((key, value)) => (key.trim().to_lowercase(), Some(value.trim())),
        None => (token.trim().to_lowercase(), None),
    }
}

fn find_spec(key: &str) -> Option<&'static ArgumentSpec> {
    SCHEMA.iter().find(|spec| spec.name == key)
}

/// Parse the raw command line arguments (without the program name)
/// against [`SCHEMA`].
///
/// A `-help` token anywhere wins over every other token.
/// Otherwise, an empty value on a non-empty flag fails right away,
/// whereas missing required flags are gathered and reported together.
pub fn parse<I, T>(args: I) -> Result<Parsed>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let args: Vec<T> = args.into_iter().collect();
    ensure!(!args.is_empty(), EmptyCommandLineSnafu);

    let tokens: Vec<_> = args.iter().map(|arg| split_token(arg.as_ref())).collect();

    if tokens.iter().any(|(key, _)| key == HELP) {
        return Ok(Parsed::Help);
    }

    let mut out = ArgumentValues::default();
    for ((key, value), raw) in tokens.iter().zip(&args) {
        let Some(spec) = find_spec(key) else {
            out.ignored.push(raw.as_ref().to_string());
            continue;
        };

        let value = (*value).filter(|_| spec.has_value).unwrap_or_default();
        ensure!(
            !spec.not_empty || !value.is_empty(),
            EmptyValueSnafu { flag: spec.name }
        );
        if !value.is_empty() {
            out.values.insert(spec.name, value.to_string());
        }
    }

    let missing: Vec<_> = SCHEMA
        .iter()
        .filter(|spec| spec.required && !out.values.contains_key(spec.name))
        .map(|spec| spec.name)
        .collect();
    ensure!(missing.is_empty(), MissingRequiredSnafu { flags: missing });

    Ok(Parsed::Values(out))
}

/// Render the help listing, one line per flag.
pub fn help_text() -> String {
    let mut text = String::from("Help about commands:\n");
    for spec in SCHEMA {
        text.push_str(&format!("Argument: {} - {}\n", spec.name, spec.description));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn values(args: &[&str]) -> ArgumentValues {
        match parse(args).expect("parsing should succeed") {
            Parsed::Values(values) => values,
            Parsed::Help => panic!("unexpected help request"),
        }
    }

    #[test]
    fn parses_full_command_line() {
        let values = values(&[
            "-host=pacs.local",
            "-port=104",
            "-clientae=ECHOSCU",
            "-hostae=ANY-SCP",
        ]);
        assert_eq!(values.host(), Ok("pacs.local"));
        assert_eq!(values.port(), Ok(104));
        assert_eq!(values.client_ae_title(), Ok("ECHOSCU"));
        assert_eq!(values.host_ae_title(), Ok("ANY-SCP"));
        assert!(values.ignored().is_empty());
    }

    #[test]
    fn keys_are_case_insensitive_and_trimmed() {
        let values = values(&[
            " -HOST = 10.0.0.1 ",
            "-Port=11112",
            "-ClientAE=ME",
            "-HostAe=THEM",
        ]);
        assert_eq!(values.host(), Ok("10.0.0.1"));
        assert_eq!(values.port(), Ok(11112));
        assert_eq!(values.client_ae_title(), Ok("ME"));
        assert_eq!(values.host_ae_title(), Ok("THEM"));
    }

    #[test]
    fn value_splits_on_first_delimiter_only() {
        let values = values(&["-host=a=b", "-port=1", "-clientae=X", "-hostae=Y"]);
        assert_eq!(values.host(), Ok("a=b"));
    }

    #[test]
    fn last_occurrence_wins_and_unknown_tokens_are_kept_aside() {
        let values = values(&[
            "-host=first",
            "-verbose",
            "-host=second",
            "-port=1",
            "-clientae=X",
            "-hostae=Y",
        ]);
        assert_eq!(values.host(), Ok("second"));
        assert_eq!(values.ignored(), &["-verbose".to_string()]);
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert_eq!(parse(Vec::<String>::new()), Err(Error::EmptyCommandLine));
    }

    #[rstest]
    #[case(&["-help"])]
    #[case(&["-HELP=please"])]
    #[case(&["-host=", "-help"])]
    #[case(&["-port=abc", "-help=", "-hostae=X"])]
    #[case(&["-host=h", "-port=1", "-clientae=X", "-hostae=Y", "-help"])]
    fn help_wins_over_everything(#[case] args: &[&str]) {
        assert_eq!(parse(args), Ok(Parsed::Help));
    }

    #[rstest]
    #[case(&["-host=", "-port=1", "-clientae=X", "-hostae=Y"], HOST)]
    #[case(&["-host=   ", "-port=1", "-clientae=X", "-hostae=Y"], HOST)]
    #[case(&["-host=h", "-port", "-clientae=X", "-hostae=Y"], PORT)]
    #[case(&["-clientae= "], CLIENT_AE)]
    fn empty_value_fails_before_required_check(#[case] args: &[&str], #[case] flag: &str) {
        assert!(matches!(parse(args), Err(Error::EmptyValue { flag: f }) if f == flag));
    }

    #[rstest]
    #[case(&["-host=h"], &[PORT, CLIENT_AE, HOST_AE])]
    #[case(&["-port=104", "-hostae=Y"], &[HOST, CLIENT_AE])]
    #[case(&["-unrelated"], &[HOST, PORT, CLIENT_AE, HOST_AE])]
    #[case(&["-host=h", "-port=1", "-clientae=X"], &[HOST_AE])]
    fn reports_every_missing_flag(#[case] args: &[&str], #[case] expected: &[&str]) {
        match parse(args) {
            Err(Error::MissingRequired { flags }) => assert_eq!(flags, expected),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn non_integer_port_is_a_distinct_error() {
        let values = values(&["-host=h", "-port=abc", "-clientae=X", "-hostae=Y"]);
        assert!(matches!(values.port(), Err(Error::InvalidPort { .. })));
    }

    #[rstest]
    #[case("65536")]
    #[case("-1")]
    fn out_of_range_port_is_rejected(#[case] port: &str) {
        let port_arg = format!("-port={}", port);
        let values = values(&["-host=h", &port_arg, "-clientae=X", "-hostae=Y"]);
        assert!(matches!(values.port(), Err(Error::PortOutOfRange { .. })));
    }

    #[test]
    fn parsing_twice_does_not_leak_state() {
        let first = values(&["-host=a", "-port=1", "-clientae=X", "-hostae=Y"]);
        assert_eq!(first.host(), Ok("a"));
        assert!(matches!(
            parse(["-port=1", "-clientae=X", "-hostae=Y"]),
            Err(Error::MissingRequired { .. })
        ));
    }

    #[test]
    fn help_lists_every_flag() {
        let text = help_text();
        for spec in SCHEMA {
            assert!(text.contains(&format!("Argument: {} - {}", spec.name, spec.description)));
        }
    }
}

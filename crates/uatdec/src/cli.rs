use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{error::ErrorKind, CommandFactory, Parser};
use lazy_static::lazy_static;
use regex::Regex;

use uat978::{SampleFormat, SlicerPolicy};

/// Exit code for configuration errors; supervisors should not restart
pub const EXIT_NO_RESTART: i32 = 64;

const USAGE_LONG: &str = r#"
Receives the 978 MHz UAT data link used by US general-aviation ADS-B equipment and decodes it into messages.

Sample input comes from exactly one of --stdin, --file, --sdr, or --stratuxv3. Raw IQ inputs (--stdin, --file, --sdr) are demodulated and error-corrected here; a Stratux v3 dongle delivers already-demodulated frames over its serial port, which still carry FEC parity.

Decoded messages are served to TCP clients (--raw-port, --raw-legacy-port, --json-port, each repeatable) and optionally mirrored to stdout (--raw-stdout, --json-stdout).

Demodulate a recorded capture:

    uatdec --file capture.cu8 --format CU8 --raw-stdout

Feed a SoapySDR receiver to clients on port 30978:

    uatdec --sdr driver=rtlsdr --raw-port 30978 --json-port 30979
"#;

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about = "978 MHz UAT receiver and decoder", long_about = None)]
#[command(after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read sample data from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Read sample data from a file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Throttle file input to realtime
    #[arg(long)]
    pub file_throttle: bool,

    /// Read sample data from the named SDR device
    #[arg(long, value_name = "DEVICE")]
    pub sdr: Option<String>,

    /// Enable SDR AGC
    #[arg(long)]
    pub sdr_auto_gain: bool,

    /// Set SDR gain in dB
    #[arg(long, value_name = "DB")]
    pub sdr_gain: Option<f64>,

    /// Set SDR frequency correction in PPM
    #[arg(long, value_name = "PPM")]
    pub sdr_ppm: Option<f64>,

    /// Set SDR antenna name
    #[arg(long, value_name = "NAME")]
    pub sdr_antenna: Option<String>,

    /// Set SDR stream key-value settings
    #[arg(long, value_name = "K1=V1,K2=V2")]
    pub sdr_stream_settings: Option<String>,

    /// Set SDR device key-value settings
    #[arg(long, value_name = "K1=V1,K2=V2")]
    pub sdr_device_settings: Option<String>,

    /// Read messages from a Stratux v3 UAT dongle on the given serial port
    #[arg(long, value_name = "PATH")]
    pub stratuxv3: Option<PathBuf>,

    /// Set the sample format (CU8, CS8, CS16H, CF32H)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<SampleFormat>,

    /// Derive the bit-slicing threshold from each frame's sync word
    #[arg(long)]
    #[arg(hide_short_help = true)]
    pub demod_auto_center: bool,

    /// Listen for connections on [host:]port and provide raw messages
    #[arg(long, value_name = "[HOST:]PORT")]
    pub raw_port: Vec<ListenAddress>,

    /// Like --raw-port, but with no initial metadata header
    #[arg(long, value_name = "[HOST:]PORT")]
    pub raw_legacy_port: Vec<ListenAddress>,

    /// Listen for connections on [host:]port and provide decoded JSON
    #[arg(long, value_name = "[HOST:]PORT")]
    pub json_port: Vec<ListenAddress>,

    /// Write raw messages to stdout
    #[arg(long)]
    pub raw_stdout: bool,

    /// Write decoded JSON to stdout
    #[arg(long)]
    pub json_stdout: bool,
}

/// The selected (and validated) sample or message source
#[derive(Clone, Debug)]
pub enum Input {
    Stdin {
        format: SampleFormat,
    },
    File {
        path: PathBuf,
        format: SampleFormat,
        throttle: bool,
    },
    Sdr(SdrOptions),
    Stratux {
        path: PathBuf,
    },
}

/// SDR device configuration from the command line
#[derive(Clone, Debug)]
pub struct SdrOptions {
    pub device: String,
    pub auto_gain: bool,
    pub gain: Option<f64>,
    pub ppm: Option<f64>,
    pub antenna: Option<String>,
    pub stream_settings: Option<String>,
    pub device_settings: Option<String>,
}

impl Args {
    /// Validate the input selection
    ///
    /// Exactly one input must be chosen, and the raw IQ inputs need a
    /// sample format. Violations are configuration errors.
    pub fn input(&self) -> Result<Input, CliError> {
        let selected = usize::from(self.stdin)
            + usize::from(self.file.is_some())
            + usize::from(self.sdr.is_some())
            + usize::from(self.stratuxv3.is_some());
        if selected != 1 {
            return Err(CliError::config(anyhow::anyhow!(
                "exactly one of --stdin, --file, --sdr, or --stratuxv3 must be used"
            )));
        }

        let format = || {
            self.format.ok_or_else(|| {
                CliError::config(anyhow::anyhow!(
                    "--format must be specified for this input"
                ))
            })
        };

        if self.stdin {
            Ok(Input::Stdin { format: format()? })
        } else if let Some(path) = &self.file {
            Ok(Input::File {
                path: path.clone(),
                format: format()?,
                throttle: self.file_throttle,
            })
        } else if let Some(device) = &self.sdr {
            Ok(Input::Sdr(SdrOptions {
                device: device.clone(),
                auto_gain: self.sdr_auto_gain,
                gain: self.sdr_gain,
                ppm: self.sdr_ppm,
                antenna: self.sdr_antenna.clone(),
                stream_settings: self.sdr_stream_settings.clone(),
                device_settings: self.sdr_device_settings.clone(),
            }))
        } else {
            Ok(Input::Stratux {
                path: self.stratuxv3.clone().expect("one input is selected"),
            })
        }
    }

    /// The demodulator slicing policy to use
    pub fn slicer(&self) -> SlicerPolicy {
        if self.demod_auto_center {
            SlicerPolicy::AutoCenter
        } else {
            SlicerPolicy::Fixed
        }
    }
}

/// A listener address in `[host:]port` form
///
/// The host defaults to the wildcard address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for ListenAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref LISTEN_RE: Regex =
                Regex::new(r"^(?:([^:]+):)?(\d+)$").expect("listen address pattern");
        }

        let captures = LISTEN_RE
            .captures(s)
            .ok_or_else(|| format!("\"{s}\" is not a [host:]port address"))?;

        let host = captures
            .get(1)
            .map_or("0.0.0.0", |m| m.as_str())
            .to_owned();
        let port = captures[2]
            .parse()
            .map_err(|_| format!("\"{}\" is not a port number", &captures[2]))?;

        Ok(ListenAddress { host, port })
    }
}

impl Display for ListenAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    pub exit_code: i32,
}

impl CliError {
    /// Create new error with a custom exit code
    pub fn new(error: anyhow::Error, code: i32) -> CliError {
        CliError {
            error,
            exit_code: code,
        }
    }

    /// A configuration error; the process should not be restarted
    pub fn config(error: anyhow::Error) -> CliError {
        CliError::new(error, EXIT_NO_RESTART)
    }

    /// Print this error to the terminal
    ///
    /// Errors from clap are printed verbatim. Other types of errors
    /// are printed indirectly via clap's fancy formatter.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print()
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> CliError {
        CliError::new(err, 1)
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        // bad arguments are configuration errors; --help and
        // --version are normal exits
        let code = if err.use_stderr() { EXIT_NO_RESTART } else { 0 };
        CliError::new(err.into(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_listen_address() {
        assert_eq!(
            "30978".parse::<ListenAddress>(),
            Ok(ListenAddress {
                host: "0.0.0.0".to_owned(),
                port: 30978
            })
        );
        assert_eq!(
            "localhost:30978".parse::<ListenAddress>(),
            Ok(ListenAddress {
                host: "localhost".to_owned(),
                port: 30978
            })
        );
        assert!("".parse::<ListenAddress>().is_err());
        assert!("foo:".parse::<ListenAddress>().is_err());
        assert!("foo:bar".parse::<ListenAddress>().is_err());
        assert!("99999".parse::<ListenAddress>().is_err());
    }

    #[test]
    fn test_exactly_one_input() {
        let args = Args::parse_from(["uatdec", "--stdin", "--format", "CU8"]);
        assert!(matches!(
            args.input(),
            Ok(Input::Stdin {
                format: SampleFormat::Cu8
            })
        ));

        let args = Args::parse_from(["uatdec"]);
        assert_eq!(args.input().expect_err("expected error").exit_code, 64);

        let args = Args::parse_from(["uatdec", "--stdin", "--sdr", "driver=rtlsdr"]);
        assert_eq!(args.input().expect_err("expected error").exit_code, 64);
    }

    #[test]
    fn test_format_required_for_samples() {
        let args = Args::parse_from(["uatdec", "--stdin"]);
        assert_eq!(args.input().expect_err("expected error").exit_code, 64);

        let args = Args::parse_from(["uatdec", "--file", "x.bin"]);
        assert_eq!(args.input().expect_err("expected error").exit_code, 64);

        // a stratux dongle delivers demodulated frames; no format
        let args = Args::parse_from(["uatdec", "--stratuxv3", "/dev/ttyUSB0"]);
        assert!(matches!(args.input(), Ok(Input::Stratux { .. })));
    }
}

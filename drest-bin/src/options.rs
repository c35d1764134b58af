use std::{collections::HashMap, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{
    Parser,
    builder::{PossibleValuesParser, TypedValueParser},
};
use const_format::{concatcp, formatcp};
use drest_lib::{
    DEFAULT_API_BASE, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
    Request, Route, ratelimit::DEFAULT_MAX_RETRIES,
};
use http::{
    Method,
    header::{HeaderName, HeaderValue},
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use strum::{Display, EnumString, VariantNames};

pub(crate) const DREST_CONFIG_FILE: &str = "drest.toml";

const DEFAULT_METHOD: &str = "get";

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned `String` types
const PORT_STR: &str = concatcp!(DEFAULT_PORT);
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);
const MAX_RETRIES_STR: &str = concatcp!(DEFAULT_MAX_RETRIES);
// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    DREST_CONFIG_FILE,
);

/// How `--stats` are printed
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, EnumString, VariantNames, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub(crate) enum StatsFormat {
    /// One line per route
    #[default]
    Compact,
    /// Machine-readable
    Json,
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    host: String = DEFAULT_HOST.to_string();
    port: u16 = DEFAULT_PORT;
    api_base: String = DEFAULT_API_BASE.to_string();
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    timeout: u64 = DEFAULT_TIMEOUT_SECS;
    max_retries: u64 = DEFAULT_MAX_RETRIES;
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// If the header contains multiple colons, the part after the first colon is
/// considered the value.
///
/// # Errors
///
/// This fails if the header does not contain a `:` character or if the
/// header name contains non-ASCII characters.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        ));
    };
    let name = name.trim();
    let name = HeaderName::from_str(name)
        .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
    Ok((name, value))
}

/// Parses a single HTTP header into a tuple of (String, String)
///
/// This does NOT merge multiple headers into one.
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let invalid = |message: String| clap::Error::raw(clap::error::ErrorKind::InvalidValue, message);

        let header_str = value
            .to_str()
            .ok_or_else(|| invalid("Header value contains invalid UTF-8".into()))?;
        let (name, value) = parse_single_header(header_str).map_err(|e| invalid(e.to_string()))?;
        let value = value
            .to_str()
            .map_err(|_| invalid("Header value contains invalid UTF-8".into()))?;
        Ok((name.to_string(), value.to_string()))
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// drest sends one call to the Discord REST API and prints the response.
///
/// Calls wait for their rate limit bucket and are retried after a
/// `429 Too Many Requests`, so drest can be used in scripts without
/// tripping the API's limits.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct DrestOptions {
    /// Route of the call, e.g. `get_user` or `post_message`
    pub(crate) route: Route,

    /// Path of the call below the API base, e.g. `/users/@me`
    pub(crate) path: String,

    /// Request method
    // Using `-X` as a short param similar to curl
    #[arg(short = 'X', long, default_value = DEFAULT_METHOD)]
    pub(crate) method: String,

    /// JSON body of the call
    #[arg(short, long, conflicts_with = "body_file")]
    pub(crate) body: Option<String>,

    /// Read the JSON body of the call from a file
    #[arg(long, value_name = "FILE")]
    pub(crate) body_file: Option<PathBuf>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl DrestOptions {
    /// The call described by the command line.
    pub(crate) fn request(&self) -> Result<Request> {
        let method = Method::from_str(&self.method.to_uppercase())
            .with_context(|| format!("Invalid request method `{}`", self.method))?;
        let mut request = Request::new(self.route, method, self.path.clone())
            .with_trace(format!("drest {}", self.route));

        if let Some(body) = &self.body {
            request = request.with_json(body.clone());
        } else if let Some(path) = &self.body_file {
            let body = fs::read(path)
                .with_context(|| format!("Cannot read body from `{}`", path.display()))?;
            request = request.with_json(body);
        }

        for (name, value) in &self.config.header {
            request = request.with_header(name, value)?;
        }
        Ok(request)
    }
}

// Custom deserializer function for the header field
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    // Header names are case-insensitive; `HeaderName` lowercases the ones
    // from the command line
    Ok(map
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect())
}

/// The configuration shared by the command line and `drest.toml`
#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default)]
    pub(crate) verbose: crate::verbosity::Verbosity,

    /// Bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    #[serde(default)]
    pub(crate) token: Option<SecretString>,

    /// API host
    #[arg(long, default_value = DEFAULT_HOST)]
    #[serde(default = "host")]
    pub(crate) host: String,

    /// API port
    #[arg(long, default_value = &PORT_STR)]
    #[serde(default = "port")]
    pub(crate) port: u16,

    /// Prefix of every request path
    #[arg(long, default_value = DEFAULT_API_BASE)]
    #[serde(default = "api_base")]
    pub(crate) api_base: String,

    /// Talk plain HTTP instead of HTTPS, e.g. to a local proxy
    #[arg(long)]
    #[serde(default)]
    pub(crate) plaintext: bool,

    /// Trust the certificates in this PEM file instead of the system's
    #[arg(long, value_name = "PEM")]
    #[serde(default)]
    pub(crate) cacert: Option<PathBuf>,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Deadline in seconds for the call, rate limit waits included
    #[arg(short, long, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout")]
    pub(crate) timeout: u64,

    /// How long to wait for more bytes of a response, e.g. `5s`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) read_timeout: Option<Duration>,

    /// How often a rate limited call is sent again
    #[arg(long, default_value = &MAX_RETRIES_STR)]
    #[serde(default = "max_retries")]
    pub(crate) max_retries: u64,

    /// Wait after a `429` that does not say how long to wait, e.g. `2s`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) retry_wait: Option<Duration>,

    /// Upper bound for a single wait after a `429`, e.g. `1m`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) max_retry_wait: Option<Duration>,

    /// Do not pace message edits and deletions beyond what the server
    /// advertises
    #[arg(long)]
    #[serde(default)]
    pub(crate) no_quirks: bool,

    /// Extra header of the call, e.g. `X-Audit-Log-Reason: cleanup`.
    /// Can be given multiple times.
    #[arg(short = 'H', long, value_parser = HeaderParser)]
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Print per-route statistics after the call
    #[arg(long)]
    #[serde(default)]
    pub(crate) stats: bool,

    /// Format of `--stats`
    #[arg(
        long,
        default_value = "compact",
        value_parser = PossibleValuesParser::new(StatsFormat::VARIANTS)
            .try_map(|s| StatsFormat::from_str(&s)),
    )]
    #[serde(default)]
    pub(crate) format: StatsFormat,
}

impl Config {
    /// Special handling for merging headers
    ///
    /// Headers from the command line win over those from the file.
    fn merge_headers(&mut self, other: &[(String, String)]) {
        let lowercase = |(name, value): &(String, String)| (name.to_ascii_lowercase(), value.clone());
        let merged: HashMap<_, _> = other
            .iter()
            .map(lowercase)
            .chain(self.header.iter().map(lowercase))
            .collect();
        self.header = merged.into_iter().collect();
    }

    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        self.merge_headers(&toml.header);

        // Outside of fold_in! because SecretBox doesn't implement Eq.
        if self.token.is_none() && toml.token.is_some() {
            self.token = toml.token;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,
                ..token,

                // Keys with defaults to assign
                verbose: crate::verbosity::Verbosity::default(),
                host: DEFAULT_HOST,
                port: DEFAULT_PORT,
                api_base: DEFAULT_API_BASE,
                plaintext: false,
                cacert: None,
                user_agent: DEFAULT_USER_AGENT,
                timeout: DEFAULT_TIMEOUT_SECS,
                read_timeout: None,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_wait: None,
                max_retry_wait: None,
                no_quirks: false,
                stats: false,
                format: StatsFormat::Compact,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn parse(args: &[&str]) -> DrestOptions {
        DrestOptions::try_parse_from(std::iter::once("drest").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_custom_headers() {
        let (name, value) = parse_single_header("x-audit-log-reason: spring cleaning").unwrap();
        assert_eq!(name, HeaderName::from_static("x-audit-log-reason"));
        assert_eq!(value, HeaderValue::from_static("spring cleaning"));

        let (_, value) = parse_single_header("X-Thing: a:b").unwrap();
        assert_eq!(value, HeaderValue::from_static("a:b"));

        assert!(parse_single_header("no colon").is_err());
        assert!(parse_single_header("bad name: value").is_err());
    }

    #[test]
    fn test_defaults() {
        let opts = parse(&["get_user", "/users/@me"]);
        assert_eq!(opts.route, Route::GetUser);
        assert_eq!(opts.config.host, DEFAULT_HOST);
        assert_eq!(opts.config.port, DEFAULT_PORT);
        assert_eq!(opts.config.api_base, DEFAULT_API_BASE);
        assert_eq!(opts.config.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(opts.config.format, StatsFormat::Compact);
    }

    #[test]
    fn test_request() {
        let opts = parse(&[
            "post_message",
            "/channels/1/messages",
            "-X",
            "post",
            "--body",
            r#"{"content":"hi"}"#,
            "-H",
            "X-Audit-Log-Reason: testing",
        ]);
        let request = opts.request().unwrap();
        assert_eq!(request.route, Route::PostMessage);
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/channels/1/messages");
        assert_eq!(request.body.as_deref(), Some(br#"{"content":"hi"}"#.as_slice()));
        assert_eq!(request.headers["x-audit-log-reason"], "testing");
    }

    #[test]
    fn test_unknown_route() {
        let args = ["drest", "post_everything", "/"];
        assert!(DrestOptions::try_parse_from(args).is_err());
    }

    #[test]
    fn test_body_and_body_file_conflict() {
        let args = ["drest", "get_user", "/", "--body", "{}", "--body-file", "x.json"];
        assert!(DrestOptions::try_parse_from(args).is_err());
    }

    #[test]
    fn test_merge_config_file() {
        let mut opts = parse(&["get_user", "/users/@me", "--port", "8080", "-H", "A: cli"]);
        let toml: Config = toml::from_str(
            r#"
            token = "from-file"
            host = "proxy.local"
            port = 9090
            plaintext = true
            max_retry_wait = "10s"
            format = "json"

            [header]
            A = "file"
            B = "file"
            "#,
        )
        .unwrap();
        opts.config.merge(toml);

        let config = opts.config;
        assert_eq!(config.token.unwrap().expose_secret(), "from-file");
        assert_eq!(config.host, "proxy.local");
        // The command line wins
        assert_eq!(config.port, 8080);
        assert!(config.plaintext);
        assert_eq!(config.max_retry_wait, Some(Duration::from_secs(10)));
        assert_eq!(config.format, StatsFormat::Json);

        let mut headers = config.header;
        headers.sort();
        assert_eq!(
            headers,
            vec![
                ("a".to_string(), "cli".to_string()),
                ("b".to_string(), "file".to_string())
            ]
        );
    }

    #[test]
    fn test_command_line_header_wins_regardless_of_case() {
        let mut opts = parse(&[
            "get_user",
            "/users/@me",
            "-H",
            "x-audit-log-reason: cli",
        ]);
        let toml: Config = toml::from_str(
            r#"
            [header]
            X-Audit-Log-Reason = "file"
            "#,
        )
        .unwrap();
        opts.config.merge(toml);

        assert_eq!(
            opts.config.header,
            vec![("x-audit-log-reason".to_string(), "cli".to_string())]
        );
        let request = opts.request().unwrap();
        assert_eq!(request.headers["x-audit-log-reason"], "cli");
    }

    #[test]
    fn test_unknown_config_key() {
        assert!(toml::from_str::<Config>("colour = true").is_err());
    }

    #[test]
    fn test_invalid_method() {
        let opts = parse(&["get_user", "/", "-X", "g e t"]);
        assert!(opts.request().is_err());
    }
}

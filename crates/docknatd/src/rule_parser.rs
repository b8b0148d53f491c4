//! Recovers port mappings from `iptables -S` rule listings.
//!
//! A rule line is a sequence of option flags, each followed by its value:
//!
//! ```text
//! -A PREROUTING -p tcp -m tcp --dport 30134 -j DNAT --to-destination 172.17.0.5:8777
//! ```
//!
//! The parser builds a flag to value table first and looks options up by
//! name, so option order and unrelated options (`-m`, `-i`, `--comment`)
//! do not matter. Only `DNAT` rules yield a mapping.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::mapping::{MappingSet, PortMapping, Protocol, UnsupportedProtocol};
use crate::tables::{flags, DNAT_TARGET};

/// Reasons a DNAT rule line could not be turned into a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    /// A double-quoted value was never closed.
    #[error("unterminated quoted value")]
    UnterminatedQuote,

    /// A value token appeared before any option flag.
    #[error("value '{0}' is not preceded by an option")]
    UnexpectedValue(String),

    /// A required option is absent or has no value.
    #[error("missing option {0}")]
    MissingOption(&'static str),

    /// A required option is negated with `!`.
    #[error("option {0} is negated")]
    NegatedOption(&'static str),

    /// `--to-destination` lacks the `:PORT` suffix.
    #[error("destination '{0}' has no port")]
    DestinationWithoutPort(String),

    /// `--to-destination` address is not an IPv4 literal.
    #[error("destination address '{0}' is not an IPv4 address")]
    InvalidAddress(String),

    /// `-p` names a protocol other than tcp or udp.
    #[error(transparent)]
    Protocol(#[from] UnsupportedProtocol),
}

/// Value recorded for one option flag.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OptionValue {
    value: Option<String>,
    negated: bool,
}

/// Flag to value table of one rule line.
#[derive(Debug, Default)]
struct RuleOptions {
    options: HashMap<String, OptionValue>,
}

impl RuleOptions {
    fn parse(tokens: &[String]) -> Result<Self, RuleParseError> {
        let mut options: HashMap<String, OptionValue> = HashMap::new();
        // Flag waiting for its value, and the flag that last received one.
        let mut pending: Option<(String, bool)> = None;
        let mut have_flag = false;
        let mut negate_next = false;

        for token in tokens.iter().cloned() {
            if token == flags::NEGATE {
                negate_next = true;
                continue;
            }

            if is_flag(&token) {
                if let Some((flag, negated)) = pending.take() {
                    options.entry(flag).or_insert(OptionValue {
                        value: None,
                        negated,
                    });
                }
                pending = Some((token, std::mem::take(&mut negate_next)));
                have_flag = true;
                continue;
            }

            // Old iptables prints the negation between option and value
            // (`-s ! 10.0.0.1`).
            let negated_value = std::mem::take(&mut negate_next);
            if let Some((flag, negated)) = pending.take() {
                options.entry(flag).or_insert(OptionValue {
                    value: Some(token),
                    negated: negated || negated_value,
                });
            } else if !have_flag {
                return Err(RuleParseError::UnexpectedValue(token));
            }
            // Extra values of a multi-argument option (--tcp-flags SYN,RST SYN)
            // are ignored.
        }

        if let Some((flag, negated)) = pending {
            options.entry(flag).or_insert(OptionValue {
                value: None,
                negated,
            });
        }

        Ok(Self { options })
    }

    /// First present option among `names`.
    fn get(&self, names: &[&'static str]) -> Option<(&'static str, &OptionValue)> {
        names
            .iter()
            .find_map(|name| self.options.get(*name).map(|v| (*name, v)))
    }

    /// Value of an option that must be present, valued and not negated.
    fn required(&self, names: &[&'static str]) -> Result<&str, RuleParseError> {
        match self.get(names) {
            Some((name, opt)) if opt.negated => Err(RuleParseError::NegatedOption(name)),
            Some((_, OptionValue { value: Some(v), .. })) => Ok(v.as_str()),
            _ => Err(RuleParseError::MissingOption(names[0])),
        }
    }

    /// Value of an option that may be absent.
    fn optional(&self, names: &[&'static str]) -> Result<Option<&str>, RuleParseError> {
        match self.get(names) {
            None => Ok(None),
            Some(_) => self.required(names).map(Some),
        }
    }

    fn is_dnat(&self) -> bool {
        matches!(
            self.get(&[flags::JUMP, flags::JUMP_LONG]),
            Some((_, OptionValue { value: Some(target), negated: false })) if target == DNAT_TARGET
        )
    }
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// Splits on whitespace, keeping double-quoted values (as printed for
/// `--comment`) as one token.
fn tokenize(line: &str) -> Result<Vec<String>, RuleParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => return Err(RuleParseError::UnterminatedQuote),
                        },
                        Some(other) => current.push(other),
                        None => return Err(RuleParseError::UnterminatedQuote),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Base-10 port, 0 when unparseable.
fn parse_port(value: &str) -> u16 {
    value.parse::<u16>().unwrap_or_else(|_| {
        warn!(value = %value, "Unparseable port in rule, treating as 0");
        0
    })
}

/// Parses one rule line.
///
/// # Returns
///
/// * `Ok(Some(mapping))` - A DNAT rule, carrying its arguments as installed
/// * `Ok(None)` - Any other rule (ACCEPT, MASQUERADE, ...) or an empty line
/// * `Err(_)` - A DNAT rule that cannot be interpreted, or a line that is not
///   in flag/value form
pub fn try_parse_rule(line: &str) -> Result<Option<PortMapping>, RuleParseError> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let tokens = tokenize(line)?;
    let options = RuleOptions::parse(&tokens)?;
    if !options.is_dnat() {
        return Ok(None);
    }

    let protocol = match options.optional(&[flags::PROTOCOL, flags::PROTOCOL_LONG])? {
        Some(name) => name.parse::<Protocol>()?,
        None => Protocol::Tcp,
    };

    let public_port = parse_port(options.required(&[flags::DPORT])?);

    let destination = options.required(&[flags::TO_DESTINATION])?;
    let (address, port) = destination
        .split_once(':')
        .ok_or_else(|| RuleParseError::DestinationWithoutPort(destination.to_string()))?;
    let bridge_address = address
        .parse::<Ipv4Addr>()
        .map_err(|_| RuleParseError::InvalidAddress(address.to_string()))?;

    let mapping = PortMapping::new(bridge_address, public_port, parse_port(port), protocol)
        .with_rule_args(rule_args(tokens));
    Ok(Some(mapping))
}

/// The rule as `-D` needs it: everything after `-A <chain>`.
fn rule_args(tokens: Vec<String>) -> Vec<String> {
    match tokens.first().map(String::as_str) {
        Some(flags::APPEND | flags::APPEND_LONG) => tokens.into_iter().skip(2).collect(),
        _ => tokens,
    }
}

/// Parses one rule line, logging and skipping anything that is not a usable
/// DNAT rule.
pub fn parse_rule(line: &str) -> Option<PortMapping> {
    match try_parse_rule(line) {
        Ok(mapping) => mapping,
        Err(e) => {
            warn!(rule = %line, error = %e, "Skipping malformed DNAT rule");
            None
        }
    }
}

/// Parses a full chain listing. The first line is the chain header
/// (`-P PREROUTING ACCEPT` or `-N CHAIN`) and is discarded.
pub fn parse_listing<I, S>(lines: I) -> MappingSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set: MappingSet = lines
        .into_iter()
        .skip(1)
        .filter_map(|line| parse_rule(line.as_ref()))
        .collect();
    set.retain_live("iptables");
    debug!(mappings = set.len(), "Parsed rule listing");
    set
}

//! Level names, syslog severities, and facilities.
//!
//! Application levels are free-form strings (`"info"`, `"warn"`, ...). The
//! [`SeverityMap`] translates them into numeric syslog severities; levels it
//! does not know are passed through by name rather than rejected.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Mapping from symbolic level names to numeric syslog severities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeverityMap {
    levels: HashMap<String, u8>,
}

impl Default for SeverityMap {
    fn default() -> Self {
        Self::from_pairs([
            ("silly", 7),
            ("debug", 7),
            ("verbose", 7),
            ("info", 6),
            ("warn", 4),
            ("error", 3),
        ])
    }
}

impl SeverityMap {
    /// Create an empty mapping.
    pub fn empty() -> Self {
        Self {
            levels: HashMap::new(),
        }
    }

    /// Build a mapping from `(level, severity)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u8)>) -> Self {
        Self {
            levels: pairs
                .into_iter()
                .map(|(name, severity)| (name.to_owned(), severity))
                .collect(),
        }
    }

    /// Add or replace the severity for `level`.
    pub fn insert(&mut self, level: impl Into<String>, severity: u8) {
        self.levels.insert(level.into(), severity);
    }

    /// Look up the severity for `level`, ignoring any ANSI colour codes.
    pub fn severity(&self, level: &str) -> Option<u8> {
        self.levels.get(strip_ansi(level).as_str()).copied()
    }
}

/// Syslog facility codes (RFC 5424 section 6.2.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Facility {
    Kern,
    User,
    Mail,
    #[default]
    Daemon,
    Auth,
    Syslog,
    Lpr,
    News,
    Uucp,
    Cron,
    AuthPriv,
    Ftp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl Facility {
    /// Numeric facility code.
    pub fn code(self) -> u8 {
        match self {
            Facility::Kern => 0,
            Facility::User => 1,
            Facility::Mail => 2,
            Facility::Daemon => 3,
            Facility::Auth => 4,
            Facility::Syslog => 5,
            Facility::Lpr => 6,
            Facility::News => 7,
            Facility::Uucp => 8,
            Facility::Cron => 9,
            Facility::AuthPriv => 10,
            Facility::Ftp => 11,
            Facility::Local0 => 16,
            Facility::Local1 => 17,
            Facility::Local2 => 18,
            Facility::Local3 => 19,
            Facility::Local4 => 20,
            Facility::Local5 => 21,
            Facility::Local6 => 22,
            Facility::Local7 => 23,
        }
    }

    /// Syslog priority value for this facility and `severity`.
    pub fn priority(self, severity: u8) -> u16 {
        u16::from(self.code()) * 8 + u16::from(severity)
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Facility::Kern => "kern",
            Facility::User => "user",
            Facility::Mail => "mail",
            Facility::Daemon => "daemon",
            Facility::Auth => "auth",
            Facility::Syslog => "syslog",
            Facility::Lpr => "lpr",
            Facility::News => "news",
            Facility::Uucp => "uucp",
            Facility::Cron => "cron",
            Facility::AuthPriv => "authpriv",
            Facility::Ftp => "ftp",
            Facility::Local0 => "local0",
            Facility::Local1 => "local1",
            Facility::Local2 => "local2",
            Facility::Local3 => "local3",
            Facility::Local4 => "local4",
            Facility::Local5 => "local5",
            Facility::Local6 => "local6",
            Facility::Local7 => "local7",
        };
        f.write_str(s)
    }
}

impl FromStr for Facility {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kern" => Ok(Self::Kern),
            "user" => Ok(Self::User),
            "mail" => Ok(Self::Mail),
            "daemon" => Ok(Self::Daemon),
            "auth" => Ok(Self::Auth),
            "syslog" => Ok(Self::Syslog),
            "lpr" => Ok(Self::Lpr),
            "news" => Ok(Self::News),
            "uucp" => Ok(Self::Uucp),
            "cron" => Ok(Self::Cron),
            "authpriv" => Ok(Self::AuthPriv),
            "ftp" => Ok(Self::Ftp),
            "local0" => Ok(Self::Local0),
            "local1" => Ok(Self::Local1),
            "local2" => Ok(Self::Local2),
            "local3" => Ok(Self::Local3),
            "local4" => Ok(Self::Local4),
            "local5" => Ok(Self::Local5),
            "local6" => Ok(Self::Local6),
            "local7" => Ok(Self::Local7),
            _ => Err(()),
        }
    }
}

const ESC: char = '\u{1b}';

/// Remove ANSI escape sequences (CSI and two-byte forms) from `input`.
pub fn strip_ansi(input: &str) -> String {
    if !input.contains(ESC) {
        return input.to_owned();
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ESC {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameter and intermediate bytes run until a final byte in 0x40..=0x7e.
                for next in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&next) {
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// Wrap `level` in the ANSI colour conventionally used for it.
///
/// Unknown levels are returned unchanged.
pub fn colorize(level: &str) -> String {
    let plain = strip_ansi(level);
    let code = match plain.as_str() {
        "silly" => 35,
        "debug" => 34,
        "verbose" => 36,
        "info" => 32,
        "warn" => 33,
        "error" => 31,
        _ => return plain,
    };
    format!("{ESC}[{code}m{plain}{ESC}[39m")
}

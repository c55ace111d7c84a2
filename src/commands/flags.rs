//! A small POSIX-style flag parser for comment commands.
//!
//! Comment commands accept `-w staging`, `-wstaging`, `--workspace=staging`
//! and `--workspace staging`, interspersed with positional arguments, with
//! everything after `--` passed through. Usage output lists flags sorted by
//! long name, with the descriptions aligned and wrapped at [`USAGE_COLUMNS`].

use std::collections::HashMap;

/// Width that flag usage text is wrapped to.
pub const USAGE_COLUMNS: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    String,
    Bool,
}

#[derive(Debug, Clone)]
pub struct FlagSpec {
    pub long: &'static str,
    pub short: Option<char>,
    pub kind: FlagKind,
    pub usage: String,
}

impl FlagSpec {
    pub fn string(long: &'static str, short: char, usage: impl Into<String>) -> Self {
        FlagSpec {
            long,
            short: Some(short),
            kind: FlagKind::String,
            usage: usage.into(),
        }
    }

    pub fn bool(long: &'static str, usage: impl Into<String>) -> Self {
        FlagSpec {
            long,
            short: None,
            kind: FlagKind::Bool,
            usage: usage.into(),
        }
    }
}

/// Why flag parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    /// `-h` or `--help` was given.
    Help,
    /// A malformed or unknown flag; the message is shown to the user.
    Invalid(String),
}

/// The flags accepted by one command.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    specs: Vec<FlagSpec>,
}

/// Flag values and positional arguments from a successful parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFlags {
    strings: HashMap<&'static str, String>,
    bools: HashMap<&'static str, bool>,
    /// Positional arguments, including everything after `--`.
    pub args: Vec<String>,
    /// Number of positional arguments seen before `--`, if `--` was given.
    pub args_len_at_dash: Option<usize>,
}

impl ParsedFlags {
    pub fn string(&self, long: &str) -> String {
        self.strings.get(long).cloned().unwrap_or_default()
    }

    pub fn bool(&self, long: &str) -> bool {
        self.bools.get(long).copied().unwrap_or(false)
    }

    /// Positional arguments before `--`.
    pub fn unused_args(&self) -> &[String] {
        match self.args_len_at_dash {
            Some(n) => &self.args[..n],
            None => &self.args,
        }
    }

    /// Arguments after `--`.
    pub fn extra_args(&self) -> Vec<String> {
        match self.args_len_at_dash {
            Some(n) => self.args[n..].to_vec(),
            None => Vec::new(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl FlagSet {
    pub fn new(specs: Vec<FlagSpec>) -> Self {
        FlagSet { specs }
    }

    fn by_long(&self, long: &str) -> Option<&FlagSpec> {
        self.specs.iter().find(|s| s.long == long)
    }

    fn by_short(&self, short: char) -> Option<&FlagSpec> {
        self.specs.iter().find(|s| s.short == Some(short))
    }

    pub fn parse(&self, args: &[String]) -> Result<ParsedFlags, FlagError> {
        let mut parsed = ParsedFlags::default();
        let mut rest = args.iter();

        while let Some(arg) = rest.next() {
            if arg.len() < 2 || !arg.starts_with('-') {
                parsed.args.push(arg.clone());
                continue;
            }
            if arg == "--" {
                parsed.args_len_at_dash = Some(parsed.args.len());
                parsed.args.extend(rest.by_ref().cloned());
                break;
            }

            if let Some(long) = arg.strip_prefix("--") {
                let (name, inline) = match long.split_once('=') {
                    Some((n, v)) => (n, Some(v)),
                    None => (long, None),
                };
                if name.is_empty() || name.starts_with('-') {
                    return Err(FlagError::Invalid(format!("bad flag syntax: {}", arg)));
                }
                let Some(spec) = self.by_long(name) else {
                    if name == "help" {
                        return Err(FlagError::Help);
                    }
                    return Err(FlagError::Invalid(format!("unknown flag: --{}", name)));
                };
                match spec.kind {
                    FlagKind::Bool => {
                        let value = inline.unwrap_or("true");
                        let b = parse_bool(value).ok_or_else(|| {
                            FlagError::Invalid(format!(
                                "invalid argument {:?} for \"--{}\" flag: must be true or false",
                                value, spec.long
                            ))
                        })?;
                        parsed.bools.insert(spec.long, b);
                    }
                    FlagKind::String => {
                        let value = match inline {
                            Some(v) => v.to_string(),
                            None => rest.next().cloned().ok_or_else(|| {
                                FlagError::Invalid(format!("flag needs an argument: --{}", name))
                            })?,
                        };
                        parsed.strings.insert(spec.long, value);
                    }
                }
                continue;
            }

            let shorthands = &arg[1..];
            let mut chars = shorthands.char_indices();
            while let Some((idx, c)) = chars.next() {
                let remainder = &shorthands[idx + c.len_utf8()..];
                let Some(spec) = self.by_short(c) else {
                    if c == 'h' {
                        return Err(FlagError::Help);
                    }
                    return Err(FlagError::Invalid(format!(
                        "unknown shorthand flag: '{}' in -{}",
                        c, shorthands
                    )));
                };
                match spec.kind {
                    FlagKind::Bool => {
                        if let Some(v) = remainder.strip_prefix('=') {
                            let b = parse_bool(v).ok_or_else(|| {
                                FlagError::Invalid(format!(
                                    "invalid argument {:?} for \"-{}, --{}\" flag: must be true or false",
                                    v, c, spec.long
                                ))
                            })?;
                            parsed.bools.insert(spec.long, b);
                            break;
                        }
                        parsed.bools.insert(spec.long, true);
                    }
                    FlagKind::String => {
                        let value = if let Some(v) = remainder.strip_prefix('=') {
                            v.to_string()
                        } else if !remainder.is_empty() {
                            remainder.to_string()
                        } else {
                            rest.next().cloned().ok_or_else(|| {
                                FlagError::Invalid(format!(
                                    "flag needs an argument: '{}' in -{}",
                                    c, shorthands
                                ))
                            })?
                        };
                        parsed.strings.insert(spec.long, value);
                        break;
                    }
                }
            }
        }

        Ok(parsed)
    }

    /// One line per flag, sorted by long name, with aligned and wrapped
    /// descriptions. Every line ends with a newline.
    pub fn usages(&self) -> String {
        let mut specs: Vec<&FlagSpec> = self.specs.iter().collect();
        specs.sort_by_key(|s| s.long);

        let prefixes: Vec<String> = specs
            .iter()
            .map(|s| {
                let mut line = match s.short {
                    Some(c) => format!("  -{}, --{}", c, s.long),
                    None => format!("      --{}", s.long),
                };
                if s.kind == FlagKind::String {
                    line.push_str(" string");
                }
                line
            })
            .collect();
        let max = prefixes.iter().map(String::len).max().unwrap_or(0);

        let mut out = String::new();
        for (prefix, spec) in prefixes.iter().zip(&specs) {
            out.push_str(prefix);
            out.push_str(&" ".repeat(max - prefix.len() + 3));
            out.push_str(&wrap(max + 3, USAGE_COLUMNS, &spec.usage));
            out.push('\n');
        }
        out
    }
}

/// Wraps `s` to fit between column `indent` and `width`. Continuation lines
/// are indented by `indent`. When fewer than 24 columns remain, the text
/// starts on its own line at column 16 instead.
fn wrap(indent: usize, width: usize, s: &str) -> String {
    const SLOP: usize = 5;
    let mut indent = indent;
    let mut room = width.saturating_sub(indent);
    let mut out = String::new();

    if room < 24 {
        indent = 16;
        room = width.saturating_sub(indent);
        out.push('\n');
        out.push_str(&" ".repeat(indent));
    }
    let pad = format!("\n{}", " ".repeat(indent));
    if room < 24 {
        out.push_str(&s.replace('\n', &pad));
        return out;
    }

    let room = room - SLOP;
    let (first, mut remaining) = wrap_once(room, SLOP, s);
    out.push_str(&first.replace('\n', &pad));
    while !remaining.is_empty() {
        let (line, next) = wrap_once(room, SLOP, remaining);
        out.push_str(&pad);
        out.push_str(&line.replace('\n', &pad));
        remaining = next;
    }
    out
}

/// Splits off at most `n` bytes of `s` at the last whitespace, allowing up
/// to `slop` extra bytes when that finishes the text.
fn wrap_once(n: usize, slop: usize, s: &str) -> (&str, &str) {
    if n + slop > s.len() {
        return (s, "");
    }
    let Some(head) = s.get(..n) else {
        return (s, "");
    };
    let Some(ws) = head.rfind([' ', '\t', '\n']).filter(|w| *w > 0) else {
        return (s, "");
    };
    if let Some(nl) = head.rfind('\n').filter(|nl| *nl > 0 && *nl < ws) {
        return (&s[..nl], &s[nl + 1..]);
    }
    (&s[..ws], &s[ws + 1..])
}

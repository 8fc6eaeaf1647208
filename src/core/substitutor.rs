//! `$NAME` / `${NAME}` expansion over text, with per-file-type escaping.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionType {
    #[default]
    Plain,
    JavaProperties,
    Java,
    Xml,
    Shell,
    At,
    Ant,
}

impl SubstitutionType {
    fn start_char(self) -> char {
        match self {
            SubstitutionType::Shell => '%',
            SubstitutionType::At | SubstitutionType::Ant => '@',
            _ => '$',
        }
    }

    fn end_char(self) -> Option<char> {
        match self {
            SubstitutionType::Ant => Some('@'),
            _ => None,
        }
    }

    fn default_encoding(self) -> Encoding {
        match self {
            SubstitutionType::JavaProperties => Encoding::Latin1,
            _ => Encoding::Utf8,
        }
    }
}

impl FromStr for SubstitutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" | "" => Ok(SubstitutionType::Plain),
            "javaprop" => Ok(SubstitutionType::JavaProperties),
            "java" => Ok(SubstitutionType::Java),
            "xml" => Ok(SubstitutionType::Xml),
            "shell" => Ok(SubstitutionType::Shell),
            "at" => Ok(SubstitutionType::At),
            "ant" => Ok(SubstitutionType::Ant),
            other => Err(format!("unknown file type {other}")),
        }
    }
}

impl fmt::Display for SubstitutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubstitutionType::Plain => "plain",
            SubstitutionType::JavaProperties => "javaprop",
            SubstitutionType::Java => "java",
            SubstitutionType::Xml => "xml",
            SubstitutionType::Shell => "shell",
            SubstitutionType::At => "at",
            SubstitutionType::Ant => "ant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    fn parse(name: &str) -> io::Result<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "iso8859-1" => Ok(Encoding::Latin1),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported encoding {other}"),
            )),
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Holds the installer variables and expands references to them.
#[derive(Debug, Clone, Default)]
pub struct VariableSubstitutor {
    variables: IndexMap<String, String>,
    braces_required: bool,
}

impl VariableSubstitutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_braces_required(&mut self, required: bool) {
        self.braces_required = required;
    }

    pub fn substitute(&self, text: &str) -> String {
        self.substitute_as(text, SubstitutionType::Plain).0
    }

    /// Expands `text`, returning the result and the number of references replaced.
    ///
    /// Unknown or malformed references are copied through unchanged.
    pub fn substitute_as(&self, text: &str, ty: SubstitutionType) -> (String, usize) {
        let start = ty.start_char();
        let end = ty.end_char();
        let mut out = String::with_capacity(text.len());
        let mut subs = 0;
        let mut chars = text.chars();
        let mut c = chars.next();

        loop {
            while let Some(ch) = c {
                if ch == start {
                    break;
                }
                out.push(ch);
                c = chars.next();
            }
            if c.is_none() {
                return (out, subs);
            }

            let mut braces = false;
            c = chars.next();
            if c == Some('{') {
                braces = true;
                c = chars.next();
            } else if self.braces_required {
                out.push(start);
                continue;
            } else if c.is_none() {
                out.push(start);
                return (out, subs);
            }

            let mut name = String::new();
            while let Some(ch) = c {
                let accepted = (braces && ch != '}')
                    || ch.is_ascii_alphabetic()
                    || (!name.is_empty()
                        && (ch.is_ascii_digit() || ch == '_' || ch == '.' || ch == '-'));
                if !accepted {
                    break;
                }
                name.push(ch);
                c = chars.next();
            }

            let terminated = if braces {
                c == Some('}')
            } else {
                end.map_or(true, |e| c == Some(e))
            };
            let value = if terminated && !name.is_empty() {
                self.lookup(&name, braces)
            } else {
                None
            };

            match value {
                Some(value) => {
                    subs += 1;
                    out.push_str(&escape(&value, ty));
                    if braces || end.is_some() {
                        c = chars.next();
                    }
                }
                None => {
                    out.push(start);
                    if braces {
                        out.push('{');
                    }
                    out.push_str(&name);
                }
            }
        }
    }

    /// Expands a whole stream. `encoding` defaults per file type.
    pub fn substitute_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        ty: SubstitutionType,
        encoding: Option<&str>,
    ) -> io::Result<usize> {
        let encoding = match encoding {
            Some(name) => Encoding::parse(name)?,
            None => ty.default_encoding(),
        };
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let (text, subs) = self.substitute_as(&encoding.decode(&raw), ty);
        writer.write_all(&encoding.encode(&text))?;
        writer.flush()?;
        Ok(subs)
    }

    fn lookup(&self, name: &str, braces: bool) -> Option<String> {
        if braces && name.starts_with("ENV[") && name.ends_with(']') {
            let key = &name[4..name.len() - 1];
            return Some(std::env::var(key).unwrap_or_default());
        }
        self.variables.get(name).cloned()
    }
}

pub fn escape(value: &str, ty: SubstitutionType) -> String {
    match ty {
        SubstitutionType::Plain | SubstitutionType::At | SubstitutionType::Ant => value.to_string(),
        SubstitutionType::Shell => value.replace('\r', ""),
        SubstitutionType::Java => value.replace('\\', "\\\\"),
        SubstitutionType::JavaProperties => {
            let mut out = String::with_capacity(value.len());
            let mut leading = true;
            for ch in value.chars() {
                match ch {
                    '\t' => out.push_str("\\t"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    ' ' if leading => out.push_str("\\ "),
                    ' ' => out.push(' '),
                    '\\' | '"' | '\'' => {
                        leading = false;
                        out.push('\\');
                        out.push(ch);
                    }
                    _ => {
                        leading = false;
                        out.push(ch);
                    }
                }
            }
            out
        }
        SubstitutionType::Xml => {
            let mut out = String::with_capacity(value.len());
            for ch in value.chars() {
                match ch {
                    '<' => out.push_str("&lt;"),
                    '>' => out.push_str("&gt;"),
                    '&' => out.push_str("&amp;"),
                    '\'' => out.push_str("&apos;"),
                    '"' => out.push_str("&quot;"),
                    _ => out.push(ch),
                }
            }
            out
        }
    }
}

//! Section/key profile text reader
//!
//! Reads the small INI dialect used by deckd profiles:
//!
//! ```text
//! # comment
//! [Bindings]
//! A           = Gamepad BTN_SOUTH
//! QuickAccess = Command true 0 steam -ifrunning steam://open/quickaccess
//! ```
//!
//! Values are separated by whitespace or commas. Double quotes group a value
//! containing separators. The raw text after any value stays available
//! through [`Values::rest`], which is how command lines keep their spacing.
//!
//! Section and key lookups are case-insensitive. A repeated key replaces the
//! earlier value but keeps its original position in [`Ini::keys`].

use std::fmt;
use std::path::Path;

/// A single parsed value with its offset into the raw value text
#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    start: usize,
    quoted: bool,
}

/// The values on the right-hand side of one `key = ...` line
#[derive(Debug, Clone, PartialEq)]
pub struct Values {
    raw: String,
    tokens: Vec<Token>,
}

impl Values {
    /// Split raw value text into tokens
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let mut tokens = Vec::new();
        let mut chars = raw.char_indices().peekable();

        while let Some(&(start, c)) = chars.peek() {
            if c.is_whitespace() || c == ',' {
                chars.next();
                continue;
            }

            let mut text = String::new();
            if c == '"' {
                chars.next();
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    text.push(c);
                }
                tokens.push(Token { text, start, quoted: true });
            } else {
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == ',' {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
                tokens.push(Token { text, start, quoted: false });
            }
        }

        Self { raw, tokens }
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Value at `index` as written, without surrounding quotes
    pub fn string(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(|t| t.text.as_str())
    }

    /// Everything from value `index` to the end of the line
    ///
    /// Internal whitespace is preserved. A lone quoted value is returned
    /// without its quotes.
    pub fn rest(&self, index: usize) -> Option<&str> {
        let token = self.tokens.get(index)?;
        if token.quoted && index + 1 == self.tokens.len() {
            return Some(token.text.as_str());
        }
        Some(self.raw[token.start..].trim_end())
    }

    /// Value at `index` as a signed integer
    pub fn int(&self, index: usize) -> Option<i32> {
        self.string(index)?.parse().ok()
    }

    /// Value at `index` as a finite real number
    pub fn double(&self, index: usize) -> Option<f64> {
        self.string(index)?
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    /// Value at `index` as a boolean (`true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`)
    pub fn boolean(&self, index: usize) -> Option<bool> {
        match self.string(index)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    /// Value at `index` as a 16-bit hexadecimal number, `0x` prefix optional
    pub fn hex_u16(&self, index: usize) -> Option<u16> {
        let s = self.string(index)?;
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u16::from_str_radix(digits, 16).ok()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    values: Values,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

impl Section {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key.eq_ignore_ascii_case(key))
    }
}

/// A parsed profile document
#[derive(Debug, Clone, Default)]
pub struct Ini {
    sections: Vec<Section>,
}

impl Ini {
    /// Read and parse a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IniError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(IniError::IoError)?;
        Self::parse(&text)
    }

    /// Parse document text
    pub fn parse(text: &str) -> Result<Self, IniError> {
        let mut ini = Ini::default();
        let mut current: Option<usize> = None;

        // Editors on other platforms may prefix a byte order mark
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| IniError::syntax(line_no, "malformed section header"))?;

                // Re-opened sections append to the first occurrence
                current = match ini.sections.iter().position(|s| s.name.eq_ignore_ascii_case(name)) {
                    Some(pos) => Some(pos),
                    None => {
                        ini.sections.push(Section {
                            name: name.to_string(),
                            entries: Vec::new(),
                        });
                        Some(ini.sections.len() - 1)
                    }
                };
                continue;
            }

            let (key, raw) = line
                .split_once('=')
                .ok_or_else(|| IniError::syntax(line_no, "expected 'key = value'"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(IniError::syntax(line_no, "empty key"));
            }

            let section = current
                .and_then(|pos| ini.sections.get_mut(pos))
                .ok_or_else(|| IniError::syntax(line_no, "key outside of a section"))?;

            let values = Values::parse(raw);
            match section.entries.iter_mut().find(|e| e.key.eq_ignore_ascii_case(key)) {
                Some(entry) => entry.values = values,
                None => section.entries.push(Entry {
                    key: key.to_string(),
                    values,
                }),
            }
        }

        Ok(ini)
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    /// Values for `section`/`key`, if both exist
    pub fn get(&self, section: &str, key: &str) -> Option<&Values> {
        self.section(section)?.entry(key).map(|e| &e.values)
    }

    /// All keys of a section in file order (empty if the section is missing)
    pub fn keys(&self, section: &str) -> Vec<&str> {
        self.section(section)
            .map(|s| s.entries.iter().map(|e| e.key.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Profile text error type
#[derive(Debug)]
pub enum IniError {
    /// I/O error reading the file
    IoError(std::io::Error),
    /// Structural syntax error
    SyntaxError { line: usize, message: String },
}

impl IniError {
    fn syntax(line: usize, message: &str) -> Self {
        IniError::SyntaxError {
            line,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for IniError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IniError::IoError(e) => write!(f, "I/O error: {}", e),
            IniError::SyntaxError { line, message } => {
                write!(f, "Syntax error on line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for IniError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IniError::IoError(e) => Some(e),
            IniError::SyntaxError { .. } => None,
        }
    }
}

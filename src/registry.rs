//! Static table of the supported languages.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::abcr::Abcr;
use crate::befunge::Befunge;
use crate::brainfuck::Brainfuck;
use crate::config::Config;
use crate::error::{Error, ParseError};
use crate::interpreter::Interpreter;
use crate::monkeys::Monkeys;
use crate::past::Past;

pub type Input = Box<dyn Read + Send>;
pub type Output = Box<dyn Write + Send>;

/// Builds an interpreter around the given streams.
pub type Factory = fn(Input, Output, &Config) -> Result<Box<dyn Interpreter>, Error>;

#[derive(Clone, Copy)]
pub struct Entry {
    pub language: &'static str,
    /// File extension including the leading dot.
    pub extension: &'static str,
    pub build: Factory,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("language", &self.language)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

static ENTRIES: &[Entry] = &[
    Entry { language: "ABCR", extension: ".abcr", build: build_abcr },
    Entry { language: "Befunge", extension: ".bf", build: build_befunge },
    Entry { language: "Brainfuck", extension: ".b", build: build_brainfuck },
    Entry { language: "Monkeys", extension: ".mky", build: build_monkeys },
    Entry { language: "My Unreliable Past", extension: ".past", build: build_past },
];

fn build_abcr(input: Input, output: Output, _: &Config) -> Result<Box<dyn Interpreter>, Error> {
    Ok(Box::new(Abcr::new(input, output)))
}

fn build_befunge(_: Input, output: Output, config: &Config) -> Result<Box<dyn Interpreter>, Error> {
    Ok(Box::new(Befunge::new(output, config.befunge)?))
}

fn build_brainfuck(input: Input, output: Output, config: &Config) -> Result<Box<dyn Interpreter>, Error> {
    Ok(Box::new(Brainfuck::new(input, output, config.brainfuck)?))
}

fn build_monkeys(input: Input, output: Output, config: &Config) -> Result<Box<dyn Interpreter>, Error> {
    Ok(Box::new(Monkeys::new(input, output, config.monkeys)))
}

fn build_past(input: Input, output: Output, config: &Config) -> Result<Box<dyn Interpreter>, Error> {
    Ok(Box::new(Past::new(input, output, config.past)?))
}

/// Every registered language.
pub fn entries() -> &'static [Entry] {
    ENTRIES
}

/// Pick the interpreter for `filename`, or for `lang` when given.
pub fn select(filename: &str, lang: Option<&str>) -> Result<&'static Entry, ParseError> {
    select_from(ENTRIES, filename, lang)
}

pub fn select_from<'a>(
    entries: &'a [Entry],
    filename: &str,
    lang: Option<&str>,
) -> Result<&'a Entry, ParseError> {
    if let Some(lang) = lang {
        return entries
            .iter()
            .find(|e| e.language == lang)
            .ok_or_else(|| ParseError::UnknownLanguage(lang.to_string()));
    }

    let extension = Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut matches = entries.iter().filter(|e| e.extension == extension);
    match (matches.next(), matches.next()) {
        (None, _) => Err(ParseError::UnknownExtension(extension)),
        (Some(entry), None) => Ok(entry),
        (Some(_), Some(_)) => Err(ParseError::AmbiguousExtension {
            candidates: entries
                .iter()
                .filter(|e| e.extension == extension)
                .map(|e| e.language)
                .collect(),
            extension,
        }),
    }
}

//! Sources of credential values for template rendering.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use crate::config::TemplateField;
use crate::error::{io_context, ProvisionError, Result};

/// Supplies a value for every requested template field.
pub trait CredentialSource {
    fn collect(&mut self, fields: &[TemplateField]) -> Result<BTreeMap<String, String>>;
}

/// Prompts for each field and reads one line per value.
///
/// Only the line terminator is stripped; leading/trailing spaces and empty
/// answers are kept as typed.
pub struct TerminalPrompt<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stderr> {
    /// Reads from stdin, prompts on stderr so stdout stays clean.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> CredentialSource for TerminalPrompt<R, W> {
    fn collect(&mut self, fields: &[TemplateField]) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for field in fields {
            write!(self.writer, "{}: ", field.prompt)
                .and_then(|()| self.writer.flush())
                .map_err(io_context(format!("prompting for '{}'", field.name)))?;

            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(io_context(format!("reading value for '{}'", field.name)))?;
            if read == 0 {
                return Err(ProvisionError::Io {
                    context: format!("reading value for '{}'", field.name),
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"),
                });
            }
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            values.insert(field.name.clone(), line);
        }
        Ok(values)
    }
}

/// Preset values, for tests and non-interactive runs.
#[derive(Debug, Clone, Default)]
pub struct FixedCredentials {
    values: BTreeMap<String, String>,
}

impl FixedCredentials {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl CredentialSource for FixedCredentials {
    fn collect(&mut self, fields: &[TemplateField]) -> Result<BTreeMap<String, String>> {
        fields
            .iter()
            .map(|field| {
                self.values
                    .get(&field.name)
                    .map(|value| (field.name.clone(), value.clone()))
                    .ok_or_else(|| ProvisionError::Io {
                        context: "collecting credentials".to_string(),
                        source: io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("no value supplied for '{}'", field.name),
                        ),
                    })
            })
            .collect()
    }
}

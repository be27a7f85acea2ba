//! Pipe-file codec.
//!
//! Fields are separated by the transfer delimiter and rows terminated by the
//! transfer newline; both may be multi-character tokens, which rules out the
//! `csv` crate here. A field is double-quoted when it contains the delimiter,
//! the newline or a quote, when it starts with a quote, or when it equals the
//! null placeholder. Embedded quotes are doubled. Only an unquoted field equal
//! to the placeholder reads back as null.

use crate::error::{PipeError, Result};

/// Delimiter, newline and null tokens of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeFormat {
    pub delimiter: String,
    pub newline: String,
    pub null: String,
}

impl PipeFormat {
    pub fn new(
        delimiter: impl Into<String>,
        newline: impl Into<String>,
        null: impl Into<String>,
    ) -> Self {
        Self {
            delimiter: delimiter.into(),
            newline: newline.into(),
            null: null.into(),
        }
    }

    fn needs_quotes(&self, value: &str) -> bool {
        value == self.null
            || value.starts_with('"')
            || value.contains(self.delimiter.as_str())
            || value.contains(self.newline.as_str())
            || value.contains('"')
    }

    /// Append one row; `None` fields are written as the null placeholder.
    pub fn write_row<S: AsRef<str>>(&self, out: &mut String, fields: &[Option<S>]) {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push_str(&self.delimiter);
            }
            match field {
                None => out.push_str(&self.null),
                Some(value) => self.write_field(out, value.as_ref()),
            }
        }
        out.push_str(&self.newline);
    }

    fn write_field(&self, out: &mut String, value: &str) {
        if self.needs_quotes(value) {
            out.push('"');
            out.push_str(&value.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(value);
        }
    }

    /// Iterate over the rows of a pipe file's contents.
    pub fn rows<'a>(&'a self, input: &'a str) -> PipeReader<'a> {
        PipeReader {
            format: self,
            input,
            pos: 0,
            row: 0,
        }
    }
}

/// Row iterator over pipe-file text.
pub struct PipeReader<'a> {
    format: &'a PipeFormat,
    input: &'a str,
    pos: usize,
    row: usize,
}

/// What ended a field.
enum Terminator {
    Delimiter,
    Newline,
    Eof,
}

impl<'a> PipeReader<'a> {
    fn terminator_at(&self, pos: usize) -> Option<Terminator> {
        let rest = &self.input[pos..];
        if rest.is_empty() {
            Some(Terminator::Eof)
        } else if rest.starts_with(self.format.delimiter.as_str()) {
            Some(Terminator::Delimiter)
        } else if rest.starts_with(self.format.newline.as_str()) {
            Some(Terminator::Newline)
        } else {
            None
        }
    }

    fn skip(&mut self, terminator: &Terminator) {
        self.pos += match terminator {
            Terminator::Delimiter => self.format.delimiter.len(),
            Terminator::Newline => self.format.newline.len(),
            Terminator::Eof => 0,
        };
    }

    fn malformed(&self, message: &str) -> PipeError {
        PipeError::format(
            "pipe file",
            format!("row {}", self.row + 1),
            message.to_string(),
        )
    }

    fn read_field(&mut self) -> Result<(Option<String>, Terminator)> {
        let input = self.input;
        if input[self.pos..].starts_with('"') {
            let mut value = String::new();
            let mut cursor = self.pos + 1;
            loop {
                let rest = &input[cursor..];
                let quote = rest
                    .find('"')
                    .ok_or_else(|| self.malformed("unterminated quoted field"))?;
                value.push_str(&rest[..quote]);
                cursor += quote + 1;
                if input[cursor..].starts_with('"') {
                    value.push('"');
                    cursor += 1;
                } else {
                    break;
                }
            }
            self.pos = cursor;
            let terminator = self
                .terminator_at(self.pos)
                .ok_or_else(|| self.malformed("text after closing quote"))?;
            self.skip(&terminator);
            return Ok((Some(value), terminator));
        }

        let start = self.pos;
        let rest = &input[start..];
        let delim = rest.find(self.format.delimiter.as_str());
        let newline = rest.find(self.format.newline.as_str());
        let (end, terminator) = match (delim, newline) {
            (Some(d), Some(n)) if d < n => (d, Terminator::Delimiter),
            (_, Some(n)) => (n, Terminator::Newline),
            (Some(d), None) => (d, Terminator::Delimiter),
            (None, None) => (rest.len(), Terminator::Eof),
        };
        let raw = &rest[..end];
        self.pos = start + end;
        self.skip(&terminator);
        let value = (raw != self.format.null).then(|| raw.to_string());
        Ok((value, terminator))
    }
}

impl<'a> Iterator for PipeReader<'a> {
    type Item = Result<Vec<Option<String>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.input.len() {
            return None;
        }
        let mut fields = Vec::new();
        loop {
            match self.read_field() {
                Ok((value, Terminator::Delimiter)) => fields.push(value),
                Ok((value, _)) => {
                    fields.push(value);
                    break;
                }
                Err(e) => {
                    // Stop after the first malformed row
                    self.pos = self.input.len();
                    return Some(Err(e));
                }
            }
        }
        self.row += 1;
        Some(Ok(fields))
    }
}

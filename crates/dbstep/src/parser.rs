//! SQL statement splitting
//!
//! Splits raw script text into individually executable statements by
//! scanning for the `;` terminator, ignoring terminators that appear inside
//! single-quoted sections. A quote can be embedded in such a section by
//! escaping it with a preceding backslash (C-style) or another single quote
//! (SQL-style). Handling the full DDL grammar (brackets, dollar quoting,
//! nested blocks) would require a per-database parser; this covers the
//! statement shapes migration scripts actually contain.

/// The semi-colon is understood to terminate a statement
const STATEMENT_TERMINATOR: char = ';';
/// The single-quote character opens and closes a quoted section
const SINGLE_QUOTE: char = '\'';
/// The backslash prevents the next character from being recognized as a quote
const ESCAPE_CHAR: char = '\\';

/// Pulls complete statements off the front of a growing text buffer.
///
/// Text is added with [`append`](SqlStatementParser::append);
/// [`pull_statements`](SqlStatementParser::pull_statements) removes and
/// returns every complete statement currently buffered, leaving any trailing
/// incomplete fragment in place for future appends.
#[derive(Debug, Default)]
pub struct SqlStatementParser {
    buffer: String,
}

impl SqlStatementParser {
    /// Create a parser with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add raw script text to the end of the unparsed buffer
    pub fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// The unparsed remainder, anything after the last complete statement
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Remove all complete statements from the buffer and return them, each
    /// trimmed and without its terminating semi-colon.
    ///
    /// Calling this again before new text is appended yields nothing: the
    /// buffer only retains the trailing fragment after the last terminator.
    pub fn pull_statements(&mut self) -> Vec<String> {
        let mut statements = Vec::new();

        // Byte offset just past the last consumed terminator
        let mut parsed_end = 0;
        let mut in_quotes = false;
        let mut previous = None;

        for (i, current) in self.buffer.char_indices() {
            if current == SINGLE_QUOTE {
                // A doubled quote ('') toggles twice, so the net state is
                // unchanged: first quote closes the section, second reopens it
                if previous != Some(ESCAPE_CHAR) {
                    in_quotes = !in_quotes;
                }
            } else if current == STATEMENT_TERMINATOR && !in_quotes {
                let sql = self.buffer[parsed_end..i].trim();
                statements.push(sql.to_string());
                parsed_end = i + STATEMENT_TERMINATOR.len_utf8();
            }
            previous = Some(current);
        }

        self.buffer.drain(..parsed_end);

        statements
    }
}

// The document splicer: feeds each line's definition to the
// namespace and remembers how to reassemble the text afterwards.
//
// A document is carved into pieces: verbatim slices of the source,
// and value placeholders where a `=` print span asked for a result.
// Printing walks the pieces, evaluating placeholders on the way, so
// the output is the input with every print span rewritten and
// everything else byte-identical.

use std::io::{self, Write};

use crate::error::Error;
use crate::namespace::{Namespace, VarId};

#[derive(Copy, Clone)]
enum Piece {
    // Verbatim byte range of the source text
    Slice(usize, usize),
    // Print span for a binding, with its source line for diagnostics
    Value { var: VarId, line: usize },
}

pub struct Document<'a> {
    src: &'a str,
    nmsp: Namespace,
    pieces: Vec<Piece>,
    // Parse cursor and the start of the next verbatim slice
    pos: usize,
    emitted: usize,
    line: usize,
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

impl<'a> Document<'a> {
    pub fn new(src: &'a str, nmsp: Namespace) -> Document<'a> {
        Document {
            src,
            nmsp,
            pieces: Vec::new(),
            pos: 0,
            emitted: 0,
            line: 1,
        }
    }

    /// Give the namespace back to the caller. Embedders that drive a
    /// document and then want the bindings themselves end with this.
    pub fn into_nmsp(self) -> Namespace {
        self.nmsp
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_blanks(&mut self) {
        self.pos += self.rest().len() - self.rest().trim_start_matches(is_blank).len();
    }

    // Consume through the end of the current line, comment included.
    fn skip_line(&mut self) {
        match self.rest().find('\n') {
            Some(at) => {
                self.pos += at + 1;
                self.line += 1;
            }
            None => self.pos = self.src.len(),
        }
    }

    /* Parse every line of the document, reporting failures to
     * `errout` as they happen. Returns the number of failed lines.
     */
    pub fn parse(&mut self, errout: &mut dyn Write) -> io::Result<usize> {
        let mut errors = 0;
        while self.pos < self.src.len() {
            if let Err(err) = self.parse_line() {
                self.report(errout, self.line, &err)?;
                errors += 1;
                self.skip_line();
            }
        }
        Ok(errors)
    }

    // line := blanks [ label ] expr { blanks ['=' printspan] } [ '#' comment ] EOL
    fn parse_line(&mut self) -> Result<(), Error> {
        self.skip_blanks();
        match self.peek() {
            None | Some('\n') | Some('#') => {
                self.skip_line();
                return Ok(());
            }
            _ => {}
        }

        let before = self.rest();
        let (defined, rest) = self.nmsp.define(before);
        let consumed = before.len() - rest.len();
        let var = defined?;
        self.line += before[..consumed].matches('\n').count();
        self.pos += consumed;

        self.skip_blanks();
        match self.peek() {
            Some('=') => {
                self.pos += 1;
                // Emit everything up to and including the '=' as-is,
                // then swallow the old span content
                self.pieces.push(Piece::Slice(self.emitted, self.pos));
                let span = self.rest();
                let len = span.find(|c| c == '\n' || c == '#').unwrap_or(span.len());
                self.pos += len;
                self.pieces.push(Piece::Value { var, line: self.line });
                self.emitted = self.pos;
            }
            None | Some('\n') | Some('#') => {}
            Some(_) => return Err(Error::ExtraContent),
        }

        self.skip_line();
        Ok(())
    }

    /* Write the rewritten document to `out`: verbatim slices as they
     * were, print spans replaced by the evaluated value padded with
     * one space each side. Evaluation failures print ERR into the
     * span and a diagnostic to `errout`. Returns the failure count.
     */
    pub fn print(&mut self, out: &mut dyn Write, errout: &mut dyn Write) -> io::Result<usize> {
        let mut errors = 0;
        for at in 0..self.pieces.len() {
            match self.pieces[at] {
                Piece::Slice(start, end) => out.write_all(self.src[start..end].as_bytes())?,
                Piece::Value { var, line } => match self.nmsp.value(var) {
                    Ok(val) => write!(out, " {} ", val)?,
                    Err(err) => {
                        errors += 1;
                        write!(out, " ERR ")?;
                        report_to(errout, &self.nmsp, line, &err)?;
                    }
                },
            }
        }
        out.write_all(self.src[self.emitted..].as_bytes())?;
        Ok(errors)
    }

    fn report(&self, errout: &mut dyn Write, line: usize, err: &Error) -> io::Result<()> {
        report_to(errout, &self.nmsp, line, err)
    }
}

fn report_to(
    errout: &mut dyn Write,
    nmsp: &Namespace,
    line: usize,
    err: &Error,
) -> io::Result<()> {
    writeln!(errout, "(Line {}) {}", line, err)?;
    match err {
        Error::Redef => {
            if let Some(name) = nmsp.strredef() {
                writeln!(errout, "    Redefinition of \"{}\"", name)?;
            }
        }
        Error::Circular => {
            if let Some(chain) = nmsp.strcirc() {
                writeln!(errout, "    Dependency Chain: {}", chain)?;
            }
        }
        _ => {}
    }
    Ok(())
}

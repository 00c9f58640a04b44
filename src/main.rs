// uSheet: featherweight plain-text spreadsheet.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::fs;
use std::io::{self, Read, Write};
use std::process::exit;

use clap::Parser;

use usheet::document::Document;
use usheet::namespace::Namespace;

/// Evaluate expressions in place.
///
/// Reads a document, evaluates the expressions its lines define, and
/// rewrites every `=` span with the computed value. By default the
/// input file is rewritten in place. `-` means standard input or
/// output.
#[derive(Parser)]
#[command(name = "usheet", version)]
struct Cli {
    /// File to evaluate
    #[arg(short, long, value_name = "INFILE")]
    input: Option<String>,

    /// Output file to store the result to
    #[arg(short, long, value_name = "OUTFILE")]
    output: Option<String>,

    /// Don't write output, only check for errors
    #[arg(short = 'C', long)]
    check: bool,

    /// Never use the input file as the output
    #[arg(short = 'n', long)]
    no_clobber: bool,

    /// File to send errors to instead of stderr
    #[arg(short, long, value_name = "ERRFILE")]
    errors: Option<String>,

    /// Don't print any error messages
    #[arg(short = 'E', long)]
    no_errors: bool,

    /// Positional [INFILE [OUTFILE]]
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

fn usage_error(msg: &str) -> ! {
    eprintln!("{}", msg);
    eprintln!("Usage: usheet [OPTION]... [-i] INFILE [[-o] OUTFILE]");
    exit(2);
}

// Merge the flag and positional spellings of the file arguments.
fn resolve_files(cli: &Cli) -> (String, Option<String>) {
    let mut positional = cli.files.iter();
    let input = match &cli.input {
        Some(path) => path.clone(),
        None => match positional.next() {
            Some(path) => path.clone(),
            None => usage_error("No input file given"),
        },
    };
    let output = match &cli.output {
        Some(path) => {
            // One leftover positional collides with -o; more than one
            // is an over-long argument list either way
            match positional.len() {
                0 => {}
                1 => usage_error("Output file already given"),
                _ => usage_error("Too many file arguments"),
            }
            Some(path.clone())
        }
        None => positional.next().cloned(),
    };
    if positional.next().is_some() {
        usage_error("Too many file arguments");
    }
    (input, output)
}

fn read_input(path: &str) -> io::Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        fs::read_to_string(path)
    }
}

fn write_output(path: &str, data: &[u8]) -> io::Result<()> {
    if path == "-" {
        io::stdout().write_all(data)
    } else {
        fs::write(path, data)
    }
}

fn open_errors(path: &Option<String>) -> io::Result<Box<dyn Write>> {
    Ok(match path.as_deref() {
        None => Box::new(io::stderr()),
        Some("-") => Box::new(io::stdout()),
        Some(path) => Box::new(fs::File::create(path)?),
    })
}

fn main() {
    let cli = Cli::parse();
    let (input, output) = resolve_files(&cli);

    // The output defaults to rewriting the input in place
    let output = match output {
        Some(path) => path,
        None if cli.check => String::new(),
        None => {
            if cli.no_clobber {
                usage_error("No output file given and --no-clobber present");
            }
            if input == "-" { "-".to_string() } else { input.clone() }
        }
    };

    let text = match read_input(&input) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Input file {:?} did not open: {}", input, err);
            exit(1);
        }
    };

    let mut errfile = match open_errors(&cli.errors) {
        Ok(w) => w,
        Err(err) => {
            eprintln!("Error file did not open: {}", err);
            exit(1);
        }
    };
    let mut sink = io::sink();

    let mut doc = Document::new(&text, Namespace::new(true));
    let result = (|| -> io::Result<usize> {
        let errw: &mut dyn Write = if cli.no_errors { &mut sink } else { &mut *errfile };
        let mut errors = doc.parse(errw)?;

        if cli.check {
            errors += doc.print(&mut io::sink(), errw)?;
        } else {
            // Render fully before touching the output, so rewriting
            // the input file in place is safe
            let mut rendered = Vec::new();
            errors += doc.print(&mut rendered, errw)?;
            write_output(&output, &rendered)?;
        }
        Ok(errors)
    })();

    let errors = match result {
        Ok(errors) => errors,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    if cli.check {
        let summary = match errors {
            0 => "No Parse Errors".to_string(),
            1 => "1 Parse Error".to_string(),
            n => format!("{} Parse Errors", n),
        };
        let _ = writeln!(errfile, "{}", summary);
    }

    // The exit status reports how many lines failed
    exit(errors.min(100) as i32);
}

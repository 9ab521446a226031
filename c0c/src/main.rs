#[macro_use]
extern crate clap;

use clap::{Arg, ArgGroup};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Compile(c0c::CompileError),
    Io(std::io::Error, IOErrorContext, PathBuf),
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Compile(_) => 2,
            Error::Io(..) => 3,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => write!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "Reading input",
                    IOErrorContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Compile(err) => write!(f, "{}", err),
        }
    }
}

fn main() {
    // Parse command line arguments
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("assembly")
                .short("s")
                .help("Writes the assembly listing"),
        )
        .arg(
            Arg::with_name("binary")
                .short("c")
                .help("Writes the binary image"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .default_value("out")
                .help("Sets the output file to write to"),
        )
        .group(
            ArgGroup::with_name("emit")
                .args(&["assembly", "binary"])
                .required(true),
        )
        .get_matches_safe()
        .unwrap_or_else(|err| match err.kind {
            clap::ErrorKind::HelpDisplayed | clap::ErrorKind::VersionDisplayed => err.exit(),
            _ => {
                eprintln!("{}", err.message);
                process::exit(2);
            }
        });

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output").unwrap();
    let assembly = matches.is_present("assembly");

    if let Err(err) = run(input, output, assembly) {
        eprintln!("{}", err);
        process::exit(err.exit_code());
    }
}

fn run(input: &str, output: &str, assembly: bool) -> Result<(), Error> {
    let input_path = Path::new(input);

    // Read and compile the input file
    let input_file = File::open(input_path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;
    let mut reader = BufReader::new(input_file);
    let program = c0c::compile_reader(&mut reader).map_err(Error::Compile)?;

    // Write the requested output form
    let output_path = PathBuf::from(output);
    let result = if assembly {
        File::create(&output_path).and_then(|output_file| {
            let mut writer = BufWriter::new(output_file);
            c0file::asm::write_listing(&mut writer, &program)?;
            writer.flush()
        })
    } else {
        c0file::write_file(&output_path, &program)
    };
    result.map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path))
}

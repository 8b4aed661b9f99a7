use std::{
    fs::File,
    io::{self, BufReader, BufWriter, IsTerminal, Read, Write},
    path::Path,
    process,
};

use clap::CommandFactory;
use eyre::Context;

use crate::cli::{Cli, HYPHEN};

/// Opens the body input, which is stdin for "-".
///
/// This function will terminate the process and print the running
/// command's help if stdin is connected to a terminal.
pub fn reader(input: &Path) -> eyre::Result<Box<dyn Read>> {
    if input.as_os_str() == HYPHEN {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            let _ = Cli::command().print_help();
            process::exit(2);
        }

        return Ok(Box::new(BufReader::new(stdin.lock())));
    }

    let file = File::open(input)
        .with_context(|| format!("failed to open input file '{}'", input.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Opens the body output, which is stdout for "-".
pub fn writer(output: &Path) -> eyre::Result<Box<dyn Write>> {
    if output.as_os_str() == HYPHEN {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }

    let file = File::create(output)
        .with_context(|| format!("failed to create output file '{}'", output.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Reads up to `size` bytes, fewer only at the end of input.
pub fn read_chunk<R: Read + ?Sized>(reader: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size);
    reader.take(size as u64).read_to_end(&mut chunk)?;
    Ok(chunk)
}

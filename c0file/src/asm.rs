//! The human-readable assembly listing.
//!
//! Three sections mirror the binary image: `.constants:`, `.start:` and
//! `.functions:`. The function table lists index, name-constant index,
//! parameter count and nesting level; each function's instructions follow
//! under their own `.F<n>:` heading.

use std::io;
use std::io::prelude::*;

use c0::Program;

pub fn write_listing<W: Write>(writer: &mut W, program: &Program) -> io::Result<()> {
    writeln!(writer, ".constants:")?;
    for (index, constant) in program.constants.iter().enumerate() {
        writeln!(writer, "{} {}", index, constant)?;
    }

    writeln!(writer, ".start:")?;
    for instruction in &program.start {
        writeln!(writer, "{}", instruction)?;
    }

    writeln!(writer, ".functions:")?;
    for function in &program.functions {
        writeln!(
            writer,
            "{} {} {} {}",
            function.index, function.name_index, function.params_count, function.level
        )?;
    }

    for function in &program.functions {
        writeln!(writer, ".F{}:", function.index)?;
        for instruction in &function.instructions {
            writeln!(writer, "{}", instruction)?;
        }
    }
    Ok(())
}

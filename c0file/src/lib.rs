//! The C0 binary image format.
//!
//! An image starts with the magic bytes `C0:)` and a format version, followed
//! by three counted sections: the constant pool, the `.start` instruction
//! stream, and the function records. All multi-byte fields are big-endian
//! (see [`util::Endian`](../util/type.Endian.html)).
//!
//! [`write`](fn.write.html) serializes a [`Program`](../c0/struct.Program.html);
//! [`read`](fn.read.html) decodes one back. The image only carries what the
//! virtual machine needs, so decoded functions come back with empty frames
//! and a `void` return type: compile-time bookkeeping is not part of the
//! format. Re-serializing a decoded program reproduces the input bytes.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use util::Endian;

use c0::constants::{DOUBLE_TAG, INT_TAG, MAGIC, STRING_TAG, VERSION};
use c0::{Constant, Function, Instruction, Opcode, Operand, Program};

pub mod asm;

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

pub fn write<W: Write>(writer: &mut W, program: &Program) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION)?;

    writer.write_u16::<Endian>(program.constants.len() as u16)?;
    for constant in &program.constants {
        constant.write(writer)?;
    }

    writer.write_u16::<Endian>(program.start.len() as u16)?;
    for instruction in &program.start {
        instruction.write(writer)?;
    }

    writer.write_u16::<Endian>(program.functions.len() as u16)?;
    for function in &program.functions {
        function.write(writer)?;
    }
    Ok(())
}

pub fn read<R: Read>(reader: &mut R) -> io::Result<Program> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    if prefix != MAGIC {
        return Err(invalid_data("bad magic"));
    }
    reader.read_exact(&mut prefix)?;
    if prefix != VERSION {
        return Err(invalid_data("unsupported version"));
    }

    let mut program = Program::new();

    let constant_count = reader.read_u16::<Endian>()?;
    for _ in 0..constant_count {
        program.constants.push(read_constant(reader)?);
    }

    let start_count = reader.read_u16::<Endian>()?;
    for index in 0..start_count {
        program.start.push(read_instruction(reader, u32::from(index))?);
    }

    let function_count = reader.read_u16::<Endian>()?;
    for index in 0..function_count {
        program.functions.push(read_function(reader, index)?);
    }
    Ok(program)
}

fn read_constant<R: Read>(reader: &mut R) -> io::Result<Constant> {
    match reader.read_u8()? {
        INT_TAG => Ok(Constant::Int(reader.read_i32::<Endian>()?)),
        DOUBLE_TAG => Ok(Constant::Double(reader.read_f64::<Endian>()?)),
        STRING_TAG => {
            let length = reader.read_u16::<Endian>()?;
            let mut bytes = vec![0; length as usize];
            reader.read_exact(&mut bytes)?;
            let value =
                String::from_utf8(bytes).map_err(|_| invalid_data("constant is not UTF-8"))?;
            Ok(Constant::Str(value))
        }
        _ => Err(invalid_data("unknown constant tag")),
    }
}

fn read_instruction<R: Read>(reader: &mut R, index: u32) -> io::Result<Instruction> {
    let byte = reader.read_u8()?;
    let opcode = Opcode::from_byte(byte).ok_or_else(|| invalid_data("unknown opcode"))?;
    let (width1, width2) = opcode.operand_widths();
    let op1 = read_operand(reader, width1)?;
    let op2 = read_operand(reader, width2)?;
    Ok(Instruction {
        index,
        opcode,
        op1,
        op2,
    })
}

fn read_operand<R: Read>(reader: &mut R, width: u8) -> io::Result<Option<Operand>> {
    match width {
        0 => Ok(None),
        1 => Ok(Some(Operand::Byte(reader.read_u8()?))),
        2 => Ok(Some(Operand::Half(reader.read_u16::<Endian>()?))),
        4 => Ok(Some(Operand::Word(reader.read_i32::<Endian>()?))),
        _ => unreachable!("operand width {}", width),
    }
}

fn read_function<R: Read>(reader: &mut R, index: u16) -> io::Result<Function> {
    let name_index = reader.read_u16::<Endian>()?;
    let mut function = Function::new(index, name_index, c0::Type::Void);
    function.params_count = reader.read_u16::<Endian>()?;
    function.level = reader.read_u16::<Endian>()?;
    let instruction_count = reader.read_u16::<Endian>()?;
    for instruction_index in 0..instruction_count {
        function
            .instructions
            .push(read_instruction(reader, u32::from(instruction_index))?);
    }
    Ok(function)
}

pub trait ReadC0Ext: Read + Sized {
    fn read_c0(&mut self) -> io::Result<Program> {
        read(self)
    }
}

impl<R: Read + Sized> ReadC0Ext for R {}

pub trait WriteC0Ext: Write + Sized {
    fn write_c0(&mut self, program: &Program) -> io::Result<()> {
        write(self, program)
    }
}

impl<W: Write + Sized> WriteC0Ext for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Program> {
    BufReader::new(File::open(path)?).read_c0()
}

pub fn write_file<P: AsRef<Path>>(path: P, program: &Program) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_c0(program)?;
    writer.flush()
}

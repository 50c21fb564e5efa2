//! Bytecode instruction decoding.
//!
//! Only the shape of each instruction is decoded: its offset, opcode, and
//! the constant pool index it carries, if any. Branch targets and local
//! slots are skipped over.

use super::bytes::ByteReader;
use super::{ClassParseError, CodeAttribute};

pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_0: u8 = 0x03;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const ARRAYLENGTH: u8 = 0xbe;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const MONITOREXIT: u8 = 0xc3;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

use opcodes::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    /// Constant pool operand for `ldc*`, field/method/type instructions.
    pub constant: Option<u16>,
}

/// Iterator over the instructions of a `Code` attribute. Stops after the
/// first decoding error.
pub struct Instructions<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(code),
            failed: false,
        }
    }

    fn decode(&mut self) -> Result<Instruction, ClassParseError> {
        let offset = self.reader.position();
        let opcode = self.reader.read_u1()?;
        let mut constant = None;
        match opcode {
            LDC => constant = Some(self.reader.read_u1()? as u16),
            LDC_W | LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST
            | INSTANCEOF => constant = Some(self.reader.read_u2()?),
            INVOKEINTERFACE | INVOKEDYNAMIC => {
                constant = Some(self.reader.read_u2()?);
                self.reader.read_slice(2)?;
            }
            MULTIANEWARRAY => {
                constant = Some(self.reader.read_u2()?);
                self.reader.read_u1()?;
            }
            BIPUSH | ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => {
                self.reader.read_u1()?;
            }
            SIPUSH | IINC | IFEQ..=JSR | IFNULL | IFNONNULL => {
                self.reader.read_u2()?;
            }
            GOTO_W | JSR_W => {
                self.reader.read_u4()?;
            }
            WIDE => {
                let widened = self.reader.read_u1()?;
                let operands = if widened == IINC { 4 } else { 2 };
                self.reader.read_slice(operands)?;
            }
            TABLESWITCH | LOOKUPSWITCH => {
                let padding = (4 - self.reader.position() % 4) % 4;
                self.reader.read_slice(padding)?;
                self.reader.read_u4()?;
                if opcode == TABLESWITCH {
                    let low = self.reader.read_u4()? as i32;
                    let high = self.reader.read_u4()? as i32;
                    let entries = (high as i64 - low as i64 + 1).max(0) as usize;
                    self.reader.read_slice(entries * 4)?;
                } else {
                    let pairs = self.reader.read_u4()? as usize;
                    self.reader.read_slice(pairs * 8)?;
                }
            }
            NOP..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | IRETURN..=RETURN
            | ARRAYLENGTH | ATHROW | 0xc2 | MONITOREXIT => {}
            _ => return Err(ClassParseError::InvalidInstruction { offset, opcode }),
        }
        Ok(Instruction {
            offset,
            opcode,
            constant,
        })
    }
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instruction, ClassParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }
        let result = self.decode();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Assembles straight-line method bodies.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// An instruction whose single operand is a constant pool index.
    /// `ldc` gets the one-byte form when the index fits.
    pub fn op_cp(&mut self, opcode: u8, index: u16) -> &mut Self {
        match opcode {
            LDC if index > u8::MAX as u16 => {
                self.code.push(LDC_W);
                self.code.extend_from_slice(&index.to_be_bytes());
            }
            LDC => {
                self.code.push(LDC);
                self.code.push(index as u8);
            }
            INVOKEDYNAMIC => {
                self.code.push(INVOKEDYNAMIC);
                self.code.extend_from_slice(&index.to_be_bytes());
                self.code.extend_from_slice(&[0, 0]);
            }
            _ => {
                self.code.push(opcode);
                self.code.extend_from_slice(&index.to_be_bytes());
            }
        }
        self
    }

    pub fn op_invokeinterface(&mut self, index: u16, arg_slots: u8) -> &mut Self {
        self.code.push(INVOKEINTERFACE);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.code.push(arg_slots + 1);
        self.code.push(0);
        self
    }

    pub fn op_multianewarray(&mut self, index: u16, dimensions: u8) -> &mut Self {
        self.code.push(MULTIANEWARRAY);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.code.push(dimensions);
        self
    }

    pub fn finish(&mut self, max_stack: u16, max_locals: u16) -> CodeAttribute {
        CodeAttribute {
            max_stack,
            max_locals,
            code: std::mem::take(&mut self.code),
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(code: &[u8]) -> Vec<Instruction> {
        Instructions::new(code).collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_constant_operands() {
        let mut builder = CodeBuilder::new();
        builder
            .op_cp(NEW, 7)
            .op(DUP)
            .op_cp(INVOKESPECIAL, 9)
            .op_cp(LDC, 300)
            .op_invokeinterface(11, 1)
            .op_cp(INVOKEDYNAMIC, 12)
            .op_multianewarray(13, 2)
            .op(RETURN);
        let insns = decode(&builder.finish(4, 1).code);

        let summary: Vec<(u8, Option<u16>)> =
            insns.iter().map(|i| (i.opcode, i.constant)).collect();
        assert_eq!(
            summary,
            vec![
                (NEW, Some(7)),
                (DUP, None),
                (INVOKESPECIAL, Some(9)),
                (LDC_W, Some(300)),
                (INVOKEINTERFACE, Some(11)),
                (INVOKEDYNAMIC, Some(12)),
                (MULTIANEWARRAY, Some(13)),
                (RETURN, None),
            ]
        );
        assert_eq!(insns[3].offset, 7);
    }

    #[test]
    fn test_switch_padding() {
        // iconst_0; tableswitch at offset 1 pads 2 bytes to align to 4
        let mut code = vec![ICONST_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&20i32.to_be_bytes()); // default
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&1i32.to_be_bytes()); // high
        code.extend_from_slice(&[0; 8]);
        code.push(RETURN);

        let insns = decode(&code);
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[2].opcode, RETURN);
        assert_eq!(insns[2].offset, code.len() - 1);
    }

    #[test]
    fn test_wide_iinc() {
        let code = [WIDE, IINC, 0, 1, 0, 5, RETURN];
        let insns = decode(&code);
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[1].offset, 6);
    }

    #[test]
    fn test_invalid_opcode_stops_iteration() {
        let mut iter = Instructions::new(&[NOP, 0xfe, NOP]);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(ClassParseError::InvalidInstruction { offset: 1, opcode: 0xfe }))
        ));
        assert!(iter.next().is_none());
    }
}

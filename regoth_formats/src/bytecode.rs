use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Opcode byte values of the compiled instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Add = 0x00,
    Sub = 0x01,
    Mul = 0x02,
    Div = 0x03,
    Mod = 0x04,
    Neg = 0x05,
    Less = 0x06,
    Greater = 0x07,
    Eq = 0x08,
    NotEq = 0x09,
    LessEq = 0x0A,
    GreaterEq = 0x0B,
    And = 0x0C,
    Or = 0x0D,
    Not = 0x0E,
    BitAnd = 0x0F,
    BitOr = 0x10,
    Shl = 0x11,
    Shr = 0x12,
    AddF = 0x20,
    SubF = 0x21,
    MulF = 0x22,
    DivF = 0x23,
    NegF = 0x24,
    LessF = 0x25,
    GreaterF = 0x26,
    EqF = 0x27,
    IntToFloat = 0x28,
    FloatToInt = 0x29,
    Concat = 0x30,
    PushInt = 0x40,
    PushFloat = 0x41,
    PushString = 0x42,
    PushVar = 0x43,
    StoreVar = 0x44,
    PushInstance = 0x45,
    SetInstance = 0x46,
    Jump = 0x50,
    JumpIfZero = 0x51,
    Call = 0x52,
    CallExternal = 0x53,
    Pop = 0x54,
    Return = 0x55,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        let op = match value {
            0x00 => Add,
            0x01 => Sub,
            0x02 => Mul,
            0x03 => Div,
            0x04 => Mod,
            0x05 => Neg,
            0x06 => Less,
            0x07 => Greater,
            0x08 => Eq,
            0x09 => NotEq,
            0x0A => LessEq,
            0x0B => GreaterEq,
            0x0C => And,
            0x0D => Or,
            0x0E => Not,
            0x0F => BitAnd,
            0x10 => BitOr,
            0x11 => Shl,
            0x12 => Shr,
            0x20 => AddF,
            0x21 => SubF,
            0x22 => MulF,
            0x23 => DivF,
            0x24 => NegF,
            0x25 => LessF,
            0x26 => GreaterF,
            0x27 => EqF,
            0x28 => IntToFloat,
            0x29 => FloatToInt,
            0x30 => Concat,
            0x40 => PushInt,
            0x41 => PushFloat,
            0x42 => PushString,
            0x43 => PushVar,
            0x44 => StoreVar,
            0x45 => PushInstance,
            0x46 => SetInstance,
            0x50 => Jump,
            0x51 => JumpIfZero,
            0x52 => Call,
            0x53 => CallExternal,
            0x54 => Pop,
            0x55 => Return,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// A decoded instruction together with its operands.
///
/// Symbol operands are indices into the image's symbol list; jump operands are
/// absolute byte offsets into the code block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Less,
    Greater,
    Eq,
    NotEq,
    LessEq,
    GreaterEq,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    Shl,
    Shr,
    AddF,
    SubF,
    MulF,
    DivF,
    NegF,
    LessF,
    GreaterF,
    EqF,
    IntToFloat,
    FloatToInt,
    Concat,
    PushInt(i32),
    PushFloat(f32),
    PushString(u32),
    PushVar { symbol: u32, element: u8 },
    StoreVar { symbol: u32, element: u8 },
    PushInstance(u32),
    SetInstance(u32),
    Jump(u32),
    JumpIfZero(u32),
    Call(u32),
    CallExternal(u32),
    Pop,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {byte:#04x} at offset {offset}")]
    InvalidOpcode { offset: usize, byte: u8 },
    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: usize },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        use Instruction as I;
        match self {
            I::Add => Opcode::Add,
            I::Sub => Opcode::Sub,
            I::Mul => Opcode::Mul,
            I::Div => Opcode::Div,
            I::Mod => Opcode::Mod,
            I::Neg => Opcode::Neg,
            I::Less => Opcode::Less,
            I::Greater => Opcode::Greater,
            I::Eq => Opcode::Eq,
            I::NotEq => Opcode::NotEq,
            I::LessEq => Opcode::LessEq,
            I::GreaterEq => Opcode::GreaterEq,
            I::And => Opcode::And,
            I::Or => Opcode::Or,
            I::Not => Opcode::Not,
            I::BitAnd => Opcode::BitAnd,
            I::BitOr => Opcode::BitOr,
            I::Shl => Opcode::Shl,
            I::Shr => Opcode::Shr,
            I::AddF => Opcode::AddF,
            I::SubF => Opcode::SubF,
            I::MulF => Opcode::MulF,
            I::DivF => Opcode::DivF,
            I::NegF => Opcode::NegF,
            I::LessF => Opcode::LessF,
            I::GreaterF => Opcode::GreaterF,
            I::EqF => Opcode::EqF,
            I::IntToFloat => Opcode::IntToFloat,
            I::FloatToInt => Opcode::FloatToInt,
            I::Concat => Opcode::Concat,
            I::PushInt(_) => Opcode::PushInt,
            I::PushFloat(_) => Opcode::PushFloat,
            I::PushString(_) => Opcode::PushString,
            I::PushVar { .. } => Opcode::PushVar,
            I::StoreVar { .. } => Opcode::StoreVar,
            I::PushInstance(_) => Opcode::PushInstance,
            I::SetInstance(_) => Opcode::SetInstance,
            I::Jump(_) => Opcode::Jump,
            I::JumpIfZero(_) => Opcode::JumpIfZero,
            I::Call(_) => Opcode::Call,
            I::CallExternal(_) => Opcode::CallExternal,
            I::Pop => Opcode::Pop,
            I::Return => Opcode::Return,
        }
    }

    /// Decode the instruction starting at `offset`, returning it and its encoded length.
    pub fn decode(code: &[u8], offset: usize) -> Result<(Instruction, usize), DecodeError> {
        let byte = *code.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let opcode = Opcode::try_from(byte).map_err(|byte| DecodeError::InvalidOpcode { offset, byte })?;
        let operands = &code[offset + 1..];
        let need = |len: usize| {
            if operands.len() < len {
                Err(DecodeError::Truncated { offset })
            } else {
                Ok(())
            }
        };

        use Instruction as I;
        let decoded = match opcode {
            Opcode::Add => (I::Add, 1),
            Opcode::Sub => (I::Sub, 1),
            Opcode::Mul => (I::Mul, 1),
            Opcode::Div => (I::Div, 1),
            Opcode::Mod => (I::Mod, 1),
            Opcode::Neg => (I::Neg, 1),
            Opcode::Less => (I::Less, 1),
            Opcode::Greater => (I::Greater, 1),
            Opcode::Eq => (I::Eq, 1),
            Opcode::NotEq => (I::NotEq, 1),
            Opcode::LessEq => (I::LessEq, 1),
            Opcode::GreaterEq => (I::GreaterEq, 1),
            Opcode::And => (I::And, 1),
            Opcode::Or => (I::Or, 1),
            Opcode::Not => (I::Not, 1),
            Opcode::BitAnd => (I::BitAnd, 1),
            Opcode::BitOr => (I::BitOr, 1),
            Opcode::Shl => (I::Shl, 1),
            Opcode::Shr => (I::Shr, 1),
            Opcode::AddF => (I::AddF, 1),
            Opcode::SubF => (I::SubF, 1),
            Opcode::MulF => (I::MulF, 1),
            Opcode::DivF => (I::DivF, 1),
            Opcode::NegF => (I::NegF, 1),
            Opcode::LessF => (I::LessF, 1),
            Opcode::GreaterF => (I::GreaterF, 1),
            Opcode::EqF => (I::EqF, 1),
            Opcode::IntToFloat => (I::IntToFloat, 1),
            Opcode::FloatToInt => (I::FloatToInt, 1),
            Opcode::Concat => (I::Concat, 1),
            Opcode::Pop => (I::Pop, 1),
            Opcode::Return => (I::Return, 1),
            Opcode::PushInt => {
                need(4)?;
                (I::PushInt(LittleEndian::read_i32(operands)), 5)
            }
            Opcode::PushFloat => {
                need(4)?;
                (I::PushFloat(LittleEndian::read_f32(operands)), 5)
            }
            Opcode::PushVar | Opcode::StoreVar => {
                need(5)?;
                let symbol = LittleEndian::read_u32(operands);
                let element = operands[4];
                let instruction = if opcode == Opcode::PushVar {
                    I::PushVar { symbol, element }
                } else {
                    I::StoreVar { symbol, element }
                };
                (instruction, 6)
            }
            Opcode::PushString
            | Opcode::PushInstance
            | Opcode::SetInstance
            | Opcode::Jump
            | Opcode::JumpIfZero
            | Opcode::Call
            | Opcode::CallExternal => {
                need(4)?;
                let operand = LittleEndian::read_u32(operands);
                let instruction = match opcode {
                    Opcode::PushString => I::PushString(operand),
                    Opcode::PushInstance => I::PushInstance(operand),
                    Opcode::SetInstance => I::SetInstance(operand),
                    Opcode::Jump => I::Jump(operand),
                    Opcode::JumpIfZero => I::JumpIfZero(operand),
                    Opcode::Call => I::Call(operand),
                    _ => I::CallExternal(operand),
                };
                (instruction, 5)
            }
        };
        Ok(decoded)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);
        match *self {
            Instruction::PushInt(value) => out.extend_from_slice(&value.to_le_bytes()),
            Instruction::PushFloat(value) => out.extend_from_slice(&value.to_le_bytes()),
            Instruction::PushVar { symbol, element } | Instruction::StoreVar { symbol, element } => {
                out.extend_from_slice(&symbol.to_le_bytes());
                out.push(element);
            }
            Instruction::PushString(operand)
            | Instruction::PushInstance(operand)
            | Instruction::SetInstance(operand)
            | Instruction::Jump(operand)
            | Instruction::JumpIfZero(operand)
            | Instruction::Call(operand)
            | Instruction::CallExternal(operand) => out.extend_from_slice(&operand.to_le_bytes()),
            _ => {}
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Instruction::PushVar { .. } | Instruction::StoreVar { .. } => 6,
            Instruction::PushInt(_)
            | Instruction::PushFloat(_)
            | Instruction::PushString(_)
            | Instruction::PushInstance(_)
            | Instruction::SetInstance(_)
            | Instruction::Jump(_)
            | Instruction::JumpIfZero(_)
            | Instruction::Call(_)
            | Instruction::CallExternal(_) => 5,
            _ => 1,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushInt(value) => write!(f, "PushInt {value}"),
            Instruction::PushFloat(value) => write!(f, "PushFloat {value}"),
            Instruction::PushString(symbol) => write!(f, "PushString #{symbol}"),
            Instruction::PushVar { symbol, element } => write!(f, "PushVar #{symbol}[{element}]"),
            Instruction::StoreVar { symbol, element } => {
                write!(f, "StoreVar #{symbol}[{element}]")
            }
            Instruction::PushInstance(symbol) => write!(f, "PushInstance #{symbol}"),
            Instruction::SetInstance(symbol) => write!(f, "SetInstance #{symbol}"),
            Instruction::Jump(target) => write!(f, "Jump @{target}"),
            Instruction::JumpIfZero(target) => write!(f, "JumpIfZero @{target}"),
            Instruction::Call(symbol) => write!(f, "Call #{symbol}"),
            Instruction::CallExternal(symbol) => write!(f, "CallExternal #{symbol}"),
            other => write!(f, "{:?}", other.opcode()),
        }
    }
}

/// Walk a code block and decode every instruction in order.
pub fn disassemble(code: &[u8]) -> Result<Vec<(usize, Instruction)>, DecodeError> {
    let mut offset = 0;
    let mut out = Vec::new();
    while offset < code.len() {
        let (instruction, len) = Instruction::decode(code, offset)?;
        out.push((offset, instruction));
        offset += len;
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("jump to undefined label `{0}`")]
pub struct UndefinedLabel(pub String);

/// Emits an instruction stream with symbolic jump labels patched on `finish`.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<(usize, String)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending after existing code, e.g. when several functions share a block.
    pub fn with_code(code: Vec<u8>) -> Self {
        Assembler {
            code,
            ..Self::default()
        }
    }

    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        instruction.encode(&mut self.code);
        self
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let offset = self.offset();
        self.labels.insert(name.to_string(), offset);
        self
    }

    pub fn jump(&mut self, label: &str) -> &mut Self {
        self.emit_fixup(Instruction::Jump(0), label)
    }

    pub fn jump_if_zero(&mut self, label: &str) -> &mut Self {
        self.emit_fixup(Instruction::JumpIfZero(0), label)
    }

    fn emit_fixup(&mut self, instruction: Instruction, label: &str) -> &mut Self {
        let operand_at = self.code.len() + 1;
        instruction.encode(&mut self.code);
        self.fixups.push((operand_at, label.to_string()));
        self
    }

    pub fn finish(mut self) -> Result<Vec<u8>, UndefinedLabel> {
        for (operand_at, label) in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&label)
                .ok_or_else(|| UndefinedLabel(label.clone()))?;
            LittleEndian::write_u32(&mut self.code[operand_at..operand_at + 4], target);
        }
        Ok(self.code)
    }
}

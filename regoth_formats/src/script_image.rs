use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;

use crate::bytecode::{Assembler, Instruction, UndefinedLabel};
use crate::text::{latin1_to_string, string_to_latin1};

/// Bytes that open every compiled script image.
pub const IMAGE_MAGIC: [u8; 4] = *b"DSCR";

/// Image revision understood by this crate.
pub const IMAGE_VERSION: u16 = 1;

const NO_INDEX: u32 = u32::MAX;

/// Element operands are a single byte, so no slot array can be longer.
pub const MAX_SLOTS: u32 = u8::MAX as u32 + 1;

const FLAG_MEMBER: u8 = 0x01;
const FLAG_RETURN: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Variable,
    Constant,
    Function,
    Class,
    Prototype,
    Instance,
    External,
}

impl SymbolKind {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => SymbolKind::Variable,
            1 => SymbolKind::Constant,
            2 => SymbolKind::Function,
            3 => SymbolKind::Class,
            4 => SymbolKind::Prototype,
            5 => SymbolKind::Instance,
            6 => SymbolKind::External,
            _ => return None,
        })
    }

    fn to_byte(self) -> u8 {
        match self {
            SymbolKind::Variable => 0,
            SymbolKind::Constant => 1,
            SymbolKind::Function => 2,
            SymbolKind::Class => 3,
            SymbolKind::Prototype => 4,
            SymbolKind::Instance => 5,
            SymbolKind::External => 6,
        }
    }
}

/// Element type of a symbol's value slots (and of function parameters/returns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    None,
    Int,
    Float,
    String,
    Instance,
}

impl SlotType {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => SlotType::None,
            1 => SlotType::Int,
            2 => SlotType::Float,
            3 => SlotType::String,
            4 => SlotType::Instance,
            _ => return None,
        })
    }

    fn to_byte(self) -> u8 {
        match self {
            SlotType::None => 0,
            SlotType::Int => 1,
            SlotType::Float => 2,
            SlotType::String => 3,
            SlotType::Instance => 4,
        }
    }
}

/// Declared values of a symbol, fixed arity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum SlotData {
    None,
    Int(Vec<i32>),
    Float(Vec<f32>),
    String(Vec<String>),
    /// Instance references carry no declared value, only an arity.
    Instance(u32),
}

impl SlotData {
    pub fn slot_type(&self) -> SlotType {
        match self {
            SlotData::None => SlotType::None,
            SlotData::Int(_) => SlotType::Int,
            SlotData::Float(_) => SlotType::Float,
            SlotData::String(_) => SlotType::String,
            SlotData::Instance(_) => SlotType::Instance,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SlotData::None => 0,
            SlotData::Int(values) => values.len(),
            SlotData::Float(values) => values.len(),
            SlotData::String(values) => values.len(),
            SlotData::Instance(count) => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-initialised slots of the given type and arity.
    pub fn zeroed(slot_type: SlotType, count: usize) -> Self {
        match slot_type {
            SlotType::None => SlotData::None,
            SlotType::Int => SlotData::Int(vec![0; count]),
            SlotType::Float => SlotData::Float(vec![0.0; count]),
            SlotType::String => SlotData::String(vec![String::new(); count]),
            SlotType::Instance => SlotData::Instance(count as u32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: SymbolKind,
    pub member: bool,
    pub return_type: SlotType,
    pub param_count: u8,
    pub slots: SlotData,
    pub code_offset: Option<u32>,
    pub parent: Option<u32>,
}

impl SymbolRecord {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        SymbolRecord {
            name: name.into(),
            kind,
            member: false,
            return_type: SlotType::None,
            param_count: 0,
            slots: SlotData::None,
            code_offset: None,
            parent: None,
        }
    }
}

/// Raw decoded image: symbol records followed by the instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptImage {
    pub version: u16,
    pub symbols: Vec<SymbolRecord>,
    #[serde(skip)]
    pub code: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("script image magic mismatch")]
    BadMagic,
    #[error("unsupported script image version {0}")]
    UnsupportedVersion(u16),
    #[error("script image truncated: {0}")]
    Truncated(#[from] std::io::Error),
    #[error("symbol {index} has unknown kind byte {byte}")]
    UnknownKind { index: usize, byte: u8 },
    #[error("symbol {index} has unknown slot type byte {byte}")]
    UnknownSlotType { index: usize, byte: u8 },
    #[error("symbol {index} declares {count} slots, more than {MAX_SLOTS}")]
    TooManySlots { index: usize, count: u32 },
    #[error("{0} trailing bytes after code block")]
    TrailingBytes(usize),
    #[error(transparent)]
    Label(#[from] UndefinedLabel),
    #[error("script builder: {0}")]
    Builder(String),
}

impl ScriptImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != IMAGE_MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != IMAGE_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        // Reserved.
        cursor.read_u16::<LittleEndian>()?;

        let count = cursor.read_u32::<LittleEndian>()? as usize;
        // Each record is at least 20 bytes; refuse counts the input cannot hold.
        if count > bytes.len() / 20 {
            return Err(ImageError::Truncated(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let mut symbols = Vec::with_capacity(count);
        for index in 0..count {
            symbols.push(read_symbol(&mut cursor, index)?);
        }

        let code_len = cursor.read_u32::<LittleEndian>()? as usize;
        let position = cursor.position() as usize;
        let remaining = bytes.len().saturating_sub(position);
        if remaining < code_len {
            return Err(ImageError::Truncated(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if remaining > code_len {
            return Err(ImageError::TrailingBytes(remaining - code_len));
        }
        let code = bytes[position..position + code_len].to_vec();

        Ok(ScriptImage {
            version,
            symbols,
            code,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.symbols.len() as u32).to_le_bytes());
        for symbol in &self.symbols {
            write_symbol(&mut out, symbol);
        }
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out
    }
}

fn read_symbol(cursor: &mut Cursor<&[u8]>, index: usize) -> Result<SymbolRecord, ImageError> {
    let name = read_string(cursor)?;
    let kind_byte = cursor.read_u8()?;
    let kind = SymbolKind::from_byte(kind_byte).ok_or(ImageError::UnknownKind {
        index,
        byte: kind_byte,
    })?;
    let flags = cursor.read_u8()?;
    let slot_byte = cursor.read_u8()?;
    let slot_type = SlotType::from_byte(slot_byte).ok_or(ImageError::UnknownSlotType {
        index,
        byte: slot_byte,
    })?;
    let return_byte = cursor.read_u8()?;
    let declared_return = SlotType::from_byte(return_byte).ok_or(ImageError::UnknownSlotType {
        index,
        byte: return_byte,
    })?;
    let param_count = cursor.read_u8()?;
    // Reserved.
    cursor.read_u8()?;

    let slot_count = cursor.read_u32::<LittleEndian>()?;
    if slot_count > MAX_SLOTS {
        return Err(ImageError::TooManySlots {
            index,
            count: slot_count,
        });
    }
    let slots = match slot_type {
        SlotType::None => SlotData::None,
        SlotType::Int => {
            let mut values = Vec::new();
            for _ in 0..slot_count {
                values.push(cursor.read_i32::<LittleEndian>()?);
            }
            SlotData::Int(values)
        }
        SlotType::Float => {
            let mut values = Vec::new();
            for _ in 0..slot_count {
                values.push(cursor.read_f32::<LittleEndian>()?);
            }
            SlotData::Float(values)
        }
        SlotType::String => {
            let mut values = Vec::new();
            for _ in 0..slot_count {
                values.push(read_string(cursor)?);
            }
            SlotData::String(values)
        }
        SlotType::Instance => SlotData::Instance(slot_count),
    };

    let code_offset = optional_index(cursor.read_u32::<LittleEndian>()?);
    let parent = optional_index(cursor.read_u32::<LittleEndian>()?);

    let return_type = if flags & FLAG_RETURN != 0 {
        declared_return
    } else {
        SlotType::None
    };

    Ok(SymbolRecord {
        name,
        kind,
        member: flags & FLAG_MEMBER != 0,
        return_type,
        param_count,
        slots,
        code_offset,
        parent,
    })
}

fn write_symbol(out: &mut Vec<u8>, symbol: &SymbolRecord) {
    write_string(out, &symbol.name);
    out.push(symbol.kind.to_byte());
    let mut flags = 0u8;
    if symbol.member {
        flags |= FLAG_MEMBER;
    }
    if symbol.return_type != SlotType::None {
        flags |= FLAG_RETURN;
    }
    out.push(flags);
    out.push(symbol.slots.slot_type().to_byte());
    out.push(symbol.return_type.to_byte());
    out.push(symbol.param_count);
    out.push(0);
    // Writes into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(symbol.slots.len() as u32);
    match &symbol.slots {
        SlotData::None | SlotData::Instance(_) => {}
        SlotData::Int(values) => {
            for value in values {
                let _ = out.write_i32::<LittleEndian>(*value);
            }
        }
        SlotData::Float(values) => {
            for value in values {
                let _ = out.write_f32::<LittleEndian>(*value);
            }
        }
        SlotData::String(values) => {
            for value in values {
                write_string(out, value);
            }
        }
    }
    let _ = out.write_u32::<LittleEndian>(symbol.code_offset.unwrap_or(NO_INDEX));
    let _ = out.write_u32::<LittleEndian>(symbol.parent.unwrap_or(NO_INDEX));
}

fn optional_index(raw: u32) -> Option<u32> {
    (raw != NO_INDEX).then_some(raw)
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ImageError> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(latin1_to_string(&bytes))
}

fn write_string(out: &mut Vec<u8>, text: &str) {
    let bytes = string_to_latin1(text);
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&bytes[..len]);
}

/// Builds script images in-process: the fixture and tooling counterpart of
/// the external script compiler.
///
/// Symbols are referenced by name while emitting code; a name must be declared
/// before it is referenced. Names are stored upper-case, matching the compiler.
#[derive(Debug, Default)]
pub struct ScriptImageBuilder {
    symbols: Vec<SymbolRecord>,
    names: HashMap<String, u32>,
    code: Vec<u8>,
    errors: Vec<String>,
}

impl ScriptImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, record: SymbolRecord) -> u32 {
        let index = self.symbols.len() as u32;
        let key = record.name.to_ascii_uppercase();
        if self.names.insert(key.clone(), index).is_some() {
            self.errors.push(format!("duplicate symbol {key}"));
        }
        self.symbols.push(SymbolRecord { name: key, ..record });
        index
    }

    fn resolve(&mut self, name: &str) -> Option<u32> {
        let found = self.names.get(&name.to_ascii_uppercase()).copied();
        if found.is_none() {
            self.errors.push(format!("reference to undeclared symbol {name}"));
        }
        found
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.names.get(&name.to_ascii_uppercase()).copied()
    }

    /// Declare a class and its member variables (`CLASS.MEMBER`).
    pub fn class(&mut self, name: &str, members: &[(&str, SlotType, u32)]) -> u32 {
        let class = self.push(SymbolRecord::new(name, SymbolKind::Class));
        for (member, slot_type, count) in members {
            let mut record =
                SymbolRecord::new(format!("{name}.{member}"), SymbolKind::Variable);
            record.member = true;
            record.parent = Some(class);
            record.slots = SlotData::zeroed(*slot_type, *count as usize);
            self.push(record);
        }
        class
    }

    pub fn variable(&mut self, name: &str, slots: SlotData) -> u32 {
        let mut record = SymbolRecord::new(name, SymbolKind::Variable);
        record.slots = slots;
        self.push(record)
    }

    pub fn constant(&mut self, name: &str, slots: SlotData) -> u32 {
        let mut record = SymbolRecord::new(name, SymbolKind::Constant);
        record.slots = slots;
        self.push(record)
    }

    pub fn external(&mut self, name: &str, params: &[SlotType], returns: SlotType) -> u32 {
        let mut record = SymbolRecord::new(name, SymbolKind::External);
        record.return_type = returns;
        record.param_count = params.len() as u8;
        let external = self.push(record);
        self.push_params(name, params);
        external
    }

    fn push_params(&mut self, owner: &str, params: &[SlotType]) {
        for (position, slot_type) in params.iter().enumerate() {
            let mut record =
                SymbolRecord::new(format!("{owner}.PAR{position}"), SymbolKind::Variable);
            record.slots = SlotData::zeroed(*slot_type, 1);
            self.push(record);
        }
    }

    /// Declare a function; its parameters become the symbols directly after it.
    pub fn function<F>(&mut self, name: &str, params: &[SlotType], returns: SlotType, body: F) -> u32
    where
        F: FnOnce(&mut FunctionBody<'_>),
    {
        let mut record = SymbolRecord::new(name, SymbolKind::Function);
        record.return_type = returns;
        record.param_count = params.len() as u8;
        record.code_offset = Some(self.code.len() as u32);
        let function = self.push(record);
        self.push_params(name, params);
        self.emit_body(body);
        function
    }

    pub fn prototype<F>(&mut self, name: &str, class: &str, body: F) -> u32
    where
        F: FnOnce(&mut FunctionBody<'_>),
    {
        self.code_owner(name, SymbolKind::Prototype, class, body)
    }

    /// Declare an instance whose constructor body runs after its parent prototype's.
    pub fn instance<F>(&mut self, name: &str, parent: &str, body: F) -> u32
    where
        F: FnOnce(&mut FunctionBody<'_>),
    {
        self.code_owner(name, SymbolKind::Instance, parent, body)
    }

    fn code_owner<F>(&mut self, name: &str, kind: SymbolKind, parent: &str, body: F) -> u32
    where
        F: FnOnce(&mut FunctionBody<'_>),
    {
        let parent = self.resolve(parent);
        let mut record = SymbolRecord::new(name, kind);
        record.parent = parent;
        record.code_offset = Some(self.code.len() as u32);
        let index = self.push(record);
        self.emit_body(body);
        index
    }

    fn emit_body<F>(&mut self, body: F)
    where
        F: FnOnce(&mut FunctionBody<'_>),
    {
        let code = std::mem::take(&mut self.code);
        let mut function = FunctionBody {
            builder: self,
            asm: Assembler::with_code(code),
        };
        body(&mut function);
        let FunctionBody { asm, .. } = function;
        match asm.finish() {
            Ok(code) => self.code = code,
            Err(err) => self.errors.push(err.to_string()),
        }
    }

    pub fn build(self) -> Result<ScriptImage, ImageError> {
        if !self.errors.is_empty() {
            return Err(ImageError::Builder(self.errors.join("; ")));
        }
        Ok(ScriptImage {
            version: IMAGE_VERSION,
            symbols: self.symbols,
            code: self.code,
        })
    }
}

/// Code emitter for a single function body. Labels are local to the body.
pub struct FunctionBody<'a> {
    builder: &'a mut ScriptImageBuilder,
    asm: Assembler,
}

impl FunctionBody<'_> {
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.asm.emit(instruction);
        self
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.emit(Instruction::PushInt(value))
    }

    pub fn float(&mut self, value: f32) -> &mut Self {
        self.emit(Instruction::PushFloat(value))
    }

    /// Push a string literal, interning it as an anonymous constant symbol.
    pub fn string(&mut self, value: &str) -> &mut Self {
        let index = self.builder.symbols.len();
        let mut record = SymbolRecord::new(format!("\u{FF}STR{index}"), SymbolKind::Constant);
        record.slots = SlotData::String(vec![value.to_string()]);
        let symbol = self.builder.push(record);
        self.emit(Instruction::PushString(symbol))
    }

    pub fn load(&mut self, name: &str) -> &mut Self {
        self.load_element(name, 0)
    }

    pub fn load_element(&mut self, name: &str, element: u8) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::PushVar { symbol, element })
    }

    pub fn store(&mut self, name: &str) -> &mut Self {
        self.store_element(name, 0)
    }

    pub fn store_element(&mut self, name: &str, element: u8) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::StoreVar { symbol, element })
    }

    pub fn push_instance(&mut self, name: &str) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::PushInstance(symbol))
    }

    pub fn set_instance(&mut self, name: &str) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::SetInstance(symbol))
    }

    pub fn call(&mut self, name: &str) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::Call(symbol))
    }

    pub fn call_external(&mut self, name: &str) -> &mut Self {
        let symbol = self.builder.resolve(name).unwrap_or(u32::MAX);
        self.emit(Instruction::CallExternal(symbol))
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        self.asm.label(name);
        self
    }

    pub fn jump(&mut self, label: &str) -> &mut Self {
        self.asm.jump(label);
        self
    }

    pub fn jump_if_zero(&mut self, label: &str) -> &mut Self {
        self.asm.jump_if_zero(label);
        self
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instruction::Return)
    }
}

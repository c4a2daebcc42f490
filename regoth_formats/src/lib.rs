pub mod bytecode;
pub mod script_image;
pub mod text;
pub mod vdf;

pub use bytecode::{Assembler, DecodeError, Instruction, Opcode, UndefinedLabel, disassemble};
pub use script_image::{
    FunctionBody, IMAGE_MAGIC, IMAGE_VERSION, ImageError, ScriptImage, ScriptImageBuilder,
    SlotData, SlotType, SymbolKind, SymbolRecord,
};
pub use text::{latin1_to_string, string_to_latin1};
pub use vdf::{VdfArchive, VdfEntry};

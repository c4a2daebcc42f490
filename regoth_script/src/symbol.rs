use std::collections::HashMap;
use std::fmt;

use regoth_formats::{ScriptImage, SlotData, SlotType, SymbolKind};
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;

/// Index into a [`SymbolTable`]; valid for the lifetime of the table that
/// produced it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SymbolIndex(pub u32);

impl SymbolIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub slot_type: SlotType,
    pub defaults: SlotData,
    pub code_offset: Option<usize>,
    pub parent: Option<SymbolIndex>,
    /// Position inside instances of the owning class, for member variables.
    pub member_offset: Option<usize>,
    pub param_count: usize,
    pub return_type: SlotType,
}

impl Symbol {
    pub fn arity(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_member(&self) -> bool {
        self.member_offset.is_some()
    }

    pub fn has_return(&self) -> bool {
        self.return_type != SlotType::None
    }
}

/// Immutable view of a loaded script image.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolIndex>,
    members: HashMap<SymbolIndex, Vec<SymbolIndex>>,
    code: Vec<u8>,
}

impl SymbolTable {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScriptError> {
        let image = ScriptImage::from_bytes(bytes)?;
        Self::load(&image)
    }

    pub fn load(image: &ScriptImage) -> Result<Self, ScriptError> {
        let count = image.symbols.len();
        let mut symbols = Vec::with_capacity(count);
        let mut by_name = HashMap::with_capacity(count);
        let mut members: HashMap<SymbolIndex, Vec<SymbolIndex>> = HashMap::new();

        for (position, record) in image.symbols.iter().enumerate() {
            let index = SymbolIndex(position as u32);
            let name = record.name.to_ascii_uppercase();
            if by_name.insert(name.clone(), index).is_some() {
                return Err(corrupt(format!("duplicate symbol name {name}")));
            }

            let parent = match record.parent {
                Some(raw) if raw as usize >= count => {
                    return Err(corrupt(format!(
                        "symbol {name} references parent #{raw} beyond {count} symbols"
                    )));
                }
                Some(raw) => Some(SymbolIndex(raw)),
                None => None,
            };

            let code_offset = record.code_offset.map(|offset| offset as usize);
            if let Some(offset) = code_offset {
                if offset >= image.code.len() {
                    return Err(corrupt(format!(
                        "symbol {name} code offset {offset} beyond code length {}",
                        image.code.len()
                    )));
                }
                if record.kind == SymbolKind::External {
                    return Err(corrupt(format!("external {name} carries a code offset")));
                }
            }

            let member_offset = if record.member {
                let Some(class) = parent else {
                    return Err(corrupt(format!("member {name} has no owning class")));
                };
                let owner = &image.symbols[class.as_usize()];
                if owner.kind != SymbolKind::Class {
                    return Err(corrupt(format!(
                        "member {name} belongs to {} which is not a class",
                        owner.name
                    )));
                }
                let list = members.entry(class).or_default();
                list.push(index);
                Some(list.len() - 1)
            } else {
                None
            };

            symbols.push(Symbol {
                name,
                kind: record.kind,
                slot_type: record.slots.slot_type(),
                defaults: record.slots.clone(),
                code_offset,
                parent,
                member_offset,
                param_count: record.param_count as usize,
                return_type: record.return_type,
            });
        }

        // Parameters are the symbols directly after their function.
        for (position, symbol) in symbols.iter().enumerate() {
            if matches!(symbol.kind, SymbolKind::Function | SymbolKind::External)
                && position + symbol.param_count >= count
                && symbol.param_count > 0
            {
                return Err(corrupt(format!(
                    "{} declares {} parameters past the end of the table",
                    symbol.name, symbol.param_count
                )));
            }
        }

        Ok(SymbolTable {
            symbols,
            by_name,
            members,
            code: image.code.clone(),
        })
    }

    pub fn lookup(&self, name: &str) -> Result<SymbolIndex, ScriptError> {
        self.find(name)
            .ok_or_else(|| ScriptError::UnknownSymbol(name.to_string()))
    }

    pub fn find(&self, name: &str) -> Option<SymbolIndex> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// Panics only for indices this table never produced.
    pub fn symbol(&self, index: SymbolIndex) -> &Symbol {
        &self.symbols[index.as_usize()]
    }

    pub fn get(&self, index: SymbolIndex) -> Option<&Symbol> {
        self.symbols.get(index.as_usize())
    }

    pub fn name(&self, index: SymbolIndex) -> &str {
        &self.symbol(index).name
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolIndex, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(position, symbol)| (SymbolIndex(position as u32), symbol))
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Member variables of `class`, in slot order.
    pub fn members_of(&self, class: SymbolIndex) -> &[SymbolIndex] {
        self.members
            .get(&class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Parameter symbols of a function or external.
    pub fn params_of(&self, function: SymbolIndex) -> impl Iterator<Item = SymbolIndex> + '_ {
        let count = self.symbol(function).param_count as u32;
        (1..=count).map(move |offset| SymbolIndex(function.0 + offset))
    }

    /// Follow the parent chain of an instance or prototype up to its class.
    pub fn class_of(&self, symbol: SymbolIndex) -> Option<SymbolIndex> {
        let mut current = symbol;
        for _ in 0..self.symbols.len() {
            let entry = self.symbol(current);
            match entry.kind {
                SymbolKind::Class => return Some(current),
                SymbolKind::Instance | SymbolKind::Prototype => current = entry.parent?,
                _ => return None,
            }
        }
        None
    }

    /// Constructor code owners for `instance`, outermost prototype first.
    pub fn constructor_chain(&self, instance: SymbolIndex) -> Vec<SymbolIndex> {
        let mut chain = Vec::new();
        let mut current = Some(instance);
        while let Some(index) = current {
            let entry = self.symbol(index);
            if !matches!(entry.kind, SymbolKind::Instance | SymbolKind::Prototype)
                || chain.len() > self.symbols.len()
            {
                break;
            }
            if entry.code_offset.is_some() {
                chain.push(index);
            }
            current = entry.parent;
        }
        chain.reverse();
        chain
    }
}

fn corrupt(message: String) -> ScriptError {
    ScriptError::CorruptImage(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regoth_formats::{ScriptImageBuilder, SymbolRecord};

    fn table() -> SymbolTable {
        let mut builder = ScriptImageBuilder::new();
        builder.class(
            "C_Npc",
            &[("name", SlotType::String, 1), ("attribute", SlotType::Int, 2)],
        );
        builder.prototype("Npc_Default", "C_Npc", |body| {
            body.int(40).store_element("C_NPC.ATTRIBUTE", 0).ret();
        });
        builder.instance("NPC_Bert", "Npc_Default", |body| {
            body.string("Bert").store("C_NPC.NAME").ret();
        });
        builder.function("ZS_Talk", &[], SlotType::None, |body| {
            body.ret();
        });
        builder.function("ZS_Talk_Loop", &[SlotType::Int], SlotType::Int, |body| {
            body.int(1).ret();
        });
        SymbolTable::load(&builder.build().unwrap()).unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = table();
        let bert = table.lookup("npc_bert").unwrap();
        assert_eq!(table.symbol(bert).name, "NPC_BERT");
        assert!(matches!(
            table.lookup("nobody"),
            Err(ScriptError::UnknownSymbol(name)) if name == "nobody"
        ));
    }

    #[test]
    fn members_are_laid_out_in_declaration_order() {
        let table = table();
        let class = table.lookup("C_NPC").unwrap();
        let members = table.members_of(class);
        assert_eq!(members.len(), 2);
        assert_eq!(table.symbol(members[1]).member_offset, Some(1));
        assert_eq!(table.name(members[1]), "C_NPC.ATTRIBUTE");
    }

    #[test]
    fn class_and_constructor_chain_follow_prototypes() {
        let table = table();
        let bert = table.lookup("NPC_BERT").unwrap();
        assert_eq!(table.class_of(bert), table.find("C_NPC"));
        let chain: Vec<_> = table
            .constructor_chain(bert)
            .into_iter()
            .map(|index| table.name(index).to_string())
            .collect();
        assert_eq!(chain, ["NPC_DEFAULT", "NPC_BERT"]);
    }

    #[test]
    fn params_follow_their_function() {
        let table = table();
        let looping = table.lookup("ZS_TALK_LOOP").unwrap();
        let params: Vec<_> = table.params_of(looping).collect();
        assert_eq!(table.name(params[0]), "ZS_TALK_LOOP.PAR0");
    }

    #[test]
    fn rejects_member_of_non_class() {
        let mut image = ScriptImageBuilder::new().build().unwrap();
        image.symbols.push(SymbolRecord::new("F", SymbolKind::Function));
        let mut member = SymbolRecord::new("F.X", SymbolKind::Variable);
        member.member = true;
        member.parent = Some(0);
        image.symbols.push(member);
        assert!(matches!(
            SymbolTable::load(&image),
            Err(ScriptError::CorruptImage(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_parent_and_code() {
        let mut image = ScriptImageBuilder::new().build().unwrap();
        let mut orphan = SymbolRecord::new("ORPHAN", SymbolKind::Instance);
        orphan.parent = Some(9);
        image.symbols.push(orphan);
        assert!(SymbolTable::load(&image).is_err());

        let mut image = ScriptImageBuilder::new().build().unwrap();
        let mut function = SymbolRecord::new("F", SymbolKind::Function);
        function.code_offset = Some(3);
        image.symbols.push(function);
        assert!(SymbolTable::load(&image).is_err());
    }

    #[test]
    fn rejects_duplicate_names_and_bad_bytes() {
        let mut image = ScriptImageBuilder::new().build().unwrap();
        image.symbols.push(SymbolRecord::new("A", SymbolKind::Variable));
        image.symbols.push(SymbolRecord::new("a", SymbolKind::Variable));
        assert!(SymbolTable::load(&image).is_err());

        assert!(matches!(
            SymbolTable::from_bytes(b"NOPE"),
            Err(ScriptError::CorruptImage(_))
        ));
    }
}

use std::collections::BTreeMap;

use regoth_formats::SymbolKind;

use crate::symbol::{SymbolIndex, SymbolTable};
use crate::value::{SlotValues, Value};

/// Script-visible state of one actor: the member slots of its class.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    class: SymbolIndex,
    symbol: SymbolIndex,
    slots: Vec<Option<SlotValues>>,
}

impl Instance {
    /// Fresh instance of `symbol`'s class with every member at its declared
    /// default. Returns `None` when `symbol` does not lead to a class.
    pub fn new(table: &SymbolTable, symbol: SymbolIndex) -> Option<Self> {
        let class = table.class_of(symbol)?;
        let slots = table
            .members_of(class)
            .iter()
            .map(|member| SlotValues::from_declared(&table.symbol(*member).defaults))
            .collect();
        Some(Instance {
            class,
            symbol,
            slots,
        })
    }

    pub fn class(&self) -> SymbolIndex {
        self.class
    }

    pub fn symbol(&self) -> SymbolIndex {
        self.symbol
    }

    pub fn slot(&self, member_offset: usize) -> Option<&SlotValues> {
        self.slots.get(member_offset).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, member_offset: usize) -> Option<&mut SlotValues> {
        self.slots.get_mut(member_offset).and_then(Option::as_mut)
    }

    /// Read a member by symbol; `None` if it is not a member of this class.
    pub fn member(&self, table: &SymbolTable, member: SymbolIndex) -> Option<&SlotValues> {
        let entry = table.symbol(member);
        if entry.parent != Some(self.class) {
            return None;
        }
        self.slot(entry.member_offset?)
    }

    pub fn member_mut(
        &mut self,
        table: &SymbolTable,
        member: SymbolIndex,
    ) -> Option<&mut SlotValues> {
        let entry = table.symbol(member);
        if entry.parent != Some(self.class) {
            return None;
        }
        self.slot_mut(entry.member_offset?)
    }

    pub fn get(&self, table: &SymbolTable, member: SymbolIndex, element: usize) -> Option<Value> {
        self.member(table, member)?.get(element)
    }

    /// Member slots paired with their symbols, in slot order.
    pub fn iter<'a>(
        &'a self,
        table: &'a SymbolTable,
    ) -> impl Iterator<Item = (SymbolIndex, &'a SlotValues)> + 'a {
        table
            .members_of(self.class)
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(member, slot)| slot.as_ref().map(|values| (*member, values)))
    }
}

/// Mutable copies of every non-member variable, constant and parameter slot.
#[derive(Debug, Clone, Default)]
pub struct GlobalStore {
    values: BTreeMap<SymbolIndex, SlotValues>,
}

impl GlobalStore {
    pub fn new(table: &SymbolTable) -> Self {
        let values = table
            .iter()
            .filter(|(_, symbol)| {
                !symbol.is_member()
                    && matches!(symbol.kind, SymbolKind::Variable | SymbolKind::Constant)
            })
            .filter_map(|(index, symbol)| {
                SlotValues::from_declared(&symbol.defaults).map(|slots| (index, slots))
            })
            .collect();
        GlobalStore { values }
    }

    pub fn slots(&self, symbol: SymbolIndex) -> Option<&SlotValues> {
        self.values.get(&symbol)
    }

    pub fn slots_mut(&mut self, symbol: SymbolIndex) -> Option<&mut SlotValues> {
        self.values.get_mut(&symbol)
    }

    pub fn get(&self, symbol: SymbolIndex, element: usize) -> Option<Value> {
        self.values.get(&symbol)?.get(element)
    }

    /// False when the slot does not exist or the value type does not fit.
    pub fn set(&mut self, symbol: SymbolIndex, element: usize, value: Value) -> bool {
        self.values
            .get_mut(&symbol)
            .is_some_and(|slots| slots.set(element, value).is_ok())
    }

    /// Variables only. Stores into constants are refused by the VM and
    /// string literals have no symbol a script can name.
    pub fn variables<'a>(
        &'a self,
        table: &'a SymbolTable,
    ) -> impl Iterator<Item = (SymbolIndex, &'a SlotValues)> + 'a {
        self.values
            .iter()
            .filter(move |(index, _)| table.symbol(**index).kind == SymbolKind::Variable)
            .map(|(index, slots)| (*index, slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regoth_formats::{ScriptImageBuilder, SlotData, SlotType};

    fn table() -> SymbolTable {
        let mut builder = ScriptImageBuilder::new();
        builder.class(
            "C_Npc",
            &[("name", SlotType::String, 1), ("attribute", SlotType::Int, 2)],
        );
        builder.instance("NPC_Bert", "C_Npc", |body| {
            body.ret();
        });
        builder.variable("self", SlotData::Instance(1));
        builder.variable("counter", SlotData::Int(vec![5]));
        builder.constant("LOOP_END", SlotData::Int(vec![1]));
        SymbolTable::load(&builder.build().unwrap()).unwrap()
    }

    #[test]
    fn instance_slots_start_at_declared_defaults() {
        let table = table();
        let bert = table.lookup("NPC_BERT").unwrap();
        let mut instance = Instance::new(&table, bert).unwrap();
        let attribute = table.lookup("C_NPC.ATTRIBUTE").unwrap();
        assert_eq!(instance.get(&table, attribute, 1), Some(Value::Int(0)));

        instance
            .member_mut(&table, attribute)
            .unwrap()
            .set(0, Value::Int(40))
            .unwrap();
        assert_eq!(instance.get(&table, attribute, 0), Some(Value::Int(40)));
        assert_eq!(instance.iter(&table).count(), 2);
    }

    #[test]
    fn globals_exclude_members_and_list_only_variables() {
        let table = table();
        let mut globals = GlobalStore::new(&table);
        let counter = table.lookup("COUNTER").unwrap();
        assert_eq!(globals.get(counter, 0), Some(Value::Int(5)));
        assert!(globals.set(counter, 0, Value::Int(6)));
        assert!(!globals.set(counter, 0, Value::Str("x".into())));
        assert!(globals.slots(table.lookup("C_NPC.NAME").unwrap()).is_none());

        let names: Vec<_> = globals
            .variables(&table)
            .map(|(index, _)| table.name(index).to_string())
            .collect();
        assert_eq!(names, ["SELF", "COUNTER"]);
    }
}

use regoth_script::SymbolIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStack {
    pub item: SymbolIndex,
    pub count: u32,
}

/// Item instances carried by an actor, in the order they were first added.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Inventory {
    items: Vec<ItemStack>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new count.
    pub fn add(&mut self, item: SymbolIndex, count: u32) -> u32 {
        if count == 0 {
            return self.count(item);
        }
        match self.items.iter_mut().find(|stack| stack.item == item) {
            Some(stack) => {
                stack.count = stack.count.saturating_add(count);
                stack.count
            }
            None => {
                self.items.push(ItemStack { item, count });
                count
            }
        }
    }

    /// Returns how many were actually removed. Empty stacks disappear.
    pub fn remove(&mut self, item: SymbolIndex, count: u32) -> u32 {
        let Some(position) = self.items.iter().position(|stack| stack.item == item) else {
            return 0;
        };
        let stack = &mut self.items[position];
        let removed = stack.count.min(count);
        stack.count -= removed;
        if stack.count == 0 {
            self.items.remove(position);
        }
        removed
    }

    pub fn count(&self, item: SymbolIndex) -> u32 {
        self.items
            .iter()
            .find(|stack| stack.item == item)
            .map_or(0, |stack| stack.count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemStack> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

//! Flat class layouts and interned slot names.

use std::collections::HashMap;

/// An interned name. Slot lookups compare symbols, not strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(pub u32);

/// Name interner shared by the linker and the interpreter.
#[derive(Debug, Default, Clone)]
pub struct Symbols {
    names: Vec<String>,
    index: HashMap<String, Symbol>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.index.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), sym);
        sym
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.index.get(name).copied()
    }

    pub fn name(&self, sym: Symbol) -> &str {
        self.names
            .get(sym.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (Symbol(i as u32), name.as_str()))
    }
}

/// What a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Index into the instance's slot array.
    Var(usize),
    /// Code offset of the method body in the quickened buffer.
    Code(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSlot {
    pub name: Symbol,
    pub kind: SlotKind,
}

/// The layout of one class: instance variable count plus its slots in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CClass {
    pub nvars: usize,
    pub nslots: usize,
    pub slots: Vec<CSlot>,
}

impl CClass {
    /// Build a layout, numbering variable slots in declaration order.
    pub fn new(slots: impl IntoIterator<Item = SlotDecl>) -> Self {
        let mut nvars = 0;
        let slots: Vec<CSlot> = slots
            .into_iter()
            .map(|decl| match decl {
                SlotDecl::Var(name) => {
                    let slot = CSlot {
                        name,
                        kind: SlotKind::Var(nvars),
                    };
                    nvars += 1;
                    slot
                }
                SlotDecl::Method(name, offset) => CSlot {
                    name,
                    kind: SlotKind::Code(offset),
                },
            })
            .collect();
        Self {
            nvars,
            nslots: slots.len(),
            slots,
        }
    }

    /// Linear search of this class's own slots.
    pub fn find(&self, name: Symbol) -> Option<&CSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }
}

/// Source-level slot declaration fed to [`CClass::new`].
#[derive(Debug, Clone, Copy)]
pub enum SlotDecl {
    Var(Symbol),
    Method(Symbol, usize),
}

/// All classes of a linked program, indexed by class index.
#[derive(Debug, Default, Clone)]
pub struct ClassTable {
    classes: Vec<CClass>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: CClass) -> usize {
        self.classes.push(class);
        self.classes.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&CClass> {
        self.classes.get(index)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Instance variable count of a class, used to size heap objects.
    pub fn nvars(&self, index: usize) -> usize {
        self.classes.get(index).map_or(0, |class| class.nvars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut symbols = Symbols::new();
        let a = symbols.intern("x");
        let b = symbols.intern("get");
        assert_eq!(symbols.intern("x"), a);
        assert_ne!(a, b);
        assert_eq!(symbols.name(b), "get");
        assert_eq!(symbols.lookup("missing"), None);
    }

    #[test]
    fn test_var_slots_numbered_in_order() {
        let mut symbols = Symbols::new();
        let x = symbols.intern("x");
        let get = symbols.intern("get");
        let y = symbols.intern("y");
        let class = CClass::new([
            SlotDecl::Var(x),
            SlotDecl::Method(get, 128),
            SlotDecl::Var(y),
        ]);

        assert_eq!(class.nvars, 2);
        assert_eq!(class.nslots, 3);
        assert_eq!(class.find(x).unwrap().kind, SlotKind::Var(0));
        assert_eq!(class.find(y).unwrap().kind, SlotKind::Var(1));
        assert_eq!(class.find(get).unwrap().kind, SlotKind::Code(128));
    }

    #[test]
    fn test_find_missing_slot() {
        let mut symbols = Symbols::new();
        let x = symbols.intern("x");
        let z = symbols.intern("z");
        let class = CClass::new([SlotDecl::Var(x)]);
        assert!(class.find(z).is_none());
    }

    #[test]
    fn test_table_nvars() {
        let mut table = ClassTable::new();
        let mut symbols = Symbols::new();
        let idx = table.push(CClass::new([SlotDecl::Var(symbols.intern("a"))]));
        assert_eq!(table.nvars(idx), 1);
        assert_eq!(table.len(), 1);
    }
}

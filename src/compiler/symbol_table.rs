use rustc_hash::FxHashMap;

use crate::object::BUILTINS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The function currently being compiled, referenced by its own name.
    FunctionSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Name resolution for one function body (or the top level).
///
/// An enclosed table owns its outer table for as long as the nested function is
/// being compiled; [`SymbolTable::into_outer`] hands it back when the compiler
/// leaves that scope.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: FxHashMap<String, Symbol>,
    captured: FxHashMap<String, Symbol>,
    free_symbols: Vec<Symbol>,
    num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A global table with every builtin bound at its registry position.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            table.define_builtin(index, builtin.name);
        }
        table
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// The outer-scope symbols captured by this table, in capture order.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// Looks `name` up among this table's own definitions only.
    pub fn defined(&self, name: &str) -> Option<&Symbol> {
        self.store.get(name)
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::FunctionSelf,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name).or_else(|| self.captured.get(name)) {
            return Some(symbol.clone());
        }

        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::FunctionSelf => {
                Some(self.define_free(symbol))
            }
        }
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.captured.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            scope,
            index,
        }
    }

    #[test]
    fn test_define() {
        let mut global = SymbolTable::new();
        assert_eq!(global.define("a"), symbol("a", SymbolScope::Global, 0));
        assert_eq!(global.define("b"), symbol("b", SymbolScope::Global, 1));

        let mut first_local = SymbolTable::new_enclosed(global);
        assert_eq!(first_local.define("c"), symbol("c", SymbolScope::Local, 0));
        assert_eq!(first_local.define("d"), symbol("d", SymbolScope::Local, 1));

        let mut second_local = SymbolTable::new_enclosed(first_local);
        assert_eq!(second_local.define("e"), symbol("e", SymbolScope::Local, 0));
        assert_eq!(second_local.define("f"), symbol("f", SymbolScope::Local, 1));
    }

    #[test]
    fn test_resolve_global() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        assert_eq!(global.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(global.resolve("b"), Some(symbol("b", SymbolScope::Global, 1)));
        assert_eq!(global.resolve("c"), None);
    }

    #[test]
    fn test_resolve_nested_local() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("c");
        first_local.define("d");

        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("e");
        second_local.define("f");

        let expected = [
            symbol("a", SymbolScope::Global, 0),
            symbol("b", SymbolScope::Global, 1),
            symbol("e", SymbolScope::Local, 0),
            symbol("f", SymbolScope::Local, 1),
        ];
        for sym in expected {
            assert_eq!(second_local.resolve(&sym.name), Some(sym));
        }
        assert!(second_local.free_symbols().is_empty());
    }

    #[test]
    fn test_define_resolve_builtins() {
        let global = SymbolTable::with_builtins();
        let first_local = SymbolTable::new_enclosed(global);
        let mut second_local = SymbolTable::new_enclosed(first_local);

        for (index, name) in ["len", "puts", "first", "last", "rest", "push"]
            .into_iter()
            .enumerate()
        {
            assert_eq!(
                second_local.resolve(name),
                Some(symbol(name, SymbolScope::Builtin, index))
            );
        }
        assert!(second_local.free_symbols().is_empty());
    }

    #[test]
    fn test_resolve_free() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("c");
        first_local.define("d");

        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("e");
        second_local.define("f");

        let expected = [
            symbol("a", SymbolScope::Global, 0),
            symbol("b", SymbolScope::Global, 1),
            symbol("c", SymbolScope::Free, 0),
            symbol("d", SymbolScope::Free, 1),
            symbol("e", SymbolScope::Local, 0),
            symbol("f", SymbolScope::Local, 1),
        ];
        for sym in expected {
            assert_eq!(second_local.resolve(&sym.name), Some(sym));
        }

        assert_eq!(
            second_local.free_symbols(),
            &[
                symbol("c", SymbolScope::Local, 0),
                symbol("d", SymbolScope::Local, 1)
            ]
        );
        assert_eq!(second_local.defined("c"), None);

        // Resolving again reuses the capture instead of appending a duplicate.
        second_local.resolve("c");
        assert_eq!(second_local.free_symbols().len(), 2);
    }

    #[test]
    fn test_free_is_recaptured_through_intermediate_scopes() {
        let global = SymbolTable::new();
        let mut outer = SymbolTable::new_enclosed(global);
        outer.define("x");
        let middle = SymbolTable::new_enclosed(outer);
        let mut inner = SymbolTable::new_enclosed(middle);

        assert_eq!(inner.resolve("x"), Some(symbol("x", SymbolScope::Free, 0)));
        assert_eq!(inner.free_symbols(), &[symbol("x", SymbolScope::Free, 0)]);

        let middle = inner.into_outer().unwrap();
        assert_eq!(middle.free_symbols(), &[symbol("x", SymbolScope::Local, 0)]);
    }

    #[test]
    fn test_resolve_unresolvable_free() {
        let mut global = SymbolTable::new();
        global.define("a");

        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("c");

        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("e");

        assert_eq!(second_local.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(second_local.resolve("c"), Some(symbol("c", SymbolScope::Free, 0)));
        assert_eq!(second_local.resolve("e"), Some(symbol("e", SymbolScope::Local, 0)));
        assert_eq!(second_local.resolve("b"), None);
        assert_eq!(second_local.resolve("d"), None);
    }

    #[test]
    fn test_define_and_resolve_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");

        assert_eq!(
            global.resolve("a"),
            Some(symbol("a", SymbolScope::FunctionSelf, 0))
        );
    }

    #[test]
    fn test_shadowing_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");
        global.define("a");

        assert_eq!(global.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
    }

    #[test]
    fn test_later_define_shadows_earlier() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("a");

        assert_eq!(global.resolve("a"), Some(symbol("a", SymbolScope::Global, 1)));
    }
}

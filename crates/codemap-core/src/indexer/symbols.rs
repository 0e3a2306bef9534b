//! Symbol collection over the projected syntax model.

use serde::{Deserialize, Serialize};

use crate::indexer::syntax::{walk, ClassNode, FunctionNode, ImportNode, SyntaxNode, SyntaxVisitor};
use crate::models::{ClassSymbol, FunctionSymbol, ImportSymbol};

/// Symbols of one successfully parsed file, in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSymbols {
    pub classes: Vec<ClassSymbol>,
    pub functions: Vec<FunctionSymbol>,
    pub imports: Vec<ImportSymbol>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Function,
}

struct Scope {
    qualified_name: String,
    kind: ScopeKind,
}

/// Visitor that turns a syntax model into [`ParsedSymbols`], tracking the
/// chain of enclosing scopes for qualified names.
#[derive(Default)]
pub struct SymbolCollector {
    scopes: Vec<Scope>,
    symbols: ParsedSymbols,
}

impl SymbolCollector {
    pub fn collect(nodes: &[SyntaxNode]) -> ParsedSymbols {
        let mut collector = Self::default();
        walk(&mut collector, nodes);
        collector.symbols
    }

    fn qualify(&self, name: &str) -> String {
        match self.scopes.last() {
            Some(scope) => format!("{}.{}", scope.qualified_name, name),
            None => name.to_string(),
        }
    }

    fn enclosing_class(&self) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .find(|scope| scope.kind == ScopeKind::Class)
            .map(|scope| scope.qualified_name.clone())
    }

    fn in_scope(&mut self, qualified_name: String, kind: ScopeKind, body: &[SyntaxNode]) {
        self.scopes.push(Scope {
            qualified_name,
            kind,
        });
        walk(self, body);
        self.scopes.pop();
    }
}

impl SyntaxVisitor for SymbolCollector {
    fn visit_class(&mut self, class: &ClassNode) {
        let qualified_name = self.qualify(&class.name);
        self.symbols.classes.push(ClassSymbol {
            name: class.name.clone(),
            qualified_name: qualified_name.clone(),
            start_line: class.span.start_line,
            end_line: class.span.end_line,
            enclosing_class: self.enclosing_class(),
        });
        self.in_scope(qualified_name, ScopeKind::Class, &class.body);
    }

    fn visit_function(&mut self, function: &FunctionNode) {
        let qualified_name = self.qualify(&function.name);
        let is_method = self
            .scopes
            .last()
            .is_some_and(|scope| scope.kind == ScopeKind::Class);
        self.symbols.functions.push(FunctionSymbol {
            name: function.name.clone(),
            qualified_name: qualified_name.clone(),
            start_line: function.span.start_line,
            end_line: function.span.end_line,
            parameters: function.parameters.clone(),
            enclosing_class: self.enclosing_class(),
            is_method,
            is_async: function.is_async,
        });
        self.in_scope(qualified_name, ScopeKind::Function, &function.body);
    }

    fn visit_import(&mut self, import: &ImportNode) {
        for binding in &import.bindings {
            self.symbols.imports.push(ImportSymbol {
                module: binding.module.clone(),
                alias: binding.alias.clone(),
                line: import.line,
            });
        }
    }
}

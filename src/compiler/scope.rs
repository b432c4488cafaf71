//! Lexical slot bookkeeping for one lambda under compilation.
//!
//! Closure layout agreed with the interpreter: slots `[0, argc)` are the
//! parameters, `[argc, argc + parent_size)` is the copied closure of the
//! defining invocation, and locals are allocated above that. A variable of
//! an enclosing lambda with slot `j` in that lambda's numbering is therefore
//! always reachable here at `argc + j`.

use std::collections::HashMap;

use crate::symbol::SymId;

pub struct FnScope {
    pub argc: usize,
    /// Total closure size of the enclosing lambda; zero at top level.
    pub parent_size: usize,
    blocks: Vec<HashMap<SymId, usize>>,
    locals: usize,
}

impl FnScope {
    pub fn new(params: &[SymId], parent_size: usize) -> Self {
        let mut bindings = HashMap::new();
        for (slot, id) in params.iter().enumerate() {
            bindings.insert(*id, slot);
        }
        Self {
            argc: params.len(),
            parent_size,
            blocks: vec![bindings],
            locals: 0,
        }
    }

    pub fn push_block(&mut self) {
        self.blocks.push(HashMap::new());
    }

    pub fn pop_block(&mut self) {
        self.blocks.pop();
    }

    /// Allocate a fresh local slot above the capture region. Slots are never
    /// reused within a lambda, so shadowed bindings keep their own storage.
    pub fn declare_local(&mut self, id: SymId) -> usize {
        let slot = self.argc + self.parent_size + self.locals;
        self.locals += 1;
        self.blocks
            .last_mut()
            .expect("a lambda scope always has a block")
            .insert(id, slot);
        slot
    }

    /// Find a binding in this lambda, innermost block first.
    pub fn lookup(&self, id: SymId) -> Option<usize> {
        self.blocks.iter().rev().find_map(|block| block.get(&id).copied())
    }

    pub fn total_size(&self) -> usize {
        self.argc + self.parent_size + self.locals
    }

    /// The bindings visible at this point, captured for lambdas compiled
    /// later.
    pub fn snapshot(&self) -> Vec<HashMap<SymId, usize>> {
        self.blocks.clone()
    }
}

/// What a nested lambda needs to know about one enclosing lambda in order
/// to address captured variables.
#[derive(Clone)]
pub struct EnclosingScope {
    pub argc: usize,
    pub total_size: usize,
    pub blocks: Vec<HashMap<SymId, usize>>,
}

impl EnclosingScope {
    fn lookup(&self, id: SymId) -> Option<usize> {
        self.blocks.iter().rev().find_map(|block| block.get(&id).copied())
    }
}

/// Resolve a name against a chain of enclosing lambdas (outermost first),
/// returning its slot in the numbering of the innermost one.
pub fn resolve_enclosing(chain: &[EnclosingScope], id: SymId) -> Option<usize> {
    let (innermost, outer) = chain.split_last()?;
    if let Some(slot) = innermost.lookup(id) {
        return Some(slot);
    }
    let outer_slot = resolve_enclosing(outer, id)?;
    Some(innermost.argc + outer_slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    #[test]
    fn test_params_occupy_leading_slots() {
        let a = intern("scope-a");
        let b = intern("scope-b");
        let scope = FnScope::new(&[a, b], 0);
        assert_eq!(scope.lookup(a), Some(0));
        assert_eq!(scope.lookup(b), Some(1));
    }

    #[test]
    fn test_locals_start_above_capture_region() {
        let a = intern("scope-p");
        let x = intern("scope-x");
        let mut scope = FnScope::new(&[a], 3);
        assert_eq!(scope.declare_local(x), 4);
        assert_eq!(scope.total_size(), 5);
    }

    #[test]
    fn test_inner_block_shadows_outer() {
        let x = intern("scope-shadow");
        let mut scope = FnScope::new(&[x], 0);
        scope.push_block();
        let inner = scope.declare_local(x);
        assert_eq!(scope.lookup(x), Some(inner));
        scope.pop_block();
        assert_eq!(scope.lookup(x), Some(0));
    }

    #[test]
    fn test_capture_resolution_offsets_by_argc() {
        let outer_var = intern("scope-captured");
        let mut outer_blocks = vec![HashMap::new()];
        outer_blocks[0].insert(outer_var, 1);
        let chain = vec![EnclosingScope {
            argc: 2,
            total_size: 3,
            blocks: outer_blocks,
        }];
        // the nested lambda sees the parent's slot 1 at its own argc + 1,
        // which the caller adds; resolve returns the parent-relative slot
        assert_eq!(resolve_enclosing(&chain, outer_var), Some(1));
    }

    #[test]
    fn test_two_level_capture_goes_through_each_argc() {
        let v = intern("scope-deep");
        let mut grand_blocks = vec![HashMap::new()];
        grand_blocks[0].insert(v, 0);
        let chain = vec![
            EnclosingScope {
                argc: 1,
                total_size: 1,
                blocks: grand_blocks,
            },
            EnclosingScope {
                argc: 2,
                total_size: 3,
                blocks: vec![HashMap::new()],
            },
        ];
        // slot 0 in the grandparent is at 2 + 0 in the parent's numbering
        assert_eq!(resolve_enclosing(&chain, v), Some(2));
    }
}

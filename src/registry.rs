//! Context registry
//!
//! Maps every context seen during a session to its call tree. Contexts
//! are kept in first-seen order so reports list them deterministically.

use fnv::FnvHashMap;

use crate::call_tree::CallTree;
use crate::event::ContextId;

#[derive(Debug, Default)]
pub struct ContextRegistry {
    trees: Vec<(ContextId, CallTree)>,
    index: FnvHashMap<ContextId, usize>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a context's tree, creating a fresh one on first sight
    ///
    /// The flag is true when the tree was just created.
    pub fn get_or_create(&mut self, context: ContextId) -> (&mut CallTree, bool) {
        let (slot, created) = match self.index.get(&context) {
            Some(&slot) => (slot, false),
            None => {
                let slot = self.trees.len();
                self.trees.push((context, CallTree::new()));
                self.index.insert(context, slot);
                (slot, true)
            }
        };
        (&mut self.trees[slot].1, created)
    }

    pub fn get(&self, context: ContextId) -> Option<&CallTree> {
        self.index.get(&context).map(|&slot| &self.trees[slot].1)
    }

    pub fn get_mut(&mut self, context: ContextId) -> Option<&mut CallTree> {
        match self.index.get(&context) {
            Some(&slot) => Some(&mut self.trees[slot].1),
            None => None,
        }
    }

    pub fn contains(&self, context: ContextId) -> bool {
        self.index.contains_key(&context)
    }

    /// Contexts and trees in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &CallTree)> {
        self.trees.iter().map(|(id, tree)| (*id, tree))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ContextId, &mut CallTree)> {
        self.trees.iter_mut().map(|(id, tree)| (*id, tree))
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn clear(&mut self) {
        self.trees.clear();
        self.index.clear();
    }
}

//! The instruction tree a plan builds and a backend consumes.
//!
//! Nodes live in an index arena; children own nothing but indices and each
//! node carries a parent index, so validation and dispatch can walk upward
//! without reference cycles. Internal nodes are render *passes* carrying
//! inherited state; leaves are vertex submissions or blits.

use std::collections::HashMap;

use crate::{BlendFactor, Buffer, Shader, TestFunc, Texture, Value, WriteMask};

/// A render target: a texture plus its blend factors.
#[derive(Debug, Clone)]
pub struct Target {
    pub texture: Texture,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
}

/// A pass override: the effective value plus whether it was set explicitly
/// on this pass.
///
/// Children inherit the parent's *value* when they do not set their own,
/// but inheritance never marks the child explicit — append validation
/// wants to know where a value was actually written.
#[derive(Debug, Clone, Copy)]
pub struct StateSlot<T> {
    pub value: T,
    pub explicit: bool,
}

impl<T> StateSlot<T> {
    pub fn unset(value: T) -> Self {
        Self {
            value,
            explicit: false,
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.explicit = true;
    }

    /// Copy the parent's effective value without claiming explicitness.
    pub fn inherit(&mut self, parent: &StateSlot<T>)
    where
        T: Copy,
    {
        if !self.explicit {
            self.value = parent.value;
        }
    }
}

/// A uniform store with O(1) lookup by name and a deterministic bind order.
///
/// Replacing a value keeps the name at its first-insertion position.
#[derive(Debug, Clone, Default)]
pub struct UniformStore {
    by_name: HashMap<String, Value>,
    order: Vec<String>,
}

impl UniformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, value: Value) {
        if self.by_name.insert(name.clone(), value).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate pairs in insertion order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order.iter().map(|name| {
            let value = self
                .by_name
                .get(name)
                .unwrap_or_else(|| unreachable!("ordered name missing from store"));
            (name.as_str(), value)
        })
    }
}

/// The state carried by a pass node.
#[derive(Debug, Clone)]
pub struct PassState {
    /// True iff the group introduced neither new targets nor a new shader;
    /// a fake pass shares the parent's depth and framebuffer slot.
    pub fake: bool,
    pub shader: Option<Shader>,
    pub targets: Vec<Target>,
    pub uniforms: UniformStore,
    /// Attribute names the author intends to bind; validated against the
    /// in-scope shader at compile time.
    pub attributes: Vec<String>,

    /// Viewport override: x, y, width, height.
    pub dest: StateSlot<[i32; 4]>,
    pub write_mask: StateSlot<WriteMask>,
    pub depth_func: StateSlot<TestFunc>,
    pub clockwise_faces: StateSlot<bool>,
    pub backface_cull: StateSlot<bool>,
}

impl PassState {
    pub fn new() -> Self {
        Self {
            fake: false,
            shader: None,
            targets: Vec::new(),
            uniforms: UniformStore::new(),
            attributes: Vec::new(),
            dest: StateSlot::unset([0; 4]),
            write_mask: StateSlot::unset(WriteMask::empty()),
            depth_func: StateSlot::unset(TestFunc::Lequal),
            clockwise_faces: StateSlot::unset(false),
            backface_cull: StateSlot::unset(true),
        }
    }
}

impl Default for PassState {
    fn default() -> Self {
        Self::new()
    }
}

/// One instruction.
#[derive(Debug, Clone)]
pub enum Instr {
    Pass(PassState),
    Vertices { buffers: Vec<Buffer>, instances: u32 },
    Blit { src: Texture },
}

/// One tree node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Pass depth, indexing the framebuffer stack. Fake passes repeat the
    /// parent's depth.
    pub depth: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub instr: Instr,
}

/// The instruction tree. Index 0 is the root once one exists.
#[derive(Debug, Clone, Default)]
pub struct InstrTree {
    nodes: Vec<Node>,
}

impl InstrTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then_some(0)
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Install `instr` as the root, discarding any previous tree.
    pub fn set_root(&mut self, depth: u32, instr: Instr) -> usize {
        self.nodes.clear();
        self.nodes.push(Node {
            depth,
            parent: None,
            children: Vec::new(),
            instr,
        });
        0
    }

    /// Append `instr` as the last child of `parent`.
    pub fn add_child(&mut self, parent: usize, depth: u32, instr: Instr) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            depth,
            parent: Some(parent),
            children: Vec::new(),
            instr,
        });
        self.nodes[parent].children.push(index);
        index
    }

    /// The pass state at `index`. Panics if the node is not a pass; cursor
    /// and parent nodes always are.
    pub fn pass(&self, index: usize) -> &PassState {
        match &self.nodes[index].instr {
            Instr::Pass(pass) => pass,
            _ => unreachable!("node {index} is not a pass"),
        }
    }

    /// Walk from `index` to the root, inclusive.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let mut next = Some(index);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.nodes[current].parent;
            Some(current)
        })
    }

    /// Node indices in pre-order, children in insertion order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        while let Some(index) = stack.pop() {
            order.push(index);
            for &child in self.nodes[index].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// The number of nodes on the longest root-to-leaf path; zero for an
    /// empty tree.
    pub fn max_height(&self) -> u32 {
        fn height(nodes: &[Node], index: usize) -> u32 {
            1 + nodes[index]
                .children
                .iter()
                .map(|&child| height(nodes, child))
                .max()
                .unwrap_or(0)
        }
        if self.nodes.is_empty() {
            0
        } else {
            height(&self.nodes, 0)
        }
    }

    /// The previous sibling of `index`, if any.
    pub fn prev_sibling(&self, index: usize) -> Option<usize> {
        let parent = self.nodes[index].parent?;
        let siblings = &self.nodes[parent].children;
        let position = siblings.iter().position(|&c| c == index)?;
        (position > 0).then(|| siblings[position - 1])
    }

    pub fn is_first_child(&self, index: usize) -> bool {
        match self.nodes[index].parent {
            Some(parent) => self.nodes[parent].children.first() == Some(&index),
            None => true,
        }
    }

    pub fn is_last_child(&self, index: usize) -> bool {
        match self.nodes[index].parent {
            Some(parent) => self.nodes[parent].children.last() == Some(&index),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass() -> Instr {
        Instr::Pass(PassState::new())
    }

    #[test]
    fn uniform_store_keeps_first_insertion_order() {
        let mut store = UniformStore::new();
        store.insert("a".into(), Value::Int(1));
        store.insert("b".into(), Value::Int(2));
        store.insert("a".into(), Value::Int(3));

        let ordered: Vec<_> = store.iter_ordered().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(ordered, ["a", "b"]);
        assert_eq!(store.len(), 2);
        assert!(matches!(store.get("a"), Some(Value::Int(3))));
    }

    #[test]
    fn max_height_counts_nodes_on_longest_path() {
        let mut tree = InstrTree::new();
        assert_eq!(tree.max_height(), 0);

        let root = tree.set_root(0, pass());
        assert_eq!(tree.max_height(), 1);

        let inner = tree.add_child(root, 1, pass());
        tree.add_child(
            inner,
            2,
            Instr::Vertices {
                buffers: Vec::new(),
                instances: 1,
            },
        );
        assert_eq!(tree.max_height(), 3);
    }

    #[test]
    fn preorder_visits_children_in_insertion_order() {
        let mut tree = InstrTree::new();
        let root = tree.set_root(0, pass());
        let a = tree.add_child(root, 1, pass());
        let b = tree.add_child(root, 1, pass());
        let a1 = tree.add_child(a, 2, pass());
        assert_eq!(tree.preorder(), vec![root, a, a1, b]);
    }

    #[test]
    fn sibling_queries() {
        let mut tree = InstrTree::new();
        let root = tree.set_root(0, pass());
        let a = tree.add_child(root, 1, pass());
        let b = tree.add_child(root, 1, pass());

        assert!(tree.is_first_child(a));
        assert!(!tree.is_first_child(b));
        assert!(tree.is_last_child(b));
        assert_eq!(tree.prev_sibling(b), Some(a));
        assert_eq!(tree.prev_sibling(a), None);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let mut tree = InstrTree::new();
        let root = tree.set_root(0, pass());
        let a = tree.add_child(root, 1, pass());
        let b = tree.add_child(a, 2, pass());
        let chain: Vec<_> = tree.ancestors(b).collect();
        assert_eq!(chain, vec![b, a, root]);
    }

    #[test]
    fn set_root_discards_previous_tree() {
        let mut tree = InstrTree::new();
        let root = tree.set_root(0, pass());
        tree.add_child(root, 1, pass());
        assert_eq!(tree.len(), 2);

        tree.set_root(0, pass());
        assert_eq!(tree.len(), 1);
    }
}

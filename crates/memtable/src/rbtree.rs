//! Arena-backed red-black tree.
//!
//! Nodes live in a `Vec` and refer to each other by index, so parent links
//! need no shared ownership. The memtable never deletes individual keys (a
//! delete is a tombstone value), so the arena only grows until the whole tree
//! is dropped.
//!
//! Invariants after every insert:
//!
//! ```text
//! 1. every node is red or black; the root is black
//! 2. a red node has no red child
//! 3. every root-to-leaf path has the same number of black nodes
//! ```

use std::borrow::Borrow;
use std::cmp::Ordering;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    parent: usize,
    left: usize,
    right: usize,
    color: Color,
}

/// An ordered map with O(log n) insert and lookup.
#[derive(Debug)]
pub struct RbTree<K, V> {
    nodes: Vec<Node<K, V>>,
    root: usize,
}

impl<K: Ord, V> RbTree<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
        }
    }

    /// Inserts `key`, replacing and returning the previous value if present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut parent = NIL;
        let mut cur = self.root;
        let mut went_left = false;

        while cur != NIL {
            parent = cur;
            match key.cmp(&self.nodes[cur].key) {
                Ordering::Less => {
                    cur = self.nodes[cur].left;
                    went_left = true;
                }
                Ordering::Greater => {
                    cur = self.nodes[cur].right;
                    went_left = false;
                }
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.nodes[cur].value, value));
                }
            }
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            key,
            value,
            parent,
            left: NIL,
            right: NIL,
            color: Color::Red,
        });

        if parent == NIL {
            self.root = idx;
        } else if went_left {
            self.nodes[parent].left = idx;
        } else {
            self.nodes[parent].right = idx;
        }

        self.fix_insert(idx);
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while cur != NIL {
            let node = &self.nodes[cur];
            match key.cmp(node.key.borrow()) {
                Ordering::Less => cur = node.left,
                Ordering::Greater => cur = node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    /// In-order (ascending key) traversal.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut it = Iter {
            tree: self,
            stack: Vec::new(),
            remaining: self.nodes.len(),
        };
        it.push_left_spine(self.root);
        it
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn color(&self, idx: usize) -> Color {
        if idx == NIL {
            Color::Black
        } else {
            self.nodes[idx].color
        }
    }

    fn parent(&self, idx: usize) -> usize {
        self.nodes[idx].parent
    }

    fn fix_insert(&mut self, mut z: usize) {
        while self.color(self.parent(z)) == Color::Red {
            // A red parent is never the root, so the grandparent exists.
            let p = self.parent(z);
            let g = self.parent(p);

            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;

        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        self.replace_child(self.nodes[x].parent, x, y);
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;

        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        self.replace_child(self.nodes[x].parent, x, y);
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    /// Points `parent`'s link to `old` at `new` (or the root if `parent` is NIL).
    fn replace_child(&mut self, parent: usize, old: usize, new: usize) {
        self.nodes[new].parent = parent;
        if parent == NIL {
            self.root = new;
        } else if self.nodes[parent].left == old {
            self.nodes[parent].left = new;
        } else {
            self.nodes[parent].right = new;
        }
    }

    /// Verifies the red-black and ordering invariants, returning the black
    /// height on success.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<usize, String> {
        if self.root == NIL {
            return Ok(0);
        }
        if self.color(self.root) != Color::Black {
            return Err("root is red".into());
        }
        self.check_node(self.root, None, None)
    }

    #[cfg(test)]
    fn check_node(&self, idx: usize, lo: Option<&K>, hi: Option<&K>) -> Result<usize, String> {
        if idx == NIL {
            return Ok(1);
        }
        let n = &self.nodes[idx];
        if lo.is_some_and(|lo| n.key <= *lo) || hi.is_some_and(|hi| n.key >= *hi) {
            return Err(format!("node {} violates key ordering", idx));
        }
        for child in [n.left, n.right] {
            if child != NIL && self.nodes[child].parent != idx {
                return Err(format!("node {} has a stale parent link", child));
            }
            if n.color == Color::Red && self.color(child) == Color::Red {
                return Err(format!("red node {} has a red child", idx));
            }
        }
        let left = self.check_node(n.left, lo, Some(&n.key))?;
        let right = self.check_node(n.right, Some(&n.key), hi)?;
        if left != right {
            return Err(format!("black height mismatch under node {}", idx));
        }
        Ok(left + usize::from(n.color == Color::Black))
    }
}

impl<K: Ord, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending iterator over `(&key, &value)`.
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    stack: Vec<usize>,
    remaining: usize,
}

impl<K, V> Iter<'_, K, V> {
    fn push_left_spine(&mut self, mut idx: usize) {
        while idx != NIL {
            self.stack.push(idx);
            idx = self.tree.nodes[idx].left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let tree: &'a RbTree<K, V> = self.tree;
        self.push_left_spine(tree.nodes[idx].right);
        self.remaining -= 1;
        let node = &tree.nodes[idx];
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

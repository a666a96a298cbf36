use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound on the number of levels a node may carry.
pub const MAX_LEVEL: usize = 24;

const HEAD: usize = 0;
const NIL: usize = usize::MAX;

struct Node<K, V> {
    entry: Option<(K, V)>,
    forward: Vec<usize>,
    /// Base-level steps from this node to `forward[level]`. A `NIL` link
    /// counts as the slot one past the last entry.
    width: Vec<usize>,
}

/// Probabilistic skip list ordered by key, with per-link widths so that
/// insertion rank and positional lookup are both O(log n) on average.
///
/// Nodes live in an arena and link to each other by index; removed slots
/// are recycled.
pub struct SkipList<K, V> {
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    len: usize,
    level: usize,
    unique: bool,
    rng: StdRng,
}

impl<K: Ord, V> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> SkipList<K, V> {
    /// Create an empty multimap; equal keys keep insertion order.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Same as [`SkipList::new`] with a fixed seed for the level generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::build(false, seed)
    }

    /// Create an empty map where a repeated key is a no-op.
    pub fn unique() -> Self {
        Self::unique_with_seed(rand::random())
    }

    pub fn unique_with_seed(seed: u64) -> Self {
        Self::build(true, seed)
    }

    fn build(unique: bool, seed: u64) -> Self {
        let head = Node {
            entry: None,
            forward: vec![NIL; MAX_LEVEL],
            width: vec![1; MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            len: 0,
            level: 1,
            unique,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn key_at(&self, index: usize) -> &K {
        match &self.nodes[index].entry {
            Some((key, _)) => key,
            None => unreachable!("head node has no key"),
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.random_bool(0.5) {
            level += 1;
        }
        level
    }

    fn allocate(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Insert `value` under `key` and return the 1-based count of entries at
    /// or before it.
    ///
    /// In unique mode an existing key leaves the list untouched and its rank
    /// is returned instead.
    pub fn insert(&mut self, key: K, value: V) -> usize {
        let mut chain = [HEAD; MAX_LEVEL];
        let mut rank_at = [0usize; MAX_LEVEL];
        let mut current = HEAD;
        let mut rank = 0;

        for level in (0..self.level).rev() {
            loop {
                let next = self.nodes[current].forward[level];
                if next == NIL || *self.key_at(next) > key {
                    break;
                }
                rank += self.nodes[current].width[level];
                current = next;
            }
            chain[level] = current;
            rank_at[level] = rank;
        }

        if self.unique && current != HEAD && *self.key_at(current) == key {
            return rank;
        }

        let new_rank = rank + 1;
        let height = self.random_level();
        if height > self.level {
            // chain/rank_at above the old level already point at the head
            self.level = height;
        }

        let index = self.allocate(Node {
            entry: Some((key, value)),
            forward: vec![NIL; height],
            width: vec![0; height],
        });

        for level in 0..height {
            let prev = chain[level];
            let distance = new_rank - rank_at[level];
            let prev_width = self.nodes[prev].width[level];
            self.nodes[index].forward[level] = self.nodes[prev].forward[level];
            self.nodes[index].width[level] = prev_width + 1 - distance;
            self.nodes[prev].forward[level] = index;
            self.nodes[prev].width[level] = distance;
        }
        for level in height..MAX_LEVEL {
            self.nodes[chain[level]].width[level] += 1;
        }

        self.len += 1;
        new_rank
    }

    /// Entry at the 1-based `rank`.
    pub fn get_by_rank(&self, rank: usize) -> Option<(&K, &V)> {
        if rank == 0 || rank > self.len {
            return None;
        }
        let mut current = HEAD;
        let mut travelled = 0;
        for level in (0..self.level).rev() {
            loop {
                let next = self.nodes[current].forward[level];
                let step = self.nodes[current].width[level];
                if next == NIL || travelled + step > rank {
                    break;
                }
                travelled += step;
                current = next;
            }
            if travelled == rank {
                break;
            }
        }
        self.nodes[current].entry.as_ref().map(|(k, v)| (k, v))
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        match self.nodes[HEAD].forward[0] {
            NIL => None,
            index => self.nodes[index].entry.as_ref().map(|(k, v)| (k, v)),
        }
    }

    /// Remove and return the entry with the smallest key (earliest inserted
    /// among equal keys).
    pub fn pop_first(&mut self) -> Option<(K, V)> {
        let first = self.nodes[HEAD].forward[0];
        if first == NIL {
            return None;
        }

        let height = self.nodes[first].forward.len();
        for level in 0..MAX_LEVEL {
            if level < height {
                let removed_width = self.nodes[first].width[level];
                self.nodes[HEAD].forward[level] = self.nodes[first].forward[level];
                self.nodes[HEAD].width[level] += removed_width;
                self.nodes[HEAD].width[level] -= 1;
            } else {
                self.nodes[HEAD].width[level] -= 1;
            }
        }
        while self.level > 1 && self.nodes[HEAD].forward[self.level - 1] == NIL {
            self.level -= 1;
        }

        let node = &mut self.nodes[first];
        node.forward.clear();
        node.width.clear();
        let entry = node.entry.take();
        self.free.push(first);
        self.len -= 1;
        entry
    }

    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[HEAD].forward.fill(NIL);
        self.nodes[HEAD].width.fill(1);
        self.free.clear();
        self.len = 0;
        self.level = 1;
    }

    /// Ascending traversal. Each call starts again from the smallest key.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            next: self.nodes[HEAD].forward[0],
            remaining: self.len,
        }
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (key, value) in self.iter() {
            f(key, value);
        }
    }
}

pub struct Iter<'a, K, V> {
    list: &'a SkipList<K, V>,
    next: usize,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let node = &self.list.nodes[self.next];
        self.next = node.forward[0];
        self.remaining -= 1;
        node.entry.as_ref().map(|(k, v)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K: Ord, V> IntoIterator for &'a SkipList<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//! Ordered storage for scheduled work.

mod skiplist;

pub use skiplist::{Iter, SkipList, MAX_LEVEL};

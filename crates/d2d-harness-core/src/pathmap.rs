//! Reversed path-segment index for longest common suffix lookups.
//!
//! Every distinct path segment gets a small integer id. Each indexed path
//! is reversed (file name first) and, when built with subpaths, every
//! leading run of that reversed sequence becomes a key; each key holds the
//! run length and the ids of all paths that produced it.
//!
//! A lookup reverses the query path the same way and returns the longest
//! key that is a leading run of the query, which is the longest common
//! suffix shared with any indexed path.
//!
//! # Example
//!
//! ```rust
//! use d2d_harness_core::pathmap::PathIndex;
//!
//! let index = PathIndex::build(
//!     vec![(1, "a/b/c.txt".to_string()), (2, "x/c.txt".to_string())],
//!     true,
//! );
//! let found = index.find_paths("y/b/c.txt").unwrap();
//! assert_eq!(found.matched_path_length, 2);
//! assert_eq!(found.resource_ids, vec![1]);
//! ```

use std::collections::HashMap;

use crate::models::{path_segments, ResourceId};

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Number of trailing path segments shared with the query.
    pub matched_path_length: usize,
    /// Ids of every indexed path sharing that suffix, in insertion order.
    pub resource_ids: Vec<ResourceId>,
}

impl Match {
    /// More candidates than matched segments means the suffix does not
    /// constrain the candidates enough to trust any of them.
    pub fn is_ambiguous(&self) -> bool {
        self.resource_ids.len() > self.matched_path_length
    }
}

/// Lookup outcome separating "nothing found" from "found too much".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathLookup {
    Found(Match),
    Ambiguous(Match),
    NotFound,
}

/// In-memory index over `(id, path)` pairs. Built per matching pass.
#[derive(Debug, Default)]
pub struct PathIndex {
    segment_ids: HashMap<String, u32>,
    entries: HashMap<Vec<u32>, (usize, Vec<ResourceId>)>,
    with_subpaths: bool,
    max_depth: usize,
}

impl PathIndex {
    /// Build an index. With `with_subpaths` every trailing sub-path of each
    /// path is indexed; without it only whole paths are.
    pub fn build<I>(pairs: I, with_subpaths: bool) -> Self
    where
        I: IntoIterator<Item = (ResourceId, String)>,
    {
        let mut index = PathIndex {
            with_subpaths,
            ..Default::default()
        };
        for (id, path) in pairs {
            index.add(id, &path);
        }
        index
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(&mut self, id: ResourceId, path: &str) {
        let reversed: Vec<u32> = {
            let mut segments: Vec<&str> = path_segments(path).collect();
            segments.reverse();
            segments
                .into_iter()
                .map(|segment| self.intern(segment))
                .collect()
        };
        if reversed.is_empty() {
            return;
        }
        self.max_depth = self.max_depth.max(reversed.len());

        if self.with_subpaths {
            for len in 1..=reversed.len() {
                self.insert_key(reversed[..len].to_vec(), id);
            }
        } else {
            self.insert_key(reversed, id);
        }
    }

    fn intern(&mut self, segment: &str) -> u32 {
        let next = self.segment_ids.len() as u32;
        *self.segment_ids.entry(segment.to_string()).or_insert(next)
    }

    fn insert_key(&mut self, key: Vec<u32>, id: ResourceId) {
        let len = key.len();
        self.entries
            .entry(key)
            .or_insert_with(|| (len, Vec::new()))
            .1
            .push(id);
    }

    /// Longest-suffix lookup.
    ///
    /// Returns `None` when the corpus is empty or when not even the file
    /// name of `path` is known to the index.
    pub fn find_paths(&self, path: &str) -> Option<Match> {
        let mut query: Vec<u32> = Vec::new();
        for segment in path_segments(path).collect::<Vec<_>>().into_iter().rev() {
            // An unknown segment cannot be part of any key.
            match self.segment_ids.get(segment) {
                Some(id) => query.push(*id),
                None => break,
            }
            if query.len() == self.max_depth {
                break;
            }
        }

        (1..=query.len()).rev().find_map(|len| {
            self.entries
                .get(&query[..len])
                .map(|(matched_path_length, ids)| Match {
                    matched_path_length: *matched_path_length,
                    resource_ids: ids.clone(),
                })
        })
    }

    /// Like [`find_paths`](Self::find_paths) but classifies ambiguous matches.
    pub fn lookup(&self, path: &str) -> PathLookup {
        match self.find_paths(path) {
            None => PathLookup::NotFound,
            Some(found) if found.is_ambiguous() => PathLookup::Ambiguous(found),
            Some(found) => PathLookup::Found(found),
        }
    }
}

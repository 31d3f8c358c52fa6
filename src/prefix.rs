//! Prefix bookkeeping and BIRD fragment rendering.
//!
//! A [`PrefixSet`] holds the prefixes currently advertised through one BIRD
//! filter function. A [`PrefixCollection`] maps function names to their
//! sets and renders the whole configuration fragment.
//!
//! Rendered output is deterministic: function blocks appear in ascending
//! lexical order of their name, so equal collections always produce
//! byte-identical fragments. The no-op detection in the fragment writer
//! relies on this.

use std::collections::BTreeMap;
use std::fmt::Write;

use ipnet::IpNet;
use tracing::{debug, warn};

/// Header prepended to every generated fragment.
const FRAGMENT_HEADER: &str = "# DO NOT EDIT MANUALLY\n";

/// An ordered, de-duplicated list of prefixes behind one filter function.
///
/// Order is insertion order, except that removal swaps the last element
/// into the vacated slot. The relative order of prefixes carries no meaning
/// to BIRD (the function body is a set match), so removal is O(1).
#[derive(Debug, Clone)]
pub struct PrefixSet {
    function_name: String,
    prefixes: Vec<IpNet>,
}

impl PrefixSet {
    /// Creates an empty set rendering as `function <name>()`.
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            prefixes: Vec::new(),
        }
    }

    /// Adds a prefix to the set. Duplicates are skipped.
    pub fn add(&mut self, prefix: IpNet) {
        // shouldn't really happen, the configuration rejects duplicates
        if self.prefixes.contains(&prefix) {
            warn!(%prefix, "duplicate prefix, skipping");
            return;
        }

        debug!(%prefix, "adding prefix to prefix set");
        self.prefixes.push(prefix);
    }

    /// Removes a prefix from the set if present.
    pub fn remove(&mut self, prefix: IpNet) {
        match self.prefixes.iter().position(|p| *p == prefix) {
            Some(i) => {
                debug!(%prefix, "removing prefix from prefix set");
                self.prefixes.swap_remove(i);
            }
            None => warn!(%prefix, "prefix not found in prefix set, skipping"),
        }
    }

    /// Number of prefixes currently in the set.
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Prefixes in their current internal order.
    pub fn prefixes(&self) -> &[IpNet] {
        &self.prefixes
    }

    /// Renders the BIRD function definition for this set.
    ///
    /// An empty set returns `false`, otherwise the body matches `net`
    /// against the prefix list. The last prefix carries no trailing comma.
    pub fn render(&self) -> String {
        let mut out = format!("function {}()\n{{\n\treturn ", self.function_name);

        if self.prefixes.is_empty() {
            out.push_str("false;\n");
        } else {
            out.push_str("net ~ [\n");
            for (i, prefix) in self.prefixes.iter().enumerate() {
                let suffix = if i == self.prefixes.len() - 1 { "" } else { "," };
                let _ = writeln!(out, "\t\t{prefix}{suffix}");
            }
            out.push_str("\t];\n");
        }

        out.push_str("}\n");
        out
    }
}

/// Prefix sets keyed by BIRD function name.
///
/// Sets are created on first use and kept for the lifetime of the process,
/// even when they become empty again. The map is a `BTreeMap` so rendering
/// iterates function names in sorted order.
#[derive(Debug, Clone, Default)]
pub struct PrefixCollection {
    sets: BTreeMap<String, PrefixSet>,
}

impl PrefixCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prefix under the given function name, creating the set when
    /// this is the first prefix for that function.
    pub fn add(&mut self, function_name: &str, prefix: IpNet) {
        self.set_mut(function_name).add(prefix);
    }

    /// Removes a prefix under the given function name. Like `add`, this
    /// creates the (empty) set first so the function block always renders.
    pub fn remove(&mut self, function_name: &str, prefix: IpNet) {
        self.set_mut(function_name).remove(prefix);
    }

    /// The set for a function name, if one was ever referenced.
    pub fn get(&self, function_name: &str) -> Option<&PrefixSet> {
        self.sets.get(function_name)
    }

    /// Number of function names in the collection.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    fn set_mut(&mut self, function_name: &str) -> &mut PrefixSet {
        self.sets
            .entry(function_name.to_string())
            .or_insert_with(|| PrefixSet::new(function_name))
    }

    /// Renders the full configuration fragment: the header followed by one
    /// function block per name, in ascending lexical order.
    pub fn render(&self) -> String {
        let mut out = String::from(FRAGMENT_HEADER);
        for set in self.sets.values() {
            out.push_str(&set.render());
        }
        out
    }
}

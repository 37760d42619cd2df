//! `::`-path utilities for parameter names.
//!
//! Composite models name lifted parameters with `prefix::name` paths.
//! Lookup accepts a pattern language (a trailing `*` makes the final piece
//! a prefix wildcard, and a leading `^` anchors the first piece), and
//! display uses [`short_parameter_names`] to drop interior path segments
//! whose removal cannot make two parameters collide.

use std::collections::{BTreeMap, BTreeSet};

use physalia_core::{PhysaliaError, Result};

use crate::model::{parameter_names, Model};

fn split_path(name: &str) -> Vec<String> {
    name.split("::").map(str::to_string).collect()
}

fn join_path(path: &[String]) -> String {
    path.join("::")
}

/// Does a name piece match a query piece? A trailing `*` in the query makes
/// it a prefix match.
fn piece_match(name: &str, query: &str) -> bool {
    match query.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == query,
    }
}

/// Match a query path against a full parameter path.
///
/// Query pieces must appear in the parameter path in order, though not
/// necessarily adjacent. A leading `^` pins the first query piece to the
/// first path piece.
fn path_match(key: &[String], pattern: &[String]) -> bool {
    let mut active = 0;

    if let Some(first) = key.first() {
        if let Some(anchored) = first.strip_prefix('^') {
            match pattern.first() {
                Some(head) if piece_match(head, anchored) => active = 1,
                _ => return false,
            }
        }
    }

    for piece in pattern {
        if active >= key.len() {
            break;
        }
        if piece_match(piece, &key[active]) {
            active += 1;
        }
    }

    active == key.len()
}

/// Indices of parameters whose path matches `extension`.
///
/// # Errors
///
/// `InvalidInput` when the matches do not all share one parent path: an
/// ambiguous key would silently mix unrelated parameters.
pub fn parameters_with_extension(model: &dyn Model, extension: &str) -> Result<Vec<usize>> {
    names_with_extension(&parameter_names(model), extension)
}

/// Slice-level worker behind [`parameters_with_extension`].
pub fn names_with_extension(names: &[String], extension: &str) -> Result<Vec<usize>> {
    if extension.is_empty() {
        return Ok(Vec::new());
    }
    let key = split_path(extension);

    let mut indices = Vec::new();
    let mut skeleton: Option<Vec<String>> = None;

    for (i, name) in names.iter().enumerate() {
        let pattern = split_path(name);
        if !path_match(&key, &pattern) {
            continue;
        }

        let mut this_skeleton = pattern;
        this_skeleton.pop();

        match &skeleton {
            None => skeleton = Some(this_skeleton),
            Some(s) if *s != this_skeleton => {
                return Err(PhysaliaError::InvalidInput(format!(
                    "key '{}' matches both {} and {}",
                    extension,
                    join_path(s),
                    join_path(&this_skeleton)
                )));
            }
            _ => {}
        }

        indices.push(i);
    }

    Ok(indices)
}

fn has_prefix(path: &[String], prefix: &[String]) -> bool {
    path.len() >= prefix.len() && path[..prefix.len()] == *prefix
}

/// Do two grandchild-path sets share any element?
fn overlap(a: &BTreeSet<Vec<String>>, b: &BTreeSet<Vec<String>>) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.intersection(b).next().is_some()
}

/// Drop the child segment from every path under `child_prefix`.
fn remove_prefix(paths: &mut [Vec<String>], child_prefix: &[String]) {
    for path in paths.iter_mut() {
        if has_prefix(path, child_prefix) {
            path.remove(child_prefix.len() - 1);
        }
    }
}

/// Remove internal child segments under `prefix` whose grandchild paths are
/// not shared with any sibling.
fn check_remove_grandchildren(paths: &mut [Vec<String>], prefix: &[String]) {
    let l = prefix.len();

    // Grandchild paths grouped by child name. Leaf children (paths exactly
    // one segment longer than the prefix) are never candidates.
    let mut grandchildren: BTreeMap<String, BTreeSet<Vec<String>>> = BTreeMap::new();
    for path in paths.iter() {
        if !has_prefix(path, prefix) || path.len() == l + 1 {
            continue;
        }
        grandchildren
            .entry(path[l].clone())
            .or_default()
            .insert(path[l + 1..].to_vec());
    }

    for (child, set) in &grandchildren {
        let unique = grandchildren
            .iter()
            .filter(|(other, _)| *other != child)
            .all(|(_, other_set)| !overlap(set, other_set));
        if unique {
            let mut child_prefix = prefix.to_vec();
            child_prefix.push(child.clone());
            remove_prefix(paths, &child_prefix);
        }
    }
}

/// Canonically shorten a set of `::`-paths.
///
/// Interior path segments are removed when the grandchild paths beneath
/// them do not overlap any sibling's, so the result stays collision-free.
/// Deeper segments are considered first; leaf segments are never removed.
/// The result is a fixed point and does not depend on input order.
pub fn short_parameter_names(names: &[String]) -> Vec<String> {
    let mut paths: Vec<Vec<String>> = names.iter().map(|n| split_path(n)).collect();

    for i in 0..paths.len() {
        let mut prefix = paths[i].clone();
        while !prefix.is_empty() {
            prefix.pop();
            check_remove_grandchildren(&mut paths, &prefix);
        }
    }

    paths.iter().map(|p| join_path(p)).collect()
}

/// Shortened display names for every parameter of a model.
pub fn short_model_parameter_names(model: &dyn Model) -> Vec<String> {
    short_parameter_names(&parameter_names(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ── Matching ────────────────────────────────────────────────────────

    #[test]
    fn exact_and_wildcard_pieces() {
        assert!(piece_match("kappa", "kappa"));
        assert!(!piece_match("kappa", "kapp"));
        assert!(piece_match("pi1", "pi*"));
        assert!(piece_match("pi", "pi*"));
        assert!(!piece_match("kappa", "pi*"));
    }

    #[test]
    fn lookup_by_suffix() {
        let names = strings(&["S1::HKY::kappa", "S1::HKY::pi", "mu"]);
        assert_eq!(names_with_extension(&names, "kappa").unwrap(), vec![0]);
        assert_eq!(names_with_extension(&names, "HKY::kappa").unwrap(), vec![0]);
        assert_eq!(names_with_extension(&names, "mu").unwrap(), vec![2]);
        assert!(names_with_extension(&names, "missing").unwrap().is_empty());
    }

    #[test]
    fn lookup_with_wildcard_collects_siblings() {
        let names = strings(&["S1::pi1", "S1::pi2", "S1::kappa"]);
        assert_eq!(names_with_extension(&names, "pi*").unwrap(), vec![0, 1]);
    }

    #[test]
    fn ambiguous_key_is_an_error() {
        let names = strings(&["A::x", "B::x"]);
        assert!(names_with_extension(&names, "x").is_err());
    }

    #[test]
    fn anchored_lookup() {
        let names = strings(&["S1::mu", "S2::mu"]);
        assert_eq!(names_with_extension(&names, "^S1::mu").unwrap(), vec![0]);
        assert_eq!(names_with_extension(&names, "^S2::mu").unwrap(), vec![1]);
    }

    #[test]
    fn empty_key_matches_nothing() {
        let names = strings(&["a", "b"]);
        assert!(names_with_extension(&names, "").unwrap().is_empty());
    }

    // ── Shortening ──────────────────────────────────────────────────────

    #[test]
    fn single_submodel_shortens_fully() {
        let names = strings(&["S1::HKY::kappa", "S1::HKY::pi"]);
        assert_eq!(short_parameter_names(&names), strings(&["kappa", "pi"]));
    }

    #[test]
    fn shared_leaves_keep_their_distinguishing_segment() {
        let names = strings(&["S1::mu", "S2::mu"]);
        assert_eq!(short_parameter_names(&names), names);
    }

    #[test]
    fn distinct_subtrees_both_shorten() {
        let names = strings(&["HKY::kappa", "GTR::alpha"]);
        assert_eq!(short_parameter_names(&names), strings(&["kappa", "alpha"]));
    }

    #[test]
    fn result_is_order_agnostic() {
        let forward = strings(&["S1::HKY::kappa", "S1::HKY::pi", "S2::mu"]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let mut a = short_parameter_names(&forward);
        let mut b = short_parameter_names(&reversed);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn shortening_is_a_fixed_point() {
        let names = strings(&["S1::HKY::kappa", "S1::HKY::pi", "S2::mu"]);
        let once = short_parameter_names(&names);
        let twice = short_parameter_names(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn flat_names_untouched() {
        let names = strings(&["mu", "sigma", "kappa"]);
        assert_eq!(short_parameter_names(&names), names);
    }
}

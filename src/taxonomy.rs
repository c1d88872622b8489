use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{Insurer, ReportingForm};

#[derive(Debug, Deserialize)]
struct LineNodeSpec {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    children: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNode {
    pub label: String,
    pub children: Vec<String>,
}

/// One entry of a flattened taxonomy, in depth-first order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineOption {
    pub value: String,
    /// Label indented by one em-space per level.
    pub label: String,
    pub depth: usize,
    /// Labels from the root down to this node.
    pub path: Vec<String>,
}

/// Line taxonomy T for one reporting form: a rooted DAG of line codes.
///
/// Acyclicity is checked on construction, after which descendant sets are
/// memoised per node.
#[derive(Debug, Clone, Default)]
pub struct LineTaxonomy {
    nodes: BTreeMap<String, LineNode>,
    parents: BTreeMap<String, BTreeSet<String>>,
    descendants: BTreeMap<String, BTreeSet<String>>,
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })
}

impl LineTaxonomy {
    pub fn from_nodes(mut nodes: BTreeMap<String, LineNode>) -> Result<Self> {
        // Dangling child references are dropped rather than failing the load.
        let known: BTreeSet<String> = nodes.keys().cloned().collect();
        for (code, node) in nodes.iter_mut() {
            node.children.retain(|child| {
                let ok = known.contains(child);
                if !ok {
                    warn!(parent = %code, child = %child, "taxonomy child is not a node; ignored");
                }
                ok
            });
        }

        let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (code, node) in &nodes {
            for child in &node.children {
                parents.entry(child.clone()).or_default().insert(code.clone());
            }
        }

        check_acyclic(&nodes)?;

        let mut descendants = BTreeMap::new();
        for code in nodes.keys() {
            collect_descendants(code, &nodes, &mut descendants);
        }

        Ok(LineTaxonomy { nodes, parents, descendants })
    }

    fn from_specs(specs: BTreeMap<String, LineNodeSpec>) -> Result<Self> {
        let nodes = specs
            .into_iter()
            .map(|(code, spec)| {
                let label = spec.label.unwrap_or_else(|| code.clone());
                (code, LineNode { label, children: spec.children.unwrap_or_default() })
            })
            .collect();
        Self::from_nodes(nodes)
    }

    /// Parse the `{code: {label, children}}` JSON layout.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_specs(serde_json::from_str(json)?)
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = read_file(path)?;
        let specs = serde_json::from_str(&text)
            .map_err(|source| Error::Json { path: path.to_path_buf(), source })?;
        Self::from_specs(specs)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.nodes.contains_key(code)
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.nodes.get(code).map(|n| n.label.as_str())
    }

    pub fn children(&self, code: &str) -> &[String] {
        self.nodes.get(code).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn descendants(&self, code: &str) -> Option<&BTreeSet<String>> {
        self.descendants.get(code)
    }

    pub fn ancestors(&self, code: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<&String> = self.parents.get(code).into_iter().flatten().collect();
        while let Some(parent) = stack.pop() {
            if out.insert(parent.clone()) {
                stack.extend(self.parents.get(parent).into_iter().flatten());
            }
        }
        out
    }

    /// Nodes without parents, in code order.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .keys()
            .filter(|code| !self.parents.contains_key(*code))
            .map(String::as_str)
            .collect()
    }

    /// Normalise a user selection, preserving order and dropping duplicates.
    ///
    /// Without `detailize`, any code whose ancestor is also selected is dropped
    /// so the ancestor is not double counted. With `detailize`, internal nodes
    /// are replaced by their immediate children. Codes unknown to the taxonomy
    /// pass through untouched.
    pub fn normalize_selection(&self, selected: &[String], detailize: bool) -> Vec<String> {
        fn push(code: &str, out: &mut Vec<String>) {
            if !out.iter().any(|c| c == code) {
                out.push(code.to_string());
            }
        }

        let mut out: Vec<String> = Vec::new();

        if detailize {
            for code in selected {
                let children = self.children(code);
                if children.is_empty() {
                    push(code, &mut out);
                } else {
                    for child in children {
                        push(child, &mut out);
                    }
                }
            }
        } else {
            for code in selected {
                let covered = selected.iter().any(|other| {
                    other != code && self.descendants(other).is_some_and(|d| d.contains(code))
                });
                if !covered {
                    push(code, &mut out);
                }
            }
        }
        out
    }

    /// Depth-first flattening from every root, down to `max_depth` (root = 0).
    pub fn flatten(&self, max_depth: Option<usize>) -> Vec<LineOption> {
        let mut out = Vec::new();
        for root in self.roots() {
            self.flatten_from(root, 0, max_depth, &mut Vec::new(), &mut out);
        }
        out
    }

    fn flatten_from(
        &self,
        code: &str,
        depth: usize,
        max_depth: Option<usize>,
        path: &mut Vec<String>,
        out: &mut Vec<LineOption>,
    ) {
        let Some(node) = self.nodes.get(code) else { return };
        let label = node.label.split_whitespace().collect::<Vec<_>>().join(" ");
        path.push(label.clone());
        out.push(LineOption {
            value: code.to_string(),
            label: format!("{}{}", "\u{2003}".repeat(depth), label),
            depth,
            path: path.clone(),
        });
        if max_depth.is_none_or(|max| depth < max) {
            for child in &node.children {
                self.flatten_from(child, depth + 1, max_depth, path, out);
            }
        }
        path.pop();
    }
}

fn check_acyclic(nodes: &BTreeMap<String, LineNode>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        code: &'a str,
        nodes: &'a BTreeMap<String, LineNode>,
        marks: &mut BTreeMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(code) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(Error::TaxonomyCycle(code.to_string())),
            None => {}
        }
        marks.insert(code, Mark::Visiting);
        if let Some(node) = nodes.get(code) {
            for child in &node.children {
                visit(child, nodes, marks)?;
            }
        }
        marks.insert(code, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for code in nodes.keys() {
        visit(code, nodes, &mut marks)?;
    }
    Ok(())
}

fn collect_descendants(
    code: &str,
    nodes: &BTreeMap<String, LineNode>,
    memo: &mut BTreeMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    if let Some(done) = memo.get(code) {
        return done.clone();
    }
    let mut set = BTreeSet::new();
    for child in nodes.get(code).map(|n| n.children.as_slice()).unwrap_or(&[]) {
        set.insert(child.clone());
        set.extend(collect_descendants(child, nodes, memo));
    }
    memo.insert(code.to_string(), set.clone());
    set
}

/// Registry number → short name, plus fixed labels for the sentinels.
#[derive(Debug, Clone, Default)]
pub struct InsurerNames {
    names: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct InsurerEntry {
    reg_number: String,
    short_name: String,
}

impl InsurerNames {
    pub fn new(names: BTreeMap<String, String>) -> Self {
        InsurerNames { names }
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = read_file(path)?;
        let entries: Vec<InsurerEntry> = serde_json::from_str(&text)
            .map_err(|source| Error::Json { path: path.to_path_buf(), source })?;
        Ok(InsurerNames {
            names: entries.into_iter().map(|e| (e.reg_number, e.short_name)).collect(),
        })
    }

    pub fn label(&self, insurer: &Insurer) -> String {
        match insurer {
            Insurer::Company(id) => self.names.get(id).cloned().unwrap_or_else(|| id.clone()),
            Insurer::Total => "Total market".to_string(),
            Insurer::TopN(n) => format!("Top {n}"),
            Insurer::Benchmark(n) => format!("Top {n} benchmark"),
            Insurer::Others => "Others".to_string(),
        }
    }
}

/// The static dictionaries loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Taxonomies {
    pub f162: LineTaxonomy,
    pub f158: LineTaxonomy,
    pub insurers: InsurerNames,
}

impl Taxonomies {
    pub fn lines(&self, form: ReportingForm) -> &LineTaxonomy {
        match form {
            ReportingForm::F162 => &self.f162,
            ReportingForm::F158 => &self.f158,
        }
    }

    pub fn load(lines_162: &Path, lines_158: &Path, insurers: &Path) -> Result<Self> {
        Ok(Taxonomies {
            f162: LineTaxonomy::from_json_path(lines_162)?,
            f158: LineTaxonomy::from_json_path(lines_158)?,
            insurers: InsurerNames::from_json_path(insurers)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "all": {"label": "All lines", "children": ["life", "property"]},
        "life": {"label": "Life", "children": null},
        "property": {"label": "Property  insurance", "children": ["fire", "cargo", "ghost"]},
        "fire": {"label": "Fire"},
        "cargo": {"label": "Cargo"}
    }"#;

    fn tree() -> LineTaxonomy {
        LineTaxonomy::from_json_str(TREE).unwrap()
    }

    fn codes(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn descendants_and_ancestors() {
        let t = tree();
        let d = t.descendants("all").unwrap();
        assert_eq!(d.len(), 4);
        assert!(d.contains("fire"));
        assert!(!d.contains("ghost"), "dangling child is dropped");
        assert_eq!(t.ancestors("fire"), BTreeSet::from(["all".to_string(), "property".to_string()]));
        assert_eq!(t.roots(), vec!["all"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let json = r#"{"a": {"label": "A", "children": ["b"]}, "b": {"label": "B", "children": ["a"]}}"#;
        let err = LineTaxonomy::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::TaxonomyCycle(_)));
    }

    #[test]
    fn shared_child_is_not_a_cycle() {
        let json = r#"{
            "a": {"label": "A", "children": ["b", "c"]},
            "b": {"label": "B", "children": ["d"]},
            "c": {"label": "C", "children": ["d"]},
            "d": {"label": "D"}
        }"#;
        let t = LineTaxonomy::from_json_str(json).unwrap();
        assert_eq!(t.ancestors("d").len(), 3);
    }

    #[test]
    fn selecting_ancestor_drops_selected_descendants() {
        let t = tree();
        let out = t.normalize_selection(&codes(&["fire", "property", "life", "unknown"]), false);
        assert_eq!(out, codes(&["property", "life", "unknown"]));
    }

    #[test]
    fn detailize_expands_internal_nodes_to_children() {
        let t = tree();
        let out = t.normalize_selection(&codes(&["property", "life", "fire"]), true);
        assert_eq!(out, codes(&["fire", "cargo", "life"]));
    }

    #[test]
    fn flatten_respects_depth_and_indents() {
        let t = tree();
        let shallow = t.flatten(Some(1));
        let values: Vec<&str> = shallow.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["all", "life", "property"]);
        assert_eq!(shallow[2].label, "\u{2003}Property insurance");
        assert_eq!(shallow[2].path, codes(&["All lines", "Property insurance"]));

        let full = t.flatten(None);
        assert_eq!(full.len(), 5);
        assert_eq!(full[3].depth, 2);
    }

    #[test]
    fn insurer_labels_cover_sentinels() {
        let names = InsurerNames::new(BTreeMap::from([("1234".to_string(), "Acme".to_string())]));
        assert_eq!(names.label(&Insurer::company("1234")), "Acme");
        assert_eq!(names.label(&Insurer::company("999")), "999");
        assert_eq!(names.label(&Insurer::TopN(10)), "Top 10");
        assert_eq!(names.label(&Insurer::Benchmark(5)), "Top 5 benchmark");
        assert_eq!(names.label(&Insurer::Total), "Total market");
    }
}

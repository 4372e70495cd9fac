//! Query constraints: a sub-range over the priority ordering.

use crate::node::Node;
use crate::priority::{compare_siblings, Priority};
use std::cmp::Ordering;
use std::fmt;

/// One end of a query range.
///
/// Without a name the bound covers every child with that priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bound {
    /// Priority at the bound.
    pub priority: Priority,
    /// Optional tie-breaking child name.
    pub name: Option<String>,
}

/// Constraints narrowing the children a listener sees.
///
/// The default value is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryParams {
    /// Inclusive lower bound.
    pub start: Option<Bound>,
    /// Inclusive upper bound.
    pub end: Option<Bound>,
    /// Maximum number of children.
    pub limit: Option<usize>,
}

impl QueryParams {
    /// Returns true when the query selects everything.
    pub fn is_default(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.limit.is_none()
    }

    /// Returns a copy with a lower bound.
    pub fn with_start(mut self, priority: Priority, name: Option<String>) -> Self {
        self.start = Some(Bound { priority, name });
        self
    }

    /// Returns a copy with an upper bound.
    pub fn with_end(mut self, priority: Priority, name: Option<String>) -> Self {
        self.end = Some(Bound { priority, name });
        self
    }

    /// Returns a copy with a child limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if a child with this name and priority falls within the
    /// start and end bounds. The limit is not considered.
    pub fn in_range(&self, name: &str, priority: &Priority) -> bool {
        let after_start = self.start.as_ref().is_none_or(|bound| {
            match &bound.name {
                Some(bound_name) => {
                    compare_siblings(name, priority, bound_name, &bound.priority)
                        != Ordering::Less
                }
                None => priority >= &bound.priority,
            }
        });
        let before_end = self.end.as_ref().is_none_or(|bound| match &bound.name {
            Some(bound_name) => {
                compare_siblings(name, priority, bound_name, &bound.priority) != Ordering::Greater
            }
            None => priority <= &bound.priority,
        });
        after_start && before_end
    }

    /// Restricts a node to the children this query selects.
    ///
    /// With a start bound and no end bound the limit keeps the first
    /// children; otherwise it keeps the last ones. Leaves pass through
    /// unfiltered.
    pub fn filter(&self, node: &Node) -> Node {
        if self.is_default() || node.children().is_none() {
            return node.clone();
        }
        let mut selected: Vec<(&str, &Node)> = node
            .ordered_children()
            .into_iter()
            .filter(|(name, child)| self.in_range(name, child.priority()))
            .collect();
        if let Some(limit) = self.limit {
            if selected.len() > limit {
                if self.start.is_some() && self.end.is_none() {
                    selected.truncate(limit);
                } else {
                    selected.drain(..selected.len() - limit);
                }
            }
        }
        Node::branch(
            selected
                .into_iter()
                .map(|(name, child)| (name.to_string(), child.clone())),
        )
        .with_priority(node.priority().clone())
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            return f.write_str("default");
        }
        let mut parts = Vec::new();
        if let Some(start) = &self.start {
            parts.push(format!("start={}{}", start.priority, name_suffix(&start.name)));
        }
        if let Some(end) = &self.end {
            parts.push(format!("end={}{}", end.priority, name_suffix(&end.name)));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        f.write_str(&parts.join(","))
    }
}

fn name_suffix(name: &Option<String>) -> String {
    name.as_ref().map(|n| format!(":{n}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Node {
        Node::branch((1..=5).map(|i| {
            (
                format!("item{i}"),
                Node::from(i).with_priority(Priority::Number(i as f64)),
            )
        }))
    }

    fn names(node: &Node) -> Vec<String> {
        node.ordered_children()
            .into_iter()
            .map(|(n, _)| n.to_string())
            .collect()
    }

    #[test]
    fn unconstrained_query_is_identity() {
        let node = list();
        assert_eq!(QueryParams::default().filter(&node), node);
    }

    #[test]
    fn start_and_end_are_inclusive() {
        let query = QueryParams::default()
            .with_start(Priority::Number(2.0), None)
            .with_end(Priority::Number(4.0), None);
        assert_eq!(names(&query.filter(&list())), ["item2", "item3", "item4"]);
    }

    #[test]
    fn name_breaks_ties_at_bound() {
        let node = Node::branch([
            ("a".to_string(), Node::from(1).with_priority(Priority::Number(1.0))),
            ("b".to_string(), Node::from(2).with_priority(Priority::Number(1.0))),
            ("c".to_string(), Node::from(3).with_priority(Priority::Number(1.0))),
        ]);
        let query = QueryParams::default().with_start(Priority::Number(1.0), Some("b".into()));
        assert_eq!(names(&query.filter(&node)), ["b", "c"]);

        let query = QueryParams::default().with_end(Priority::Number(1.0), Some("b".into()));
        assert_eq!(names(&query.filter(&node)), ["a", "b"]);
    }

    #[test]
    fn limit_keeps_last_without_start() {
        let query = QueryParams::default().with_limit(2);
        assert_eq!(names(&query.filter(&list())), ["item4", "item5"]);
    }

    #[test]
    fn limit_keeps_first_after_start() {
        let query = QueryParams::default()
            .with_start(Priority::Number(2.0), None)
            .with_limit(2);
        assert_eq!(names(&query.filter(&list())), ["item2", "item3"]);
    }

    #[test]
    fn empty_selection_is_absent() {
        let query = QueryParams::default().with_start(Priority::Number(100.0), None);
        assert!(query.filter(&list()).is_empty());
    }
}

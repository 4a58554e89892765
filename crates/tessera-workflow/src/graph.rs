use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::WorkflowError;

/// Graph structure for traversal and analysis.
///
/// Edges point from an upstream node to the node that depends on it.
/// Node order is preserved as given, so every query is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node ids in declaration order.
  nodes: Vec<String>,
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> list of upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no incoming edges.
  entry_points: Vec<String>,
  /// Nodes with multiple incoming edges (join points), in declaration order.
  join_points: Vec<String>,
}

impl Graph {
  /// Build and validate a graph from node ids and `(upstream, downstream)` edges.
  pub fn new(nodes: &[String], edges: &[(String, String)]) -> Result<Self, WorkflowError> {
    let mut seen = HashSet::new();
    for node_id in nodes {
      if !seen.insert(node_id.as_str()) {
        return Err(WorkflowError::DuplicateNodeId {
          node_id: node_id.clone(),
        });
      }
    }

    for (from, to) in edges {
      if !seen.contains(from.as_str()) {
        return Err(WorkflowError::UnknownDependency {
          node_id: to.clone(),
          dependency: from.clone(),
        });
      }
      if !seen.contains(to.as_str()) {
        return Err(WorkflowError::UnknownDependency {
          node_id: to.clone(),
          dependency: from.clone(),
        });
      }
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all nodes
    for node_id in nodes {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    // Build adjacency lists
    for (from, to) in edges {
      adjacency.entry(from.clone()).or_default().push(to.clone());
      reverse_adjacency
        .entry(to.clone())
        .or_default()
        .push(from.clone());
    }

    detect_cycle(nodes, &adjacency)?;

    // Find entry points (no incoming edges)
    let entry_points: Vec<String> = nodes
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    // Find join points (multiple incoming edges)
    let join_points: Vec<String> = nodes
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_some_and(|v| v.len() > 1))
      .cloned()
      .collect();

    Ok(Self {
      nodes: nodes.to_vec(),
      adjacency,
      reverse_adjacency,
      entry_points,
      join_points,
    })
  }

  /// Node ids in declaration order.
  pub fn nodes(&self) -> &[String] {
    &self.nodes
  }

  /// Get entry points (nodes with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get join points (nodes with multiple incoming edges).
  pub fn join_points(&self) -> &[String] {
    &self.join_points
  }

  /// Nodes in dependency order (Kahn's algorithm, ties broken by declaration order).
  pub fn topological_order(&self) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = self
      .nodes
      .iter()
      .map(|id| (id.as_str(), self.upstream(id).len()))
      .collect();

    let mut queue: VecDeque<&str> = self.entry_points.iter().map(|s| s.as_str()).collect();
    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(node_id) = queue.pop_front() {
      order.push(node_id.to_string());
      for next in self.downstream(node_id) {
        if let Some(degree) = in_degree.get_mut(next.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(next.as_str());
          }
        }
      }
    }

    order
  }
}

/// Check for cycles using DFS.
fn detect_cycle(
  nodes: &[String],
  adjacency: &HashMap<String, Vec<String>>,
) -> Result<(), WorkflowError> {
  // 0 = white (unvisited), 1 = gray (in progress), 2 = black (done)
  let mut color: HashMap<&str, u8> = nodes.iter().map(|id| (id.as_str(), 0u8)).collect();

  fn dfs<'a>(
    node: &'a str,
    adjacency: &'a HashMap<String, Vec<String>>,
    color: &mut HashMap<&'a str, u8>,
  ) -> Option<&'a str> {
    color.insert(node, 1);

    if let Some(neighbors) = adjacency.get(node) {
      for neighbor in neighbors {
        match color.get(neighbor.as_str()) {
          Some(1) => return Some(neighbor.as_str()), // Back edge = cycle
          Some(0) => {
            if let Some(found) = dfs(neighbor.as_str(), adjacency, color) {
              return Some(found);
            }
          }
          _ => {}
        }
      }
    }

    color.insert(node, 2);
    None
  }

  for node_id in nodes {
    if color.get(node_id.as_str()) == Some(&0) {
      if let Some(found) = dfs(node_id.as_str(), adjacency, &mut color) {
        return Err(WorkflowError::CycleDetected {
          node_id: found.to_string(),
        });
      }
    }
  }

  Ok(())
}

use std::collections::BTreeMap;

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
  /// Not visited yet.
  White,
  /// On the current DFS path.
  Gray,
  /// Fully explored.
  Black,
}

/// Find a cycle in a `dependent -> dependencies` adjacency map.
///
/// Returns the node sequence of the first cycle found, closed by repeating
/// its first node (`a -> b -> a`). Traversal follows map and edge order, so
/// the reported cycle is deterministic.
pub(crate) fn find_cycle(edges: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
  let mut colors: BTreeMap<&str, Color> = edges.keys().map(|k| (k.as_str(), Color::White)).collect();
  let mut path: Vec<&str> = Vec::new();

  for node in edges.keys() {
    if colors.get(node.as_str()) == Some(&Color::White) {
      if let Some(cycle) = visit(node, edges, &mut colors, &mut path) {
        return Some(cycle);
      }
    }
  }
  None
}

fn visit<'a>(
  node: &'a str,
  edges: &'a BTreeMap<String, Vec<String>>,
  colors: &mut BTreeMap<&'a str, Color>,
  path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
  colors.insert(node, Color::Gray);
  path.push(node);

  for next in edges.get(node).into_iter().flatten() {
    match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
      Color::Gray => {
        let start = path.iter().position(|n| *n == next.as_str()).unwrap_or(0);
        let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(next.clone());
        return Some(cycle);
      }
      Color::White => {
        if let Some(cycle) = visit(next, edges, colors, path) {
          return Some(cycle);
        }
      }
      Color::Black => {}
    }
  }

  path.pop();
  colors.insert(node, Color::Black);
  None
}

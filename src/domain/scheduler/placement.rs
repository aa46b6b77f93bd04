use std::collections::BTreeMap;

use crate::domain::resource::quantity::ResourceVector;
use crate::domain::utils::id::{NodeName, PlatformName, TaskKey};

/// One task of a gang waiting for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub task: TaskKey,
    pub platform: PlatformName,
    /// Nodes the task may use: its platform's nodes minus `nodesExcluded`, sorted by name.
    pub candidates: Vec<NodeName>,
    pub request: ResourceVector,
}

/// First-fit-decreasing placement of a whole gang.
///
/// Tasks are taken largest first by (gpu, cpu, memory) and each goes to the first candidate
/// node, by name, with room left. Returns one node per request in input order, or `None` if
/// any task does not fit; `free` is never modified.
pub fn place(requests: &[PlacementRequest], free: &BTreeMap<NodeName, ResourceVector>) -> Option<Vec<NodeName>> {
    let mut order: Vec<usize> = (0..requests.len()).collect();
    order.sort_by(|a, b| {
        let (ra, rb) = (&requests[*a], &requests[*b]);
        rb.request.placement_key().cmp(&ra.request.placement_key()).then_with(|| ra.task.cmp(&rb.task))
    });

    let mut remaining = free.clone();
    let mut nodes: Vec<Option<NodeName>> = vec![None; requests.len()];
    for index in order {
        let request = &requests[index];
        let node = request.candidates.iter().find(|node| remaining.get(*node).is_some_and(|slot| slot.fits(&request.request)))?;
        if let Some(slot) = remaining.get_mut(node) {
            *slot -= request.request;
        }
        nodes[index] = Some(node.clone());
    }
    nodes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::utils::id::WorkflowId;

    fn free(nodes: &[(&str, i64)]) -> BTreeMap<NodeName, ResourceVector> {
        nodes.iter().map(|(n, gpu)| (NodeName::new(*n), ResourceVector::gpus(*gpu))).collect()
    }

    fn request(task: &str, gpu: i64, candidates: &[&str]) -> PlacementRequest {
        PlacementRequest {
            task: TaskKey::new(WorkflowId::new("wf-1"), task.into()),
            platform: PlatformName::new("dgx"),
            candidates: candidates.iter().map(|c| NodeName::new(*c)).collect(),
            request: ResourceVector::gpus(gpu),
        }
    }

    #[test]
    fn largest_task_is_placed_first() {
        let free = free(&[("a", 4), ("b", 8)]);
        let nodes = place(&[request("small", 4, &["a", "b"]), request("big", 8, &["a", "b"])], &free).unwrap();
        assert_eq!(nodes, vec![NodeName::new("a"), NodeName::new("b")]);
    }

    #[test]
    fn gang_fails_as_a_whole() {
        let free = free(&[("a", 4), ("b", 4)]);
        assert!(place(&[request("x", 4, &["a", "b"]), request("y", 4, &["a", "b"]), request("z", 1, &["a", "b"])], &free).is_none());
        assert_eq!(free[&NodeName::new("a")].gpu, 4);
    }

    #[test]
    fn candidates_restrict_nodes() {
        let free = free(&[("a", 8), ("b", 8)]);
        let nodes = place(&[request("x", 2, &["b"])], &free).unwrap();
        assert_eq!(nodes, vec![NodeName::new("b")]);
        assert!(place(&[request("x", 2, &[])], &free).is_none());
    }
}

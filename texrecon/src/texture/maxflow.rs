// Dinic's max-flow over a graph with a source and a sink terminal, used to
// solve the binary moves of the view selection.

use std::collections::VecDeque;

const EPSILON: f64 = 1e-12;
const UNREACHED: usize = usize::MAX;

pub struct FlowGraph {
    num_nodes: usize,
    adjacency: Vec<Vec<usize>>,
    // Edge `e` and its reverse `e ^ 1` are stored next to each other.
    heads: Vec<usize>,
    residuals: Vec<f64>,
    levels: Vec<usize>,
}

impl FlowGraph {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            adjacency: vec![Vec::new(); num_nodes + 2],
            heads: Vec::new(),
            residuals: Vec::new(),
            levels: Vec::new(),
        }
    }

    fn source(&self) -> usize {
        self.num_nodes
    }

    fn sink(&self) -> usize {
        self.num_nodes + 1
    }

    fn push_edge(&mut self, u: usize, v: usize, cap: f64, rev_cap: f64) {
        self.adjacency[u].push(self.heads.len());
        self.heads.push(v);
        self.residuals.push(cap);
        self.adjacency[v].push(self.heads.len());
        self.heads.push(u);
        self.residuals.push(rev_cap);
    }

    /// Capacity `to_source` is cut when the node ends up on the sink side
    /// and `to_sink` when it stays on the source side.
    pub fn add_terminal_weights(
        &mut self,
        node: usize,
        to_source: f64,
        to_sink: f64,
    ) {
        // Only the difference matters for the cut.
        let common = to_source.min(to_sink);
        let (s, t) = (to_source - common, to_sink - common);
        if s > EPSILON {
            let source = self.source();
            self.push_edge(source, node, s, 0.0);
        }
        if t > EPSILON {
            let sink = self.sink();
            self.push_edge(node, sink, t, 0.0);
        }
    }

    // Capacity `cap` is cut when `u` is on the source side and `v` on the
    // sink side, `rev_cap` in the opposite case.
    pub fn add_edge(&mut self, u: usize, v: usize, cap: f64, rev_cap: f64) {
        if cap > EPSILON || rev_cap > EPSILON {
            self.push_edge(u, v, cap.max(0.0), rev_cap.max(0.0));
        }
    }

    fn build_levels(&mut self) -> bool {
        self.levels = vec![UNREACHED; self.adjacency.len()];
        let source = self.source();
        self.levels[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let v = self.heads[e];
                if self.residuals[e] > EPSILON && self.levels[v] == UNREACHED {
                    self.levels[v] = self.levels[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        self.levels[self.sink()] != UNREACHED
    }

    // Saturates all shortest augmenting paths of the current level graph.
    fn blocking_flow(&mut self) -> f64 {
        let (source, sink) = (self.source(), self.sink());
        let mut next_edge = vec![0; self.adjacency.len()];
        let mut path: Vec<usize> = Vec::new();
        let mut flow = 0.0;
        let mut u = source;
        loop {
            if u == sink {
                let bottleneck = path
                    .iter()
                    .map(|&e| self.residuals[e])
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.residuals[e] -= bottleneck;
                    self.residuals[e ^ 1] += bottleneck;
                }
                flow += bottleneck;
                // Retreat to the tail of the first saturated edge.
                let k = path
                    .iter()
                    .position(|&e| self.residuals[e] <= EPSILON)
                    .unwrap_or(0);
                u = self.heads[path[k] ^ 1];
                path.truncate(k);
                continue;
            }

            let mut advanced = false;
            while next_edge[u] < self.adjacency[u].len() {
                let e = self.adjacency[u][next_edge[u]];
                let v = self.heads[e];
                if self.residuals[e] > EPSILON
                    && self.levels[v] == self.levels[u] + 1
                {
                    path.push(e);
                    u = v;
                    advanced = true;
                    break;
                }
                next_edge[u] += 1;
            }
            if !advanced {
                if u == source {
                    return flow;
                }
                // Dead end.
                self.levels[u] = UNREACHED;
                if let Some(e) = path.pop() {
                    u = self.heads[e ^ 1];
                    next_edge[u] += 1;
                }
            }
        }
    }

    pub fn max_flow(&mut self) -> f64 {
        let mut flow = 0.0;
        while self.build_levels() {
            flow += self.blocking_flow();
        }
        flow
    }

    /// Nodes still reachable from the source in the residual graph, valid
    /// after `max_flow`.
    pub fn source_side(&self) -> Vec<bool> {
        let mut reached = vec![false; self.adjacency.len()];
        let source = self.source();
        reached[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let v = self.heads[e];
                if self.residuals[e] > EPSILON && !reached[v] {
                    reached[v] = true;
                    queue.push_back(v);
                }
            }
        }
        reached.truncate(self.num_nodes);
        reached
    }
}

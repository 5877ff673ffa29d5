//! Liveness & Interference
//!
//! Per-function dataflow analysis over the IL command list. Each command
//! is a node of the control-flow graph; an iterative backward pass
//! computes live-in/live-out sets until fixpoint. From those sets the
//! interference graph is built: an edge joins two values when one is
//! written while the other is live, except that a plain copy records a
//! *move edge* instead, which is what enables coalescing. Precolored
//! register nodes carry the clobber and pinning constraints the
//! command templates declare.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::compiler::il::{ILCode, ILCommand, ILFunction, LabelId, ValueId};
use crate::compiler::spots::{Reg, ARG_REGISTERS};

/// Live value sets per command.
#[derive(Debug)]
pub struct Liveness {
    /// Values live on entry to each command.
    pub live_in: Vec<HashSet<ValueId>>,
    /// Values live on exit from each command.
    pub live_out: Vec<HashSet<ValueId>>,
}

/// Successor command indices for each command.
pub fn successors(commands: &[ILCommand]) -> Vec<Vec<usize>> {
    let labels: HashMap<LabelId, usize> = commands
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.label_name().map(|l| (l, i)))
        .collect();

    commands
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            let mut succs = Vec::new();
            if !cmd.is_terminator() && i + 1 < commands.len() {
                succs.push(i + 1);
            }
            for target in cmd.targets() {
                if let Some(&j) = labels.get(&target) {
                    succs.push(j);
                }
            }
            succs
        })
        .collect()
}

/// Computes live-in/live-out sets for `tracked` values by iterative
/// backward dataflow.
pub fn analyze(
    func: &ILFunction,
    tracked: &HashSet<ValueId>,
) -> Liveness {
    let commands = &func.commands;
    let n = commands.len();
    let succs = successors(commands);

    // Predecessors drive the backward worklist.
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, ss) in succs.iter().enumerate() {
        for &s in ss {
            preds[s].push(i);
        }
    }

    let mut live_in: Vec<HashSet<ValueId>> = vec![HashSet::new(); n];
    let mut live_out: Vec<HashSet<ValueId>> = vec![HashSet::new(); n];

    let mut worklist: VecDeque<usize> = (0..n).rev().collect();
    let mut queued: Vec<bool> = vec![true; n];

    while let Some(i) = worklist.pop_front() {
        queued[i] = false;

        let mut out = HashSet::new();
        for &s in &succs[i] {
            out.extend(live_in[s].iter().copied());
        }

        let mut inn = out.clone();
        for w in commands[i].writes() {
            inn.remove(&w);
        }
        for r in commands[i].reads() {
            if tracked.contains(&r) {
                inn.insert(r);
            }
        }

        if out != live_out[i] || inn != live_in[i] {
            live_out[i] = out;
            live_in[i] = inn;
            for &p in &preds[i] {
                if !queued[p] {
                    queued[p] = true;
                    worklist.push_back(p);
                }
            }
        }
    }

    Liveness { live_in, live_out }
}

/// A node of the interference graph: an IL value to color, or a
/// precolored physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    /// Allocatable IL value.
    Value(ValueId),
    /// Precolored machine register.
    Reg(Reg),
}

/// Interference graph enriched with move edges, built per function.
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    /// Adjacency sets. Precolored nodes appear as neighbors but have no
    /// adjacency set of their own (their degree is treated as infinite).
    pub adj: HashMap<Node, HashSet<Node>>,
    /// Move edges, deduplicated: copies and register preferences that
    /// coalescing may eliminate.
    pub moves: Vec<(Node, Node)>,
    /// Map from node to the indices of moves involving it.
    pub move_list: HashMap<Node, Vec<usize>>,
    /// Read/write occurrence counts, for the spill heuristic.
    pub use_counts: HashMap<ValueId, u32>,
}

impl InterferenceGraph {
    fn add_edge(&mut self, a: Node, b: Node) {
        if a == b {
            return;
        }
        if let Node::Value(_) = a {
            self.adj.entry(a).or_default().insert(b);
        }
        if let Node::Value(_) = b {
            self.adj.entry(b).or_default().insert(a);
        }
    }

    fn add_move(&mut self, a: Node, b: Node, seen: &mut HashSet<(Node, Node)>) {
        if a == b {
            return;
        }
        let key = if a <= b { (a, b) } else { (b, a) };
        if !seen.insert(key) {
            return;
        }
        let index = self.moves.len();
        self.moves.push((a, b));
        self.move_list.entry(a).or_default().push(index);
        self.move_list.entry(b).or_default().push(index);
    }

    /// `true` if the two nodes interfere.
    pub fn interferes(&self, a: Node, b: Node) -> bool {
        self.adj.get(&a).is_some_and(|s| s.contains(&b))
            || self.adj.get(&b).is_some_and(|s| s.contains(&a))
    }
}

/// Builds the interference graph for one function.
///
/// `tracked` is the set of values eligible for register allocation;
/// everything else already has a fixed home. Parameters are treated as
/// defined at function entry: parameters live into the first command
/// mutually interfere, and each must avoid the incoming registers of the
/// others so the ABI prelude's moves cannot clobber one another.
pub fn build_graph(
    func: &ILFunction,
    il: &ILCode,
    tracked: &HashSet<ValueId>,
    liveness: &Liveness,
) -> InterferenceGraph {
    let mut g = InterferenceGraph::default();
    let mut seen_moves = HashSet::new();

    // Every tracked value gets a (possibly empty) adjacency set so it
    // participates in simplification even when conflict-free.
    for &v in tracked {
        g.adj.entry(Node::Value(v)).or_default();
    }

    // Entry: parameters are all written before the first command.
    let entry_live: Vec<ValueId> = liveness
        .live_in
        .first()
        .map(|s| s.iter().copied().collect())
        .unwrap_or_default();
    for (i, &a) in entry_live.iter().enumerate() {
        for &b in &entry_live[i + 1..] {
            g.add_edge(Node::Value(a), Node::Value(b));
        }
    }
    for (i, &p) in func.params.iter().enumerate() {
        if !tracked.contains(&p) {
            continue;
        }
        for (j, &reg) in ARG_REGISTERS.iter().enumerate() {
            if j < func.params.len() && j != i {
                g.add_edge(Node::Value(p), Node::Reg(reg));
            }
        }
        if let Some(&own) = ARG_REGISTERS.get(i) {
            g.add_move(Node::Value(p), Node::Reg(own), &mut seen_moves);
        }
    }

    for (i, cmd) in func.commands.iter().enumerate() {
        // Occurrence counts feed the spill heuristic.
        for v in cmd.reads().into_iter().chain(cmd.writes()) {
            if tracked.contains(&v) {
                *g.use_counts.entry(v).or_insert(0) += 1;
            }
        }

        // A write interferes with everything live out of the command,
        // except the source of a coalescable move.
        let mv = cmd.as_move(il);
        for w in cmd.writes() {
            if !tracked.contains(&w) {
                continue;
            }
            for &b in &liveness.live_out[i] {
                if b == w {
                    continue;
                }
                if let Some((dst, src)) = mv {
                    if w == dst && b == src {
                        continue;
                    }
                }
                g.add_edge(Node::Value(w), Node::Value(b));
            }
        }

        if let Some((dst, src)) = mv {
            if tracked.contains(&dst) && tracked.contains(&src) {
                g.add_move(Node::Value(dst), Node::Value(src), &mut seen_moves);
            }
        }

        // Register clobbers conflict with values live across the
        // command.
        for reg in cmd.clobbers(il) {
            for &v in &liveness.live_out[i] {
                if liveness.live_in[i].contains(&v) {
                    g.add_edge(Node::Value(v), Node::Reg(reg));
                }
            }
        }

        // Template-declared constraints.
        for (v, reg) in cmd.abs_confs(il) {
            if tracked.contains(&v) {
                g.add_edge(Node::Value(v), Node::Reg(reg));
            }
        }
        for (a, b) in cmd.rel_confs() {
            if tracked.contains(&a) && tracked.contains(&b) {
                g.add_edge(Node::Value(a), Node::Value(b));
            }
        }
        for (v, reg) in cmd.abs_prefs(il) {
            if tracked.contains(&v) {
                g.add_move(Node::Value(v), Node::Reg(reg), &mut seen_moves);
            }
        }
        for (a, b) in cmd.rel_prefs() {
            if tracked.contains(&a) && tracked.contains(&b) {
                g.add_move(Node::Value(a), Node::Value(b), &mut seen_moves);
            }
        }
    }

    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::il::{BinaryOp, ILCode};
    use crate::compiler::types::TypePool;

    fn value(il: &mut ILCode) -> ValueId {
        il.new_value(TypePool::INT, 4, true, false)
    }

    /// a = 1; b = 2; c = a + b; return c
    fn build_simple() -> (ILCode, HashSet<ValueId>) {
        let mut il = ILCode::new();
        let (a, b, c) = (value(&mut il), value(&mut il), value(&mut il));
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: a, imm: 1 });
        il.add(ILCommand::Load { out: b, imm: 2 });
        il.add(ILCommand::Binary { op: BinaryOp::Add, out: c, lhs: a, rhs: b });
        il.add(ILCommand::Return(Some(c)));
        let tracked = [a, b, c].into_iter().collect();
        (il, tracked)
    }

    #[test]
    fn straight_line_liveness() {
        let (il, tracked) = build_simple();
        let func = &il.funcs[0];
        let live = analyze(func, &tracked);

        let a = ValueId(0);
        let b = ValueId(1);
        let c = ValueId(2);

        // a live across the second load; both a and b live into the add.
        assert!(live.live_out[0].contains(&a));
        assert!(live.live_in[2].contains(&a));
        assert!(live.live_in[2].contains(&b));
        // c live out of the add, dead after the return.
        assert!(live.live_out[2].contains(&c));
        assert!(live.live_out[3].is_empty());
    }

    #[test]
    fn interference_and_no_self_edges() {
        let (il, tracked) = build_simple();
        let func = &il.funcs[0];
        let live = analyze(func, &tracked);
        let g = build_graph(func, &il, &tracked, &live);

        let a = Node::Value(ValueId(0));
        let b = Node::Value(ValueId(1));
        // b is written while a is live.
        assert!(g.interferes(a, b));
        assert!(!g.interferes(a, a));
    }

    #[test]
    fn move_suppresses_interference_edge() {
        let mut il = ILCode::new();
        let a = value(&mut il);
        let b = value(&mut il);
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: a, imm: 7 });
        // b = a; both then returned, so a is live out of the copy.
        il.add(ILCommand::Set { out: b, arg: a });
        il.add(ILCommand::Binary { op: BinaryOp::Add, out: a, lhs: a, rhs: b });
        il.add(ILCommand::Return(Some(a)));

        let tracked: HashSet<ValueId> = [a, b].into_iter().collect();
        let func = &il.funcs[0];
        let live = analyze(func, &tracked);
        let g = build_graph(func, &il, &tracked, &live);

        // The copy records a move edge rather than a conflict.
        assert!(g
            .moves
            .iter()
            .any(|&(x, y)| (x, y) == (Node::Value(b), Node::Value(a))
                || (y, x) == (Node::Value(b), Node::Value(a))));
    }

    #[test]
    fn loop_extends_liveness_across_back_edge() {
        let mut il = ILCode::new();
        let i = value(&mut il);
        let one = il.new_literal(TypePool::INT, 4, true, 1);
        let top = il.new_label();

        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: i, imm: 0 });
        il.add(ILCommand::Label(top));
        il.add(ILCommand::Binary { op: BinaryOp::Add, out: i, lhs: i, rhs: one });
        il.add(ILCommand::JumpNotZero { cond: i, target: top });
        il.add(ILCommand::Return(Some(i)));

        let tracked: HashSet<ValueId> = [i].into_iter().collect();
        let func = &il.funcs[0];
        let live = analyze(func, &tracked);

        // The back edge keeps i live out of the conditional jump.
        assert!(live.live_out[3].contains(&i));
    }

    #[test]
    fn call_clobbers_live_through_values() {
        let mut il = ILCode::new();
        let kept = value(&mut il);
        let f = value(&mut il);
        let out = value(&mut il);

        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: kept, imm: 3 });
        il.add(ILCommand::Call { func: f, args: vec![], out: Some(out) });
        il.add(ILCommand::Binary {
            op: BinaryOp::Add,
            out,
            lhs: out,
            rhs: kept,
        });
        il.add(ILCommand::Return(Some(out)));

        let tracked: HashSet<ValueId> = [kept, out].into_iter().collect();
        let func = &il.funcs[0];
        let live = analyze(func, &tracked);
        let g = build_graph(func, &il, &tracked, &live);

        // kept survives the call, so it conflicts with every
        // caller-saved register.
        assert!(g.interferes(Node::Value(kept), Node::Reg(Reg::Rax)));
        assert!(g.interferes(Node::Value(kept), Node::Reg(Reg::R10)));
        // The call result does not (it is only live after).
        assert!(!g.interferes(Node::Value(out), Node::Reg(Reg::R10)));
    }
}

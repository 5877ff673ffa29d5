//! Register Allocation
//!
//! Iterated register coalescing in the George & Appel formulation:
//! build, simplify, coalesce (Briggs and George criteria), freeze,
//! potential spill, select, and actual-spill rewriting, repeated until
//! every value is colored. Values whose address is taken, aggregates,
//! values of unusual size, literals, and static-storage objects are
//! given fixed homes before coloring begins.
//!
//! The output maps every IL value a function touches to a [`Spot`],
//! along with the local frame size and the callee-saved registers the
//! chosen coloring uses.

use std::collections::{HashMap, HashSet};

use crate::compiler::il::{ILCode, ILCommand, ValueId, ValueKind};
use crate::compiler::liveness::{self, InterferenceGraph, Node};
use crate::compiler::spots::{Reg, Spot, ALLOC_REGISTERS, ARG_REGISTERS};
use crate::compiler::symbols::{StorageDur, SymbolTable};

/// Number of colors available to the allocator.
pub const K: usize = ALLOC_REGISTERS.len();

// Backstop for pathological spill cascades; each round only introduces
// short-range temporaries, so this is never reached in practice.
const MAX_ROUNDS: u32 = 64;

/// Result of allocating one function.
#[derive(Debug)]
pub struct Allocation {
    /// Final placement of every value the function references.
    pub spots: HashMap<ValueId, Spot>,
    /// Bytes of locals below the saved `%rbp` (not yet 16-byte aligned;
    /// the emitter adds callee-save slots before aligning).
    pub frame_size: u64,
    /// Callee-saved registers the coloring uses, to be preserved in the
    /// prologue.
    pub callee_saved_used: Vec<Reg>,
}

/// Allocates registers for the function at `func_index`.
///
/// `static_labels` maps static-storage and string-literal values to
/// their assembly labels.
pub fn allocate(
    il: &mut ILCode,
    func_index: usize,
    syms: &SymbolTable,
    static_labels: &HashMap<ValueId, String>,
) -> Allocation {
    let mut frame: u64 = 0;
    let mut spots = assign_fixed_homes(
        il,
        func_index,
        syms,
        static_labels,
        &mut frame,
    );

    for _ in 0..MAX_ROUNDS {
        let tracked: HashSet<ValueId> =
            referenced_values(il, func_index)
                .into_iter()
                .filter(|v| !spots.contains_key(v))
                .collect();

        let func = &il.funcs[func_index];
        let live = liveness::analyze(func, &tracked);
        let graph = liveness::build_graph(func, il, &tracked, &live);

        let result = Colorer::new(&graph, &tracked).run();

        if result.spilled.is_empty() {
            let mut callee_saved_used: Vec<Reg> = result
                .colors
                .values()
                .copied()
                .filter(|r| r.is_callee_saved())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            callee_saved_used.sort();

            for (v, reg) in result.colors {
                spots.insert(v, Spot::Register(reg));
            }

            // The ABI prelude only materializes live parameters; a dead
            // parameter's register would otherwise clobber a colored
            // neighbor.
            let entry_live = live.live_in.first().cloned().unwrap_or_default();
            for &p in &il.funcs[func_index].params {
                if !entry_live.contains(&p) {
                    if let Some(Spot::Register(_)) = spots.get(&p) {
                        spots.remove(&p);
                    }
                }
            }

            return Allocation {
                spots,
                frame_size: frame,
                callee_saved_used,
            };
        }

        // Actual spill: give each spilled value a stack slot and
        // rewrite its uses and defs through fresh temporaries, then
        // rebuild from liveness.
        for v in result.spilled {
            let size = il.value(v).size.max(1);
            frame = crate::compiler::types::round_up(frame + size, 8);
            spots.insert(v, Spot::Stack(-(frame as i64)));
            rewrite_spilled(il, func_index, v);
        }
    }

    // Unreachable in practice: park everything left in memory so the
    // output is still correct.
    let leftover: Vec<ValueId> = referenced_values(il, func_index)
        .into_iter()
        .filter(|v| !spots.contains_key(v))
        .collect();
    for v in leftover {
        let size = il.value(v).size.max(1);
        frame = crate::compiler::types::round_up(frame + size, 8);
        spots.insert(v, Spot::Stack(-(frame as i64)));
    }

    Allocation { spots, frame_size: frame, callee_saved_used: vec![] }
}

/// Every value read or written by the function, plus its parameters.
fn referenced_values(il: &ILCode, func_index: usize) -> HashSet<ValueId> {
    let func = &il.funcs[func_index];
    let mut set: HashSet<ValueId> = func.params.iter().copied().collect();
    for cmd in &func.commands {
        set.extend(cmd.reads());
        set.extend(cmd.writes());
    }
    set
}

/// Assigns the non-dynamic homes: literals, labeled statics, stack slots
/// for address-taken and odd-sized values, and caller-frame slots for
/// stack-passed parameters.
fn assign_fixed_homes(
    il: &ILCode,
    func_index: usize,
    syms: &SymbolTable,
    static_labels: &HashMap<ValueId, String>,
    frame: &mut u64,
) -> HashMap<ValueId, Spot> {
    let func = &il.funcs[func_index];
    let mut spots = HashMap::new();

    let mut stack_slot = |frame: &mut u64, size: u64| {
        *frame = crate::compiler::types::round_up(*frame + size.max(1), 8);
        Spot::Stack(-(*frame as i64))
    };

    // Values whose address is taken must live in memory.
    let mut addressed: HashSet<ValueId> = HashSet::new();
    for cmd in &func.commands {
        if let Some(v) = cmd.address_taken() {
            addressed.insert(v);
        }
    }

    for v in referenced_values(il, func_index) {
        let data = il.value(v);
        let spot = match &data.kind {
            ValueKind::Literal(c) => Some(Spot::Literal(*c)),
            // String literal labels are derived from their index; the
            // emitter uses the same scheme for the .rodata entries.
            ValueKind::StringLit(index) => {
                Some(Spot::MemLabel(format!(".Lstr{index}")))
            }
            ValueKind::Named(_) => {
                match syms.var_meta(v).map(|m| m.storage) {
                    // Functions and external objects are referenced
                    // directly by name.
                    Some(StorageDur::None) => static_labels
                        .get(&v)
                        .map(|l| Spot::MemLabel(l.clone())),
                    Some(StorageDur::Static) => static_labels
                        .get(&v)
                        .map(|l| Spot::MemLabel(l.clone())),
                    _ => None,
                }
            }
            ValueKind::Local => None,
        };
        if let Some(spot) = spot {
            spots.insert(v, spot);
            continue;
        }

        // Remaining values are automatics and temporaries. Those that
        // cannot live in a register get frame slots now.
        let odd_size = !matches!(data.size, 1 | 2 | 4 | 8);
        if addressed.contains(&v) || odd_size {
            spots.insert(v, stack_slot(frame, data.size));
        }
    }

    // Stack-passed incoming parameters already have caller-frame homes,
    // unless their address is taken (then they were just given a local
    // slot and the prelude copies them in).
    for (i, &p) in func.params.iter().enumerate() {
        if i >= ARG_REGISTERS.len() {
            let caller_offset = 16 + 8 * (i - ARG_REGISTERS.len()) as i64;
            spots.entry(p).or_insert(Spot::Stack(caller_offset));
        }
    }

    spots
}

/// Rewrites every use of `v` as a load into a fresh temporary and every
/// def as a store from one, so only short ranges remain to color.
fn rewrite_spilled(il: &mut ILCode, func_index: usize, v: ValueId) {
    let data = il.value(v).clone();
    let commands = std::mem::take(&mut il.funcs[func_index].commands);
    let mut rewritten = Vec::with_capacity(commands.len() + 8);

    for mut cmd in commands {
        let reads = cmd.reads().contains(&v);
        let writes = cmd.writes().contains(&v);

        if reads {
            let t = il.new_value(data.ty, data.size, data.signed, data.is_bool);
            rewritten.push(ILCommand::Set { out: t, arg: v });
            cmd.replace_reads(v, t);
        }
        if writes {
            let t = il.new_value(data.ty, data.size, data.signed, data.is_bool);
            cmd.replace_writes(v, t);
            rewritten.push(cmd);
            rewritten.push(ILCommand::Set { out: v, arg: t });
            continue;
        }
        rewritten.push(cmd);
    }

    il.funcs[func_index].commands = rewritten;
}

// ----------------------------------------------------------------------
// Graph coloring.

struct ColorResult {
    colors: HashMap<ValueId, Reg>,
    spilled: Vec<ValueId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Worklist,
    Active,
    Coalesced,
    Constrained,
    Frozen,
}

/// One round of iterated register coalescing over a fixed graph.
struct Colorer<'a> {
    graph: &'a InterferenceGraph,

    adj_set: HashSet<(Node, Node)>,
    // Full adjacency, kept intact through simplification; consulted for
    // final color assignment.
    adj_list: HashMap<Node, HashSet<Node>>,
    degree: HashMap<Node, usize>,

    moves: Vec<(Node, Node)>,
    move_state: Vec<MoveState>,
    move_list: HashMap<Node, Vec<usize>>,

    simplify_wl: Vec<Node>,
    freeze_wl: HashSet<Node>,
    spill_wl: HashSet<Node>,

    coalesced_nodes: HashSet<Node>,
    alias: HashMap<Node, Node>,
    select_stack: Vec<Node>,
    in_select: HashSet<Node>,
    spilled_nodes: Vec<Node>,
}

impl<'a> Colorer<'a> {
    fn new(graph: &'a InterferenceGraph, tracked: &HashSet<ValueId>) -> Self {
        let mut c = Colorer {
            graph,
            adj_set: HashSet::new(),
            adj_list: HashMap::new(),
            degree: HashMap::new(),
            moves: graph.moves.clone(),
            move_state: vec![MoveState::Worklist; graph.moves.len()],
            move_list: HashMap::new(),
            simplify_wl: Vec::new(),
            freeze_wl: HashSet::new(),
            spill_wl: HashSet::new(),
            coalesced_nodes: HashSet::new(),
            alias: HashMap::new(),
            select_stack: Vec::new(),
            in_select: HashSet::new(),
            spilled_nodes: Vec::new(),
        };

        for &v in tracked {
            c.adj_list.entry(Node::Value(v)).or_default();
            c.degree.entry(Node::Value(v)).or_insert(0);
        }

        for (&n, neighbors) in &graph.adj {
            for &m in neighbors {
                c.add_edge(n, m);
            }
        }

        for (n, indices) in &graph.move_list {
            c.move_list.insert(*n, indices.clone());
        }

        c
    }

    fn is_precolored(n: Node) -> bool {
        matches!(n, Node::Reg(_))
    }

    fn add_edge(&mut self, u: Node, v: Node) {
        if u == v {
            return;
        }
        let key = if u <= v { (u, v) } else { (v, u) };
        if !self.adj_set.insert(key) {
            return;
        }
        if !Self::is_precolored(u) {
            self.adj_list.entry(u).or_default().insert(v);
            *self.degree.entry(u).or_insert(0) += 1;
        }
        if !Self::is_precolored(v) {
            self.adj_list.entry(v).or_default().insert(u);
            *self.degree.entry(v).or_insert(0) += 1;
        }
    }

    fn interferes(&self, u: Node, v: Node) -> bool {
        let key = if u <= v { (u, v) } else { (v, u) };
        self.adj_set.contains(&key)
    }

    fn degree_of(&self, n: Node) -> usize {
        if Self::is_precolored(n) {
            usize::MAX
        } else {
            self.degree.get(&n).copied().unwrap_or(0)
        }
    }

    /// Current neighbors: full adjacency minus removed/merged nodes.
    fn adjacent(&self, n: Node) -> Vec<Node> {
        self.adj_list
            .get(&n)
            .map(|s| {
                s.iter()
                    .copied()
                    .filter(|m| {
                        !self.in_select.contains(m)
                            && !self.coalesced_nodes.contains(m)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn node_moves(&self, n: Node) -> Vec<usize> {
        self.move_list
            .get(&n)
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|&i| {
                        matches!(
                            self.move_state[i],
                            MoveState::Worklist | MoveState::Active
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn move_related(&self, n: Node) -> bool {
        !self.node_moves(n).is_empty()
    }

    fn get_alias(&self, n: Node) -> Node {
        let mut n = n;
        while self.coalesced_nodes.contains(&n) {
            n = self.alias[&n];
        }
        n
    }

    fn run(mut self) -> ColorResult {
        self.make_worklists();

        loop {
            if let Some(n) = self.simplify_wl.pop() {
                // Degree transitions can queue a node twice; only the
                // first pop removes it.
                if !self.in_select.contains(&n)
                    && !self.coalesced_nodes.contains(&n)
                {
                    self.simplify(n);
                }
            } else if let Some(i) =
                self.move_state.iter().position(|&s| s == MoveState::Worklist)
            {
                self.coalesce(i);
            } else if let Some(&n) = self.freeze_wl.iter().next() {
                self.freeze_wl.remove(&n);
                self.freeze(n);
            } else if let Some(n) = self.select_spill_candidate() {
                self.spill_wl.remove(&n);
                // Optimistic spill: push it anyway and hope a color is
                // left during selection.
                self.freeze_moves(n);
                self.push_select(n);
            } else {
                break;
            }
        }

        self.assign_colors()
    }

    fn make_worklists(&mut self) {
        let nodes: Vec<Node> = self
            .adj_list
            .keys()
            .copied()
            .filter(|n| !Self::is_precolored(*n))
            .collect();
        for n in nodes {
            if self.degree_of(n) >= K {
                self.spill_wl.insert(n);
            } else if self.move_related(n) {
                self.freeze_wl.insert(n);
            } else {
                self.simplify_wl.push(n);
            }
        }
    }

    fn push_select(&mut self, n: Node) {
        self.select_stack.push(n);
        self.in_select.insert(n);
        for m in self.adjacent(n) {
            self.decrement_degree(m);
        }
    }

    fn simplify(&mut self, n: Node) {
        self.push_select(n);
    }

    fn decrement_degree(&mut self, m: Node) {
        if Self::is_precolored(m) {
            return;
        }
        let d = self.degree_of(m);
        if let Some(entry) = self.degree.get_mut(&m) {
            *entry = entry.saturating_sub(1);
        }
        if d == K {
            // m just became low-degree: its moves (and its neighbors')
            // may succeed now.
            let mut enable = self.adjacent(m);
            enable.push(m);
            self.enable_moves(&enable);

            self.spill_wl.remove(&m);
            if self.move_related(m) {
                self.freeze_wl.insert(m);
            } else {
                self.simplify_wl.push(m);
            }
        }
    }

    fn enable_moves(&mut self, nodes: &[Node]) {
        for &n in nodes {
            for i in self.node_moves(n) {
                if self.move_state[i] == MoveState::Active {
                    self.move_state[i] = MoveState::Worklist;
                }
            }
        }
    }

    fn add_worklist(&mut self, n: Node) {
        if !Self::is_precolored(n)
            && !self.move_related(n)
            && self.degree_of(n) < K
        {
            self.freeze_wl.remove(&n);
            if !self.simplify_wl.contains(&n) && !self.in_select.contains(&n) {
                self.simplify_wl.push(n);
            }
        }
    }

    /// The George criterion: coalescing v into precolored u is safe when
    /// every neighbor of v either is low-degree, already interferes
    /// with u, or is itself precolored.
    fn george_ok(&self, v: Node, u: Node) -> bool {
        self.adjacent(v).into_iter().all(|t| {
            self.degree_of(t) < K
                || Self::is_precolored(t)
                || self.interferes(t, u)
        })
    }

    /// The Briggs criterion: the combined node is safe when fewer than K
    /// of its neighbors have significant degree.
    fn briggs_ok(&self, u: Node, v: Node) -> bool {
        let mut neighbors: HashSet<Node> = HashSet::new();
        neighbors.extend(self.adjacent(u));
        neighbors.extend(self.adjacent(v));
        let significant = neighbors
            .into_iter()
            .filter(|&t| self.degree_of(t) >= K)
            .count();
        significant < K
    }

    fn coalesce(&mut self, index: usize) {
        let (mx, my) = self.moves[index];
        let x = self.get_alias(mx);
        let y = self.get_alias(my);

        let (u, v) = if Self::is_precolored(y) { (y, x) } else { (x, y) };

        if u == v {
            self.move_state[index] = MoveState::Coalesced;
            self.add_worklist(u);
        } else if Self::is_precolored(v) || self.interferes(u, v) {
            self.move_state[index] = MoveState::Constrained;
            self.add_worklist(u);
            self.add_worklist(v);
        } else if (Self::is_precolored(u) && self.george_ok(v, u))
            || (!Self::is_precolored(u) && self.briggs_ok(u, v))
        {
            self.move_state[index] = MoveState::Coalesced;
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.move_state[index] = MoveState::Active;
        }
    }

    fn combine(&mut self, u: Node, v: Node) {
        self.freeze_wl.remove(&v);
        self.spill_wl.remove(&v);
        self.coalesced_nodes.insert(v);
        self.alias.insert(v, u);

        let v_moves = self.move_list.get(&v).cloned().unwrap_or_default();
        self.move_list.entry(u).or_default().extend(v_moves);
        self.enable_moves(&[v]);

        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }

        if self.degree_of(u) >= K && self.freeze_wl.remove(&u) {
            self.spill_wl.insert(u);
        }
    }

    fn freeze(&mut self, n: Node) {
        self.simplify_wl.push(n);
        self.freeze_moves(n);
    }

    fn freeze_moves(&mut self, n: Node) {
        for i in self.node_moves(n) {
            let (x, y) = self.moves[i];
            let x = self.get_alias(x);
            let y = self.get_alias(y);
            let other = if y == self.get_alias(n) { x } else { y };

            self.move_state[i] = MoveState::Frozen;

            if !Self::is_precolored(other)
                && !self.move_related(other)
                && self.degree_of(other) < K
                && self.freeze_wl.remove(&other)
            {
                self.simplify_wl.push(other);
            }
        }
    }

    /// Potential-spill heuristic: highest degree relative to how often
    /// the value is used.
    fn select_spill_candidate(&self) -> Option<Node> {
        self.spill_wl
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let score = |n: Node| {
                    let uses = match n {
                        Node::Value(v) => {
                            self.graph.use_counts.get(&v).copied().unwrap_or(1)
                        }
                        Node::Reg(_) => 1,
                    };
                    self.degree_of(n) as f64 / f64::from(uses.max(1))
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    fn assign_colors(mut self) -> ColorResult {
        let mut colors: HashMap<Node, Reg> = HashMap::new();

        while let Some(n) = self.select_stack.pop() {
            self.in_select.remove(&n);

            let mut ok: Vec<Reg> = ALLOC_REGISTERS.to_vec();
            for &w in self.adj_list.get(&n).into_iter().flatten() {
                let w = self.get_alias(w);
                let used = match w {
                    Node::Reg(r) => Some(r),
                    Node::Value(_) => colors.get(&w).copied(),
                };
                if let Some(r) = used {
                    ok.retain(|&c| c != r);
                }
            }

            match ok.first() {
                Some(&r) => {
                    colors.insert(n, r);
                }
                None => self.spilled_nodes.push(n),
            }
        }

        let coalesced: Vec<Node> = self.coalesced_nodes.iter().copied().collect();
        for n in coalesced {
            let root = self.get_alias(n);
            let color = match root {
                Node::Reg(r) => Some(r),
                Node::Value(_) => colors.get(&root).copied(),
            };
            if let Some(r) = color {
                colors.insert(n, r);
            } else if let Node::Value(v) = n {
                // The coalesced root spilled; the member spills with it.
                self.spilled_nodes.push(Node::Value(v));
            }
        }

        let spilled = self
            .spilled_nodes
            .into_iter()
            .filter_map(|n| match n {
                Node::Value(v) => Some(v),
                Node::Reg(_) => None,
            })
            .collect();

        let colors = colors
            .into_iter()
            .filter_map(|(n, r)| match n {
                Node::Value(v) => Some((v, r)),
                Node::Reg(_) => None,
            })
            .collect();

        ColorResult { colors, spilled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::il::BinaryOp;
    use crate::compiler::types::TypePool;

    fn value(il: &mut ILCode) -> ValueId {
        il.new_value(TypePool::INT, 4, true, false)
    }

    fn allocate_func(il: &mut ILCode) -> Allocation {
        let syms = SymbolTable::new();
        let labels = HashMap::new();
        allocate(il, 0, &syms, &labels)
    }

    fn assert_sound(il: &ILCode, alloc: &Allocation) {
        // No two simultaneously live values share a spot.
        let func = &il.funcs[0];
        let tracked: HashSet<ValueId> = alloc.spots.keys().copied().collect();
        let live = liveness::analyze(func, &tracked);

        for (i, cmd) in func.commands.iter().enumerate() {
            for w in cmd.writes() {
                let Some(ws) = alloc.spots.get(&w) else { continue };
                if matches!(ws, Spot::Literal(_)) {
                    continue;
                }
                for &b in &live.live_out[i] {
                    if b == w {
                        continue;
                    }
                    if let Some((dst, src)) = cmd.as_move(il) {
                        if w == dst && b == src {
                            continue;
                        }
                    }
                    let Some(bs) = alloc.spots.get(&b) else { continue };
                    assert_ne!(
                        ws, bs,
                        "values {w} and {b} interfere but share {ws:?} at command {i}"
                    );
                }
            }
        }
    }

    #[test]
    fn simple_function_colors_without_spills() {
        let mut il = ILCode::new();
        let (a, b, c) = (value(&mut il), value(&mut il), value(&mut il));
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: a, imm: 5 });
        il.add(ILCommand::Load { out: b, imm: 10 });
        il.add(ILCommand::Binary { op: BinaryOp::Add, out: c, lhs: a, rhs: b });
        il.add(ILCommand::Return(Some(c)));

        let alloc = allocate_func(&mut il);
        assert!(matches!(alloc.spots[&a], Spot::Register(_)));
        assert!(matches!(alloc.spots[&b], Spot::Register(_)));
        assert_sound(&il, &alloc);
    }

    #[test]
    fn copy_chain_coalesces_to_one_register() {
        let mut il = ILCode::new();
        let (a, b, c) = (value(&mut il), value(&mut il), value(&mut il));
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: a, imm: 1 });
        il.add(ILCommand::Set { out: b, arg: a });
        il.add(ILCommand::Set { out: c, arg: b });
        il.add(ILCommand::Return(Some(c)));

        let alloc = allocate_func(&mut il);
        // All three were only connected by moves; they share one spot.
        assert_eq!(alloc.spots[&a], alloc.spots[&b]);
        assert_eq!(alloc.spots[&b], alloc.spots[&c]);
        assert_sound(&il, &alloc);
    }

    #[test]
    fn return_value_prefers_rax() {
        let mut il = ILCode::new();
        let a = value(&mut il);
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: a, imm: 3 });
        il.add(ILCommand::Return(Some(a)));

        let alloc = allocate_func(&mut il);
        assert_eq!(alloc.spots[&a], Spot::Register(Reg::Rax));
    }

    #[test]
    fn divisor_avoids_rax_and_rdx() {
        let mut il = ILCode::new();
        let (q, l, r) = (value(&mut il), value(&mut il), value(&mut il));
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: l, imm: 40 });
        il.add(ILCommand::Load { out: r, imm: 5 });
        il.add(ILCommand::Binary { op: BinaryOp::Div, out: q, lhs: l, rhs: r });
        il.add(ILCommand::Return(Some(q)));

        let alloc = allocate_func(&mut il);
        assert_ne!(alloc.spots[&r], Spot::Register(Reg::Rax));
        assert_ne!(alloc.spots[&r], Spot::Register(Reg::Rdx));
        assert_sound(&il, &alloc);
    }

    #[test]
    fn address_taken_value_gets_memory_home() {
        let mut il = ILCode::new();
        let x = value(&mut il);
        let px = {
            let mut pool = TypePool::new();
            let ty = pool.pointer_to(TypePool::INT);
            il.new_value(ty, 8, false, false)
        };
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        il.add(ILCommand::Load { out: x, imm: 1 });
        il.add(ILCommand::AddrOf { out: px, var: x });
        il.add(ILCommand::Return(Some(x)));

        let alloc = allocate_func(&mut il);
        assert!(matches!(alloc.spots[&x], Spot::Stack(_)));
        assert_sound(&il, &alloc);
    }

    #[test]
    fn high_pressure_spills_and_stays_sound() {
        // More simultaneously live values than there are registers.
        let mut il = ILCode::new();
        let vals: Vec<ValueId> = (0..(K + 3)).map(|_| value(&mut il)).collect();
        let sum = value(&mut il);

        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![]);
        for (i, &v) in vals.iter().enumerate() {
            il.add(ILCommand::Load { out: v, imm: i as i64 });
        }
        il.add(ILCommand::Load { out: sum, imm: 0 });
        for &v in &vals {
            il.add(ILCommand::Binary {
                op: BinaryOp::Add,
                out: sum,
                lhs: sum,
                rhs: v,
            });
        }
        il.add(ILCommand::Return(Some(sum)));

        let alloc = allocate_func(&mut il);
        // Everything referenced by the rewritten program has a spot.
        for cmd in &il.funcs[0].commands {
            for v in cmd.reads().into_iter().chain(cmd.writes()) {
                assert!(
                    alloc.spots.contains_key(&v),
                    "value {v} has no spot after spilling"
                );
            }
        }
        assert_sound(&il, &alloc);
        assert!(alloc.frame_size > 0, "expected at least one spill slot");
    }

    #[test]
    fn parameters_in_registers_do_not_collide() {
        let mut il = ILCode::new();
        let (p0, p1) = (value(&mut il), value(&mut il));
        let out = value(&mut il);
        let fv = il.new_value(TypePool::INT, 0, true, false);
        il.start_func("f", fv, vec![p0, p1]);
        il.add(ILCommand::Binary {
            op: BinaryOp::Add,
            out,
            lhs: p0,
            rhs: p1,
        });
        il.add(ILCommand::Return(Some(out)));

        let alloc = allocate_func(&mut il);
        assert_ne!(alloc.spots[&p0], alloc.spots[&p1]);
        // Neither parameter may sit in the other's incoming register.
        assert_ne!(alloc.spots[&p0], Spot::Register(Reg::Rsi));
        assert_ne!(alloc.spots[&p1], Spot::Register(Reg::Rdi));
        assert_sound(&il, &alloc);
    }
}

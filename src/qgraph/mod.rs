//! Query-graph node tree and cooperative scheduler (spec §4.6).
//!
//! A statement is a tree of tagged nodes (spec §9, "represent as a tagged
//! sum of node kinds"); `Thread` drives exactly one node at a time,
//! suspending on a lock wait and resuming at the same node once the
//! caller has blocked on the grant (spec §4.7 point 7, "state is carried
//! in the insert node").

use std::collections::HashMap;

use crate::{types::Value, Result};

/// A node's step outcome. `Leaf` nodes (INSERT/UPDATE/SELECT/FETCH/OPEN)
/// are opaque step functions supplied by the `row`/caller layer; this
/// module only supplies the control-flow skeleton and the scheduler.
pub enum StepResult {
    Continue,
    LockWait,
    Done,
}

/// Thread state machine (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    CommandWait,
    Running,
    LockWait,
    Completed,
    Suspended,
}

/// A simple per-statement symbol table (spec §9, "sym-table nodes"):
/// named slots a query-graph thread reads/writes with ASSIGN.
pub type Env = HashMap<String, Value>;

/// A boolean/value expression over `Env`, evaluated by IF/WHILE
/// conditions and ASSIGN right-hand sides. Kept deliberately tiny —
/// full expression evaluation belongs to the out-of-scope parser (spec
/// §1); this only needs to drive control flow within the core.
pub enum Expr {
    Const(Value),
    Var(String),
    IsTrue(Box<Expr>),
}

impl Expr {
    fn eval(&self, env: &Env) -> Value {
        match self {
            Expr::Const(v) => v.clone(),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .unwrap_or_else(|| Value::null(crate::types::TypeId::Int, crate::types::PrType::new(true))),
            Expr::IsTrue(inner) => {
                let v = inner.eval(env);
                match v {
                    Value::Int { v, .. } => Value::int(if v != 0 { 1 } else { 0 }, crate::types::PrType::new(false)),
                    _ => Value::int(0, crate::types::PrType::new(false)),
                }
            }
        }
    }

    fn is_true(&self, env: &Env) -> bool {
        matches!(self.eval(env), Value::Int { v, .. } if v != 0)
    }
}

type Leaf = Box<dyn FnMut(&mut Env) -> Result<StepResult>>;

/// Tagged sum of query-graph node kinds (spec §4.6, §9). `Insert`,
/// `Update`, `Select`, `Fetch`, `Open` carry an opaque step closure built
/// by the layer that actually knows how to run them (`row::insert`,
/// `row::update`); `If`/`While`/`For`/`Assign`/`Commit`/`Rollback` are
/// interpreted directly by this module since they are pure control flow.
pub enum NodeKind {
    Insert(Leaf),
    Update(Leaf),
    Select(Leaf),
    Fetch(Leaf),
    Open(Leaf),
    If {
        cond: Expr,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
    While {
        cond: Expr,
        body: Vec<Node>,
    },
    For {
        var: String,
        from: i64,
        to: i64,
        body: Vec<Node>,
    },
    Assign {
        var: String,
        value: Expr,
    },
    Commit,
    Rollback,
}

/// A node plus the header fields every variant shares (spec §9: "common
/// fields move into a shared header struct carried by each variant").
pub struct Node {
    pub kind: NodeKind,
}

impl Node {
    pub fn leaf_insert(f: impl FnMut(&mut Env) -> Result<StepResult> + 'static) -> Node {
        Node { kind: NodeKind::Insert(Box::new(f)) }
    }

    pub fn leaf_update(f: impl FnMut(&mut Env) -> Result<StepResult> + 'static) -> Node {
        Node { kind: NodeKind::Update(Box::new(f)) }
    }

    pub fn assign(var: &str, value: Expr) -> Node {
        Node { kind: NodeKind::Assign { var: var.to_string(), value } }
    }

    pub fn if_node(cond: Expr, then_branch: Vec<Node>, else_branch: Vec<Node>) -> Node {
        Node { kind: NodeKind::If { cond, then_branch, else_branch } }
    }

    pub fn while_node(cond: Expr, body: Vec<Node>) -> Node {
        Node { kind: NodeKind::While { cond, body } }
    }
}

/// Cooperative executor for one query-graph thread (spec §4.6). Exactly
/// one O/S thread drives it at a time (spec §5); `run` steps through
/// `nodes` depth-first, yielding control the instant a leaf reports
/// `LockWait` or the `step_budget` is exhausted (spec C, `que0que.c`'s
/// `que_thread_t.resource`: a cooperative thread yields back to the
/// scheduler after a bounded amount of work even without a lock wait).
pub struct Thread {
    pub state: ThreadState,
    step_budget: u32,
    budget_per_run: u32,
}

impl Thread {
    pub const DEFAULT_STEP_BUDGET: u32 = 10_000;

    pub fn new(budget_per_run: u32) -> Thread {
        Thread {
            state: ThreadState::CommandWait,
            step_budget: budget_per_run,
            budget_per_run,
        }
    }

    /// Run `nodes` to completion, a lock wait, or budget exhaustion.
    /// Resuming after `LockWait` (the caller blocks on the lock grant
    /// and calls `run` again) re-enters from the top of `nodes` — leaf
    /// closures are expected to be idempotent-on-retry the way
    /// `insert_entry_low`'s per-index loop is (spec §4.7 point 7).
    pub fn run(&mut self, nodes: &mut [Node], env: &mut Env) -> Result<ThreadState> {
        self.state = ThreadState::Running;
        self.step_budget = self.budget_per_run;
        match self.run_block(nodes, env)? {
            StepResult::Done => self.state = ThreadState::Completed,
            StepResult::LockWait => self.state = ThreadState::LockWait,
            StepResult::Continue => self.state = ThreadState::Suspended,
        }
        Ok(self.state)
    }

    fn charge(&mut self) -> bool {
        if self.step_budget == 0 {
            false
        } else {
            self.step_budget -= 1;
            true
        }
    }

    fn run_block(&mut self, nodes: &mut [Node], env: &mut Env) -> Result<StepResult> {
        for node in nodes.iter_mut() {
            if !self.charge() {
                return Ok(StepResult::Continue);
            }
            match self.run_node(node, env)? {
                StepResult::Continue | StepResult::Done => continue,
                StepResult::LockWait => return Ok(StepResult::LockWait),
            }
        }
        Ok(StepResult::Done)
    }

    fn run_node(&mut self, node: &mut Node, env: &mut Env) -> Result<StepResult> {
        match &mut node.kind {
            NodeKind::Insert(f) | NodeKind::Update(f) | NodeKind::Select(f) | NodeKind::Fetch(f) | NodeKind::Open(f) => {
                f(env)
            }
            NodeKind::Assign { var, value } => {
                let v = value.eval(env);
                env.insert(var.clone(), v);
                Ok(StepResult::Continue)
            }
            NodeKind::If { cond, then_branch, else_branch } => {
                if cond.is_true(env) {
                    self.run_block(then_branch, env)
                } else {
                    self.run_block(else_branch, env)
                }
            }
            NodeKind::While { cond, body } => {
                while cond.is_true(env) {
                    if !self.charge() {
                        return Ok(StepResult::Continue);
                    }
                    match self.run_block(body, env)? {
                        StepResult::LockWait => return Ok(StepResult::LockWait),
                        _ => {}
                    }
                }
                Ok(StepResult::Continue)
            }
            NodeKind::For { var, from, to, body } => {
                let mut i = *from;
                while i < *to {
                    env.insert(var.clone(), Value::int(i, crate::types::PrType::new(false)));
                    if !self.charge() {
                        return Ok(StepResult::Continue);
                    }
                    match self.run_block(body, env)? {
                        StepResult::LockWait => return Ok(StepResult::LockWait),
                        _ => {}
                    }
                    i += 1;
                }
                Ok(StepResult::Continue)
            }
            NodeKind::Commit | NodeKind::Rollback => Ok(StepResult::Done),
        }
    }
}

#[cfg(test)]
mod qgraph_test {
    use super::*;
    use crate::types::PrType;

    #[test]
    fn test_assign_and_if() {
        let mut env = Env::new();
        let mut nodes = vec![
            Node::assign("x", Expr::Const(Value::int(1, PrType::new(false)))),
            Node::if_node(
                Expr::Var("x".to_string()),
                vec![Node::assign("y", Expr::Const(Value::int(99, PrType::new(false))))],
                vec![Node::assign("y", Expr::Const(Value::int(0, PrType::new(false))))],
            ),
        ];
        let mut thread = Thread::new(Thread::DEFAULT_STEP_BUDGET);
        let state = thread.run(&mut nodes, &mut env).unwrap();
        assert_eq!(state, ThreadState::Completed);
        assert_eq!(env.get("y"), Some(&Value::int(99, PrType::new(false))));
    }

    #[test]
    fn test_lock_wait_suspends_and_resumes() {
        let mut attempts = 0;
        let mut nodes = vec![Node::leaf_insert(move |_env| {
            attempts += 1;
            if attempts == 1 {
                Ok(StepResult::LockWait)
            } else {
                Ok(StepResult::Done)
            }
        })];
        let mut env = Env::new();
        let mut thread = Thread::new(Thread::DEFAULT_STEP_BUDGET);
        assert_eq!(thread.run(&mut nodes, &mut env).unwrap(), ThreadState::LockWait);
        assert_eq!(thread.run(&mut nodes, &mut env).unwrap(), ThreadState::Completed);
    }

    #[test]
    fn test_step_budget_suspends() {
        let mut nodes = vec![Node::while_node(
            Expr::Const(Value::int(1, PrType::new(false))),
            vec![Node::assign("x", Expr::Const(Value::int(1, PrType::new(false))))],
        )];
        let mut env = Env::new();
        let mut thread = Thread::new(5);
        assert_eq!(thread.run(&mut nodes, &mut env).unwrap(), ThreadState::Suspended);
    }
}

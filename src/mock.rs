//! In-memory executor for tests.
//!
//! Records every transaction, can be scripted to fail chosen attempts, and
//! applies committed node/relationship statements to a tiny fake graph so
//! MERGE/CREATE semantics can be checked without a database.

use crate::cypher::Params;
use crate::executor::{TransactionalExecutor, WriteTransaction};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq)]
pub struct FakeNode {
    pub label: String,
    pub props: Params,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeEdge {
    pub rel_type: String,
    pub from: (String, Value),
    pub to: (String, Value),
    pub props: Params,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub begin_calls: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Statements of every committed transaction, in commit order
    pub committed: Vec<Vec<(String, Params)>>,
    pub nodes: Vec<FakeNode>,
    pub edges: Vec<FakeEdge>,
}

impl MockState {
    pub fn committed_statements(&self) -> usize {
        self.committed.iter().map(Vec::len).sum()
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<&FakeNode> {
        self.nodes.iter().filter(|n| n.label == label).collect()
    }

    pub fn edges_of_type(&self, rel_type: &str) -> Vec<&FakeEdge> {
        self.edges.iter().filter(|e| e.rel_type == rel_type).collect()
    }
}

type FailWhen = Box<dyn Fn(usize) -> bool + Send + Sync>;

pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
    fail_when: FailWhen,
    barrier: Option<Arc<Barrier>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            fail_when: Box::new(|_| false),
            barrier: None,
        }
    }

    /// Transactions opened by the given 1-based `begin` calls fail on their
    /// first statement.
    pub fn failing_attempts(attempts: impl IntoIterator<Item = usize>) -> Self {
        let attempts: HashSet<usize> = attempts.into_iter().collect();
        Self {
            fail_when: Box::new(move |attempt| attempts.contains(&attempt)),
            ..Self::new()
        }
    }

    /// Every transaction from the `first`-th `begin` call onwards fails.
    pub fn failing_from(first: usize) -> Self {
        Self {
            fail_when: Box::new(move |attempt| attempt >= first),
            ..Self::new()
        }
    }

    /// Each `run` waits on the barrier, so a chunk only completes if its
    /// statements are in flight at the same time.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionalExecutor for MockExecutor {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.begin_calls += 1;
            state.begin_calls
        };
        Ok(Box::new(MockTransaction {
            attempt,
            fail: (self.fail_when)(attempt),
            barrier: self.barrier.clone(),
            pending: Mutex::new(Vec::new()),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockTransaction {
    attempt: usize,
    fail: bool,
    barrier: Option<Arc<Barrier>>,
    pending: Mutex<Vec<(String, Params)>>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl WriteTransaction for MockTransaction {
    async fn run(&self, query: &str, params: &Params) -> Result<()> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if self.fail {
            return Err(anyhow!("simulated transient failure (attempt {})", self.attempt));
        }
        self.pending.lock().unwrap().push((query.to_string(), params.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let statements = this.pending.into_inner().unwrap();
        let mut state = this.state.lock().unwrap();
        for (query, params) in &statements {
            apply(&mut state, query, params);
        }
        state.commits += 1;
        state.committed.push(statements);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

fn apply(state: &mut MockState, query: &str, params: &Params) {
    let merge_node = Regex::new(r"^MERGE \(n:(\w+) \{(\w+): \$(\w+)\}\) SET n \+= \$props").unwrap();
    let create_node = Regex::new(r"^CREATE \(n:(\w+)\) SET n = \$props").unwrap();
    let relationship = Regex::new(
        r"^MATCH \(from:(\w+) \{(\w+): \$fromId\}\)\nMATCH \(to:(\w+) \{(\w+): \$toId\}\)\n(MERGE|CREATE) \(from\)-\[r:(\w+)\]->\(to\)",
    )
    .unwrap();

    let props = params
        .get("props")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(caps) = merge_node.captures(query) {
        let (label, key, param) = (&caps[1], &caps[2], &caps[3]);
        let id = &params[param];
        match state
            .nodes
            .iter_mut()
            .find(|n| n.label == label && n.props.get(key) == Some(id))
        {
            Some(node) => node.props.extend(props),
            None => state.nodes.push(FakeNode {
                label: label.to_string(),
                props,
            }),
        }
    } else if let Some(caps) = create_node.captures(query) {
        state.nodes.push(FakeNode {
            label: caps[1].to_string(),
            props,
        });
    } else if let Some(caps) = relationship.captures(query) {
        let from = (caps[1].to_string(), params["fromId"].clone());
        let to = (caps[3].to_string(), params["toId"].clone());
        let exists = |label: &str, key: &str, id: &Value| {
            state
                .nodes
                .iter()
                .any(|n| n.label == label && n.props.get(key) == Some(id))
        };
        if !exists(&from.0, &caps[2], &from.1) || !exists(&to.0, &caps[4], &to.1) {
            return;
        }

        let rel_type = caps[6].to_string();
        if &caps[5] == "MERGE" {
            if let Some(edge) = state
                .edges
                .iter_mut()
                .find(|e| e.rel_type == rel_type && e.from == from && e.to == to)
            {
                edge.props.extend(props);
                return;
            }
        }
        state.edges.push(FakeEdge {
            rel_type,
            from,
            to,
            props,
        });
    }
}

//! Execution clients
//!
//! A [`ComputationClient`] owns "server side" data and runs built
//! computations against it. [`LocalClient`] keeps everything in host memory
//! and runs the reference interpreter.

use crate::computation::XlaComputation;
use crate::error::Result;
use crate::interpreter;
use crate::literal::Literal;
use crate::shape::Shape;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Data transferred to a client, ready to be passed as an argument.
#[derive(Debug, Clone)]
pub struct GlobalData {
    handle: u64,
    literal: Arc<Literal>,
}

impl GlobalData {
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn shape(&self) -> Shape {
        self.literal.shape()
    }
}

/// Transfer/execute capability of a compute service.
pub trait ComputationClient: Send + Sync {
    fn platform_name(&self) -> &str;

    /// Copy a host literal to the client
    fn transfer_to_server(&self, literal: &Literal) -> Result<GlobalData>;

    /// Run `computation` with `arguments` bound to parameters `0..n`
    fn execute(&self, computation: &XlaComputation, arguments: &[&GlobalData]) -> Result<Literal>;
}

/// Host interpreter client.
#[derive(Debug, Default)]
pub struct LocalClient {
    next_handle: AtomicU64,
}

impl LocalClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputationClient for LocalClient {
    fn platform_name(&self) -> &str {
        "Host"
    }

    fn transfer_to_server(&self, literal: &Literal) -> Result<GlobalData> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        Ok(GlobalData {
            handle,
            literal: Arc::new(literal.clone()),
        })
    }

    fn execute(&self, computation: &XlaComputation, arguments: &[&GlobalData]) -> Result<Literal> {
        let literals: Vec<&Literal> = arguments.iter().map(|data| data.literal.as_ref()).collect();
        tracing::debug!(
            computation = computation.name(),
            arguments = literals.len(),
            instructions = computation.instruction_count(),
            "executing on host"
        );
        interpreter::evaluate(computation, &literals)
    }
}

//! Structural transforms in the jq language, evaluated by `jaq`.
//!
//! Programs are checked when the route table loads, so syntax errors and
//! undefined filters fail at startup. Each evaluation builds its own filter;
//! `jaq` values are reference counted and never leave the calling thread.

use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde_json::Value;

use crate::transform::TransformError;

/// A checked structural program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    source: String,
}

impl Program {
    pub fn compile(source: &str) -> Result<Self, TransformError> {
        execute(source, None)?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// All outputs of the program.
    pub fn run_all(&self, input: &Value) -> Result<Vec<Value>, TransformError> {
        execute(&self.source, Some(input))
    }

    /// The first output; a program producing nothing is an error.
    pub fn run(&self, input: &Value) -> Result<Value, TransformError> {
        self.run_all(input)?
            .into_iter()
            .next()
            .ok_or_else(|| TransformError::Eval("program produced no output".to_string()))
    }
}

/// Load and compile `source`, then run it on `input` when one is given.
fn execute(source: &str, input: Option<&Value>) -> Result<Vec<Value>, TransformError> {
    let arena = Arena::default();
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let modules = loader
        .load(&arena, File { code: source, path: () })
        .map_err(|errors| TransformError::Parse(format!("'{}': {:?}", source, errors)))?;

    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|errors| TransformError::Parse(format!("'{}': {:?}", source, errors)))?;

    let Some(input) = input else {
        return Ok(Vec::new());
    };
    let inputs = RcIter::new(core::iter::empty());
    let outputs = filter
        .run((Ctx::new([], &inputs), Val::from(input.clone())))
        .map(|output| {
            output
                .map(Value::from)
                .map_err(|e| TransformError::Eval(format!("{:?}", e)))
        })
        .collect::<Result<Vec<_>, _>>();
    outputs
}

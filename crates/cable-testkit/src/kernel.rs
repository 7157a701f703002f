//! Scripted stand-in for a Python kernel.
//!
//! Understands a tiny statement language, one statement per line:
//!
//! - `name = expr` binds a variable
//! - `print(expr)` streams the value to `stdout`
//! - `display(expr)` emits `display_data` with a `text/plain` bundle
//! - `raise Name("message")` fails the execution
//!
//! Expressions are integer or string literals, bound names, or a sum of
//! integers. An unbound name fails with `NameError`, as Python would.

use std::{collections::HashMap, sync::LazyLock};

use cable_core::{
    Envelope,
    envelope::{ExecuteRequest, kind},
};
use cable_transport::memory::KernelSide;
use regex::Regex;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::envelopes;

static ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*=\s*(.+)$").expect("assign pattern is valid")
});
static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(print|display)\((.*)\)$").expect("call pattern is valid")
});
static RAISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^raise\s+([A-Za-z_]\w*)\(\s*["']?(.*?)["']?\s*\)$"#)
        .expect("raise pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn render(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    fn repr(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Str(s) => format!("'{s}'"),
        }
    }
}

struct Raised {
    ename: String,
    evalue: String,
}

/// In-process kernel with a persistent namespace.
#[derive(Debug, Default)]
pub struct FakeKernel {
    namespace: HashMap<String, Value>,
    execution_count: u32,
}

impl FakeKernel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions run so far.
    #[must_use]
    pub const fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Everything the kernel sends back for `request`.
    ///
    /// An `execute_request` yields `busy`, its output, `idle` and then the
    /// reply. Any other message yields nothing.
    pub fn respond(&mut self, request: &Envelope) -> Vec<Envelope> {
        if request.kind() != kind::EXECUTE_REQUEST {
            return Vec::new();
        }
        let parent = &request.header;
        let code = request
            .decode::<ExecuteRequest>()
            .map(|r| r.code)
            .unwrap_or_default();

        self.execution_count += 1;
        let count = self.execution_count;

        let mut out = vec![envelopes::status(parent, "busy")];
        let outcome = self.run(&code, |line| match line {
            Output::Stdout(text) => out.push(envelopes::stream(parent, "stdout", &text)),
            Output::Display(text) => out.push(envelopes::display(parent, json!({ "text/plain": text }))),
        });
        out.push(envelopes::status(parent, "idle"));
        out.push(match outcome {
            Ok(()) => envelopes::execute_ok(parent, count),
            Err(raised) => envelopes::execute_error(parent, count, &raised.ename, &raised.evalue),
        });
        out
    }

    /// Answer every request on an in-memory connection until it closes.
    pub fn serve_memory(mut self, mut side: KernelSide) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(request) = side.recv().await {
                for reply in self.respond(&request) {
                    if !side.send(reply) {
                        return self;
                    }
                }
            }
            self
        })
    }

    fn run(&mut self, code: &str, mut emit: impl FnMut(Output)) -> Result<(), Raised> {
        for line in code.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = RAISE.captures(line) {
                return Err(Raised {
                    ename: caps[1].to_string(),
                    evalue: caps[2].to_string(),
                });
            }
            if let Some(caps) = CALL.captures(line) {
                let value = self.eval(&caps[2])?;
                match &caps[1] {
                    "print" => emit(Output::Stdout(format!("{}\n", value.render()))),
                    _ => emit(Output::Display(value.repr())),
                }
                continue;
            }
            if let Some(caps) = ASSIGN.captures(line) {
                let value = self.eval(&caps[2])?;
                self.namespace.insert(caps[1].to_string(), value);
                continue;
            }
            // Bare expressions are evaluated for their errors only.
            self.eval(line)?;
        }
        Ok(())
    }

    fn eval(&self, expr: &str) -> Result<Value, Raised> {
        let expr = expr.trim();
        if let Some(inner) = quoted(expr) {
            return Ok(Value::Str(inner.to_string()));
        }
        if expr.contains('+') {
            let mut total = 0i64;
            for term in expr.split('+') {
                match self.eval(term)? {
                    Value::Int(n) => total += n,
                    Value::Str(_) => {
                        return Err(Raised {
                            ename: "TypeError".to_string(),
                            evalue: "unsupported operand type(s) for +".to_string(),
                        });
                    }
                }
            }
            return Ok(Value::Int(total));
        }
        if let Ok(n) = expr.parse() {
            return Ok(Value::Int(n));
        }
        self.namespace.get(expr).cloned().ok_or_else(|| Raised {
            ename: "NameError".to_string(),
            evalue: format!("name '{expr}' is not defined"),
        })
    }
}

enum Output {
    Stdout(String),
    Display(String),
}

fn quoted(expr: &str) -> Option<&str> {
    ['"', '\'']
        .iter()
        .find_map(|q| expr.strip_prefix(*q)?.strip_suffix(*q))
}

#[cfg(test)]
mod tests {
    use cable_core::{KernelState, OutputRecord, RecordError};
    use uuid::Uuid;

    use super::*;

    fn request(code: &str) -> (Uuid, Envelope) {
        let id = Uuid::new_v4();
        (id, Envelope::execute_request(id, code, "tester", "s"))
    }

    #[test]
    fn test_assignment_persists_between_requests() {
        let mut kernel = FakeKernel::new();
        let (_, first) = request("x = 42");
        let replies = kernel.respond(&first);
        assert_eq!(replies.len(), 3);

        let (id, second) = request("print(x)");
        let replies = kernel.respond(&second);
        let kinds: Vec<_> = replies.iter().map(Envelope::kind).collect();
        assert_eq!(kinds, ["status", "stream", "status", "execute_reply"]);
        assert!(replies.iter().all(|r| r.parent_id() == Some(id)));

        let out = OutputRecord::from_envelope(&replies[1]).unwrap();
        assert_eq!(out.text, "42\n");
        let reply = OutputRecord::from_envelope(&replies[3]).unwrap();
        assert_eq!(reply.execution_count, Some(2));
    }

    #[test]
    fn test_unbound_name_raises_name_error() {
        let mut kernel = FakeKernel::new();
        let (_, req) = request("print(y)");
        let replies = kernel.respond(&req);
        let reply = OutputRecord::from_envelope(replies.last().unwrap()).unwrap();
        match reply.error {
            Some(RecordError::Kernel(err)) => {
                assert_eq!(err.ename, "NameError");
                assert_eq!(err.evalue, "name 'y' is not defined");
            }
            other => panic!("expected kernel error, got {other:?}"),
        }
    }

    #[test]
    fn test_raise_and_display() {
        let mut kernel = FakeKernel::new();
        let (_, req) = request("display(1 + 2)\nraise ValueError(\"bad\")");
        let replies = kernel.respond(&req);
        let shown = OutputRecord::from_envelope(&replies[1]).unwrap();
        assert_eq!(shown.display_text().as_deref(), Some("3"));

        let reply = OutputRecord::from_envelope(replies.last().unwrap()).unwrap();
        assert!(matches!(reply.error, Some(RecordError::Kernel(e)) if e.ename == "ValueError" && e.evalue == "bad"));
    }

    #[test]
    fn test_status_order() {
        let mut kernel = FakeKernel::new();
        let (_, req) = request("1");
        let states: Vec<KernelState> = kernel
            .respond(&req)
            .iter()
            .filter(|e| e.kind() == kind::STATUS)
            .map(|e| KernelState::from(e.content["execution_state"].as_str().unwrap_or_default()))
            .collect();
        assert_eq!(states, [KernelState::Busy, KernelState::Idle]);
    }
}

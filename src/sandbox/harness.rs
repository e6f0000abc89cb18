//! The interpreter-side half of the sandbox.
//!
//! The harness reads one JSON request from stdin and writes one JSON reply
//! line to stdout. The reply never contains a traceback.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request sent to the harness on stdin.
#[derive(Debug, Serialize)]
pub(crate) struct HarnessRequest<'a> {
    pub code: &'a str,
    pub context: &'a Map<String, Value>,
    pub allowed_builtins: &'a [&'a str],
    pub max_memory_mb: u64,
    pub max_stdout_chars: usize,
}

/// How a harness run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ReplyKind {
    Ok,
    Exception,
    Memory,
    Forbidden,
}

/// Reply line written by the harness.
#[derive(Debug, Deserialize)]
pub(crate) struct HarnessReply {
    pub kind: ReplyKind,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub memory_used_mb: f64,
}

/// Builtins the analysis code may resolve.
pub(crate) const ALLOWED_BUILTINS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "frozenset",
    "int",
    "isinstance",
    "len",
    "list",
    "map",
    "max",
    "min",
    "pow",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "slice",
    "sorted",
    "str",
    "sum",
    "tuple",
    "zip",
    "True",
    "False",
    "None",
    "ArithmeticError",
    "Exception",
    "IndexError",
    "KeyError",
    "LookupError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

pub(crate) const HARNESS_SOURCE: &str = r#"
import ast
import builtins
import contextlib
import io
import json
import sys

try:
    import resource
except ImportError:
    resource = None


def reply(payload):
    payload["memory_used_mb"] = peak_memory_mb()
    try:
        line = json.dumps(payload, default=str, allow_nan=False)
    except ValueError:
        payload["result"] = repr(payload.get("result"))
        line = json.dumps(payload, default=str)
    sys.__stdout__.write(line + "\n")
    sys.__stdout__.flush()


def peak_memory_mb():
    if resource is None:
        return 0.0
    peak = resource.getrusage(resource.RUSAGE_SELF).ru_maxrss
    divisor = 1024.0 * 1024.0 if sys.platform == "darwin" else 1024.0
    return round(peak / divisor, 2)


def apply_memory_limit(limit_mb):
    if resource is None or limit_mb <= 0:
        return
    limit = limit_mb * 1024 * 1024
    try:
        resource.setrlimit(resource.RLIMIT_AS, (limit, limit))
    except (ValueError, OSError):
        pass


def forbidden_node(tree):
    for node in ast.walk(tree):
        if isinstance(node, (ast.Import, ast.ImportFrom)):
            return "import statement"
        if isinstance(node, ast.Attribute) and node.attr.startswith("_"):
            return "attribute '%s'" % node.attr
        if isinstance(node, ast.Name) and node.id.startswith("__"):
            return "name '%s'" % node.id
    return None


def main():
    request = json.loads(sys.stdin.buffer.read().decode("utf-8"))
    try:
        tree = ast.parse(request["code"], filename="<analysis>", mode="exec")
    except SyntaxError as exc:
        reply({"kind": "exception", "error_type": "SyntaxError", "error": str(exc)})
        return

    offending = forbidden_node(tree)
    if offending is not None:
        reply({"kind": "forbidden", "error_type": "ForbiddenName",
               "error": "access to %s is not allowed" % offending})
        return

    safe_builtins = {}
    for name in request["allowed_builtins"]:
        if hasattr(builtins, name):
            safe_builtins[name] = getattr(builtins, name)

    namespace = {"__builtins__": safe_builtins}
    for key, value in (request.get("context") or {}).items():
        if key.isidentifier() and not key.startswith("_"):
            namespace[key] = value

    code = compile(tree, "<analysis>", "exec")
    captured = io.StringIO()
    apply_memory_limit(int(request.get("max_memory_mb") or 0))

    try:
        with contextlib.redirect_stdout(captured):
            exec(code, namespace)
    except MemoryError:
        reply({"kind": "memory", "error_type": "MemoryError",
               "error": "memory limit exceeded"})
        return
    except NameError as exc:
        missing = getattr(exc, "name", None)
        kind = "forbidden" if missing and hasattr(builtins, missing) else "exception"
        reply({"kind": kind, "error_type": "NameError", "error": str(exc),
               "stdout": captured.getvalue()[: request["max_stdout_chars"]]})
        return
    except Exception as exc:
        reply({"kind": "exception", "error_type": type(exc).__name__,
               "error": str(exc)[:1000],
               "stdout": captured.getvalue()[: request["max_stdout_chars"]]})
        return

    reply({"kind": "ok", "result": namespace.get("result"),
           "stdout": captured.getvalue()[: request["max_stdout_chars"]]})


main()
"#;

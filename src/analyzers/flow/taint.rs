//! Simulated, non-executing taint walk over a parsed Python tree.
//!
//! Forward, flow-insensitive but scope-aware: per lexical scope we track
//! which local names are bound to tainted constructs (decoded data,
//! dynamically built strings, environment reads) and report when a tainted
//! value reaches a dangerous sink. Propagation covers plain assignment and
//! string concatenation only; there is no fixpoint iteration. False
//! negatives are expected and acceptable, crashes are not.

use crate::config::FlowConfig;
use rustc_hash::FxHashMap;
use tree_sitter::{Node, Tree};

/// Where a taint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintKind {
    /// Result of a decode/deobfuscation call.
    Decoded,
    /// Built by concatenating tainted pieces.
    Constructed,
    /// Read from the environment or a credential-shaped source.
    Environment,
}

#[derive(Debug, Clone, Copy)]
pub struct Taint {
    pub kind: TaintKind,
    /// Number of transformation steps between the source and this value.
    pub chain: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Exec,
    Import,
    Spawn,
    Net,
}

/// One tainted value reaching a sink.
#[derive(Debug, Clone)]
pub struct SinkHit {
    pub sink: SinkKind,
    /// Resolved callee name, e.g. "exec" or "requests.post".
    pub call: String,
    /// 1-based source line.
    pub line: usize,
    pub taint: Option<Taint>,
    /// An environment read happened in the same lexical scope.
    pub env_in_scope: bool,
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub hits: Vec<SinkHit>,
    /// The walk-depth ceiling was reached somewhere; coverage is partial.
    pub depth_exceeded: bool,
}

#[derive(Default)]
struct Scope {
    vars: FxHashMap<String, Taint>,
    env_read: bool,
}

pub struct TaintWalker<'a> {
    flow: &'a FlowConfig,
    source: &'a [u8],
    scopes: Vec<Scope>,
    /// Local name -> canonical dotted name, from import statements.
    aliases: FxHashMap<String, String>,
    outcome: WalkOutcome,
}

/// Run the simulated walk over a whole module.
pub fn walk(tree: &Tree, source: &[u8], flow: &FlowConfig) -> WalkOutcome {
    let mut walker = TaintWalker {
        flow,
        source,
        scopes: vec![Scope::default()],
        aliases: FxHashMap::default(),
        outcome: WalkOutcome::default(),
    };
    walker.visit(tree.root_node(), 0);
    walker.outcome
}

impl<'a> TaintWalker<'a> {
    fn text(&self, node: Node) -> &str {
        node.utf8_text(self.source).unwrap_or("")
    }

    /// Resolve a callee through the module's import aliases:
    /// `from base64 import b64decode as d` makes `d` equal
    /// `base64.b64decode`, `import subprocess as sp` maps `sp.run`.
    fn resolve(&self, raw: &str) -> String {
        if let Some(mapped) = self.aliases.get(raw) {
            return mapped.clone();
        }
        if let Some((head, rest)) = raw.split_once('.') {
            if let Some(mapped) = self.aliases.get(head) {
                return format!("{mapped}.{rest}");
            }
        }
        raw.to_string()
    }

    fn visit(&mut self, node: Node, depth: usize) {
        if depth > self.flow.max_walk_depth {
            self.outcome.depth_exceeded = true;
            return;
        }

        match node.kind() {
            "import_statement" => self.collect_import(node),
            "import_from_statement" => self.collect_from_import(node),
            "function_definition" | "class_definition" => {
                // New lexical scope; enclosing bindings stay visible.
                self.scopes.push(Scope::default());
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, depth + 1);
                }
                self.scopes.pop();
                return;
            }
            "assignment" => {
                if let (Some(left), Some(right)) =
                    (node.child_by_field_name("left"), node.child_by_field_name("right"))
                {
                    let taint = self.eval(right, depth + 1);
                    if left.kind() == "identifier" {
                        let name = self.text(left).to_string();
                        if let Some(scope) = self.scopes.last_mut() {
                            match taint {
                                Some(t) => {
                                    scope.vars.insert(name, t);
                                }
                                None => {
                                    scope.vars.remove(&name);
                                }
                            }
                        }
                    }
                }
            }
            "call" => self.process_call(node, depth),
            _ => {}
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child, depth + 1);
        }
    }

    fn collect_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "aliased_import" {
                if let (Some(name), Some(alias)) =
                    (child.child_by_field_name("name"), child.child_by_field_name("alias"))
                {
                    let name = self.text(name).to_string();
                    let alias = self.text(alias).to_string();
                    self.aliases.insert(alias, name);
                }
            }
        }
    }

    fn collect_from_import(&mut self, node: Node) {
        let Some(module) = node.child_by_field_name("module_name") else { return };
        let module_text = self.text(module).to_string();
        let module_id = module.id();

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.id() == module_id {
                continue;
            }
            match child.kind() {
                "dotted_name" | "identifier" => {
                    let name = self.text(child).to_string();
                    self.aliases.insert(name.clone(), format!("{module_text}.{name}"));
                }
                "aliased_import" => {
                    if let (Some(name), Some(alias)) =
                        (child.child_by_field_name("name"), child.child_by_field_name("alias"))
                    {
                        let name = self.text(name).to_string();
                        let alias = self.text(alias).to_string();
                        self.aliases.insert(alias, format!("{module_text}.{name}"));
                    }
                }
                _ => {}
            }
        }
    }

    fn mark_env_read(&mut self) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.env_read = true;
        }
    }

    fn lookup(&self, name: &str) -> Option<Taint> {
        // Innermost scope first; enclosing scopes are readable.
        self.scopes.iter().rev().find_map(|s| s.vars.get(name).copied())
    }

    fn is_env_call(&self, name: &str) -> bool {
        self.flow.env_calls.iter().any(|c| c == name)
    }

    /// Taint of the most direct tainted argument, positional or keyword.
    fn args_taint(&mut self, call: Node, depth: usize) -> Option<Taint> {
        let args = call.child_by_field_name("arguments")?;
        let mut cursor = args.walk();
        let children: Vec<Node> = args.named_children(&mut cursor).collect();
        let mut best: Option<Taint> = None;
        for child in children {
            let value = if child.kind() == "keyword_argument" {
                child.child_by_field_name("value")
            } else {
                Some(child)
            };
            let Some(value) = value else { continue };
            if let Some(t) = self.eval(value, depth + 1) {
                best = match best {
                    Some(b) if b.chain <= t.chain => Some(b),
                    _ => Some(t),
                };
            }
        }
        best
    }

    /// Best-effort taint of an expression. `None` means "not known to be
    /// tainted", never "proven safe".
    fn eval(&mut self, node: Node, depth: usize) -> Option<Taint> {
        if depth > self.flow.max_walk_depth {
            self.outcome.depth_exceeded = true;
            return None;
        }

        match node.kind() {
            "identifier" => self.lookup(self.text(node)),
            "call" => {
                let callee = node.child_by_field_name("function")?;
                let name = self.resolve(self.text(callee));
                let inner = self.args_taint(node, depth);

                if self.flow.decode_calls.iter().any(|c| *c == name) {
                    return Some(Taint {
                        kind: TaintKind::Decoded,
                        chain: inner.map_or(1, |t| t.chain + 1),
                    });
                }
                if self.is_env_call(&name) {
                    self.mark_env_read();
                    return Some(Taint { kind: TaintKind::Environment, chain: 1 });
                }
                // `tainted.decode("utf-8")` style method calls keep taint.
                if callee.kind() == "attribute" {
                    let attr = callee.child_by_field_name("attribute").map(|a| self.text(a));
                    if matches!(attr, Some("decode") | Some("strip") | Some("join")) {
                        if let Some(object) = callee.child_by_field_name("object") {
                            if let Some(t) = self.eval(object, depth + 1) {
                                return Some(Taint { kind: t.kind, chain: t.chain + 1 });
                            }
                        }
                    }
                }
                None
            }
            "binary_operator" => {
                let left = node.child_by_field_name("left").and_then(|n| self.eval(n, depth + 1));
                let right = node.child_by_field_name("right").and_then(|n| self.eval(n, depth + 1));
                match (left, right) {
                    (Some(l), Some(r)) => Some(Taint {
                        kind: TaintKind::Constructed,
                        chain: l.chain.max(r.chain),
                    }),
                    (Some(t), None) | (None, Some(t)) => Some(t),
                    (None, None) => None,
                }
            }
            "subscript" => {
                let value = node.child_by_field_name("value")?;
                if self.resolve(self.text(value)) == "os.environ" {
                    self.mark_env_read();
                    return Some(Taint { kind: TaintKind::Environment, chain: 1 });
                }
                self.eval(value, depth + 1)
            }
            "attribute" => {
                let full = self.resolve(self.text(node));
                if self.is_env_call(&full) {
                    self.mark_env_read();
                    return Some(Taint { kind: TaintKind::Environment, chain: 1 });
                }
                None
            }
            "parenthesized_expression" => {
                let child = node.named_child(0)?;
                self.eval(child, depth + 1)
            }
            "conditional_expression" | "tuple" | "expression_list" => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                children.into_iter().find_map(|c| self.eval(c, depth + 1))
            }
            _ => None,
        }
    }

    fn process_call(&mut self, node: Node, depth: usize) {
        let Some(callee) = node.child_by_field_name("function") else { return };
        let name = self.resolve(self.text(callee));
        let line = node.start_position().row + 1;

        if self.is_env_call(&name) {
            self.mark_env_read();
        }

        let sink = if self.flow.exec_sinks.iter().any(|s| *s == name) {
            Some(SinkKind::Exec)
        } else if self.flow.import_sinks.iter().any(|s| *s == name) {
            Some(SinkKind::Import)
        } else if self.flow.spawn_sinks.iter().any(|s| *s == name) {
            Some(SinkKind::Spawn)
        } else if self.flow.net_sinks.iter().any(|s| *s == name) {
            Some(SinkKind::Net)
        } else {
            None
        };
        let Some(sink) = sink else { return };

        let taint = self.args_taint(node, depth);
        let env_in_scope = self.scopes.last().is_some_and(|s| s.env_read);

        match sink {
            SinkKind::Net => {
                // Credential-exfiltration shape: a network send with an
                // environment read nearby in the same scope (or directly
                // tainted data in the arguments).
                let env_tainted =
                    matches!(taint, Some(Taint { kind: TaintKind::Environment, .. }));
                if env_in_scope || env_tainted {
                    self.outcome.hits.push(SinkHit {
                        sink,
                        call: name,
                        line,
                        taint,
                        env_in_scope,
                    });
                }
            }
            _ => {
                if taint.is_some() {
                    self.outcome.hits.push(SinkHit {
                        sink,
                        call: name,
                        line,
                        taint,
                        env_in_scope,
                    });
                }
            }
        }
    }
}

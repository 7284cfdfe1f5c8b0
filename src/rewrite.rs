//! The bottom-up rewrite pass: block normalization, statement tracking and
//! branch rewriting in a single traversal.
//!
//! Children are rewritten before their parents. When a parent re-renders a
//! child span (to brace a bare loop body, or to splice a ternary's arms
//! into a probe call) the child's own rewrites are already present in the
//! text it reads back, so nested rewrites compose without any offset
//! arithmetic.

use crate::buffer::SourceBuffer;
use crate::registry;
use crate::span::BranchRecord;
use crate::tree::{NodeId, SyntaxKind, SyntaxTree};

/// Everything the pass produces besides the rewritten text itself.
#[derive(Debug)]
pub struct RewriteOutput {
    /// One record per rewritten conditional, in visit order.
    pub branches: Vec<BranchRecord>,
    /// Line of every statement that received a counter, in visit order.
    pub tracked_lines: Vec<u32>,
}

/// Walks the decorated tree and applies the three rewrites.
pub struct Rewriter<'a> {
    file: &'a str,
    tree: &'a SyntaxTree,
    branches: Vec<BranchRecord>,
    tracked_lines: Vec<u32>,
}

impl<'a> Rewriter<'a> {
    pub fn new(file: &'a str, tree: &'a SyntaxTree) -> Self {
        Self {
            file,
            tree,
            branches: Vec::new(),
            tracked_lines: Vec::new(),
        }
    }

    /// Rewrite the whole tree into `buffer` and return what was collected.
    pub fn run(mut self, buffer: &mut SourceBuffer) -> RewriteOutput {
        self.visit(self.tree.root(), buffer);
        RewriteOutput {
            branches: self.branches,
            tracked_lines: self.tracked_lines,
        }
    }

    fn visit(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let tree = self.tree;
        for &child in &tree.node(id).children {
            self.visit(child, buffer);
        }
        self.rewrite(id, buffer);
    }

    fn rewrite(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let kind = self.tree.node(id).kind;
        if kind == SyntaxKind::TernaryExpression {
            self.rewrite_ternary(id, buffer);
            return;
        }
        if kind.needs_braced_bodies() {
            self.brace_bodies(id, buffer);
        }
        if kind.is_trackable() && !self.is_exempt(id) {
            self.track(id, buffer);
        }
    }

    /// Wrap the bare sub-statements of a control statement in `{...}` so
    /// the counter injected in front of them stays inside the construct.
    fn brace_bodies(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let tree = self.tree;
        if tree.node(id).kind == SyntaxKind::IfStatement {
            if let Some(consequence) = tree.field_child(id, "consequence") {
                self.brace(consequence, buffer);
            }
            // The grammar wraps the else branch in an else_clause node; the
            // statement inside is what gets braced.
            if let Some(alternative) = tree.field_child(id, "alternative") {
                if let Some(statement) = tree.statement_child(alternative) {
                    self.brace(statement, buffer);
                }
            }
        } else if let Some(body) = tree.field_child(id, "body") {
            self.brace(body, buffer);
        }
    }

    fn brace(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let node = self.tree.node(id);
        if node.kind == SyntaxKind::StatementBlock {
            return;
        }
        let range = node.start..node.end;
        let body = buffer.render(range.clone());
        buffer.replace(range, format!("{{{}}}", body));
    }

    /// Prefix a statement with a call recording its starting line.
    fn track(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let node = self.tree.node(id);
        let line = node.loc.start.line;
        let range = node.start..node.end;
        let current = buffer.render(range.clone());
        buffer.replace(
            range,
            format!(
                "{}('{}',{});{}",
                registry::LINE_FN,
                escape_js(self.file),
                line,
                current
            ),
        );
        self.tracked_lines.push(line);
    }

    /// Statements that already execute as part of an enclosing construct's
    /// accounting. A label must stay glued to its statement, and anything
    /// sitting in a `for` header executes as part of the loop's own control
    /// expressions, where a prefixed call would not even parse.
    fn is_exempt(&self, id: NodeId) -> bool {
        let tree = self.tree;
        let node = tree.node(id);
        let Some(parent) = node.parent else {
            return false;
        };
        match tree.node(parent).kind {
            SyntaxKind::LabeledStatement => true,
            SyntaxKind::ForStatement => matches!(
                node.field,
                Some("initializer") | Some("condition") | Some("increment")
            ),
            SyntaxKind::ForInStatement => node.field == Some("left"),
            _ => false,
        }
    }

    /// Rewrite `test ? a : b` so the test value flows through a probe that
    /// records which arm it selected, then hands the value back unchanged.
    fn rewrite_ternary(&mut self, id: NodeId, buffer: &mut SourceBuffer) {
        let tree = self.tree;
        let (Some(test), Some(consequence), Some(alternative)) = (
            tree.field_child(id, "condition"),
            tree.field_child(id, "consequence"),
            tree.field_child(id, "alternative"),
        ) else {
            return;
        };

        let node = tree.node(id);
        let line = node.loc.start.line;
        let column = node.loc.start.column;

        let test_node = tree.node(test);
        let consequence_node = tree.node(consequence);
        let alternative_node = tree.node(alternative);

        let test_src = buffer.render(test_node.start..test_node.end);
        let consequence_src = buffer.render(consequence_node.start..consequence_node.end);
        let alternative_src = buffer.render(alternative_node.start..alternative_node.end);

        self.branches.push(BranchRecord {
            line,
            column,
            consequent: consequence_node.loc,
            alternate: alternative_node.loc,
        });

        buffer.replace(
            node.start..node.end,
            format!(
                "{}('{}',{},{},{}) ?{}:{}",
                registry::BRANCH_FN,
                escape_js(self.file),
                line,
                column,
                test_src,
                consequence_src,
                alternative_src
            ),
        );
    }
}

/// Escape a path for embedding in a single-quoted script literal.
fn escape_js(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'")
}

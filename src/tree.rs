//! Parsing and the decorated syntax tree.
//!
//! Wraps the tree-sitter JavaScript grammar and flattens the parse into an
//! arena of decorated nodes. Every node carries its byte range, its
//! line/column extent, its parent's arena index, the grammar field it fills
//! in that parent, and a closed `SyntaxKind`. The rewriter walks this arena
//! instead of the raw cursor, so parent and field checks are plain index
//! lookups rather than live tree navigation.

use phf::phf_map;

use crate::error::InstrumentError;
use crate::span::SourceLocation;

/// Index of a node in the arena.
pub type NodeId = usize;

/// Grammar constructs the rewriter distinguishes; everything else is
/// `Other` and only gets visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    Program,
    ExpressionStatement,
    VariableDeclaration,
    LexicalDeclaration,
    IfStatement,
    ElseClause,
    WhileStatement,
    DoStatement,
    ForStatement,
    ForInStatement,
    WithStatement,
    SwitchStatement,
    LabeledStatement,
    BreakStatement,
    ContinueStatement,
    ReturnStatement,
    ThrowStatement,
    TryStatement,
    FunctionDeclaration,
    GeneratorFunctionDeclaration,
    StatementBlock,
    TernaryExpression,
    Comment,
    Other,
}

/// Grammar kind strings mapped to their `SyntaxKind`.
static KIND_MAP: phf::Map<&'static str, SyntaxKind> = phf_map! {
    "program" => SyntaxKind::Program,
    "expression_statement" => SyntaxKind::ExpressionStatement,
    "variable_declaration" => SyntaxKind::VariableDeclaration,
    "lexical_declaration" => SyntaxKind::LexicalDeclaration,
    "if_statement" => SyntaxKind::IfStatement,
    "else_clause" => SyntaxKind::ElseClause,
    "while_statement" => SyntaxKind::WhileStatement,
    "do_statement" => SyntaxKind::DoStatement,
    "for_statement" => SyntaxKind::ForStatement,
    "for_in_statement" => SyntaxKind::ForInStatement,
    "with_statement" => SyntaxKind::WithStatement,
    "switch_statement" => SyntaxKind::SwitchStatement,
    "labeled_statement" => SyntaxKind::LabeledStatement,
    "break_statement" => SyntaxKind::BreakStatement,
    "continue_statement" => SyntaxKind::ContinueStatement,
    "return_statement" => SyntaxKind::ReturnStatement,
    "throw_statement" => SyntaxKind::ThrowStatement,
    "try_statement" => SyntaxKind::TryStatement,
    "function_declaration" => SyntaxKind::FunctionDeclaration,
    "generator_function_declaration" => SyntaxKind::GeneratorFunctionDeclaration,
    "statement_block" => SyntaxKind::StatementBlock,
    "ternary_expression" => SyntaxKind::TernaryExpression,
    "comment" => SyntaxKind::Comment,
};

impl SyntaxKind {
    /// Map a grammar kind string; unknown kinds become `Other`.
    pub fn from_grammar(kind: &str) -> Self {
        KIND_MAP.get(kind).copied().unwrap_or(SyntaxKind::Other)
    }

    /// Statements that get a line counter prefixed.
    pub fn is_trackable(self) -> bool {
        matches!(
            self,
            SyntaxKind::ExpressionStatement
                | SyntaxKind::VariableDeclaration
                | SyntaxKind::LexicalDeclaration
                | SyntaxKind::IfStatement
                | SyntaxKind::WhileStatement
                | SyntaxKind::DoStatement
                | SyntaxKind::ForStatement
                | SyntaxKind::ForInStatement
                | SyntaxKind::WithStatement
                | SyntaxKind::SwitchStatement
                | SyntaxKind::BreakStatement
                | SyntaxKind::ContinueStatement
                | SyntaxKind::ReturnStatement
                | SyntaxKind::ThrowStatement
                | SyntaxKind::TryStatement
                | SyntaxKind::FunctionDeclaration
                | SyntaxKind::GeneratorFunctionDeclaration
        )
    }

    /// Control statements whose bare sub-statements get braced so a
    /// counter can be injected in front of them.
    pub fn needs_braced_bodies(self) -> bool {
        matches!(
            self,
            SyntaxKind::IfStatement
                | SyntaxKind::WhileStatement
                | SyntaxKind::DoStatement
                | SyntaxKind::ForStatement
                | SyntaxKind::ForInStatement
                | SyntaxKind::WithStatement
        )
    }
}

/// A decorated node: the spans and relationships the rewrite pass needs.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    /// Start byte offset in the parsed text.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// Line/column extent.
    pub loc: SourceLocation,
    /// Arena index of the parent; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Grammar field this node fills in its parent, when labelled.
    pub field: Option<&'static str>,
    /// Named children in source order.
    pub children: Vec<NodeId>,
}

/// Arena-backed parse result.
#[derive(Debug)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    root: NodeId,
}

impl SyntaxTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child of `id` filling the given grammar field.
    pub fn field_child(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].field == Some(field))
    }

    /// First non-comment child. Else-clause bodies carry no field label in
    /// the grammar, so they are looked up positionally.
    pub fn statement_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].kind != SyntaxKind::Comment)
    }

    pub fn parent_kind(&self, id: NodeId) -> Option<SyntaxKind> {
        self.nodes[id].parent.map(|parent| self.nodes[parent].kind)
    }
}

/// Parse JavaScript source into a decorated tree.
///
/// tree-sitter recovers from syntax errors, but a recovered tree would make
/// the rewriter silently skip the damaged region, so any ERROR or missing
/// node fails the whole file.
pub fn parse(file: &str, source: &str) -> Result<SyntaxTree, InstrumentError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .map_err(|e| InstrumentError::Parse {
            file: file.to_string(),
            detail: format!("grammar rejected: {}", e),
        })?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| InstrumentError::Parse {
            file: file.to_string(),
            detail: "parser produced no tree".to_string(),
        })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(InstrumentError::Parse {
            file: file.to_string(),
            detail: first_error_detail(root),
        });
    }

    Ok(build_arena(&tree))
}

/// Locate the first ERROR or missing node for the error message.
fn first_error_detail(root: tree_sitter::Node) -> String {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return format!("syntax error at {}:{}", pos.row + 1, pos.column);
        }
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    "syntax error".to_string()
}

fn build_arena(tree: &tree_sitter::Tree) -> SyntaxTree {
    let mut nodes = Vec::new();
    let mut cursor = tree.root_node().walk();
    let root = add_node(&mut nodes, &mut cursor, None);
    SyntaxTree { nodes, root }
}

/// Append the node under the cursor (and, recursively, its named
/// descendants) to the arena. The cursor is returned to its entry position.
fn add_node(
    nodes: &mut Vec<SyntaxNode>,
    cursor: &mut tree_sitter::TreeCursor,
    parent: Option<NodeId>,
) -> NodeId {
    let node = cursor.node();
    let id = nodes.len();
    nodes.push(SyntaxNode {
        kind: SyntaxKind::from_grammar(node.kind()),
        start: node.start_byte(),
        end: node.end_byte(),
        loc: SourceLocation::from_node(node),
        parent,
        field: cursor.field_name(),
        children: Vec::new(),
    });

    if cursor.goto_first_child() {
        loop {
            if cursor.node().is_named() {
                let child = add_node(nodes, cursor, Some(id));
                nodes[id].children.push(child);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        cursor.goto_parent();
    }

    id
}

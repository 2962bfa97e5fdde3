//! Thin wrappers around the embedded bash grammar.

use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::Tree;
use tree_sitter_bash::LANGUAGE as BASH;

/// Parse `src` with tree-sitter-bash. `None` means the grammar could not be
/// loaded or the parser gave up entirely; a tree with error nodes is still
/// returned and callers must check [`Tree::root_node`]'s `has_error`.
pub fn try_parse_bash(src: &str) -> Option<Tree> {
    let lang = BASH.into();
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;
    parser.parse(src, None)
}

/// Total preorder traversal. Every node in the tree is visited exactly once;
/// no node kind is skipped, which is what makes the analyzer's predicates
/// reliable on compound and control-flow commands.
pub fn walk_all<'t>(tree: &'t Tree) -> Vec<Node<'t>> {
    let mut nodes = Vec::new();
    let mut cursor = tree.root_node().walk();
    loop {
        nodes.push(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return nodes;
            }
        }
    }
}

/// Source text of a node, or an empty string when the span is not valid
/// UTF-8 (cannot happen for spans of a `&str` source, but the API is
/// fallible).
pub fn node_text<'s>(node: Node<'_>, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// True if `node` or any ancestor is a command/process substitution. Inner
/// commands of substitutions belong to the resolver, not to compound
/// decomposition.
pub fn inside_substitution(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if matches!(n.kind(), "command_substitution" | "process_substitution") {
            return true;
        }
        current = n.parent();
    }
    false
}

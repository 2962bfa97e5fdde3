//! AST predicates over the canonical command text.
//!
//! Three questions are asked of the parse tree: is the command word built
//! from variable expansions, is the command word itself a `$(…)`, and does
//! the command decompose into sub-commands the validator should judge
//! individually. A parse failure is an explicit marker on the result, and a
//! marker-bearing analysis never lets any predicate reach a benign
//! conclusion.

use crate::bash::inside_substitution;
use crate::bash::node_text;
use crate::bash::try_parse_bash;
use crate::bash::walk_all;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AstAnalysis {
    /// The parser raised or produced error nodes. Propagated to the policy
    /// engine; never swallowed.
    pub parse_failed: bool,
    /// Text of the first command whose command word contains a variable
    /// expansion (`$a$b`-style dispatch).
    pub variable_in_command_position: Option<String>,
    /// Text of the first command whose command word is a `$(…)`.
    pub substitution_in_exec_position: Option<String>,
    /// Source text of every simple command outside substitutions, in
    /// execution order. Two or more means the command is compound and each
    /// part recurses through the validator.
    pub sub_commands: Vec<String>,
}

impl AstAnalysis {
    pub fn is_compound(&self) -> bool {
        self.sub_commands.len() > 1
    }

    pub fn flagged(&self) -> bool {
        self.variable_in_command_position.is_some()
            || self.substitution_in_exec_position.is_some()
    }
}

pub fn analyze(text: &str) -> AstAnalysis {
    let Some(tree) = try_parse_bash(text) else {
        return AstAnalysis {
            parse_failed: true,
            ..Default::default()
        };
    };
    if tree.root_node().has_error() {
        return AstAnalysis {
            parse_failed: true,
            ..Default::default()
        };
    }

    let mut analysis = AstAnalysis::default();

    for node in walk_all(&tree) {
        if node.kind() != "command" {
            continue;
        }

        if !inside_substitution(node) {
            analysis.sub_commands.push(node_text(node, text).to_string());
        }

        let Some(name) = node.child_by_field_name("name") else {
            continue;
        };

        // The command word may be the expansion itself or a concatenation
        // containing one; scan the whole name subtree.
        let mut cursor = name.walk();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            match current.kind() {
                "simple_expansion" | "expansion" => {
                    if analysis.variable_in_command_position.is_none() {
                        analysis.variable_in_command_position =
                            Some(node_text(node, text).to_string());
                    }
                }
                "command_substitution" => {
                    if analysis.substitution_in_exec_position.is_none() {
                        analysis.substitution_in_exec_position =
                            Some(node_text(node, text).to_string());
                    }
                }
                _ => {}
            }
            for child in current.children(&mut cursor).collect::<Vec<_>>() {
                stack.push(child);
            }
        }
    }

    analysis
}

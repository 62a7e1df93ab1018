//! Syntax screening for model-proposed Python code.
//!
//! Advisory only: a defect is logged and surfaced to the caller, but the
//! code is persisted regardless so a human can salvage a near-miss fix.

use anyhow::{Result, anyhow};
use tree_sitter::Parser;

/// Check that `code` parses as Python. Returns the byte offset of the first
/// error node on failure.
pub fn check_python_syntax(code: &str) -> Result<()> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| anyhow!("load python grammar: {e}"))?;
    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("parser returned no tree"))?;
    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }
    let offset = first_error_offset(root).unwrap_or(0);
    Err(anyhow!("syntax error near byte {offset}"))
}

fn first_error_offset(node: tree_sitter::Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_byte());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(offset) = first_error_offset(child) {
            return Some(offset);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_python_passes() {
        let code = "import sys\n\ndef main():\n    print(sys.argv)\n\nmain()\n";
        check_python_syntax(code).expect("valid code");
    }

    #[test]
    fn broken_def_is_rejected_with_offset() {
        let err = check_python_syntax("def f(:\n    pass\n").unwrap_err();
        assert!(err.to_string().contains("syntax error near byte"));
    }

    #[test]
    fn empty_source_is_fine() {
        check_python_syntax("").expect("empty module parses");
    }
}

//! Parser strategy selection for Python source.
//!
//! Strategies are tried in the configured preference order: `Strict`
//! rejects trees with too many ERROR nodes, `Lenient` takes whatever the
//! grammar produced so partial findings can still be extracted. Malformed
//! source is a finding for the caller, never a fault.

use crate::config::{FlowConfig, ParserStrategy};
use tree_sitter::{Parser, Tree};

#[derive(Debug)]
pub struct ParsedSource {
    pub tree: Tree,
    /// True when the accepted tree contains ERROR or MISSING nodes.
    pub partial: bool,
}

/// Parse Python source with the configured strategy order. `Err` carries a
/// human-readable reason for the parse-error finding.
pub fn parse_python(flow: &FlowConfig, source: &str) -> Result<ParsedSource, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| format!("grammar unavailable: {e}"))?;

    let Some(tree) = parser.parse(source, None) else {
        return Err("parser produced no tree".to_string());
    };

    let (errors, total) = count_error_nodes(&tree);
    let ratio = if total == 0 { 0.0 } else { errors as f32 / total as f32 };
    let partial = errors > 0;

    for strategy in &flow.parsers {
        match strategy {
            ParserStrategy::Strict => {
                if ratio <= flow.strict_error_tolerance {
                    return Ok(ParsedSource { tree, partial });
                }
            }
            ParserStrategy::Lenient => {
                return Ok(ParsedSource { tree, partial });
            }
        }
    }

    Err(format!("{errors} of {total} nodes failed to parse ({:.0}% over tolerance)", ratio * 100.0))
}

fn count_error_nodes(tree: &Tree) -> (usize, usize) {
    let mut errors = 0usize;
    let mut total = 0usize;
    let mut cursor = tree.walk();

    // Iterative pre-order walk; adversarially deep trees must not blow the
    // stack here.
    loop {
        let node = cursor.node();
        total += 1;
        if node.is_error() || node.is_missing() {
            errors += 1;
        }

        if cursor.goto_first_child() {
            continue;
        }
        if cursor.goto_next_sibling() {
            continue;
        }
        loop {
            if !cursor.goto_parent() {
                return (errors, total);
            }
            if cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_source_parses_strict() {
        let flow = FlowConfig::default();
        let parsed = parse_python(&flow, "import os\nx = os.getenv('HOME')\n").unwrap();
        assert!(!parsed.partial);
    }

    #[test]
    fn broken_source_falls_back_to_lenient() {
        let flow = FlowConfig::default();
        // Half the statements are garbage; strict gives up, lenient accepts.
        let parsed = parse_python(&flow, "def f(:\n    ???\nx = eval(y)\n").unwrap();
        assert!(parsed.partial);
    }

    #[test]
    fn strict_only_configuration_rejects_garbage() {
        let flow = FlowConfig {
            parsers: vec![ParserStrategy::Strict],
            strict_error_tolerance: 0.0,
            ..FlowConfig::default()
        };
        assert!(parse_python(&flow, "def f(:\n    ???\n").is_err());
    }
}

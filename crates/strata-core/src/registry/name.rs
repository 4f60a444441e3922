use super::Registry;
use crate::expr::{CompareOp, ExprList};
use crate::{Expr, Result};

use indexmap::IndexMap;

/// The friendly-name expression of one class, over the given class alias.
///
/// The name spec's `%N$s` placeholders become field references, the rest of
/// the format string becomes literal pieces, the whole concatenated with no
/// separator. A class without a name spec is labelled by its key.
pub(crate) fn name_expression(registry: &Registry, class: &str, alias: &str) -> Result<Expr> {
    let descriptor = registry.class(class)?;
    let Some(spec) = &descriptor.name_spec else {
        return Ok(Expr::field(alias, "id"));
    };

    let mut pieces: Vec<Expr> = vec![];
    let mut literal = String::new();
    let mut chars = spec.format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        // %% escapes a literal percent sign
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }
        // a placeholder is %N$s; anything else is kept verbatim
        if chars.peek() == Some(&'$') {
            chars.next();
            if chars.peek() == Some(&'s') {
                chars.next();
                if let Some(index) = digits.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
                    if let Some(code) = spec.attributes.get(index) {
                        if !literal.is_empty() {
                            pieces.push(Expr::value(literal.as_str()));
                            literal.clear();
                        }
                        pieces.push(Expr::field(alias, code));
                        continue;
                    }
                }
            }
            literal.push('%');
            literal.push_str(&digits);
            literal.push('$');
        } else {
            literal.push('%');
            literal.push_str(&digits);
        }
    }
    if !literal.is_empty() {
        pieces.push(Expr::value(literal.as_str()));
    }
    if pieces.is_empty() {
        return Ok(Expr::field(alias, "id"));
    }
    Ok(Expr::concat(pieces))
}

/// The friendly name of a class with subclasses: concrete subclasses are
/// grouped by the rendered signature of their name expression, then the
/// groups chain into `IF(finalclass IN (classes), expr, fallback)` with the
/// first group as the innermost fallback.
pub(crate) fn extended_name_expression(
    registry: &Registry,
    class: &str,
    alias: &str,
) -> Result<Expr> {
    if registry.is_standalone(class)? {
        return name_expression(registry, class, alias);
    }

    struct Group {
        expression: Expr,
        classes: Vec<String>,
    }

    let mut groups: IndexMap<String, Group> = IndexMap::new();
    for sub in registry.child_classes_all(class)? {
        if registry.class(sub)?.abstract_class {
            continue;
        }
        let expression = name_expression(registry, sub, alias)?;
        let signature = expression.render();
        groups
            .entry(signature)
            .or_insert_with(|| Group {
                expression,
                classes: vec![],
            })
            .classes
            .push(sub.to_string());
    }

    let mut chained: Option<Expr> = None;
    for group in groups.into_values() {
        chained = Some(match chained {
            None => group.expression,
            Some(fallback) => {
                let condition = Expr::binary_op(
                    Expr::field(alias, "finalclass"),
                    CompareOp::In,
                    ExprList::from_strings(group.classes),
                );
                Expr::if_expr(condition, group.expression, fallback)
            }
        });
    }

    match chained {
        Some(expr) => Ok(expr),
        None => name_expression(registry, class, alias),
    }
}

use super::Attribute;
use crate::expr::CompareOp;

/// A search criterion published for one attribute: the comparison operators
/// a caller may use, and the operator a "loose" (user-typed) match maps to.
#[derive(Debug, Clone)]
pub struct FilterDef {
    pub code: String,
    pub operators: Vec<CompareOp>,
    pub loose_operator: CompareOp,
}

impl FilterDef {
    /// Text-like filter: loose matching means `LIKE`.
    pub fn text(code: impl Into<String>) -> FilterDef {
        FilterDef {
            code: code.into(),
            operators: vec![
                CompareOp::Eq,
                CompareOp::Ne,
                CompareOp::Like,
                CompareOp::NotLike,
                CompareOp::In,
                CompareOp::NotIn,
            ],
            loose_operator: CompareOp::Like,
        }
    }

    /// Key-like filter: loose matching means strict equality.
    pub fn key(code: impl Into<String>) -> FilterDef {
        FilterDef {
            code: code.into(),
            operators: vec![
                CompareOp::Eq,
                CompareOp::Ne,
                CompareOp::Gt,
                CompareOp::Ge,
                CompareOp::Lt,
                CompareOp::Le,
                CompareOp::In,
                CompareOp::NotIn,
            ],
            loose_operator: CompareOp::Eq,
        }
    }

    /// The filter published for a searchable attribute, or None for
    /// attributes that cannot appear in a condition (link sets).
    pub fn for_attribute(att: &Attribute) -> Option<FilterDef> {
        if !att.is_scalar() {
            return None;
        }
        if att.is_external_key() || att.is_final_class() {
            Some(FilterDef::key(&att.code))
        } else {
            Some(FilterDef::text(&att.code))
        }
    }
}
